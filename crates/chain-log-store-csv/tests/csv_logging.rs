use std::fs;
use std::path::{Path, PathBuf};

use chain_log_core::{ChainLogger, EventPhase, LifecycleEvent, LoggerConfig, RunId};
use chain_log_store_csv::{inspect, CsvRecordSink, SUBSET_COLUMNS};
use serde_json::{json, Value};
use ulid::Ulid;

fn temp_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("chain-log-{name}-{}", Ulid::new()));
    fs::create_dir_all(&dir).unwrap_or_else(|err| panic!("failed to create {}: {err}", dir.display()));
    dir
}

fn event(run_id: &str, phase: EventPhase, step_kind: &str, payload: Value) -> LifecycleEvent {
    LifecycleEvent {
        run_id: RunId::from(run_id),
        parent_run_id: None,
        phase,
        step_kind: step_kind.to_string(),
        terminal: None,
        payload,
    }
}

fn config(dir: &Path, output_csv: bool) -> LoggerConfig {
    LoggerConfig {
        output_csv,
        user_name: "Ada Lovelace".to_string(),
        experiment_name: "lion jokes".to_string(),
        path: dir.to_path_buf(),
        input_keyword: "input".to_string(),
        ..LoggerConfig::default()
    }
}

fn logger(config: LoggerConfig) -> ChainLogger<CsvRecordSink> {
    let sink = CsvRecordSink::from_config(&config);
    ChainLogger::new(config, sink).unwrap_or_else(|err| panic!("invalid config: {err}"))
}

fn run_joke(logger: &mut ChainLogger<CsvRecordSink>, run_id: &str, model_payload: Value) {
    for item in [
        event(run_id, EventPhase::Start, "chain", json!({"input": "lions"})),
        event(run_id, EventPhase::Start, "model", model_payload),
        event(
            run_id,
            EventPhase::End,
            "chain",
            json!({"output": "Why did the lion cross the road? ..."}),
        ),
    ] {
        if let Err(err) = logger.handle(&item) {
            panic!("event handling failed: {err}");
        }
    }
}

#[test]
fn disabled_output_creates_no_file() {
    let dir = temp_dir("disabled");
    let mut logger = logger(config(&dir, false));
    run_joke(&mut logger, "r1", json!({"model_id": "m1", "temperature": 0.1}));

    let entries = fs::read_dir(&dir)
        .unwrap_or_else(|err| panic!("failed to list {}: {err}", dir.display()))
        .count();
    assert_eq!(entries, 0);
    assert!(!logger.sink().all_fields_path().exists());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn lions_scenario_writes_both_files() {
    let dir = temp_dir("lions");
    let mut logger = logger(config(&dir, true));
    run_joke(&mut logger, "r1", json!({"model_id": "m1", "temperature": 0.1}));

    let all_fields_path = dir.join("Ada_Lovelace_responses_all_fields_lion_jokes.csv");
    assert_eq!(logger.sink().all_fields_path(), all_fields_path.as_path());

    let all_fields = inspect(&all_fields_path).unwrap_or_else(|err| panic!("{err:#}"));
    assert_eq!(
        all_fields.header,
        vec![
            "timestamp",
            "run_id",
            "top_level_run_id",
            "duration_ms",
            "input",
            "model_id",
            "temperature",
            "output",
            "rating",
            "comments",
        ]
    );
    assert_eq!(all_fields.rows.len(), 1);
    assert_eq!(all_fields.column("input"), Some(vec!["lions"]));
    assert_eq!(all_fields.column("model_id"), Some(vec!["m1"]));
    assert_eq!(all_fields.column("temperature"), Some(vec!["0.1"]));
    assert_eq!(
        all_fields.column("output"),
        Some(vec!["Why did the lion cross the road? ..."])
    );
    assert_eq!(all_fields.column("rating"), Some(vec![""]));

    let subset = inspect(logger.sink().subset_path()).unwrap_or_else(|err| panic!("{err:#}"));
    assert_eq!(subset.header, SUBSET_COLUMNS.to_vec());
    assert_eq!(subset.column("input"), Some(vec!["lions"]));
    assert_eq!(subset.column("run_id"), Some(vec!["r1"]));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn new_input_column_widens_header_and_keeps_old_rows() {
    let dir = temp_dir("widen");
    {
        let mut first = logger(config(&dir, true));
        run_joke(&mut first, "r1", json!({"model_id": "m1", "temperature": 0.1}));
    }

    let mut second = logger(config(&dir, true));
    run_joke(
        &mut second,
        "r2",
        json!({"model_id": "m1", "temperature": 0.1, "top_k": 250}),
    );

    let summary = inspect(second.sink().all_fields_path()).unwrap_or_else(|err| panic!("{err:#}"));
    assert_eq!(
        summary.header,
        vec![
            "timestamp",
            "run_id",
            "top_level_run_id",
            "duration_ms",
            "input",
            "model_id",
            "temperature",
            "top_k",
            "output",
            "rating",
            "comments",
        ]
    );
    assert_eq!(summary.column("run_id"), Some(vec!["r1", "r2"]));
    assert_eq!(summary.column("top_k"), Some(vec!["", "250"]));
    assert_eq!(summary.column("temperature"), Some(vec!["0.1", "0.1"]));
    for row in &summary.rows {
        assert_eq!(row.len(), summary.header.len());
    }

    let leftovers: Vec<_> = fs::read_dir(&dir)
        .unwrap_or_else(|err| panic!("failed to list {}: {err}", dir.display()))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".tmp"))
        .collect();
    assert!(leftovers.is_empty());

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn narrower_record_appends_with_empty_cells() {
    let dir = temp_dir("narrow");
    let mut logger = logger(config(&dir, true));
    run_joke(&mut logger, "r1", json!({"model_id": "m1", "temperature": 0.1}));
    run_joke(&mut logger, "r2", json!({"model_id": "m2"}));

    let summary =
        inspect(logger.sink().all_fields_path()).unwrap_or_else(|err| panic!("{err:#}"));
    assert_eq!(summary.header.len(), 10);
    assert_eq!(summary.column("temperature"), Some(vec!["0.1", ""]));
    assert_eq!(summary.column("model_id"), Some(vec!["m1", "m2"]));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn inputs_named_like_fixed_columns_keep_every_value() {
    let dir = temp_dir("collide");
    let mut logger = logger(config(&dir, true));
    for item in [
        event(
            "r1",
            EventPhase::Start,
            "chain",
            json!({"input": "lions", "output": "A", "input_output": "B"}),
        ),
        event("r1", EventPhase::End, "chain", json!({"answer": "roar"})),
    ] {
        if let Err(err) = logger.handle(&item) {
            panic!("event handling failed: {err}");
        }
    }

    let summary =
        inspect(logger.sink().all_fields_path()).unwrap_or_else(|err| panic!("{err:#}"));
    assert_eq!(
        summary.header,
        vec![
            "timestamp",
            "run_id",
            "top_level_run_id",
            "duration_ms",
            "input",
            "input_output",
            "input_input_output",
            "output",
            "rating",
            "comments",
        ]
    );
    assert_eq!(summary.column("input_output"), Some(vec!["A"]));
    assert_eq!(summary.column("input_input_output"), Some(vec!["B"]));
    assert_eq!(summary.column("output"), Some(vec!["roar"]));

    let _ = fs::remove_dir_all(&dir);
}
