
use std::fs;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chain_log_core::{
    ChainLogger, FeedbackCollector, LifecycleEvent, LoggerConfig, RecordSink,
    StdinFeedbackCollector,
};
use chain_log_store_csv::{inspect, CsvRecordSink};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Parser)]
#[command(name = "chainlog")]
#[command(about = "Log language-model chain runs to CSV")]
pub struct Cli {
    /// Fallback log filter when `RUST_LOG` is unset.
    #[arg(long, default_value = "warn", global = true)]
    pub log_level: String,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Replays a JSONL stream of lifecycle events through a logger.
    Ingest(IngestArgs),
    /// Prints the header and rows of an existing log file as JSON.
    Inspect(InspectArgs),
}

#[derive(Debug, Args)]
pub struct IngestArgs {
    /// JSONL event file, or `-` for stdin.
    #[arg(long)]
    pub events: PathBuf,
    /// JSON logger config; flags below override it.
    #[arg(long)]
    pub config: Option<PathBuf>,
    #[arg(long)]
    pub path: Option<PathBuf>,
    #[arg(long)]
    pub user_name: Option<String>,
    #[arg(long)]
    pub experiment_name: Option<String>,
    #[arg(long)]
    pub input_keyword: Option<String>,
    #[arg(long, default_value_t = false)]
    pub request_rating: bool,
    #[arg(long, default_value_t = false)]
    pub request_comments: bool,
    /// Write one record per nested run instead of merging into the parent.
    #[arg(long, default_value_t = false)]
    pub separate_actions: bool,
    #[arg(long, default_value_t = false)]
    pub no_csv: bool,
}

#[derive(Debug, Args)]
pub struct InspectArgs {
    #[arg(long)]
    pub file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct IngestSummary {
    pub events: usize,
    pub records: usize,
    pub live_runs: usize,
    pub output_csv: bool,
    pub all_fields_path: PathBuf,
    pub subset_path: PathBuf,
}

/// Installs the stderr `fmt` subscriber. `RUST_LOG` wins over `fallback`.
pub fn init_tracing(fallback: &str) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(fallback))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .try_init();
}

/// Executes a parsed command.
///
/// # Errors
/// Returns an error when config loading, event decoding, feedback or
/// persistence fails.
pub fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Ingest(args) => {
            let summary = run_ingest(&args)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
        Command::Inspect(args) => {
            let summary = inspect(&args.file)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            Ok(())
        }
    }
}

/// Loads the optional config file and applies flag overrides.
///
/// # Errors
/// Returns an error when the config file is unreadable or the merged config
/// is invalid.
pub fn resolve_config(args: &IngestArgs) -> Result<LoggerConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let body = fs::read_to_string(path)
                .with_context(|| format!("failed to read config {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_str(&body)
                .with_context(|| format!("config {} is not JSON", path.display()))?;
            LoggerConfig::from_json(&value)?
        }
        None => LoggerConfig::default(),
    };

    if let Some(path) = &args.path {
        config.path.clone_from(path);
    }
    if let Some(user_name) = &args.user_name {
        config.user_name.clone_from(user_name);
    }
    if let Some(experiment_name) = &args.experiment_name {
        config.experiment_name.clone_from(experiment_name);
    }
    if let Some(input_keyword) = &args.input_keyword {
        config.input_keyword.clone_from(input_keyword);
    }
    config.request_rating |= args.request_rating;
    config.request_comments |= args.request_comments;
    if args.separate_actions {
        config.combine_all_actions_into_one_log = false;
    }
    if args.no_csv {
        config.output_csv = false;
    }

    config.validate()?;
    Ok(config)
}

fn run_ingest(args: &IngestArgs) -> Result<IngestSummary> {
    let config = resolve_config(args)?;
    let reads_stdin = args.events == Path::new("-");
    if reads_stdin && !config.feedback_request().is_empty() {
        return Err(anyhow!(
            "--events - cannot be combined with feedback prompts; both read stdin"
        ));
    }

    let sink = CsvRecordSink::from_config(&config);
    let logger = ChainLogger::new(config.clone(), sink)?;

    let events: Box<dyn BufRead> = if reads_stdin {
        Box::new(io::stdin().lock())
    } else {
        let file = fs::File::open(&args.events)
            .with_context(|| format!("failed to open events {}", args.events.display()))?;
        Box::new(BufReader::new(file))
    };

    let (events_seen, records, live_runs, sink) = if config.feedback_request().is_empty() {
        let mut logger = logger;
        let (events_seen, records) = ingest_events(&mut logger, events)?;
        let live_runs = logger.live_runs();
        (events_seen, records, live_runs, logger.into_parts().0)
    } else {
        let mut logger = logger.with_feedback(StdinFeedbackCollector::stdio());
        let (events_seen, records) = ingest_events(&mut logger, events)?;
        let live_runs = logger.live_runs();
        (events_seen, records, live_runs, logger.into_parts().0)
    };

    Ok(IngestSummary {
        events: events_seen,
        records,
        live_runs,
        output_csv: sink.is_enabled(),
        all_fields_path: sink.all_fields_path().to_path_buf(),
        subset_path: sink.subset_path().to_path_buf(),
    })
}

/// Feeds every JSONL event in `reader` to `logger`. Blank lines are skipped.
/// Returns `(events handled, records persisted)`.
///
/// # Errors
/// Returns an error naming the line when an event does not decode or when
/// finalizing a record fails.
pub fn ingest_events<S: RecordSink, F: FeedbackCollector>(
    logger: &mut ChainLogger<S, F>,
    reader: impl BufRead,
) -> Result<(usize, usize)> {
    let mut events = 0;
    let mut records = 0;

    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.with_context(|| format!("failed to read event line {line_no}"))?;
        if line.trim().is_empty() {
            continue;
        }

        let event: LifecycleEvent = serde_json::from_str(&line)
            .with_context(|| format!("invalid lifecycle event on line {line_no}"))?;
        events += 1;
        if logger
            .handle(&event)
            .with_context(|| format!("failed handling event on line {line_no}"))?
            .is_some()
        {
            records += 1;
        }
    }

    if logger.live_runs() > 0 {
        debug!(live_runs = logger.live_runs(), "runs still live at end of input");
    }
    info!(events, records, "ingest finished");
    Ok((events, records))
}
