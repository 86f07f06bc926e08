//! CSV persistence for finished chain records.
//!
//! Each logger writes two files under its output directory:
//! `<user>_responses_all_fields_<experiment>.csv` holds every record with all
//! discovered input columns, and `<user>_responses_subset_of_fields_<experiment>.csv`
//! holds top-level records with a fixed short column set.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use chain_log_core::{render_cell, LoggerConfig, Record, RecordSink, TRAILING_COLUMNS};
use serde::Serialize;
use tracing::{debug, info};
use ulid::Ulid;

pub const ALL_FIELDS_TAG: &str = "responses_all_fields";
pub const SUBSET_TAG: &str = "responses_subset_of_fields";

/// Columns of the subset file, in order.
pub const SUBSET_COLUMNS: [&str; 7] = [
    "timestamp",
    "run_id",
    "input",
    "output",
    "duration_ms",
    "rating",
    "comments",
];

/// File name for one `(user, experiment)` pair. Spaces become underscores.
#[must_use]
pub fn log_file_name(user_name: &str, experiment_name: &str, tag: &str) -> String {
    format!(
        "{}_{tag}_{}.csv",
        user_name.replace(' ', "_"),
        experiment_name.replace(' ', "_")
    )
}

/// [`RecordSink`] writing one `(user, experiment)` pair's log files.
///
/// Every record goes to the all-fields file; top-level records also go to the
/// subset file. A record carrying columns the file has not seen yet widens
/// the header in place, leaving empty cells in older rows. The files are
/// opened per append, so several sinks pointed at the same directory across
/// restarts keep extending the same logs.
#[derive(Debug, Clone)]
pub struct CsvRecordSink {
    enabled: bool,
    all_fields_path: PathBuf,
    subset_path: PathBuf,
}

impl CsvRecordSink {
    pub fn new(dir: impl AsRef<Path>, user_name: &str, experiment_name: &str) -> Self {
        let dir = dir.as_ref();
        Self {
            enabled: true,
            all_fields_path: dir.join(log_file_name(user_name, experiment_name, ALL_FIELDS_TAG)),
            subset_path: dir.join(log_file_name(user_name, experiment_name, SUBSET_TAG)),
        }
    }

    /// Builds a sink from logger options. With `output_csv` off the sink
    /// accepts every record and touches nothing.
    #[must_use]
    pub fn from_config(config: &LoggerConfig) -> Self {
        let mut sink = Self::new(&config.path, &config.user_name, &config.experiment_name);
        sink.enabled = config.output_csv;
        sink
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn all_fields_path(&self) -> &Path {
        &self.all_fields_path
    }

    #[must_use]
    pub fn subset_path(&self) -> &Path {
        &self.subset_path
    }
}

impl RecordSink for CsvRecordSink {
    fn append(&mut self, record: &Record) -> Result<()> {
        if !self.enabled {
            debug!(run_id = %record.run_id, "csv output disabled; record not written");
            return Ok(());
        }

        let row = record.row().context("failed to lay out record row")?;
        append_row(&self.all_fields_path, &row)?;

        if record.is_top_level() {
            append_row(&self.subset_path, &subset_row(record, &row))?;
        }
        Ok(())
    }
}

fn subset_row(record: &Record, row: &[(String, String)]) -> Vec<(String, String)> {
    let cell = |column: &str| {
        row.iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.clone())
            .unwrap_or_default()
    };
    let input = record.inputs.get("input").map(render_cell).unwrap_or_default();

    SUBSET_COLUMNS
        .iter()
        .map(|column| {
            let value = if *column == "input" {
                input.clone()
            } else {
                cell(column)
            };
            ((*column).to_string(), value)
        })
        .collect()
}

/// Appends one row to `path`, creating the file or widening its header as
/// needed.
///
/// # Errors
/// Returns an error when the file cannot be read, rewritten or appended to.
pub fn append_row(path: &Path, row: &[(String, String)]) -> Result<()> {
    let columns: Vec<String> = row.iter().map(|(column, _)| column.clone()).collect();

    let existing = read_header(path)?;
    let Some(header) = existing else {
        return create_with_row(path, &columns, row);
    };

    match widen_header(&header, &columns) {
        Some(widened) => rewrite_widened(path, &header, &widened, row),
        None => {
            let buffer = encode_rows(&[project(&header, row)])?;
            let mut file = OpenOptions::new()
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open {} for append", path.display()))?;
            file.write_all(&buffer)
                .with_context(|| format!("failed to append to {}", path.display()))?;
            file.flush()
                .with_context(|| format!("failed to flush {}", path.display()))?;
            Ok(())
        }
    }
}

/// Header of an existing log file. A missing or zero-length file has none.
fn read_header(path: &Path) -> Result<Option<Vec<String>>> {
    match fs::metadata(path) {
        Ok(meta) if meta.len() > 0 => {}
        Ok(_) => return Ok(None),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to stat {}", path.display()));
        }
    }

    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let header = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    Ok(Some(header))
}

/// Columns to add for a row, inserted ahead of the trailing columns.
/// Returns `None` when the header already covers the row.
#[must_use]
pub fn widen_header(header: &[String], columns: &[String]) -> Option<Vec<String>> {
    let added: Vec<&String> = columns
        .iter()
        .filter(|column| !header.contains(column))
        .collect();
    if added.is_empty() {
        return None;
    }

    let insert_at = header
        .iter()
        .position(|column| TRAILING_COLUMNS.contains(&column.as_str()))
        .unwrap_or(header.len());

    let mut widened = Vec::with_capacity(header.len() + added.len());
    widened.extend_from_slice(&header[..insert_at]);
    widened.extend(added.into_iter().cloned());
    widened.extend_from_slice(&header[insert_at..]);
    Some(widened)
}

/// Cells of `row` in `header` order; columns the row lacks stay empty.
fn project(header: &[String], row: &[(String, String)]) -> Vec<String> {
    let cells: HashMap<&str, &str> = row
        .iter()
        .map(|(column, value)| (column.as_str(), value.as_str()))
        .collect();
    header
        .iter()
        .map(|column| cells.get(column.as_str()).copied().unwrap_or_default().to_string())
        .collect()
}

fn encode_rows(rows: &[Vec<String>]) -> Result<Vec<u8>> {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(Vec::new());
    for row in rows {
        writer.write_record(row).context("failed to encode csv row")?;
    }
    writer
        .into_inner()
        .map_err(|err| anyhow!("failed to flush csv buffer: {}", err.error()))
}

fn create_with_row(path: &Path, columns: &[String], row: &[(String, String)]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }

    let buffer = encode_rows(&[columns.to_vec(), project(columns, row)])?;
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(&buffer)
        .with_context(|| format!("failed to write {}", path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    info!(path = %path.display(), columns = columns.len(), "created record log");
    Ok(())
}

fn rewrite_widened(
    path: &Path,
    header: &[String],
    widened: &[String],
    row: &[(String, String)],
) -> Result<()> {
    let summary = inspect(path)?;

    let mut rows = Vec::with_capacity(summary.rows.len() + 2);
    rows.push(widened.to_vec());
    for old in &summary.rows {
        let pairs: Vec<(String, String)> = header
            .iter()
            .cloned()
            .zip(old.iter().cloned())
            .collect();
        rows.push(project(widened, &pairs));
    }
    rows.push(project(widened, row));
    let buffer = encode_rows(&rows)?;

    let temp_path = temp_sibling(path);
    let write_result = File::create(&temp_path)
        .and_then(|mut file| {
            file.write_all(&buffer)?;
            file.sync_all()
        })
        .with_context(|| format!("failed to write {}", temp_path.display()));
    if let Err(err) = write_result {
        let _ = fs::remove_file(&temp_path);
        return Err(err);
    }

    if let Err(err) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(err).with_context(|| {
            format!(
                "failed to replace {} with {}",
                path.display(),
                temp_path.display()
            )
        });
    }

    info!(
        path = %path.display(),
        added = widened.len() - header.len(),
        rows = summary.rows.len(),
        "widened record log header"
    );
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.{}.tmp", Ulid::new()))
}

/// Contents of a log file, read back for review.
#[derive(Debug, Clone, Serialize, Eq, PartialEq)]
pub struct CsvLogSummary {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl CsvLogSummary {
    /// Values of one column, one per row. Short rows yield empty cells.
    #[must_use]
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let index = self.header.iter().position(|column| column == name)?;
        Some(
            self.rows
                .iter()
                .map(|row| row.get(index).map_or("", String::as_str))
                .collect(),
        )
    }
}

/// Reads a log file back.
///
/// # Errors
/// Returns an error when the file cannot be opened or is not valid CSV.
pub fn inspect(path: &Path) -> Result<CsvLogSummary> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    let header = reader
        .headers()
        .with_context(|| format!("failed to read header of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result.with_context(|| format!("failed to read row of {}", path.display()))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(CsvLogSummary { header, rows })
}
