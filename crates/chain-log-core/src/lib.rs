//! Lifecycle-event logging for language-model chain executions.
//!
//! A [`ChainLogger`] is attached to an orchestration graph and fed
//! [`LifecycleEvent`]s. Each live run is tracked by a [`RunStateTracker`];
//! fields are pulled out of typed [`StepPayload`]s by [`extract_fields`];
//! finished runs become [`Record`]s, optionally annotated through a
//! [`FeedbackCollector`], and are handed to a [`RecordSink`].

mod config;
mod event;
mod extract;
mod feedback;
mod lenient;
mod logger;
mod record;
mod sink;
mod tracker;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, UtcOffset};
use ulid::Ulid;

pub use config::LoggerConfig;
pub use event::{
    ChainEnd, ChainStart, EventPhase, LifecycleEvent, ModelEnd, ModelStart, Passage,
    RetrievalEnd, RetrievalStart, RunRef, StepKind, StepPayload, ToolEnd, ToolStart,
};
pub use extract::{
    extract_fields, Extraction, CHAIN_OUTPUT_KEYS, PASSAGE_SEPARATOR, SHADOWED_INPUT_FIELD,
};
pub use feedback::{
    Feedback, FeedbackCollector, FeedbackRequest, SkipFeedback, StdinFeedbackCollector,
};
pub use logger::{ChainLogger, SharedChainLogger};
pub use record::{is_fixed_column, render_cell, Record, LEADING_COLUMNS, TRAILING_COLUMNS};
pub use sink::{InMemoryRecordSink, RecordSink};
pub use tracker::RunStateTracker;

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum LogError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("feedback error: {0}")]
    Feedback(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("validation error: {0}")]
    Validation(String),
}

/// Identifier of one run, as assigned by the orchestration graph.
///
/// Graphs use whatever identifier scheme they like (UUIDs, ULIDs, counters),
/// so the value is kept verbatim. [`RunId::generate`] mints a ULID for hosts
/// that need to assign their own.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for RunId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RunId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RunId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<Ulid> for RunId {
    fn from(value: Ulid) -> Self {
        Self(value.to_string())
    }
}

/// Formats a timestamp as RFC3339 after normalizing to UTC.
///
/// # Errors
/// Returns [`LogError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, LogError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| LogError::Validation(format!("failed to format RFC3339 timestamp: {err}")))
}

/// Parses an RFC3339 timestamp and requires UTC (`Z`) offset.
///
/// # Errors
/// Returns [`LogError::Validation`] when parsing fails or the timestamp is
/// not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, LogError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| LogError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(LogError::Validation(
            "timestamp MUST use UTC offset Z".to_string(),
        ));
    }

    Ok(parsed)
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_keeps_graph_identifier_verbatim() {
        let run_id = RunId::from("3f2c9e1a-0000-4000-8000-000000000001");
        assert_eq!(run_id.as_str(), "3f2c9e1a-0000-4000-8000-000000000001");
        assert_eq!(
            serde_json::to_value(&run_id).ok(),
            Some(serde_json::json!("3f2c9e1a-0000-4000-8000-000000000001"))
        );
    }

    #[test]
    fn generated_run_ids_are_ulids() {
        let run_id = RunId::generate();
        assert!(Ulid::from_string(run_id.as_str()).is_ok());
        assert_ne!(run_id, RunId::generate());
    }

    #[test]
    fn rfc3339_round_trip_requires_utc() {
        let parsed = match parse_rfc3339_utc("2026-02-07T12:00:00Z") {
            Ok(value) => value,
            Err(err) => panic!("expected valid timestamp: {err}"),
        };
        assert_eq!(
            format_rfc3339(parsed),
            Ok("2026-02-07T12:00:00Z".to_string())
        );
        assert!(parse_rfc3339_utc("2026-02-07T12:00:00+02:00").is_err());
    }
}
