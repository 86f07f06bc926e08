use std::sync::{Arc, Mutex, PoisonError};

use tracing::{debug, info};

use crate::config::LoggerConfig;
use crate::event::{EventPhase, LifecycleEvent, RunRef, StepPayload};
use crate::feedback::{FeedbackCollector, SkipFeedback};
use crate::record::Record;
use crate::sink::RecordSink;
use crate::tracker::RunStateTracker;
use crate::{LogError, RunId};

/// Listener attached to one orchestration graph.
///
/// Owns the live run state for its whole lifetime. Terminal events finalize
/// a record, ask for feedback when configured and hand the record to the
/// sink, all on the caller's thread.
#[derive(Debug)]
pub struct ChainLogger<S, F = SkipFeedback> {
    config: LoggerConfig,
    tracker: RunStateTracker,
    feedback: F,
    sink: S,
}

impl<S: RecordSink> ChainLogger<S, SkipFeedback> {
    /// Builds a logger that never asks for feedback.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] when the config is invalid.
    pub fn new(config: LoggerConfig, sink: S) -> Result<Self, LogError> {
        config.validate()?;
        let tracker = RunStateTracker::new(
            config.input_keyword.clone(),
            config.combine_all_actions_into_one_log,
        );
        Ok(Self {
            config,
            tracker,
            feedback: SkipFeedback,
            sink,
        })
    }
}

impl<S: RecordSink, F: FeedbackCollector> ChainLogger<S, F> {
    #[must_use]
    pub fn with_feedback<G: FeedbackCollector>(self, feedback: G) -> ChainLogger<S, G> {
        ChainLogger {
            config: self.config,
            tracker: self.tracker,
            feedback,
            sink: self.sink,
        }
    }

    #[must_use]
    pub fn config(&self) -> &LoggerConfig {
        &self.config
    }

    #[must_use]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    #[must_use]
    pub fn feedback(&self) -> &F {
        &self.feedback
    }

    #[must_use]
    pub fn live_runs(&self) -> usize {
        self.tracker.live_runs()
    }

    pub fn into_parts(self) -> (S, F) {
        (self.sink, self.feedback)
    }

    pub fn on_step_start(&mut self, run: &RunRef, payload: &StepPayload) {
        self.tracker.on_step_start(run, payload);
    }

    /// Handles an end event. Returns the persisted record when the event
    /// finalized one.
    ///
    /// # Errors
    /// Returns [`LogError::Feedback`] or [`LogError::Persistence`] when
    /// finalization fails. The run is no longer tracked in either case.
    pub fn on_step_end(
        &mut self,
        run: &RunRef,
        payload: &StepPayload,
        is_terminal: bool,
    ) -> Result<Option<Record>, LogError> {
        match self.tracker.on_step_end(run, payload, is_terminal) {
            Some(record) => self.finalize(record).map(Some),
            None => Ok(None),
        }
    }

    /// Drops a failed run, and its nested runs when it is top-level. Returns
    /// how many runs were discarded.
    pub fn on_step_error(&mut self, run_id: &RunId, message: &str) -> usize {
        self.tracker.on_step_error(run_id, message)
    }

    /// Routes one wire event to the matching handler.
    ///
    /// # Errors
    /// Propagates finalization failures from [`ChainLogger::on_step_end`].
    pub fn handle(&mut self, event: &LifecycleEvent) -> Result<Option<Record>, LogError> {
        let run = event.run_ref();
        match event.phase {
            EventPhase::Start => {
                self.on_step_start(&run, &event.classify());
                Ok(None)
            }
            EventPhase::End => self.on_step_end(&run, &event.classify(), event.is_terminal()),
            EventPhase::Error => {
                let message = error_message(&event.payload);
                let discarded = self.on_step_error(&run.run_id, &message);
                debug!(run_id = %run.run_id, discarded, "error event handled");
                Ok(None)
            }
        }
    }

    fn finalize(&mut self, mut record: Record) -> Result<Record, LogError> {
        let request = self.config.feedback_request();
        if record.is_top_level() && !request.is_empty() {
            debug!(run_id = %record.run_id, "requesting feedback");
            let feedback = self
                .feedback
                .collect(&record, request)
                .map_err(|err| LogError::Feedback(format!("{err:#}")))?;
            if request.rating {
                record.rating = feedback.rating;
            }
            if request.comments {
                record.comments = feedback.comments;
            }
        }

        self.sink
            .append(&record)
            .map_err(|err| LogError::Persistence(format!("{err:#}")))?;
        info!(
            run_id = %record.run_id,
            top_level_run_id = %record.top_level_run_id,
            inputs = record.inputs.len(),
            "record finalized"
        );
        Ok(record)
    }
}

fn error_message(payload: &serde_json::Value) -> String {
    match payload {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Object(map) => map
            .get("error")
            .or_else(|| map.get("message"))
            .map_or_else(|| payload.to_string(), crate::render_cell),
        other => other.to_string(),
    }
}

/// A logger shared by several threads. Event handling, feedback and the sink
/// append all run under one lock.
#[derive(Debug)]
pub struct SharedChainLogger<S, F = SkipFeedback> {
    inner: Arc<Mutex<ChainLogger<S, F>>>,
}

impl<S, F> Clone for SharedChainLogger<S, F> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: RecordSink, F: FeedbackCollector> SharedChainLogger<S, F> {
    #[must_use]
    pub fn new(logger: ChainLogger<S, F>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(logger)),
        }
    }

    /// # Errors
    /// Propagates finalization failures from [`ChainLogger::handle`].
    pub fn handle(&self, event: &LifecycleEvent) -> Result<Option<Record>, LogError> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handle(event)
    }

    #[must_use]
    pub fn live_runs(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .live_runs()
    }

    /// Runs `f` with exclusive access to the wrapped logger.
    pub fn with_logger<T>(&self, f: impl FnOnce(&mut ChainLogger<S, F>) -> T) -> T {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}
