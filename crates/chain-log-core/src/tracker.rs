use std::collections::HashMap;

use serde_json::{Map, Value};
use time::OffsetDateTime;
use tracing::{debug, warn};

use crate::event::{RunRef, StepPayload};
use crate::extract::{extract_fields, Extraction};
use crate::record::Record;
use crate::{now_utc, RunId};

#[derive(Debug, Clone)]
struct RunAccumulator {
    top_level_run_id: RunId,
    started_at: OffsetDateTime,
    fields: Map<String, Value>,
}

/// Live per-run state between a run's first event and its terminal event.
///
/// With `combine_all_actions` set, fields of nested runs land in the
/// accumulator of their top-level run as they arrive, so a top-level run
/// yields a single record. Otherwise every run keeps its own fields and
/// yields its own record.
#[derive(Debug, Clone)]
pub struct RunStateTracker {
    input_keyword: String,
    combine_all_actions: bool,
    live: HashMap<RunId, RunAccumulator>,
}

impl RunStateTracker {
    #[must_use]
    pub fn new(input_keyword: impl Into<String>, combine_all_actions: bool) -> Self {
        Self {
            input_keyword: input_keyword.into(),
            combine_all_actions,
            live: HashMap::new(),
        }
    }

    #[must_use]
    pub fn live_runs(&self) -> usize {
        self.live.len()
    }

    #[must_use]
    pub fn is_live(&self, run_id: &RunId) -> bool {
        self.live.contains_key(run_id)
    }

    pub fn on_step_start(&mut self, run: &RunRef, payload: &StepPayload) {
        self.ensure_live(run);
        let extraction = self.extract(run, payload);
        self.merge(&run.run_id, extraction.fields);
    }

    /// Merges an end event and, when terminal, finalizes the run.
    ///
    /// Returns the finished record when the run produced one. The run's
    /// accumulator is gone after a terminal event whatever the result.
    pub fn on_step_end(
        &mut self,
        run: &RunRef,
        payload: &StepPayload,
        is_terminal: bool,
    ) -> Option<Record> {
        if !self.live.contains_key(&run.run_id) {
            warn!(
                run_id = %run.run_id,
                step_kind = payload.step_kind(),
                "end event for a run that is not live; ignoring"
            );
            return None;
        }

        let extraction = self.extract(run, payload);
        self.merge(&run.run_id, extraction.fields);

        if !is_terminal {
            return None;
        }

        let accumulator = self.live.remove(&run.run_id)?;
        let is_top_level = accumulator.top_level_run_id == run.run_id;

        if is_top_level {
            self.discard_nested(&run.run_id);
        } else if self.combine_all_actions {
            debug!(
                run_id = %run.run_id,
                top_level_run_id = %accumulator.top_level_run_id,
                "nested run finished; fields already merged into top-level run"
            );
            return None;
        }

        let Some(output) = extraction.output else {
            warn!(
                run_id = %run.run_id,
                step_kind = payload.step_kind(),
                "terminal event carried no output; run dropped without a record"
            );
            return None;
        };

        let timestamp = now_utc();
        let elapsed = (timestamp - accumulator.started_at).whole_milliseconds();

        Some(Record {
            timestamp,
            run_id: run.run_id.clone(),
            top_level_run_id: accumulator.top_level_run_id,
            duration_ms: u64::try_from(elapsed).unwrap_or(0),
            inputs: accumulator.fields,
            output,
            rating: None,
            comments: None,
        })
    }

    /// Drops a failed run without producing a record. Returns how many
    /// accumulators were discarded.
    pub fn on_step_error(&mut self, run_id: &RunId, message: &str) -> usize {
        let Some(accumulator) = self.live.remove(run_id) else {
            warn!(%run_id, error = message, "error event for a run that is not live; ignoring");
            return 0;
        };

        let mut discarded = 1;
        if accumulator.top_level_run_id == *run_id {
            discarded += self.discard_nested(run_id);
        }
        warn!(%run_id, error = message, discarded, "run failed; no record written");
        discarded
    }

    fn ensure_live(&mut self, run: &RunRef) {
        if self.live.contains_key(&run.run_id) {
            return;
        }

        let top_level_run_id = match &run.parent_run_id {
            Some(parent) => match self.live.get(parent) {
                Some(parent_accumulator) => parent_accumulator.top_level_run_id.clone(),
                None => {
                    warn!(
                        run_id = %run.run_id,
                        parent_run_id = %parent,
                        "parent run is not live; tracking run as top-level"
                    );
                    run.run_id.clone()
                }
            },
            None => run.run_id.clone(),
        };

        debug!(run_id = %run.run_id, %top_level_run_id, "tracking new run");
        self.live.insert(
            run.run_id.clone(),
            RunAccumulator {
                top_level_run_id,
                started_at: now_utc(),
                fields: Map::new(),
            },
        );
    }

    fn extract(&self, run: &RunRef, payload: &StepPayload) -> Extraction {
        let extraction = extract_fields(payload, &self.input_keyword);
        if let StepPayload::Unrecognized { step_kind, .. } = payload {
            debug!(
                run_id = %run.run_id,
                step_kind = step_kind.as_str(),
                "unrecognized payload; nothing extracted"
            );
        }
        extraction
    }

    /// Last write wins per field name. A re-written field keeps the position
    /// it was first seen at.
    fn merge(&mut self, run_id: &RunId, fields: Map<String, Value>) {
        if fields.is_empty() {
            return;
        }

        let target = match self.live.get(run_id) {
            Some(accumulator)
                if self.combine_all_actions
                    && self.live.contains_key(&accumulator.top_level_run_id) =>
            {
                accumulator.top_level_run_id.clone()
            }
            _ => run_id.clone(),
        };

        if let Some(accumulator) = self.live.get_mut(&target) {
            for (key, value) in fields {
                accumulator.fields.insert(key, value);
            }
        }
    }

    fn discard_nested(&mut self, top_level_run_id: &RunId) -> usize {
        let before = self.live.len();
        self.live
            .retain(|_, accumulator| accumulator.top_level_run_id != *top_level_run_id);
        let discarded = before - self.live.len();
        if discarded > 0 {
            warn!(
                %top_level_run_id,
                discarded,
                "top-level run ended with nested runs still live; discarding them"
            );
        }
        discarded
    }
}
