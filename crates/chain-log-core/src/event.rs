use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::lenient;
use crate::RunId;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventPhase {
    Start,
    End,
    Error,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    Chain,
    Model,
    Retriever,
    Tool,
}

impl StepKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Chain => "chain",
            Self::Model => "model",
            Self::Retriever => "retriever",
            Self::Tool => "tool",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "chain" => Some(Self::Chain),
            "model" | "llm" => Some(Self::Model),
            "retriever" | "retrieval" => Some(Self::Retriever),
            "tool" | "action" => Some(Self::Tool),
            _ => None,
        }
    }
}

/// The run an event belongs to, plus its parent when the graph nests runs.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct RunRef {
    pub run_id: RunId,
    pub parent_run_id: Option<RunId>,
}

impl RunRef {
    #[must_use]
    pub fn top_level(run_id: impl Into<RunId>) -> Self {
        Self {
            run_id: run_id.into(),
            parent_run_id: None,
        }
    }

    #[must_use]
    pub fn nested(run_id: impl Into<RunId>, parent_run_id: impl Into<RunId>) -> Self {
        Self {
            run_id: run_id.into(),
            parent_run_id: Some(parent_run_id.into()),
        }
    }
}

/// One lifecycle notification as emitted by an orchestration graph.
///
/// `terminal` only matters for `end` events and defaults to `true`: most
/// graphs emit exactly one end per run identifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LifecycleEvent {
    pub run_id: RunId,
    #[serde(default)]
    pub parent_run_id: Option<RunId>,
    pub phase: EventPhase,
    pub step_kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
    #[serde(default)]
    pub payload: Value,
}

impl LifecycleEvent {
    #[must_use]
    pub fn run_ref(&self) -> RunRef {
        RunRef {
            run_id: self.run_id.clone(),
            parent_run_id: self.parent_run_id.clone(),
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.terminal.unwrap_or(true)
    }

    #[must_use]
    pub fn classify(&self) -> StepPayload {
        StepPayload::classify(&self.step_kind, self.phase, &self.payload)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChainStart {
    #[serde(default, deserialize_with = "lenient::text")]
    pub chain_type: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub prompt_template: Option<String>,
    #[serde(flatten)]
    pub inputs: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ChainEnd {
    #[serde(flatten)]
    pub outputs: Map<String, Value>,
}

/// Model invocation start. Every key not named below is a decoding
/// parameter (temperature, `top_k`, `max_tokens`, ...).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ModelStart {
    #[serde(default, deserialize_with = "lenient::text")]
    pub model_id: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub prompt_template: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub prompt: Option<String>,
    #[serde(default, deserialize_with = "lenient::texts")]
    pub prompts: Vec<String>,
    #[serde(default, deserialize_with = "lenient::kwargs")]
    pub model_kwargs: Map<String, Value>,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelEnd {
    #[serde(alias = "output", deserialize_with = "lenient::required_text")]
    pub text: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalStart {
    #[serde(default, deserialize_with = "lenient::text")]
    pub retriever: Option<String>,
    #[serde(default, deserialize_with = "lenient::text")]
    pub query: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum Passage {
    Text(String),
    Document {
        page_content: String,
        #[serde(default)]
        metadata: Map<String, Value>,
    },
}

impl Passage {
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) => text,
            Self::Document { page_content, .. } => page_content,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RetrievalEnd {
    #[serde(default, deserialize_with = "lenient::text")]
    pub retriever: Option<String>,
    #[serde(default, deserialize_with = "lenient::passages")]
    pub documents: Vec<Passage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ToolStart {
    #[serde(default, deserialize_with = "lenient::text")]
    pub tool: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolEnd {
    #[serde(deserialize_with = "lenient::required_text")]
    pub output: String,
}

/// Payload of a lifecycle event, resolved to the shape its step kind and
/// phase imply.
#[derive(Debug, Clone, PartialEq)]
pub enum StepPayload {
    ChainStart(ChainStart),
    ChainEnd(ChainEnd),
    ModelStart(ModelStart),
    ModelEnd(ModelEnd),
    RetrievalStart(RetrievalStart),
    RetrievalEnd(RetrievalEnd),
    ToolStart(ToolStart),
    ToolEnd(ToolEnd),
    Unrecognized { step_kind: String, payload: Value },
}

impl StepPayload {
    /// Resolves a raw payload into its typed variant.
    ///
    /// Unknown step kinds, error phases and payloads that do not decode into
    /// the expected shape all become [`StepPayload::Unrecognized`].
    #[must_use]
    pub fn classify(step_kind: &str, phase: EventPhase, payload: &Value) -> Self {
        let typed = match (StepKind::parse(step_kind), phase) {
            (Some(StepKind::Chain), EventPhase::Start) => decode(payload).map(Self::ChainStart),
            (Some(StepKind::Chain), EventPhase::End) => decode(payload).map(Self::ChainEnd),
            (Some(StepKind::Model), EventPhase::Start) => decode(payload).map(Self::ModelStart),
            (Some(StepKind::Model), EventPhase::End) => decode(payload).map(Self::ModelEnd),
            (Some(StepKind::Retriever), EventPhase::Start) => {
                decode(payload).map(Self::RetrievalStart)
            }
            (Some(StepKind::Retriever), EventPhase::End) => {
                decode(payload).map(Self::RetrievalEnd)
            }
            (Some(StepKind::Tool), EventPhase::Start) => decode(payload).map(Self::ToolStart),
            (Some(StepKind::Tool), EventPhase::End) => decode(payload).map(Self::ToolEnd),
            (_, EventPhase::Error) | (None, _) => None,
        };

        typed.unwrap_or_else(|| Self::Unrecognized {
            step_kind: step_kind.to_string(),
            payload: payload.clone(),
        })
    }

    #[must_use]
    pub fn step_kind(&self) -> &str {
        match self {
            Self::ChainStart(_) | Self::ChainEnd(_) => StepKind::Chain.as_str(),
            Self::ModelStart(_) | Self::ModelEnd(_) => StepKind::Model.as_str(),
            Self::RetrievalStart(_) | Self::RetrievalEnd(_) => StepKind::Retriever.as_str(),
            Self::ToolStart(_) | Self::ToolEnd(_) => StepKind::Tool.as_str(),
            Self::Unrecognized { step_kind, .. } => step_kind,
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    if !payload.is_object() {
        return None;
    }
    serde_json::from_value(payload.clone()).ok()
}
