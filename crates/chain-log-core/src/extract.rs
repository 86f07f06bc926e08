use serde_json::{Map, Value};

use crate::event::{Passage, StepPayload};

/// Keys a chain's end payload may carry its answer under, in lookup order.
pub const CHAIN_OUTPUT_KEYS: [&str; 5] = ["output", "answer", "text", "output_text", "response"];

pub const PASSAGE_SEPARATOR: &str = "\n\n";

/// Field a raw `input` chain variable moves to when another keyword claims
/// the `input` field.
pub const SHADOWED_INPUT_FIELD: &str = "input_template_variable_value";

/// Fields discovered in one payload, plus the step's textual output if it
/// has one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extraction {
    pub fields: Map<String, Value>,
    pub output: Option<String>,
}

impl Extraction {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.output.is_none()
    }

    fn insert(&mut self, key: &str, value: Value) {
        self.fields.insert(key.to_string(), value);
    }

    fn insert_opt(&mut self, key: &str, value: Option<&String>) {
        if let Some(value) = value {
            self.insert(key, Value::String(value.clone()));
        }
    }
}

/// Pulls the loggable fields out of a step payload.
///
/// `input_keyword` names the chain input holding the user's raw question; it
/// is normalized to the field `input` so topologies that call it `question`
/// or `query` line up in one column.
#[must_use]
pub fn extract_fields(payload: &StepPayload, input_keyword: &str) -> Extraction {
    let mut extraction = Extraction::default();

    match payload {
        StepPayload::ChainStart(start) => {
            extraction.insert_opt("chain_type", start.chain_type.as_ref());
            extraction.insert_opt("prompt_template", start.prompt_template.as_ref());

            let keyword_value = start.inputs.get(input_keyword);
            if let Some(value) = keyword_value {
                extraction.insert("input", value.clone());
            }
            for (key, value) in &start.inputs {
                if key == input_keyword {
                    continue;
                }
                if key == "input" && keyword_value.is_some() {
                    extraction.insert(SHADOWED_INPUT_FIELD, value.clone());
                    continue;
                }
                extraction.insert(key, value.clone());
            }
        }
        StepPayload::ModelStart(start) => {
            extraction.insert_opt("model_id", start.model_id.as_ref());
            extraction.insert_opt("prompt_template", start.prompt_template.as_ref());

            let prompt = match (&start.prompt, start.prompts.as_slice()) {
                (Some(prompt), _) => Some(prompt.clone()),
                (None, []) => None,
                (None, prompts) => Some(prompts.join(PASSAGE_SEPARATOR)),
            };
            if let Some(prompt) = prompt {
                extraction.insert("prompt", Value::String(prompt));
            }

            for (key, value) in start.params.iter().chain(&start.model_kwargs) {
                extraction.insert(key, value.clone());
            }
        }
        StepPayload::ModelEnd(end) => {
            extraction.output = Some(end.text.clone());
        }
        StepPayload::RetrievalStart(start) => {
            extraction.insert_opt("retriever", start.retriever.as_ref());
            extraction.insert_opt("retrieval_query", start.query.as_ref());
        }
        StepPayload::RetrievalEnd(end) => {
            extraction.insert_opt("retriever", end.retriever.as_ref());
            let context = end
                .documents
                .iter()
                .map(Passage::text)
                .collect::<Vec<_>>()
                .join(PASSAGE_SEPARATOR);
            extraction.insert("retrieved_context", Value::String(context.clone()));
            extraction.output = Some(context);
        }
        StepPayload::ToolStart(start) => {
            extraction.insert_opt("tool_name", start.tool.as_ref());
            if let Some(input) = &start.input {
                extraction.insert("tool_input", input.clone());
            }
        }
        StepPayload::ToolEnd(end) => {
            extraction.output = Some(end.output.clone());
        }
        StepPayload::ChainEnd(end) => {
            extraction.output = chain_output(&end.outputs);
        }
        StepPayload::Unrecognized { .. } => {}
    }

    extraction
}

fn chain_output(outputs: &Map<String, Value>) -> Option<String> {
    for key in CHAIN_OUTPUT_KEYS {
        if let Some(Value::String(text)) = outputs.get(key) {
            return Some(text.clone());
        }
    }

    let mut strings = outputs.values().filter_map(Value::as_str);
    match (strings.next(), strings.next()) {
        (Some(only), None) => Some(only.to_string()),
        _ => None,
    }
}
