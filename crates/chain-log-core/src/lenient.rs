//! Field deserializers that never fail on a badly typed value.
//!
//! Graphs are loose about payload shapes: a model id may arrive as a number,
//! a prompt template as an object, `model_kwargs` as a Python repr string.
//! One odd key must not cost the rest of the payload, so every known field is
//! decoded through one of these helpers and a mismatch degrades to text.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use serde_json::{Map, Value};

use crate::event::Passage;
use crate::record::render_cell;

/// Strings verbatim, other non-null values as compact JSON text.
pub(crate) fn text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => None,
        other => Some(render_cell(&other)),
    })
}

/// Like [`text`], but the field must carry a value.
pub(crate) fn required_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    text(deserializer)?.ok_or_else(|| D::Error::custom("expected a value, found null"))
}

/// A list of prompts. A lone string counts as a one-element list.
pub(crate) fn texts<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .filter(|item| !item.is_null())
            .map(render_cell)
            .collect(),
        other => vec![render_cell(&other)],
    })
}

/// Extra model parameters. Accepts an object, a JSON object string, or a
/// Python dict repr. Anything else is kept whole under `model_kwargs`.
pub(crate) fn kwargs<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::Null => Map::new(),
        Value::Object(map) => map,
        Value::String(repr) => {
            parse_dict_repr(&repr).unwrap_or_else(|| raw_kwargs(Value::String(repr)))
        }
        other => raw_kwargs(other),
    })
}

fn raw_kwargs(value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert("model_kwargs".to_string(), value);
    map
}

/// Retrieved passages. Items that are neither text nor a document become
/// their JSON text.
pub(crate) fn passages<'de, D>(deserializer: D) -> Result<Vec<Passage>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => vec![other],
    };

    Ok(items
        .into_iter()
        .filter(|item| !item.is_null())
        .map(|item| {
            serde_json::from_value::<Passage>(item.clone())
                .unwrap_or_else(|_| Passage::Text(render_cell(&item)))
        })
        .collect())
}

/// Parses `{'top_k': 250, 'stop': None}` style dict reprs.
pub(crate) fn parse_dict_repr(repr: &str) -> Option<Map<String, Value>> {
    let trimmed = repr.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    if let Ok(Value::Object(map)) = serde_json::from_str(trimmed) {
        return Some(map);
    }
    match serde_json::from_str(&python_literal_to_json(trimmed)) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn python_literal_to_json(literal: &str) -> String {
    let mut out = String::with_capacity(literal.len());
    let mut chars = literal.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {
                out.push('"');
                while let Some(inner) = chars.next() {
                    match inner {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => {}
                        },
                        _ if inner == c => break,
                        '"' => out.push_str("\\\""),
                        _ => out.push(inner),
                    }
                }
                out.push('"');
            }
            _ if c.is_ascii_alphabetic() => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match word.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    _ => out.push_str(&word),
                }
            }
            '(' => out.push('['),
            ')' => out.push(']'),
            _ => out.push(c),
        }
    }

    out
}
