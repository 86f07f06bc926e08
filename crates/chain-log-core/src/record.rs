use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::{format_rfc3339, LogError, RunId};

/// Columns written before the discovered input columns.
pub const LEADING_COLUMNS: [&str; 4] = ["timestamp", "run_id", "top_level_run_id", "duration_ms"];

/// Columns written after the discovered input columns.
pub const TRAILING_COLUMNS: [&str; 3] = ["output", "rating", "comments"];

/// One finished run, ready to persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub run_id: RunId,
    pub top_level_run_id: RunId,
    pub duration_ms: u64,
    pub inputs: Map<String, Value>,
    pub output: String,
    pub rating: Option<String>,
    pub comments: Option<String>,
}

impl Record {
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.run_id == self.top_level_run_id
    }

    /// Column name an input field is written under.
    ///
    /// Names of the form `input_`*n* + fixed column (`output`, `input_output`,
    /// `input_input_output`, ...) get one more `input_` prefix; all other names
    /// are kept. Distinct keys therefore always land in distinct columns.
    #[must_use]
    pub fn input_column(key: &str) -> String {
        let mut base = key;
        while let Some(rest) = base.strip_prefix("input_") {
            base = rest;
        }
        if is_fixed_column(base) {
            format!("input_{key}")
        } else {
            key.to_string()
        }
    }

    /// Flattens the record into `(column, cell)` pairs in file layout order.
    ///
    /// # Errors
    /// Returns [`LogError::Validation`] when the timestamp cannot be formatted.
    pub fn row(&self) -> Result<Vec<(String, String)>, LogError> {
        let mut row = Vec::with_capacity(
            LEADING_COLUMNS.len() + self.inputs.len() + TRAILING_COLUMNS.len(),
        );

        row.push(("timestamp".to_string(), format_rfc3339(self.timestamp)?));
        row.push(("run_id".to_string(), self.run_id.to_string()));
        row.push((
            "top_level_run_id".to_string(),
            self.top_level_run_id.to_string(),
        ));
        row.push(("duration_ms".to_string(), self.duration_ms.to_string()));

        for (key, value) in &self.inputs {
            row.push((Self::input_column(key), render_cell(value)));
        }

        row.push(("output".to_string(), self.output.clone()));
        row.push((
            "rating".to_string(),
            self.rating.clone().unwrap_or_default(),
        ));
        row.push((
            "comments".to_string(),
            self.comments.clone().unwrap_or_default(),
        ));

        Ok(row)
    }
}

#[must_use]
pub fn is_fixed_column(name: &str) -> bool {
    LEADING_COLUMNS.contains(&name) || TRAILING_COLUMNS.contains(&name)
}

/// Renders a field value as a flat-file cell.
#[must_use]
pub fn render_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(_) | Value::Number(_) | Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse_rfc3339_utc;
    use serde_json::json;

    fn fixture_record() -> Record {
        let timestamp = match parse_rfc3339_utc("2026-02-07T12:00:00Z") {
            Ok(value) => value,
            Err(err) => panic!("invalid fixture timestamp: {err}"),
        };
        let mut inputs = Map::new();
        inputs.insert("input".to_string(), json!("lions"));
        inputs.insert("model_id".to_string(), json!("m1"));
        inputs.insert("temperature".to_string(), json!(0.1));
        inputs.insert("output".to_string(), json!("shadowed"));

        Record {
            timestamp,
            run_id: RunId::from("r1"),
            top_level_run_id: RunId::from("r1"),
            duration_ms: 42,
            inputs,
            output: "Why did the lion cross the road?".to_string(),
            rating: Some("5".to_string()),
            comments: None,
        }
    }

    #[test]
    fn row_follows_fixed_layout_with_inputs_in_first_seen_order() {
        let row = match fixture_record().row() {
            Ok(value) => value,
            Err(err) => panic!("row failed: {err}"),
        };
        let columns: Vec<&str> = row.iter().map(|(column, _)| column.as_str()).collect();
        assert_eq!(
            columns,
            vec![
                "timestamp",
                "run_id",
                "top_level_run_id",
                "duration_ms",
                "input",
                "model_id",
                "temperature",
                "input_output",
                "output",
                "rating",
                "comments",
            ]
        );

        let cells: Vec<&str> = row.iter().map(|(_, cell)| cell.as_str()).collect();
        assert_eq!(cells[0], "2026-02-07T12:00:00Z");
        assert_eq!(cells[3], "42");
        assert_eq!(cells[6], "0.1");
        assert_eq!(cells[9], "5");
        assert_eq!(cells[10], "");
    }

    #[test]
    fn escaped_input_names_never_collide() {
        let mut record = fixture_record();
        record.inputs = Map::new();
        record.inputs.insert("input".to_string(), json!("lions"));
        record.inputs.insert("output".to_string(), json!("A"));
        record.inputs.insert("input_output".to_string(), json!("B"));
        record.inputs.insert("input_input_output".to_string(), json!("C"));
        record.inputs.insert("input_topic".to_string(), json!("D"));

        let row = match record.row() {
            Ok(value) => value,
            Err(err) => panic!("row failed: {err}"),
        };
        let inputs: Vec<(&str, &str)> = row[4..row.len() - 3]
            .iter()
            .map(|(column, cell)| (column.as_str(), cell.as_str()))
            .collect();
        assert_eq!(
            inputs,
            vec![
                ("input", "lions"),
                ("input_output", "A"),
                ("input_input_output", "B"),
                ("input_input_input_output", "C"),
                ("input_topic", "D"),
            ]
        );
    }

    #[test]
    fn cells_render_structured_values_as_compact_json() {
        assert_eq!(render_cell(&Value::Null), "");
        assert_eq!(render_cell(&json!(true)), "true");
        assert_eq!(render_cell(&json!(["a", 1])), r#"["a",1]"#);
        assert_eq!(render_cell(&json!({"k": "v"})), r#"{"k":"v"}"#);
    }

    #[test]
    fn top_level_records_finalize_their_own_run() {
        let mut record = fixture_record();
        assert!(record.is_top_level());
        record.top_level_run_id = RunId::from("parent");
        assert!(!record.is_top_level());
    }
}
