use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::feedback::FeedbackRequest;
use crate::LogError;

/// Options of one logger instance. Field defaults match the notebook
/// defaults the logger has always shipped with.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct LoggerConfig {
    pub output_csv: bool,
    pub request_rating: bool,
    pub request_comments: bool,
    pub user_name: String,
    pub experiment_name: String,
    pub path: PathBuf,
    pub input_keyword: String,
    pub combine_all_actions_into_one_log: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            output_csv: true,
            request_rating: false,
            request_comments: false,
            user_name: "user".to_string(),
            experiment_name: "default".to_string(),
            path: PathBuf::from("."),
            input_keyword: "question".to_string(),
            combine_all_actions_into_one_log: true,
        }
    }
}

impl LoggerConfig {
    /// Validates naming fields used for file identity and extraction.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] when a required name is blank.
    pub fn validate(&self) -> Result<(), LogError> {
        for (name, value) in [
            ("user_name", &self.user_name),
            ("experiment_name", &self.experiment_name),
            ("input_keyword", &self.input_keyword),
        ] {
            if value.trim().is_empty() {
                return Err(LogError::Configuration(format!(
                    "{name} MUST be non-empty"
                )));
            }
        }

        if self
            .user_name
            .chars()
            .chain(self.experiment_name.chars())
            .any(std::path::is_separator)
        {
            return Err(LogError::Configuration(
                "user_name and experiment_name MUST NOT contain path separators".to_string(),
            ));
        }

        Ok(())
    }

    /// Decodes and validates a config from JSON. Missing keys take defaults.
    ///
    /// # Errors
    /// Returns [`LogError::Configuration`] when decoding fails or decoded
    /// values are invalid.
    pub fn from_json(value: &Value) -> Result<Self, LogError> {
        let config: Self = serde_json::from_value(value.clone()).map_err(|err| {
            LogError::Configuration(format!("invalid logger config JSON payload: {err}"))
        })?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn feedback_request(&self) -> FeedbackRequest {
        FeedbackRequest {
            rating: self.request_rating,
            comments: self.request_comments,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_keys_take_defaults() {
        let config = match LoggerConfig::from_json(&json!({"experiment_name": "jokes"})) {
            Ok(value) => value,
            Err(err) => panic!("expected valid config: {err}"),
        };
        assert_eq!(config.experiment_name, "jokes");
        assert_eq!(config.user_name, "user");
        assert_eq!(config.input_keyword, "question");
        assert!(config.output_csv);
        assert!(config.combine_all_actions_into_one_log);
        assert!(config.feedback_request().is_empty());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result = LoggerConfig::from_json(&json!({"output_json": true}));
        assert!(matches!(result, Err(LogError::Configuration(_))));
    }

    #[test]
    fn blank_names_are_rejected() {
        let result = LoggerConfig::from_json(&json!({"input_keyword": "  "}));
        assert_eq!(
            result,
            Err(LogError::Configuration(
                "input_keyword MUST be non-empty".to_string()
            ))
        );

        let result = LoggerConfig::from_json(&json!({"user_name": "a/b"}));
        assert!(matches!(result, Err(LogError::Configuration(_))));
    }
}
