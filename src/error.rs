//! Error types for modelgate

use thiserror::Error;

/// Result type alias for modelgate
pub type Result<T> = std::result::Result<T, Error>;

/// modelgate errors
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Malformed `vendor:model` identifier
    #[error("Invalid model id '{0}': expected format 'vendor:model'")]
    InvalidModelId(String),

    /// Every routing candidate was statically or automatically disabled
    #[error("No available vendor for model '{model}'")]
    NoAvailableVendor {
        /// Requested model
        model: String,
    },

    /// Failure tracker reported an error
    #[error("Failure tracker error: {0}")]
    Tracker(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a tracker error
    pub fn tracker(message: impl Into<String>) -> Self {
        Self::Tracker(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_model_id_message_names_expected_format() {
        let err = Error::InvalidModelId("gpt-4".to_string());
        let msg = err.to_string();
        assert!(msg.contains("gpt-4"));
        assert!(msg.contains("vendor:model"));
    }

    #[test]
    fn tracker_error_message() {
        let err = Error::tracker("boom");
        assert_eq!(err.to_string(), "Failure tracker error: boom");
    }

    #[test]
    fn json_error_converts_with_question_mark() {
        fn parse(s: &str) -> Result<serde_json::Value> {
            Ok(serde_json::from_str(s)?)
        }
        let err = parse("{").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().starts_with("JSON error: "));
    }
}
