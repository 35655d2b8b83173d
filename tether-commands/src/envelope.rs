//! Uniform command response envelope
//!
//! Every command answers `{success: true, data}` or
//! `{success: false, error: {message, suggestion, code}}`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Stable error codes
pub mod codes {
    pub const GENERAL_ERROR: &str = "GENERAL_ERROR";
    pub const ENGINE_STARTING: &str = "ENGINE_STARTING";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const DOWNLOAD_FAILED: &str = "DOWNLOAD_FAILED";
    pub const JOB_NOT_FOUND: &str = "JOB_NOT_FOUND";
    pub const UNKNOWN_COMMAND: &str = "UNKNOWN_COMMAND";
}

const DEFAULT_SUGGESTION: &str = "Please try again";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
    pub suggestion: String,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl CommandResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Serialize `data` into a success envelope
    pub fn ok_from<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(value) => Self::ok(value),
            Err(e) => Self::error(
                format!("Failed to encode response: {}", e),
                DEFAULT_SUGGESTION,
                codes::GENERAL_ERROR,
            ),
        }
    }

    pub fn error(
        message: impl Into<String>,
        suggestion: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ErrorBody {
                message: message.into(),
                suggestion: suggestion.into(),
                code: code.into(),
            }),
        }
    }

    pub fn engine_starting() -> Self {
        Self::error(
            "Download engine starting",
            "Please wait a moment and try again",
            codes::ENGINE_STARTING,
        )
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error.as_ref().map(|e| e.code.as_str())
    }
}
