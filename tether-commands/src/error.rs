//! Command errors

use tether_engine::EngineError;
use thiserror::Error;

use crate::envelope::codes;

/// Errors raised while handling a UI command
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("Missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("Invalid request payload: {0}")]
    InvalidPayload(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// The worker answered but reported failure
    #[error("Worker reported failure: {0}")]
    WorkerRejected(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl CommandError {
    /// Stable code for the error envelope
    pub fn code(&self) -> &'static str {
        match self {
            CommandError::MissingField { .. } | CommandError::InvalidPayload(_) => {
                codes::VALIDATION_ERROR
            }
            CommandError::UnknownCommand(_) => codes::UNKNOWN_COMMAND,
            CommandError::JobNotFound(_) => codes::JOB_NOT_FOUND,
            CommandError::WorkerRejected(_) => codes::DOWNLOAD_FAILED,
            CommandError::Engine(e) => e.code(),
        }
    }
}

/// Command result type
pub type CommandResult<T> = Result<T, CommandError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes() {
        assert_eq!(
            CommandError::MissingField { field: "url" }.code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(
            CommandError::Engine(EngineError::EngineNotReady).code(),
            "ENGINE_STARTING"
        );
        assert_eq!(
            CommandError::WorkerRejected("format unavailable".into()).code(),
            "DOWNLOAD_FAILED"
        );
        assert_eq!(
            CommandError::JobNotFound("audio_1".into()).code(),
            "JOB_NOT_FOUND"
        );
    }

    #[test]
    fn test_missing_field_message() {
        let err = CommandError::MissingField { field: "format_id" };
        assert_eq!(err.to_string(), "Missing required field: format_id");
    }
}
