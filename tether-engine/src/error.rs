//! Error types for the worker engine

use std::path::PathBuf;
use std::time::Duration;
use tether_config::ConfigError;
use thiserror::Error;

/// Engine errors
///
/// Fatal errors end the current worker session; the rest are soft and
/// expected during normal operation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Unsupported platform: {os}-{arch}")]
    UnsupportedPlatform { os: String, arch: String },

    #[error("Worker entry script not found: {}", path.display())]
    EnvironmentValidation { path: PathBuf },

    #[error("Worker did not become ready within {timeout:?} ({attempts} probe attempts)")]
    StartupTimeout { timeout: Duration, attempts: u32 },

    #[error("Worker process exited with {}", exit_label(.code))]
    ProcessExit { code: Option<i32>, output: String },

    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker startup was cancelled by stop()")]
    StartupCancelled,

    #[error("Download engine starting")]
    EngineNotReady,

    #[error("Request to {endpoint} failed after {attempts} attempt(s): {message}")]
    RequestFailed {
        endpoint: String,
        attempts: u32,
        message: String,
    },

    #[error("Invalid response from worker: {0}")]
    InvalidResponse(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

impl EngineError {
    /// Whether the error ends the worker session
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::UnsupportedPlatform { .. }
                | EngineError::EnvironmentValidation { .. }
                | EngineError::StartupTimeout { .. }
                | EngineError::ProcessExit { .. }
                | EngineError::SpawnFailed(_)
                | EngineError::Config(_)
        )
    }

    /// Stable code used in command envelopes
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::UnsupportedPlatform { .. } => "UNSUPPORTED_PLATFORM",
            EngineError::EnvironmentValidation { .. } => "ENVIRONMENT_INVALID",
            EngineError::StartupTimeout { .. } => "STARTUP_TIMEOUT",
            EngineError::ProcessExit { .. } => "PROCESS_EXIT",
            EngineError::SpawnFailed(_) => "SPAWN_FAILED",
            EngineError::StartupCancelled => "STARTUP_CANCELLED",
            EngineError::EngineNotReady => "ENGINE_STARTING",
            EngineError::RequestFailed { .. } => "REQUEST_FAILED",
            EngineError::InvalidResponse(_) => "INVALID_RESPONSE",
            EngineError::Config(_) => "CONFIG_ERROR",
        }
    }

    /// Message with captured worker output appended, for error events
    pub fn diagnostic(&self) -> String {
        match self {
            EngineError::ProcessExit { output, .. } if !output.trim().is_empty() => {
                format!("{}\n{}", self, output.trim_end())
            }
            _ => self.to_string(),
        }
    }
}

impl From<ConfigError> for EngineError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
