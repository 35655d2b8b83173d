//! Domain-specific configuration modules

pub mod engine;
pub mod http;
pub mod jobs;
pub mod logging;
pub mod preflight;
pub mod utils;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Tether configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TetherConfig {
    /// Worker process supervision
    #[serde(default)]
    pub engine: engine::EngineConfig,

    /// Dependency check before the first launch
    #[serde(default)]
    pub preflight: preflight::PreflightConfig,

    /// Request bridge configuration
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Job tracking and audit
    #[serde(default)]
    pub jobs: jobs::JobsConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl TetherConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.preflight.validate()?;
        self.http.validate()?;
        self.jobs.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Request timeout after applying the mode default
    pub fn effective_http_timeout(&self) -> std::time::Duration {
        self.http.effective_timeout(self.engine.mode)
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let config = TetherConfig::default();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
