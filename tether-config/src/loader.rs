//! Configuration loading and environment variable handling

use crate::domains::TetherConfig;
use crate::error::{ConfigError, ConfigResult};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Configuration loader with environment variable support
pub struct ConfigLoader {
    /// Environment variable prefix
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with default prefix
    pub fn new() -> Self {
        Self {
            prefix: "TETHER".to_string(),
        }
    }

    /// Create a new config loader with custom prefix
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<TetherConfig> {
        let content = std::fs::read_to_string(path)?;
        let mut config: TetherConfig = serde_yaml::from_str(&content)?;

        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<TetherConfig> {
        let mut config = TetherConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration with fallback chain
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<TetherConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    /// Apply environment variable overrides to configuration
    fn apply_env_overrides(&self, config: &mut TetherConfig) -> ConfigResult<()> {
        self.apply_engine_overrides(&mut config.engine)?;
        self.apply_http_overrides(&mut config.http)?;
        self.apply_jobs_overrides(&mut config.jobs)?;
        self.apply_logging_overrides(&mut config.logging)?;
        Ok(())
    }

    /// Apply engine config overrides
    fn apply_engine_overrides(
        &self,
        config: &mut crate::domains::engine::EngineConfig,
    ) -> ConfigResult<()> {
        use crate::domains::engine::RuntimeMode;

        if let Ok(mode) = self.get_env_var("MODE") {
            config.mode = RuntimeMode::from_str(&mode)
                .map_err(|_| ConfigError::EnvError(format!("Invalid MODE: {}", mode)))?;
        } else if std::env::var("NODE_ENV").as_deref() == Ok("development") {
            config.mode = RuntimeMode::Development;
        }

        if let Ok(path) = self.get_env_var("RESOURCES_PATH") {
            config.resources_path = path.into();
        }

        if let Ok(host) = self.get_env_var("ENGINE_HOST") {
            config.host = host;
        }

        if let Ok(port) = self.get_env_var("ENGINE_PORT") {
            config.port = port
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid ENGINE_PORT: {}", e)))?;
        }

        if let Some(interval) = self.get_env_seconds("HEALTH_CHECK_INTERVAL")? {
            config.health_check_interval = interval;
        }

        if let Some(timeout) = self.get_env_seconds("STARTUP_TIMEOUT")? {
            config.startup_timeout = Some(timeout);
        }

        Ok(())
    }

    /// Apply HTTP config overrides
    fn apply_http_overrides(
        &self,
        config: &mut crate::domains::http::HttpConfig,
    ) -> ConfigResult<()> {
        if let Some(timeout) = self.get_env_seconds("HTTP_TIMEOUT")? {
            config.timeout = Some(timeout);
        }

        if let Ok(attempts) = self.get_env_var("HTTP_MAX_ATTEMPTS") {
            config.max_attempts = attempts
                .parse()
                .map_err(|e| ConfigError::EnvError(format!("Invalid HTTP_MAX_ATTEMPTS: {}", e)))?;
        }

        Ok(())
    }

    /// Apply jobs config overrides
    fn apply_jobs_overrides(
        &self,
        config: &mut crate::domains::jobs::JobsConfig,
    ) -> ConfigResult<()> {
        if let Some(expiry) = self.get_env_seconds("JOB_EXPIRY")? {
            config.expiry = expiry;
        }

        Ok(())
    }

    /// Apply logging config overrides
    fn apply_logging_overrides(
        &self,
        config: &mut crate::domains::logging::LoggingConfig,
    ) -> ConfigResult<()> {
        if let Ok(log_level) = self.get_env_var("LOG_LEVEL") {
            config.level = crate::domains::logging::LogLevel::from_str(&log_level)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_LEVEL: {}", log_level)))?;
        }

        if let Ok(format) = self.get_env_var("LOG_FORMAT") {
            config.format = crate::domains::logging::LogFormat::from_str(&format)
                .map_err(|_| ConfigError::EnvError(format!("Invalid LOG_FORMAT: {}", format)))?;
        }

        Ok(())
    }

    /// Parse a whole-seconds environment variable
    fn get_env_seconds(&self, name: &str) -> ConfigResult<Option<Duration>> {
        match self.get_env_var(name) {
            Ok(value) => {
                let seconds: u64 = value
                    .parse()
                    .map_err(|e| ConfigError::EnvError(format!("Invalid {}: {}", name, e)))?;
                Ok(Some(Duration::from_secs(seconds)))
            }
            Err(_) => Ok(None),
        }
    }

    /// Get environment variable with prefix
    fn get_env_var(&self, name: &str) -> Result<String, std::env::VarError> {
        std::env::var(format!("{}_{}", self.prefix, name))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
