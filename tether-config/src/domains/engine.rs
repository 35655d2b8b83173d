//! Worker process supervision configuration

use crate::error::ConfigResult;
use crate::validation::{validate_port_range, validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// How the worker executable is located
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeMode {
    /// Interpreter from a virtual environment next to the sources
    Development,
    /// Interpreter bundled per platform with the application
    #[default]
    Packaged,
}

impl RuntimeMode {
    pub fn is_development(self) -> bool {
        matches!(self, RuntimeMode::Development)
    }
}

impl FromStr for RuntimeMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "development" | "dev" => Ok(RuntimeMode::Development),
            "packaged" | "production" | "prod" => Ok(RuntimeMode::Packaged),
            _ => Err(format!("Invalid runtime mode: {}", s)),
        }
    }
}

impl fmt::Display for RuntimeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeMode::Development => write!(f, "development"),
            RuntimeMode::Packaged => write!(f, "packaged"),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Runtime mode
    pub mode: RuntimeMode,

    /// Root of the bundled resources (worker sources, interpreters)
    pub resources_path: PathBuf,

    /// Loopback host the worker listens on
    pub host: String,

    /// Worker port
    pub port: u16,

    /// Period of the health check once the worker is ready
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub health_check_interval: Duration,

    /// Startup retry budget
    pub max_startup_retries: u32,

    /// Readiness probes per startup retry
    pub polls_per_retry: u32,

    /// Wait before the first readiness probe
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub initial_probe_delay: Duration,

    /// Per-probe HTTP timeout
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub probe_timeout: Duration,

    /// Overall startup deadline; the mode default applies when unset
    #[serde(
        with = "crate::domains::utils::serde_duration_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub startup_timeout: Option<Duration>,

    /// Time between the graceful and the forced termination request
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub shutdown_grace_period: Duration,

    /// Lines of worker output kept for diagnostics
    pub output_capture_lines: usize,

    /// Directory holding the worker sources
    pub worker_dir: String,

    /// Worker entry script inside `worker_dir`
    pub entry_script: String,

    /// Virtual environment directory inside `worker_dir` (development)
    pub venv_dir: String,

    /// Bundled interpreter directory inside `resources_path` (packaged)
    pub runtime_dir: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: RuntimeMode::Packaged,
            resources_path: PathBuf::from("resources"),
            host: "127.0.0.1".to_string(),
            port: 8888,
            health_check_interval: Duration::from_secs(5),
            max_startup_retries: 3,
            polls_per_retry: 6,
            initial_probe_delay: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(10),
            startup_timeout: None,
            shutdown_grace_period: Duration::from_secs(5),
            output_capture_lines: 200,
            worker_dir: "python".to_string(),
            entry_script: "server.py".to_string(),
            venv_dir: "venv".to_string(),
            runtime_dir: "python-runtime".to_string(),
        }
    }
}

impl EngineConfig {
    /// Base URL of the worker server
    pub fn server_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    /// Startup deadline, falling back to 60 s in development and 30 s packaged
    pub fn effective_startup_timeout(&self) -> Duration {
        self.startup_timeout.unwrap_or(match self.mode {
            RuntimeMode::Development => Duration::from_secs(60),
            RuntimeMode::Packaged => Duration::from_secs(30),
        })
    }

    /// Total number of readiness probes allowed during startup
    pub fn max_readiness_polls(&self) -> u32 {
        self.max_startup_retries.saturating_mul(self.polls_per_retry)
    }
}

impl Validatable for EngineConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.host, "host", self.domain_name())?;
        validate_port_range(self.port, "port", self.domain_name())?;
        crate::validation::validate_url(&self.server_url(), "server_url", self.domain_name())?;
        validate_positive(
            self.health_check_interval.as_millis(),
            "health_check_interval",
            self.domain_name(),
        )?;
        validate_positive(self.max_startup_retries, "max_startup_retries", self.domain_name())?;
        validate_positive(self.polls_per_retry, "polls_per_retry", self.domain_name())?;
        validate_positive(self.probe_timeout.as_millis(), "probe_timeout", self.domain_name())?;

        if let Some(timeout) = self.startup_timeout {
            validate_positive(timeout.as_millis(), "startup_timeout", self.domain_name())?;
        }

        validate_required_string(&self.worker_dir, "worker_dir", self.domain_name())?;
        validate_required_string(&self.entry_script, "entry_script", self.domain_name())?;
        validate_required_string(&self.venv_dir, "venv_dir", self.domain_name())?;
        validate_required_string(&self.runtime_dir, "runtime_dir", self.domain_name())?;

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "engine"
    }
}
