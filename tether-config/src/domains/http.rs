//! Request bridge configuration

use crate::domains::engine::RuntimeMode;
use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// HTTP client configuration for calls into the worker
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-attempt timeout; the mode default applies when unset
    #[serde(
        with = "crate::domains::utils::serde_duration_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,

    /// User agent string
    pub user_agent: String,

    /// Extra headers sent with every request
    #[serde(skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Attempts per request, including the first
    pub max_attempts: u32,

    /// Linear backoff base between attempts
    #[serde(with = "crate::domains::utils::serde_duration_millis", rename = "backoff_base_ms")]
    pub backoff_base: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            user_agent: format!("Tether/{}", env!("CARGO_PKG_VERSION")),
            headers: HashMap::new(),
            max_attempts: 1,
            backoff_base: Duration::from_millis(1000),
        }
    }
}

impl HttpConfig {
    /// Per-attempt timeout: 40 minutes in development, 60 minutes packaged
    pub fn effective_timeout(&self, mode: RuntimeMode) -> Duration {
        self.timeout.unwrap_or(match mode {
            RuntimeMode::Development => Duration::from_secs(2400),
            RuntimeMode::Packaged => Duration::from_secs(3600),
        })
    }
}

impl Validatable for HttpConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_required_string(&self.user_agent, "user_agent", self.domain_name())?;
        validate_positive(self.max_attempts, "max_attempts", self.domain_name())?;

        if let Some(timeout) = self.timeout {
            validate_positive(timeout.as_millis(), "timeout", self.domain_name())?;
        }

        for name in self.headers.keys() {
            if name.trim().is_empty() {
                return Err(self.validation_error("header names cannot be empty"));
            }
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "http"
    }
}
