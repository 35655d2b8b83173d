//! Dependency preflight configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Preflight configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PreflightConfig {
    /// Whether the dependency check runs before the first launch
    #[serde(default = "crate::domains::utils::default_true")]
    pub enabled: bool,

    /// Module that must be importable by the bundled interpreter
    pub probe_module: String,

    /// Dependency manifest next to the interpreter
    pub manifest_file: String,

    /// Upper bound for the install step
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub install_timeout: Duration,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_module: "yt_dlp".to_string(),
            manifest_file: "requirements.txt".to_string(),
            install_timeout: Duration::from_secs(300),
        }
    }
}

impl Validatable for PreflightConfig {
    fn validate(&self) -> ConfigResult<()> {
        if !self.enabled {
            return Ok(());
        }

        validate_required_string(&self.probe_module, "probe_module", self.domain_name())?;
        validate_required_string(&self.manifest_file, "manifest_file", self.domain_name())?;
        validate_positive(
            self.install_timeout.as_secs(),
            "install_timeout",
            self.domain_name(),
        )?;

        if self.probe_module.contains(char::is_whitespace) {
            return Err(self.validation_error("probe_module must be a single module name"));
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "preflight"
    }
}
