//! Job tracking configuration

use crate::error::ConfigResult;
use crate::validation::{validate_positive, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Job tracker and audit log configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    /// Age after which a tracked job is swept
    #[serde(with = "crate::domains::utils::serde_duration")]
    pub expiry: Duration,

    /// Background sweep period; `None` disables the sweeper
    #[serde(with = "crate::domains::utils::serde_duration_option")]
    pub sweep_interval: Option<Duration>,

    /// Entries kept in the audit log
    pub audit_capacity: usize,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            expiry: Duration::from_secs(300),
            sweep_interval: Some(Duration::from_secs(60)),
            audit_capacity: 50,
        }
    }
}

impl Validatable for JobsConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.expiry.as_secs(), "expiry", self.domain_name())?;
        validate_positive(self.audit_capacity, "audit_capacity", self.domain_name())?;

        if let Some(interval) = self.sweep_interval {
            validate_positive(interval.as_secs(), "sweep_interval", self.domain_name())?;
        }

        Ok(())
    }

    fn domain_name(&self) -> &'static str {
        "jobs"
    }
}
