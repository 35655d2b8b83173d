//! Worker health probing

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::error::EngineError;

/// Why a probe did not report healthy
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ProbeError(pub String);

/// Single health check against the worker
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), ProbeError>;
}

/// `GET /` with a bounded timeout; healthy iff the status is 200
#[derive(Debug, Clone)]
pub struct HttpHealthProber {
    client: Client,
    url: String,
}

impl HttpHealthProber {
    pub fn new(server_url: &str, timeout: Duration) -> Result<Self, EngineError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build probe client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/", server_url.trim_end_matches('/')),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProber {
    async fn probe(&self) -> Result<(), ProbeError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ProbeError(e.to_string()))?;

        match response.status() {
            StatusCode::OK => Ok(()),
            status => Err(ProbeError(format!("unexpected status {}", status))),
        }
    }
}
