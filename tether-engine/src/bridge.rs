//! Request bridge into the worker's HTTP interface
//!
//! Requests are refused outright until the supervisor reports ready. Once
//! sent, each request is attempted up to `max_attempts` times with linear
//! backoff; a non-2xx status counts as a failure just like a transport error.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method};
use serde_json::Value;
use tether_config::{HttpConfig, RuntimeMode};
use tether_resilience::{RetryExecutor, RetryPolicy, Retryable};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::supervisor::ReadinessGate;

/// Per-request options
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Overrides the policy's per-attempt timeout
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            timeout: None,
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Successful worker reply
#[derive(Debug, Clone, PartialEq)]
pub struct BridgeResponse {
    pub status: u16,
    pub body: Value,
}

/// Retry settings for worker requests
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestRetryPolicy {
    pub max_attempts: u32,
    pub per_attempt_timeout: Duration,
    pub backoff_base: Duration,
}

impl RequestRetryPolicy {
    pub fn from_config(config: &HttpConfig, mode: RuntimeMode) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            per_attempt_timeout: config.effective_timeout(mode),
            backoff_base: config.backoff_base,
        }
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::linear(self.max_attempts, self.backoff_base)
    }
}

/// Failure of a single attempt
#[derive(Debug, Clone, thiserror::Error)]
enum AttemptError {
    #[error("{0}")]
    Transport(String),
    #[error("HTTP {code}: {body}")]
    Status { code: u16, body: String },
}

impl Retryable for AttemptError {
    fn is_retryable(&self) -> bool {
        true
    }
}

/// HTTP client for the worker, gated on supervisor readiness
pub struct RequestBridge {
    client: Client,
    base_url: String,
    gate: Arc<dyn ReadinessGate>,
    policy: RequestRetryPolicy,
}

impl RequestBridge {
    pub fn new(
        base_url: &str,
        gate: Arc<dyn ReadinessGate>,
        policy: RequestRetryPolicy,
        config: &HttpConfig,
    ) -> Result<Self, EngineError> {
        let mut headers = HeaderMap::new();
        for (name, value) in &config.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| EngineError::Config(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| EngineError::Config(format!("Invalid header value for {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        let client = Client::builder()
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .build()
            .map_err(|e| EngineError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            gate,
            policy,
        })
    }

    pub fn from_config(
        base_url: &str,
        gate: Arc<dyn ReadinessGate>,
        config: &HttpConfig,
        mode: RuntimeMode,
    ) -> Result<Self, EngineError> {
        Self::new(base_url, gate, RequestRetryPolicy::from_config(config, mode), config)
    }

    pub fn policy(&self) -> &RequestRetryPolicy {
        &self.policy
    }

    pub fn is_ready(&self) -> bool {
        self.gate.is_ready()
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// Send a request to the worker.
    ///
    /// Fails with [`EngineError::EngineNotReady`] without touching the
    /// network while the supervisor is not ready.
    pub async fn send(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> Result<BridgeResponse, EngineError> {
        if !self.gate.is_ready() {
            debug!(endpoint, "Refusing request, worker not ready");
            return Err(EngineError::EngineNotReady);
        }

        let url = self.url_for(endpoint);
        let timeout = options.timeout.unwrap_or(self.policy.per_attempt_timeout);
        let executor = RetryExecutor::new(self.policy.retry_policy());

        let result = executor
            .execute_with_context(|attempt| {
                let url = url.clone();
                let options = options.clone();
                async move {
                    let outcome = self.attempt(&url, &options, timeout).await;
                    if let Err(e) = &outcome {
                        warn!(endpoint, attempt, "Worker request attempt failed: {}", e);
                    }
                    outcome
                }
            })
            .await;

        let (status, text) = result.map_err(|e| {
            let attempts = e.attempts().unwrap_or(1);
            EngineError::RequestFailed {
                endpoint: endpoint.to_string(),
                attempts,
                message: e.into_inner().to_string(),
            }
        })?;

        let body = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).map_err(|e| {
                EngineError::InvalidResponse(format!("{} returned invalid JSON: {}", endpoint, e))
            })?
        };

        Ok(BridgeResponse { status, body })
    }

    /// POST a JSON body
    pub async fn post_json(&self, endpoint: &str, body: Value) -> Result<BridgeResponse, EngineError> {
        self.send(endpoint, RequestOptions::post(body)).await
    }

    async fn attempt(
        &self,
        url: &str,
        options: &RequestOptions,
        timeout: Duration,
    ) -> Result<(u16, String), AttemptError> {
        let mut request = self
            .client
            .request(options.method.clone(), url)
            .timeout(timeout);
        if let Some(body) = &options.body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AttemptError::Transport(e.to_string()))?;

        if status.is_success() {
            Ok((status.as_u16(), text))
        } else {
            Err(AttemptError::Status {
                code: status.as_u16(),
                body: text,
            })
        }
    }
}
