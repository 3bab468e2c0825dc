//! Clients for the video and music synthesis services.
//!
//! Both services share the same asynchronous contract: a start call
//! returns an operation id, and the operation is polled until it
//! reports a terminal status. Retry here covers only the HTTP calls
//! themselves; operation-level retry policy lives in the worker.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{ClientError, ClientResult};
use crate::types::{GenerationRequest, OperationId, OperationPoll, StartResponse};

/// Configuration for a generation service client.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    /// Base URL of the service
    pub base_url: String,
    /// API key sent as a bearer token
    pub api_key: String,
    /// Per-request timeout
    pub timeout: Duration,
    /// Max transport-level retries per call
    pub max_retries: u32,
}

impl GenerationConfig {
    /// Read config from environment variables with the given prefix
    /// (e.g. `VIDEO_GEN` or `MUSIC_GEN`).
    pub fn from_env(prefix: &str) -> ClientResult<Self> {
        let base_url = std::env::var(format!("{prefix}_URL"))
            .map_err(|_| ClientError::config(format!("{prefix}_URL not set")))?;
        let api_key = std::env::var(format!("{prefix}_API_KEY"))
            .map_err(|_| ClientError::config(format!("{prefix}_API_KEY not set")))?;
        Ok(Self {
            base_url,
            api_key,
            timeout: Duration::from_secs(
                std::env::var(format!("{prefix}_TIMEOUT"))
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_retries: std::env::var(format!("{prefix}_RETRIES"))
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        })
    }
}

/// Asynchronous generation service boundary.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Dispatch a generation request, returning the operation handle.
    async fn start(&self, request: &GenerationRequest) -> ClientResult<OperationId>;

    /// Check an operation's status once.
    async fn poll(&self, operation: &OperationId) -> ClientResult<OperationPoll>;
}

/// HTTP client implementing the shared generation contract.
pub struct HttpGenerationClient {
    http: Client,
    config: GenerationConfig,
}

impl HttpGenerationClient {
    pub fn new(config: GenerationConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Network)?;
        Ok(Self { http, config })
    }

    pub fn from_env(prefix: &str) -> ClientResult<Self> {
        Self::new(GenerationConfig::from_env(prefix)?)
    }

    async fn check(response: reqwest::Response) -> ClientResult<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        Err(ClientError::RequestFailed { status, message })
    }

    /// Execute with retry on transport/server errors.
    async fn with_retry<F, Fut, T>(&self, operation: F) -> ClientResult<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = ClientResult<T>>,
    {
        let mut last_error = None;

        for attempt in 0..=self.config.max_retries {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "generation request failed (attempt {}), retrying in {:?}: {}",
                        attempt + 1,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or_else(|| ClientError::invalid_response("retry loop exhausted")))
    }
}

#[async_trait]
impl GenerationService for HttpGenerationClient {
    async fn start(&self, request: &GenerationRequest) -> ClientResult<OperationId> {
        let url = format!("{}/generate", self.config.base_url);
        debug!(%url, duration = request.duration_seconds, "starting generation operation");

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(request)
                    .send()
                    .await
                    .map_err(ClientError::Network)?;
                Self::check(response).await
            })
            .await?;

        let start: StartResponse = response
            .json()
            .await
            .map_err(|e| ClientError::invalid_response(e.to_string()))?;
        Ok(start.operation_id)
    }

    async fn poll(&self, operation: &OperationId) -> ClientResult<OperationPoll> {
        let url = format!("{}/operations/{}", self.config.base_url, operation);

        let response = self
            .with_retry(|| async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(&self.config.api_key)
                    .send()
                    .await
                    .map_err(ClientError::Network)?;
                Self::check(response).await
            })
            .await?;

        let poll: OperationPoll = response
            .json()
            .await
            .map_err(|e| ClientError::invalid_response(e.to_string()))?;
        Ok(poll)
    }
}
