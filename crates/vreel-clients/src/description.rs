//! Description service client.
//!
//! Synchronous call that turns a vehicle record + marketing idea into
//! structured scene descriptions. Scene-count validation belongs to the
//! orchestrator; this client only speaks the wire protocol.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use vreel_models::{PipelineRequest, SceneDescription};

use crate::error::{ClientError, ClientResult};

/// Configuration for the description service client.
#[derive(Debug, Clone)]
pub struct DescriptionConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
    pub max_retries: u32,
}

impl DescriptionConfig {
    pub fn from_env() -> ClientResult<Self> {
        let base_url = std::env::var("DESCRIPTION_URL")
            .map_err(|_| ClientError::config("DESCRIPTION_URL not set"))?;
        let api_key = std::env::var("DESCRIPTION_API_KEY")
            .map_err(|_| ClientError::config("DESCRIPTION_API_KEY not set"))?;
        Ok(Self {
            base_url,
            api_key,
            timeout: Duration::from_secs(
                std::env::var("DESCRIPTION_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(60),
            ),
            max_retries: std::env::var("DESCRIPTION_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2),
        })
    }
}

#[derive(Debug, Serialize)]
struct ScenesRequest<'a> {
    vehicle: &'a vreel_models::VehicleRecord,
    idea: &'a str,
    image_count: usize,
}

#[derive(Debug, Deserialize)]
struct ScenesResponse {
    scenes: Vec<SceneDescription>,
}

/// Client for the scene description service.
pub struct DescriptionClient {
    http: Client,
    config: DescriptionConfig,
}

impl DescriptionClient {
    pub fn new(config: DescriptionConfig) -> ClientResult<Self> {
        let http = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(ClientError::Network)?;
        Ok(Self { http, config })
    }

    pub fn from_env() -> ClientResult<Self> {
        Self::new(DescriptionConfig::from_env()?)
    }

    /// Generate scene descriptions for a pipeline request. Returns the
    /// scenes exactly as the service produced them; count and duration
    /// validation happen at the call site.
    pub async fn generate_scenes(
        &self,
        request: &PipelineRequest,
    ) -> ClientResult<Vec<SceneDescription>> {
        let url = format!("{}/scenes", self.config.base_url);
        debug!(%url, vehicle = %request.vehicle, "requesting scene descriptions");

        let body = ScenesRequest {
            vehicle: &request.vehicle,
            idea: &request.idea,
            image_count: request.image_urls.len(),
        };

        let mut last_error = None;
        for attempt in 0..=self.config.max_retries {
            let result = async {
                let response = self
                    .http
                    .post(&url)
                    .bearer_auth(&self.config.api_key)
                    .json(&body)
                    .send()
                    .await
                    .map_err(ClientError::Network)?;

                if !response.status().is_success() {
                    let status = response.status().as_u16();
                    let message = response.text().await.unwrap_or_default();
                    return Err(ClientError::RequestFailed { status, message });
                }

                let scenes: ScenesResponse = response
                    .json()
                    .await
                    .map_err(|e| ClientError::invalid_response(e.to_string()))?;
                Ok(scenes.scenes)
            }
            .await;

            match result {
                Ok(scenes) => return Ok(scenes),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    let delay = Duration::from_millis(500 * 2u64.pow(attempt));
                    warn!(
                        "description request failed (attempt {}), retrying in {:?}: {}",
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
