//! Wire types shared by the generation services.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to an asynchronous generation operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub String);

impl OperationId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Remote status of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Running,
    Completed,
    Failed,
}

/// One poll response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationPoll {
    pub status: OperationStatus,
    /// Completion fraction in [0, 1]
    #[serde(default)]
    pub progress: f64,
    /// Present once the operation completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    /// Present when the operation failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Request to start a generation operation. Video requests carry the
/// source image and scene prose; music requests carry the theme
/// descriptor. Both share the duration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Source references (still images for video, empty for music)
    #[serde(default)]
    pub source_urls: Vec<String>,
    /// Descriptive parameters (scene prose, camera tag / mood theme)
    pub prompt: String,
    /// Requested output duration
    pub duration_seconds: u32,
}

#[derive(Debug, Deserialize)]
pub(crate) struct StartResponse {
    pub operation_id: OperationId,
}
