//! Pipeline run state and progress accounting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::scene::SceneDescription;

/// Unique identifier for a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    /// Generate a new random run ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Status cache key for this run.
    pub fn cache_key(&self) -> String {
        format!("pipeline_status:{}", self.0)
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stage of a pipeline run.
///
/// Stages are entered strictly in declaration order; any stage may
/// transition to `Failed`, and `Cancelled` may be entered from any
/// non-terminal stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunStage {
    /// Accepted, waiting for the first worker slot
    #[default]
    Queued,
    /// Calling the description service
    GeneratingScenes,
    /// Per-scene clip operations in flight
    GeneratingClips,
    /// Music operation in flight (overlaps with clip generation)
    GeneratingMusic,
    /// Compiling clips + audio into the final video
    Compiling,
    /// Persisting the artifact to object storage
    Uploading,
    /// Run finished with a final URL
    Completed,
    /// Run failed permanently
    Failed,
    /// Run was cancelled by the caller
    Cancelled,
}

impl RunStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStage::Queued => "queued",
            RunStage::GeneratingScenes => "generating_scenes",
            RunStage::GeneratingClips => "generating_clips",
            RunStage::GeneratingMusic => "generating_music",
            RunStage::Compiling => "compiling",
            RunStage::Uploading => "uploading",
            RunStage::Completed => "completed",
            RunStage::Failed => "failed",
            RunStage::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal stage (no more transitions expected).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStage::Completed | RunStage::Failed | RunStage::Cancelled
        )
    }

    /// The stage that legally precedes this one in the forward path.
    pub fn predecessor(&self) -> Option<RunStage> {
        match self {
            RunStage::Queued => None,
            RunStage::GeneratingScenes => Some(RunStage::Queued),
            RunStage::GeneratingClips => Some(RunStage::GeneratingScenes),
            RunStage::GeneratingMusic => Some(RunStage::GeneratingClips),
            RunStage::Compiling => Some(RunStage::GeneratingMusic),
            RunStage::Uploading => Some(RunStage::Compiling),
            RunStage::Completed => Some(RunStage::Uploading),
            // Failure/cancellation can come from anywhere.
            RunStage::Failed | RunStage::Cancelled => None,
        }
    }
}

impl fmt::Display for RunStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Snapshot of one end-to-end video generation request.
///
/// This is the record persisted to the status cache under
/// `pipeline_status:{run_id}` and returned by status queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Run identifier (caller-assignable for idempotent re-submission)
    pub run_id: RunId,
    /// Owning entity (dealership account)
    pub owner_id: String,
    /// Current stage
    pub stage: RunStage,
    /// Global progress 0-100, monotonically non-decreasing
    pub progress: u8,
    /// Scene descriptions produced by the description service
    #[serde(default)]
    pub scene_descriptions: Vec<SceneDescription>,
    /// Clip URLs indexed by scene (filled as clip operations finish)
    #[serde(default)]
    pub clip_urls: Vec<Option<String>>,
    /// Generated audio track URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio_url: Option<String>,
    /// Final compiled video URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
    /// Thumbnail URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thumbnail_url: Option<String>,
    /// Error message if the run failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the run was accepted
    pub created_at: DateTime<Utc>,
    /// When the run reached a terminal stage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a new run in the `Queued` stage.
    pub fn new(run_id: RunId, owner_id: impl Into<String>) -> Self {
        Self {
            run_id,
            owner_id: owner_id.into(),
            stage: RunStage::Queued,
            progress: 0,
            scene_descriptions: Vec::new(),
            clip_urls: Vec::new(),
            audio_url: None,
            final_url: None,
            thumbnail_url: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Check if the run is in a terminal stage.
    pub fn is_terminal(&self) -> bool {
        self.stage.is_terminal()
    }

    /// Enter the next stage.
    pub fn set_stage(&mut self, stage: RunStage) {
        self.stage = stage;
        if stage.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
    }

    /// Apply a progress update. Later-lower values are discarded, not
    /// applied; returns true if the value was accepted.
    pub fn apply_progress(&mut self, progress: u8) -> bool {
        let progress = progress.min(100);
        if progress <= self.progress {
            return false;
        }
        self.progress = progress;
        true
    }

    /// Mark the run failed with the originating error preserved.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
        self.set_stage(RunStage::Failed);
    }
}

/// Band widths of the global progress mapping. Together they sum to 100.
const SCENES_BAND: f64 = 20.0;
const CLIPS_BAND: f64 = 50.0;
const MUSIC_BAND: f64 = 15.0;
const COMPILE_BAND: f64 = 10.0;
const UPLOAD_BAND: f64 = 5.0;

/// Map per-stage completion fractions into the global 0-100 value.
///
/// Scene generation fills 0-20, clip generation 20-70 with an equal 1/N
/// share per clip, music 70-85, compilation 85-95, upload 95-100. The
/// music band is additive so music progress arriving while clips are
/// still running raises the total without reordering the bands.
pub fn banded_progress(
    scenes: f64,
    clips: &[f64],
    music: f64,
    compile: f64,
    upload: f64,
) -> u8 {
    let clip_avg = if clips.is_empty() {
        0.0
    } else {
        clips.iter().map(|f| f.clamp(0.0, 1.0)).sum::<f64>() / clips.len() as f64
    };

    let total = scenes.clamp(0.0, 1.0) * SCENES_BAND
        + clip_avg * CLIPS_BAND
        + music.clamp(0.0, 1.0) * MUSIC_BAND
        + compile.clamp(0.0, 1.0) * COMPILE_BAND
        + upload.clamp(0.0, 1.0) * UPLOAD_BAND;

    (total.round() as u8).min(100)
}
