//! Job envelopes and stage payloads.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use vreel_models::{EncodingProfile, Mood, PipelineRequest, RunId, SceneDescription};

/// Unique identifier for a job. Caller-assigned ids make re-submission
/// idempotent: enqueueing an id that is still live returns the existing
/// job instead of scheduling a duplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
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
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling state of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker slot (possibly delayed)
    #[default]
    Waiting,
    /// Picked up by a worker
    Active,
    /// Finished successfully
    Completed,
    /// Failed permanently (attempts exhausted or non-retryable)
    Failed,
    /// Removed by the caller before completion
    Cancelled,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Waiting => "waiting",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Cancelled => "cancelled",
        }
    }

    /// Check if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Exponential backoff settings: `base * 2^attempts_made`, capped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Base delay in milliseconds
    pub base_ms: u64,
    /// Cap in milliseconds
    pub max_ms: u64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 60_000,
        }
    }
}

impl BackoffPolicy {
    /// Delay before the next attempt, given the number of attempts
    /// already made.
    pub fn delay_for_attempt(&self, attempts_made: u32) -> Duration {
        let ms = self
            .base_ms
            .saturating_mul(2u64.saturating_pow(attempts_made));
        Duration::from_millis(ms.min(self.max_ms))
    }
}

/// Job to generate scene descriptions for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneJob {
    pub run_id: RunId,
    pub request: PipelineRequest,
}

/// Job to generate one clip from one scene description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClipJob {
    pub run_id: RunId,
    pub scene: SceneDescription,
    /// Source still image the scene animates
    pub image_url: String,
}

/// Job to generate the music track for a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MusicJob {
    pub run_id: RunId,
    /// Theme/mood descriptor for the track
    pub mood: Mood,
    /// Track length, matching the summed scene durations
    pub duration_seconds: u32,
}

/// Job to compile downloaded clips + audio into the final video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileJob {
    pub run_id: RunId,
    /// Local clip files ordered by scene index, never arrival order
    pub clip_paths: Vec<PathBuf>,
    /// Per-clip durations in seconds, parallel to `clip_paths`
    pub clip_durations: Vec<f64>,
    /// Local audio file
    pub audio_path: PathBuf,
    /// Encoding parameters for the target platform
    pub profile: EncodingProfile,
}

/// Stage payload carried by a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobPayload {
    GenerateScenes(SceneJob),
    GenerateClip(ClipJob),
    GenerateMusic(MusicJob),
    CompileVideo(CompileJob),
}

impl JobPayload {
    pub fn run_id(&self) -> &RunId {
        match self {
            JobPayload::GenerateScenes(j) => &j.run_id,
            JobPayload::GenerateClip(j) => &j.run_id,
            JobPayload::GenerateMusic(j) => &j.run_id,
            JobPayload::CompileVideo(j) => &j.run_id,
        }
    }

    /// Short label for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            JobPayload::GenerateScenes(_) => "generate_scenes",
            JobPayload::GenerateClip(_) => "generate_clip",
            JobPayload::GenerateMusic(_) => "generate_music",
            JobPayload::CompileVideo(_) => "compile_video",
        }
    }
}

/// A schedulable unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Job ID (caller-assignable)
    pub id: JobId,
    /// Queue this job belongs to
    pub queue: String,
    /// Stage payload
    pub payload: JobPayload,
    /// Higher runs first within a queue
    #[serde(default)]
    pub priority: i32,
    /// Earliest dispatch time; the job is invisible to dispatch before it
    pub not_before: DateTime<Utc>,
    /// Attempts already made
    #[serde(default)]
    pub attempts: u32,
    /// Total attempts allowed
    pub max_attempts: u32,
    /// Backoff applied between failed attempts
    #[serde(default)]
    pub backoff: BackoffPolicy,
    /// Scheduling state
    #[serde(default)]
    pub state: JobState,
    /// FIFO tiebreaker among equal priority, assigned by the store
    #[serde(default)]
    pub enqueue_seq: u64,
    /// Times this job has been requeued after a stall
    #[serde(default)]
    pub stall_count: u32,
    /// Last worker liveness signal while active
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Last failure message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// When the job reached a terminal state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a new waiting job with default scheduling attributes.
    pub fn new(id: JobId, queue: impl Into<String>, payload: JobPayload) -> Self {
        Self {
            id,
            queue: queue.into(),
            payload,
            priority: 0,
            not_before: Utc::now(),
            attempts: 0,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            state: JobState::Waiting,
            enqueue_seq: 0,
            stall_count: 0,
            last_heartbeat: None,
            error: None,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Set priority (higher runs first).
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Delay the earliest dispatch time.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.not_before = Utc::now()
            + ChronoDuration::from_std(delay).unwrap_or_else(|_| ChronoDuration::seconds(0));
        self
    }

    /// Set the attempts ceiling.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Whether the job is visible to dispatch at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.not_before <= now
    }

    /// Whether another attempt remains after the current one fails.
    pub fn has_attempts_left(&self) -> bool {
        self.attempts < self.max_attempts
    }
}
