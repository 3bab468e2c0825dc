//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use vreel_queue::{BackoffPolicy, QueueConfig};

use crate::{QUEUE_CLIPS, QUEUE_COMPILE, QUEUE_MUSIC, QUEUE_SCENES};

/// Configuration for the pipeline worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Scratch directory for downloaded clips, audio, and compile output
    pub work_dir: PathBuf,
    /// Concurrency for the scene description queue
    pub scene_concurrency: usize,
    /// Concurrency for the clip generation queue
    pub clip_concurrency: usize,
    /// Concurrency for the music generation queue
    pub music_concurrency: usize,
    /// Concurrency for the compile queue
    pub compile_concurrency: usize,
    /// Clip dispatches allowed per rate window
    pub clip_rate_max: u32,
    /// Sliding rate window for the clip queue
    pub clip_rate_window: Duration,
    /// Interval between operation status polls
    pub poll_interval: Duration,
    /// Polls before an operation is declared timed out
    pub poll_max_attempts: u32,
    /// Sleep when a dispatch attempt finds nothing to do
    pub idle_delay: Duration,
    /// Interval between worker heartbeats for an active job
    pub heartbeat_interval: Duration,
    /// Heartbeat age past which an active job counts as stalled
    pub stall_window: Duration,
    /// Interval between stall scans
    pub stall_scan_interval: Duration,
    /// Age past which terminal jobs are purged
    pub purge_age: Duration,
    /// TTL for run status cache entries
    pub status_ttl: Duration,
    /// Grace period for draining active jobs on shutdown
    pub shutdown_grace: Duration,
    /// Attempts ceiling for stage jobs
    pub max_attempts: u32,
    /// Backoff between retried attempts
    pub backoff: BackoffPolicy,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("vreel"),
            scene_concurrency: 2,
            clip_concurrency: 3,
            music_concurrency: 2,
            compile_concurrency: 1,
            clip_rate_max: 10,
            clip_rate_window: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            poll_max_attempts: 60,
            idle_delay: Duration::from_millis(100),
            heartbeat_interval: Duration::from_secs(10),
            stall_window: Duration::from_secs(60),
            stall_scan_interval: Duration::from_secs(30),
            purge_age: Duration::from_secs(3600),
            status_ttl: Duration::from_secs(vreel_queue::RUN_STATUS_TTL_SECS),
            shutdown_grace: Duration::from_secs(30),
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            work_dir: std::env::var("WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            scene_concurrency: env_usize("SCENE_CONCURRENCY", defaults.scene_concurrency),
            clip_concurrency: env_usize("CLIP_CONCURRENCY", defaults.clip_concurrency),
            music_concurrency: env_usize("MUSIC_CONCURRENCY", defaults.music_concurrency),
            compile_concurrency: env_usize("COMPILE_CONCURRENCY", defaults.compile_concurrency),
            clip_rate_max: env_u64("CLIP_RATE_MAX", defaults.clip_rate_max as u64) as u32,
            clip_rate_window: Duration::from_secs(env_u64(
                "CLIP_RATE_WINDOW_SECS",
                defaults.clip_rate_window.as_secs(),
            )),
            poll_interval: Duration::from_secs(env_u64(
                "POLL_INTERVAL_SECS",
                defaults.poll_interval.as_secs(),
            )),
            poll_max_attempts: env_u64("POLL_MAX_ATTEMPTS", defaults.poll_max_attempts as u64)
                as u32,
            idle_delay: Duration::from_millis(env_u64(
                "IDLE_DELAY_MS",
                defaults.idle_delay.as_millis() as u64,
            )),
            heartbeat_interval: Duration::from_secs(env_u64(
                "HEARTBEAT_INTERVAL_SECS",
                defaults.heartbeat_interval.as_secs(),
            )),
            stall_window: Duration::from_secs(env_u64(
                "STALL_WINDOW_SECS",
                defaults.stall_window.as_secs(),
            )),
            stall_scan_interval: Duration::from_secs(env_u64(
                "STALL_SCAN_INTERVAL_SECS",
                defaults.stall_scan_interval.as_secs(),
            )),
            purge_age: Duration::from_secs(env_u64(
                "PURGE_AGE_SECS",
                defaults.purge_age.as_secs(),
            )),
            status_ttl: Duration::from_secs(env_u64(
                "STATUS_TTL_SECS",
                defaults.status_ttl.as_secs(),
            )),
            shutdown_grace: Duration::from_secs(env_u64(
                "SHUTDOWN_GRACE_SECS",
                defaults.shutdown_grace.as_secs(),
            )),
            max_attempts: env_u64("JOB_MAX_ATTEMPTS", defaults.max_attempts as u64) as u32,
            backoff: BackoffPolicy {
                base_ms: env_u64("BACKOFF_BASE_MS", defaults.backoff.base_ms),
                max_ms: env_u64("BACKOFF_MAX_MS", defaults.backoff.max_ms),
            },
        }
    }

    /// Queue configurations derived from this worker config. Only the
    /// clip queue carries a rate limit; it is the one fanning out to
    /// the rate-limited video synthesis service.
    pub fn queue_configs(&self) -> Vec<QueueConfig> {
        vec![
            QueueConfig::new(QUEUE_SCENES, self.scene_concurrency),
            QueueConfig::new(QUEUE_CLIPS, self.clip_concurrency)
                .with_rate_limit(self.clip_rate_max, self.clip_rate_window),
            QueueConfig::new(QUEUE_MUSIC, self.music_concurrency),
            QueueConfig::new(QUEUE_COMPILE, self.compile_concurrency),
        ]
    }
}
