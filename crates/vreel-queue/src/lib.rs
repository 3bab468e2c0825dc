//! In-process job queue registry.
//!
//! This crate provides:
//! - Job envelopes with priority, delay, and bounded-backoff retry
//! - A pluggable [`JobStore`] (in-memory for tests, externally backed in
//!   production) behind the [`QueueRegistry`]
//! - Per-queue concurrency limits and sliding-window rate limits
//! - Lifecycle events over a broadcast channel
//! - The TTL'd pipeline status cache

pub mod error;
pub mod events;
pub mod job;
pub mod registry;
pub mod status;
pub mod store;

pub use error::{QueueError, QueueResult};
pub use events::{JobEvent, JobEventKind};
pub use job::{
    BackoffPolicy, ClipJob, CompileJob, Job, JobId, JobPayload, JobState, MusicJob, SceneJob,
};
pub use registry::{JobLease, QueueConfig, QueueRegistry, RateLimit};
pub use status::{MemoryStatusCache, RedisStatusCache, StatusCache, RUN_STATUS_TTL_SECS};
pub use store::{JobStore, MemoryJobStore, QueueCounts};
