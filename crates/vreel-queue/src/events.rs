//! Job lifecycle events.

use serde::{Deserialize, Serialize};

use crate::job::JobId;

/// What happened to a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobEventKind {
    /// Dispatched to a worker
    Active,
    /// Worker reported fractional progress
    Progress { fraction: f64 },
    /// Finished successfully
    Completed,
    /// Attempt failed; `will_retry` tells whether it re-entered the queue
    Failed { error: String, will_retry: bool },
    /// Worker missed its heartbeat window
    Stalled { requeued: bool },
    /// Removed or stopped by the caller
    Cancelled,
}

/// Lifecycle event emitted by the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobEvent {
    pub job_id: JobId,
    pub queue: String,
    #[serde(flatten)]
    pub kind: JobEventKind,
}

impl JobEvent {
    pub fn new(job_id: JobId, queue: impl Into<String>, kind: JobEventKind) -> Self {
        Self {
            job_id,
            queue: queue.into(),
            kind,
        }
    }
}
