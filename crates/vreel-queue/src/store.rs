//! Pluggable job storage.
//!
//! The registry owns scheduling policy; stores own persistence. The
//! in-memory store backs tests and single-process deployments; an
//! externally backed store can be swapped in without touching the
//! registry or workers.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobState};

/// Per-queue job counts by state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Waiting jobs whose `not_before` has not elapsed yet
    pub delayed: usize,
}

/// Storage backend for job scheduling state.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails if the id already exists in a
    /// non-terminal state; a finished job with the same id is replaced.
    async fn insert(&self, job: Job) -> QueueResult<()>;

    /// Fetch a job by id.
    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>>;

    /// Replace a stored job.
    async fn update(&self, job: &Job) -> QueueResult<()>;

    /// Atomically pick the best ready waiting job in `queue` and mark it
    /// active. Selection order: priority descending, then enqueue order.
    /// Jobs with `not_before > now` are invisible.
    async fn take_next(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>>;

    /// Count jobs per state for a queue.
    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<QueueCounts>;

    /// All jobs currently in `state` for a queue.
    async fn jobs_in_state(&self, queue: &str, state: JobState) -> QueueResult<Vec<Job>>;

    /// Remove terminal jobs that finished before `cutoff`. Returns the
    /// number removed.
    async fn purge(&self, queue: &str, cutoff: DateTime<Utc>) -> QueueResult<usize>;
}

/// In-memory job store.
pub struct MemoryJobStore {
    inner: Mutex<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    jobs: HashMap<JobId, Job>,
    next_seq: u64,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
        }
    }
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, mut job: Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.jobs.get(&job.id) {
            if !existing.state.is_terminal() {
                return Err(QueueError::enqueue_failed(format!(
                    "job {} already exists",
                    job.id
                )));
            }
        }
        job.enqueue_seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(job.id.clone(), job);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> QueueResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(id).cloned())
    }

    async fn update(&self, job: &Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        match inner.jobs.get_mut(&job.id) {
            Some(slot) => {
                *slot = job.clone();
                Ok(())
            }
            None => Err(QueueError::JobNotFound(job.id.to_string())),
        }
    }

    async fn take_next(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<Option<Job>> {
        let mut inner = self.inner.lock().await;
        let best = inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.is_ready(now))
            // Highest priority first, FIFO among equals
            .min_by_key(|j| (-(j.priority as i64), j.enqueue_seq))
            .map(|j| j.id.clone());

        if let Some(id) = best {
            let job = inner.jobs.get_mut(&id).expect("job present");
            job.state = JobState::Active;
            job.last_heartbeat = Some(now);
            return Ok(Some(job.clone()));
        }
        Ok(None)
    }

    async fn counts(&self, queue: &str, now: DateTime<Utc>) -> QueueResult<QueueCounts> {
        let inner = self.inner.lock().await;
        let mut counts = QueueCounts::default();
        for job in inner.jobs.values().filter(|j| j.queue == queue) {
            match job.state {
                JobState::Waiting if job.not_before > now => counts.delayed += 1,
                JobState::Waiting => counts.waiting += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
                JobState::Cancelled => {}
            }
        }
        Ok(counts)
    }

    async fn jobs_in_state(&self, queue: &str, state: JobState) -> QueueResult<Vec<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .jobs
            .values()
            .filter(|j| j.queue == queue && j.state == state)
            .cloned()
            .collect())
    }

    async fn purge(&self, queue: &str, cutoff: DateTime<Utc>) -> QueueResult<usize> {
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|_, j| {
            !(j.queue == queue
                && j.state.is_terminal()
                && j.finished_at.map(|t| t < cutoff).unwrap_or(false))
        });
        Ok(before - inner.jobs.len())
    }
}
