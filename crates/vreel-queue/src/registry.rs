//! Queue registry: named queues with concurrency and rate limits.
//!
//! The registry owns scheduling state; workers own execution results.
//! Dispatch is gated by two checks evaluated under one lock: the active
//! count must stay below the queue's concurrency limit, and the number
//! of dispatches in the sliding rate window must stay below the rate
//! limit. Either failing leaves the job waiting.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{QueueError, QueueResult};
use crate::events::{JobEvent, JobEventKind};
use crate::job::{Job, JobId, JobState};
use crate::store::{JobStore, QueueCounts};

/// Sliding-window rate limit: at most `max` dispatches per `window`.
#[derive(Debug, Clone, Copy)]
pub struct RateLimit {
    pub max: u32,
    pub window: Duration,
}

/// Configuration for one named queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub name: String,
    /// Max simultaneously active jobs
    pub concurrency: usize,
    /// Optional dispatch rate limit, stacked with concurrency
    pub rate_limit: Option<RateLimit>,
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            rate_limit: None,
        }
    }

    pub fn with_rate_limit(mut self, max: u32, window: Duration) -> Self {
        self.rate_limit = Some(RateLimit { max, window });
        self
    }
}

/// A dispatched job plus its cooperative cancellation flag.
#[derive(Debug, Clone)]
pub struct JobLease {
    pub job: Job,
    cancel: Arc<AtomicBool>,
}

impl JobLease {
    /// Whether the caller asked this job to stop. Workers check this at
    /// their suspension checkpoints.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }
}

struct QueueState {
    config: QueueConfig,
    paused: AtomicBool,
    dispatch: Mutex<DispatchState>,
}

#[derive(Default)]
struct DispatchState {
    /// Dispatch instants inside the rate window
    recent: VecDeque<Instant>,
    /// Jobs currently leased to workers
    active: HashSet<JobId>,
    /// Cancellation flags for active jobs
    cancel_flags: HashMap<JobId, Arc<AtomicBool>>,
}

/// Registry of queues over an injected job store.
pub struct QueueRegistry {
    store: Arc<dyn JobStore>,
    queues: HashMap<String, QueueState>,
    events: broadcast::Sender<JobEvent>,
}

impl QueueRegistry {
    pub fn new(store: Arc<dyn JobStore>, configs: Vec<QueueConfig>) -> Self {
        let queues = configs
            .into_iter()
            .map(|config| {
                (
                    config.name.clone(),
                    QueueState {
                        config,
                        paused: AtomicBool::new(false),
                        dispatch: Mutex::new(DispatchState::default()),
                    },
                )
            })
            .collect();
        let (events, _) = broadcast::channel(256);
        Self {
            store,
            queues,
            events,
        }
    }

    /// Subscribe to job lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Access the underlying store.
    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    fn queue(&self, name: &str) -> QueueResult<&QueueState> {
        self.queues
            .get(name)
            .ok_or_else(|| QueueError::configuration(name.to_string()))
    }

    fn emit(&self, job: &Job, kind: JobEventKind) {
        let _ = self
            .events
            .send(JobEvent::new(job.id.clone(), job.queue.clone(), kind));
    }

    /// Enqueue a job. Re-submitting a job id that is still live returns
    /// the existing handle instead of scheduling a duplicate; an id left
    /// over from a finished job is scheduled fresh.
    pub async fn enqueue(&self, queue: &str, mut job: Job) -> QueueResult<JobId> {
        self.queue(queue)?;
        job.queue = queue.to_string();

        if let Some(existing) = self.store.get(&job.id).await? {
            if !existing.state.is_terminal() {
                debug!(job_id = %job.id, "duplicate enqueue, returning existing job");
                return Ok(existing.id);
            }
            debug!(job_id = %job.id, prior = %existing.state, "re-enqueueing finished job id");
        }

        let id = job.id.clone();
        let kind = job.payload.kind();
        self.store.insert(job).await?;
        info!(job_id = %id, queue, kind, "enqueued job");
        Ok(id)
    }

    /// Enqueue several jobs into one queue.
    pub async fn enqueue_bulk(&self, queue: &str, jobs: Vec<Job>) -> QueueResult<Vec<JobId>> {
        let mut ids = Vec::with_capacity(jobs.len());
        for job in jobs {
            ids.push(self.enqueue(queue, job).await?);
        }
        Ok(ids)
    }

    /// Job counts for a queue.
    pub async fn counts(&self, queue: &str) -> QueueResult<QueueCounts> {
        self.queue(queue)?;
        self.store.counts(queue, Utc::now()).await
    }

    /// Stop dispatching from a queue. Already-active jobs keep running.
    pub fn pause(&self, queue: &str) -> QueueResult<()> {
        self.queue(queue)?.paused.store(true, Ordering::SeqCst);
        info!(queue, "queue paused");
        Ok(())
    }

    /// Resume dispatching.
    pub fn resume(&self, queue: &str) -> QueueResult<()> {
        self.queue(queue)?.paused.store(false, Ordering::SeqCst);
        info!(queue, "queue resumed");
        Ok(())
    }

    /// Remove terminal jobs that finished more than `older_than` ago.
    pub async fn purge(&self, queue: &str, older_than: Duration) -> QueueResult<usize> {
        self.queue(queue)?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let removed = self.store.purge(queue, cutoff).await?;
        if removed > 0 {
            debug!(queue, removed, "purged terminal jobs");
        }
        Ok(removed)
    }

    /// Try to lease the next job from a queue. Returns `None` when the
    /// queue is paused, at its concurrency limit, rate-limited, or has
    /// no ready job.
    pub async fn dispatch(&self, queue: &str) -> QueueResult<Option<JobLease>> {
        let state = self.queue(queue)?;
        if state.paused.load(Ordering::SeqCst) {
            return Ok(None);
        }

        let mut dispatch = state.dispatch.lock().await;

        if dispatch.active.len() >= state.config.concurrency {
            return Ok(None);
        }

        if let Some(limit) = state.config.rate_limit {
            let now = Instant::now();
            while let Some(front) = dispatch.recent.front() {
                if now.duration_since(*front) >= limit.window {
                    dispatch.recent.pop_front();
                } else {
                    break;
                }
            }
            if dispatch.recent.len() >= limit.max as usize {
                return Ok(None);
            }
        }

        let job = match self.store.take_next(queue, Utc::now()).await? {
            Some(job) => job,
            None => return Ok(None),
        };

        if state.config.rate_limit.is_some() {
            dispatch.recent.push_back(Instant::now());
        }
        dispatch.active.insert(job.id.clone());
        let cancel = Arc::new(AtomicBool::new(false));
        dispatch.cancel_flags.insert(job.id.clone(), cancel.clone());
        drop(dispatch);

        self.emit(&job, JobEventKind::Active);
        debug!(
            job_id = %job.id,
            queue,
            kind = job.payload.kind(),
            attempt = job.attempts + 1,
            "dispatched job"
        );
        Ok(Some(JobLease { job, cancel }))
    }

    /// Mark a leased job completed.
    pub async fn complete(&self, job: &Job) -> QueueResult<()> {
        let mut done = job.clone();
        done.state = JobState::Completed;
        done.finished_at = Some(Utc::now());
        self.store.update(&done).await?;
        self.release(&done).await;
        self.emit(&done, JobEventKind::Completed);
        info!(job_id = %done.id, queue = %done.queue, "job completed");
        Ok(())
    }

    /// Record a failed attempt. Retryable failures with attempts left
    /// re-enter the queue after backoff; everything else is permanent.
    /// Returns the resulting state.
    pub async fn fail(&self, job: &Job, error: &str, retryable: bool) -> QueueResult<JobState> {
        let mut failed = job.clone();
        failed.attempts += 1;
        failed.error = Some(error.to_string());

        let will_retry = retryable && failed.has_attempts_left();
        if will_retry {
            let delay = failed.backoff.delay_for_attempt(failed.attempts);
            failed.state = JobState::Waiting;
            failed.not_before = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            warn!(
                job_id = %failed.id,
                attempt = failed.attempts,
                max = failed.max_attempts,
                ?delay,
                "job failed, retrying after backoff: {error}"
            );
        } else {
            failed.state = JobState::Failed;
            failed.finished_at = Some(Utc::now());
            warn!(job_id = %failed.id, attempts = failed.attempts, "job failed permanently: {error}");
        }

        self.store.update(&failed).await?;
        self.release(&failed).await;
        self.emit(
            &failed,
            JobEventKind::Failed {
                error: error.to_string(),
                will_retry,
            },
        );
        Ok(failed.state)
    }

    /// Cancel a job. Waiting jobs are removed outright; active jobs get
    /// their cancellation flag set and stop cooperatively. Returns false
    /// for unknown or already-terminal jobs.
    pub async fn cancel(&self, id: &JobId) -> QueueResult<bool> {
        let job = match self.store.get(id).await? {
            Some(job) => job,
            None => return Ok(false),
        };
        match job.state {
            JobState::Waiting => {
                let mut cancelled = job.clone();
                cancelled.state = JobState::Cancelled;
                cancelled.finished_at = Some(Utc::now());
                self.store.update(&cancelled).await?;
                self.emit(&cancelled, JobEventKind::Cancelled);
                Ok(true)
            }
            JobState::Active => {
                let state = self.queue(&job.queue)?;
                let dispatch = state.dispatch.lock().await;
                if let Some(flag) = dispatch.cancel_flags.get(id) {
                    flag.store(true, Ordering::Relaxed);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Record that a worker observed its cancellation flag and stopped.
    pub async fn acknowledge_cancel(&self, job: &Job) -> QueueResult<()> {
        let mut cancelled = job.clone();
        cancelled.state = JobState::Cancelled;
        cancelled.finished_at = Some(Utc::now());
        self.store.update(&cancelled).await?;
        self.release(&cancelled).await;
        self.emit(&cancelled, JobEventKind::Cancelled);
        Ok(())
    }

    /// Refresh a leased job's liveness timestamp.
    pub async fn heartbeat(&self, id: &JobId) -> QueueResult<()> {
        if let Some(mut job) = self.store.get(id).await? {
            if job.state == JobState::Active {
                job.last_heartbeat = Some(Utc::now());
                self.store.update(&job).await?;
            }
        }
        Ok(())
    }

    /// Emit a fractional progress event for a leased job.
    pub fn report_progress(&self, job: &Job, fraction: f64) {
        self.emit(
            job,
            JobEventKind::Progress {
                fraction: fraction.clamp(0.0, 1.0),
            },
        );
    }

    /// Find active jobs whose heartbeat is older than `window` and
    /// handle them: first stall requeues the job, a second stall fails
    /// it permanently. Returns the affected job ids with whether each
    /// was requeued.
    pub async fn scan_stalled(
        &self,
        queue: &str,
        window: Duration,
    ) -> QueueResult<Vec<(JobId, bool)>> {
        self.queue(queue)?;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(window).unwrap_or_else(|_| chrono::Duration::zero());

        let mut handled = Vec::new();
        for job in self.store.jobs_in_state(queue, JobState::Active).await? {
            let stalled = job.last_heartbeat.map(|t| t < cutoff).unwrap_or(true);
            if !stalled {
                continue;
            }

            let mut update = job.clone();
            let requeue = update.stall_count == 0;
            if requeue {
                update.stall_count = 1;
                update.state = JobState::Waiting;
                update.not_before = Utc::now();
                update.last_heartbeat = None;
                warn!(job_id = %update.id, queue, "stalled job requeued");
            } else {
                update.state = JobState::Failed;
                update.error = Some("worker stalled twice".to_string());
                update.finished_at = Some(Utc::now());
                warn!(job_id = %update.id, queue, "stalled job failed permanently");
            }
            self.store.update(&update).await?;
            self.release(&update).await;
            self.emit(&update, JobEventKind::Stalled { requeued: requeue });
            handled.push((update.id.clone(), requeue));
        }
        Ok(handled)
    }

    /// Drop a job from the active set and discard its cancel flag.
    async fn release(&self, job: &Job) {
        if let Ok(state) = self.queue(&job.queue) {
            let mut dispatch = state.dispatch.lock().await;
            dispatch.active.remove(&job.id);
            dispatch.cancel_flags.remove(&job.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{BackoffPolicy, JobPayload, MusicJob};
    use crate::store::MemoryJobStore;
    use vreel_models::{Mood, RunId};

    fn registry(configs: Vec<QueueConfig>) -> QueueRegistry {
        QueueRegistry::new(Arc::new(MemoryJobStore::new()), configs)
    }

    fn job(id: &str) -> Job {
        Job::new(
            JobId::from_string(id),
            "music",
            JobPayload::GenerateMusic(MusicJob {
                run_id: RunId::from_string("run"),
                mood: Mood::Energetic,
                duration_seconds: 24,
            }),
        )
    }

    #[tokio::test]
    async fn unknown_queue_is_configuration_error() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        let err = reg.enqueue("nope", job("a")).await.unwrap_err();
        assert!(matches!(err, QueueError::Configuration(_)));
    }

    #[tokio::test]
    async fn concurrency_limit_gates_dispatch() {
        let reg = registry(vec![QueueConfig::new("music", 2)]);
        for i in 0..4 {
            reg.enqueue("music", job(&format!("j{i}"))).await.unwrap();
        }

        let a = reg.dispatch("music").await.unwrap().unwrap();
        let b = reg.dispatch("music").await.unwrap().unwrap();
        // Two active, third dispatch must hold
        assert!(reg.dispatch("music").await.unwrap().is_none());
        let counts = reg.counts("music").await.unwrap();
        assert_eq!(counts.active, 2);

        reg.complete(&a.job).await.unwrap();
        assert!(reg.dispatch("music").await.unwrap().is_some());
        reg.complete(&b.job).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn rate_limit_stacks_with_concurrency() {
        let reg = registry(vec![
            QueueConfig::new("music", 10).with_rate_limit(2, Duration::from_millis(100))
        ]);
        for i in 0..3 {
            reg.enqueue("music", job(&format!("j{i}"))).await.unwrap();
        }

        assert!(reg.dispatch("music").await.unwrap().is_some());
        assert!(reg.dispatch("music").await.unwrap().is_some());
        // Window full even though concurrency allows more
        assert!(reg.dispatch("music").await.unwrap().is_none());

        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(reg.dispatch("music").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pause_blocks_dispatch() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        reg.enqueue("music", job("a")).await.unwrap();

        reg.pause("music").unwrap();
        assert!(reg.dispatch("music").await.unwrap().is_none());
        reg.resume("music").unwrap();
        assert!(reg.dispatch("music").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn retryable_failure_backs_off_then_exhausts() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        let j = job("a")
            .with_max_attempts(3)
            .with_backoff(BackoffPolicy {
                base_ms: 100,
                max_ms: 10_000,
            });
        reg.enqueue("music", j).await.unwrap();

        // Attempt 1 fails: retried with backoff base*2
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        let state = reg.fail(&lease.job, "http 503", true).await.unwrap();
        assert_eq!(state, JobState::Waiting);
        let stored = reg
            .store()
            .get(&JobId::from_string("a"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.attempts, 1);
        let delay = stored.not_before - Utc::now();
        assert!(delay > chrono::Duration::milliseconds(150));
        assert!(delay <= chrono::Duration::milliseconds(200));

        // Delayed job not visible yet
        assert!(reg.dispatch("music").await.unwrap().is_none());

        // Make it due, burn the remaining attempts
        let mut due = stored.clone();
        due.not_before = Utc::now();
        reg.store().update(&due).await.unwrap();
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        assert_eq!(reg.fail(&lease.job, "http 503", true).await.unwrap(), JobState::Waiting);

        let mut due = reg
            .store()
            .get(&JobId::from_string("a"))
            .await
            .unwrap()
            .unwrap();
        due.not_before = Utc::now();
        reg.store().update(&due).await.unwrap();
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        let state = reg.fail(&lease.job, "http 503", true).await.unwrap();
        assert_eq!(state, JobState::Failed);
        assert!(reg.dispatch("music").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finished_job_id_is_rescheduled_not_swallowed() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        reg.enqueue("music", job("a")).await.unwrap();
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        reg.complete(&lease.job).await.unwrap();

        // Same id again after completion: scheduled fresh
        reg.enqueue("music", job("a")).await.unwrap();
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        assert_eq!(lease.job.id.as_str(), "a");
        assert_eq!(lease.job.attempts, 0);

        // While live, the same id dedups instead of duplicating
        reg.enqueue("music", job("a")).await.unwrap();
        let counts = reg.counts("music").await.unwrap();
        assert_eq!(counts.waiting, 0);
        assert_eq!(counts.active, 1);
        reg.complete(&lease.job).await.unwrap();
    }

    #[tokio::test]
    async fn non_retryable_failure_is_immediately_permanent() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        reg.enqueue("music", job("a")).await.unwrap();
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        let state = reg.fail(&lease.job, "bad input", false).await.unwrap();
        assert_eq!(state, JobState::Failed);
    }

    #[tokio::test]
    async fn cancel_waiting_removes_cancel_active_is_cooperative() {
        let reg = registry(vec![QueueConfig::new("music", 2)]);
        reg.enqueue("music", job("waiting")).await.unwrap();
        reg.enqueue("music", job("active")).await.unwrap();

        let lease = reg.dispatch("music").await.unwrap().unwrap();
        assert_eq!(lease.job.id.as_str(), "waiting");
        // Cancel the one still waiting: gone without side effects
        assert!(reg.cancel(&JobId::from_string("active")).await.unwrap());
        let counts = reg.counts("music").await.unwrap();
        assert_eq!(counts.waiting, 0);

        // Cancel the leased one: flag flips, worker acknowledges
        assert!(!lease.is_cancelled());
        assert!(reg.cancel(&lease.job.id).await.unwrap());
        assert!(lease.is_cancelled());
        reg.acknowledge_cancel(&lease.job).await.unwrap();
        let stored = reg.store().get(&lease.job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Cancelled);
    }

    #[tokio::test]
    async fn stall_requeues_once_then_fails() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        reg.enqueue("music", job("a")).await.unwrap();

        let lease = reg.dispatch("music").await.unwrap().unwrap();
        // Age the heartbeat past the window
        let mut stale = lease.job.clone();
        stale.last_heartbeat = Some(Utc::now() - chrono::Duration::seconds(120));
        reg.store().update(&stale).await.unwrap();

        let handled = reg
            .scan_stalled("music", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(handled.len(), 1);
        assert!(handled[0].1, "first stall requeues");

        // Second stall is permanent
        let lease = reg.dispatch("music").await.unwrap().unwrap();
        let mut stale = lease.job.clone();
        stale.last_heartbeat = Some(Utc::now() - chrono::Duration::seconds(120));
        reg.store().update(&stale).await.unwrap();

        let handled = reg
            .scan_stalled("music", Duration::from_secs(60))
            .await
            .unwrap();
        assert_eq!(handled.len(), 1);
        assert!(!handled[0].1, "second stall is permanent");
        let stored = reg.store().get(&lease.job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Failed);
    }

    #[tokio::test]
    async fn lifecycle_events_are_emitted() {
        let reg = registry(vec![QueueConfig::new("music", 1)]);
        let mut events = reg.subscribe();
        reg.enqueue("music", job("a")).await.unwrap();

        let lease = reg.dispatch("music").await.unwrap().unwrap();
        reg.report_progress(&lease.job, 0.5);
        reg.complete(&lease.job).await.unwrap();

        assert!(matches!(events.recv().await.unwrap().kind, JobEventKind::Active));
        assert!(matches!(
            events.recv().await.unwrap().kind,
            JobEventKind::Progress { fraction } if (fraction - 0.5).abs() < f64::EPSILON
        ));
        assert!(matches!(
            events.recv().await.unwrap().kind,
            JobEventKind::Completed
        ));
    }
}
