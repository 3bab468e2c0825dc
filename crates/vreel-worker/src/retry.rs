//! Retry policy by error class.
//!
//! The queue applies backoff and the attempts ceiling; this module only
//! decides whether a given failure deserves another attempt at all.
//!
//! - Transient external failures retry with backoff up to the job's
//!   attempts ceiling.
//! - Timeouts get exactly one fresh attempt: re-running the job starts
//!   a new operation rather than resuming the expired one.
//! - Storage and compile failures get one retry.
//! - Validation failures and cancellations are never retried.

use vreel_queue::Job;

use crate::error::WorkerError;

/// How a failure class interacts with the attempts ceiling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Never retried
    Never,
    /// Retried with backoff until the job's attempts run out
    Backoff,
    /// Retried exactly once, regardless of the remaining budget
    Once,
}

/// Classify an error.
pub fn classify(error: &WorkerError) -> RetryClass {
    match error {
        WorkerError::ExternalService(_) => RetryClass::Backoff,
        WorkerError::Timeout(_) | WorkerError::Storage(_) | WorkerError::Compile(_) => {
            RetryClass::Once
        }
        WorkerError::Validation(_)
        | WorkerError::Cancelled
        | WorkerError::Config(_)
        | WorkerError::Queue(_)
        | WorkerError::Json(_) => RetryClass::Never,
    }
}

/// Whether this failure should put the job back in the queue.
/// `job.attempts` is the count of attempts made before the current one.
pub fn should_retry(error: &WorkerError, job: &Job) -> bool {
    match classify(error) {
        RetryClass::Never => false,
        RetryClass::Backoff => true,
        RetryClass::Once => job.attempts == 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vreel_models::{Mood, RunId};
    use vreel_queue::{JobId, JobPayload, MusicJob};

    fn job(attempts: u32) -> Job {
        let mut job = Job::new(
            JobId::from_string("j1"),
            "music",
            JobPayload::GenerateMusic(MusicJob {
                run_id: RunId::from_string("run"),
                mood: Mood::Energetic,
                duration_seconds: 24,
            }),
        );
        job.attempts = attempts;
        job
    }

    #[test]
    fn transient_failures_use_the_full_budget() {
        let err = WorkerError::external("http 503");
        assert!(should_retry(&err, &job(0)));
        assert!(should_retry(&err, &job(2)));
    }

    #[test]
    fn timeouts_retry_exactly_once() {
        let err = WorkerError::timeout("operation op-1");
        assert!(should_retry(&err, &job(0)));
        assert!(!should_retry(&err, &job(1)));
    }

    #[test]
    fn storage_and_compile_retry_once() {
        assert!(should_retry(&WorkerError::storage("put failed"), &job(0)));
        assert!(!should_retry(&WorkerError::storage("put failed"), &job(1)));
        assert!(should_retry(&WorkerError::Compile("xfade".into()), &job(0)));
        assert!(!should_retry(&WorkerError::Compile("xfade".into()), &job(1)));
    }

    #[test]
    fn validation_and_cancellation_never_retry() {
        assert!(!should_retry(&WorkerError::validation("2 scenes"), &job(0)));
        assert!(!should_retry(&WorkerError::Cancelled, &job(0)));
    }
}
