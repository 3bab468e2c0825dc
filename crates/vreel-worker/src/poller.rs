//! Generic poller for asynchronous generation operations.
//!
//! Polls an operation at a fixed interval until it reaches a terminal
//! status, the polling budget runs out, or the job is cancelled. The
//! caller decides what each outcome means; the poller itself never
//! restarts an operation.

use std::time::Duration;

use tracing::debug;

use vreel_clients::{GenerationService, OperationId, OperationStatus};

use crate::error::WorkerResult;

/// Polling parameters.
#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_attempts: u32,
}

/// Terminal result of polling one operation.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Completed { result_url: String },
    Failed { error: String },
    /// Budget exhausted without a terminal status
    TimedOut,
    /// The job's cancellation flag flipped between polls
    Cancelled,
}

/// Poll `operation` until it resolves.
///
/// `cancelled` is checked before every poll; `on_progress` is invoked
/// with the reported completion fraction after every successful poll.
/// Transport errors surface as [`crate::error::WorkerError`] after the
/// client's own retries are exhausted.
pub async fn await_operation<S>(
    service: &S,
    operation: &OperationId,
    config: &PollConfig,
    cancelled: impl Fn() -> bool,
    mut on_progress: impl FnMut(f64),
) -> WorkerResult<PollOutcome>
where
    S: GenerationService + ?Sized,
{
    for attempt in 0..config.max_attempts {
        if cancelled() {
            return Ok(PollOutcome::Cancelled);
        }

        let poll = service.poll(operation).await?;
        on_progress(poll.progress);
        debug!(
            operation = %operation,
            attempt = attempt + 1,
            progress = poll.progress,
            "polled operation"
        );

        match poll.status {
            OperationStatus::Completed => {
                return Ok(match poll.result_url {
                    Some(result_url) => PollOutcome::Completed { result_url },
                    None => PollOutcome::Failed {
                        error: "operation completed without a result url".to_string(),
                    },
                });
            }
            OperationStatus::Failed => {
                return Ok(PollOutcome::Failed {
                    error: poll
                        .error
                        .unwrap_or_else(|| "generation failed".to_string()),
                });
            }
            OperationStatus::Running => {
                if attempt + 1 < config.max_attempts {
                    tokio::time::sleep(config.interval).await;
                }
            }
        }
    }

    Ok(PollOutcome::TimedOut)
}
