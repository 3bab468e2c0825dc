//! Stage worker pools.
//!
//! The executor runs a fixed-size pool of worker loops per queue, sized
//! to the queue's concurrency limit, plus one maintenance loop handling
//! stall scans and terminal-job purges. Shutdown flips a watch channel;
//! loops finish their current job and exit, and anything still running
//! past the grace period is aborted.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use vreel_queue::JobLease;

use crate::context::PipelineContext;
use crate::error::WorkerError;
use crate::{retry, stages, ALL_QUEUES};

/// Running worker pools over a shared context.
pub struct Executor {
    shutdown: watch::Sender<bool>,
    tasks: JoinSet<()>,
    grace: std::time::Duration,
}

impl Executor {
    /// Spawn worker loops for every configured queue plus the
    /// maintenance loop.
    pub fn start(ctx: Arc<PipelineContext>) -> Self {
        let (shutdown, _) = watch::channel(false);
        let mut tasks = JoinSet::new();

        for queue_config in ctx.config.queue_configs() {
            for _ in 0..queue_config.concurrency {
                tasks.spawn(worker_loop(
                    ctx.clone(),
                    queue_config.name.clone(),
                    shutdown.subscribe(),
                ));
            }
        }
        tasks.spawn(maintenance_loop(ctx.clone(), shutdown.subscribe()));

        info!("executor started");
        Self {
            shutdown,
            tasks,
            grace: ctx.config.shutdown_grace,
        }
    }

    /// Signal shutdown and drain. Jobs still running when the grace
    /// period expires are aborted; the stall scanner will requeue them
    /// on the next start.
    pub async fn shutdown(mut self) {
        info!("executor draining");
        let _ = self.shutdown.send(true);

        let deadline = tokio::time::sleep(self.grace);
        tokio::pin!(deadline);
        loop {
            tokio::select! {
                joined = self.tasks.join_next() => {
                    if joined.is_none() {
                        break;
                    }
                }
                _ = &mut deadline => {
                    warn!("shutdown grace expired, aborting remaining workers");
                    self.tasks.abort_all();
                    break;
                }
            }
        }
        info!("executor stopped");
    }
}

async fn worker_loop(
    ctx: Arc<PipelineContext>,
    queue: String,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        match ctx.registry.dispatch(&queue).await {
            Ok(Some(lease)) => process(&ctx, lease).await,
            Ok(None) => {
                tokio::select! {
                    _ = tokio::time::sleep(ctx.config.idle_delay) => {}
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                warn!(queue, "dispatch failed: {e}");
                tokio::time::sleep(ctx.config.idle_delay).await;
            }
        }
    }
}

/// Execute one leased job and settle it with the registry.
async fn process(ctx: &Arc<PipelineContext>, lease: JobLease) {
    let job_id = lease.job.id.clone();
    let heartbeat = tokio::spawn(heartbeat_loop(ctx.clone(), job_id.clone()));

    let result = stages::execute(ctx, &lease).await;
    heartbeat.abort();

    let settled = match result {
        Ok(output) => {
            ctx.outcomes.insert(job_id.clone(), output);
            ctx.registry.complete(&lease.job).await
        }
        Err(WorkerError::Cancelled) => ctx.registry.acknowledge_cancel(&lease.job).await,
        Err(e) => {
            let retryable = retry::should_retry(&e, &lease.job);
            ctx.registry
                .fail(&lease.job, &e.to_string(), retryable)
                .await
                .map(|_| ())
        }
    };
    if let Err(e) = settled {
        error!(job_id = %job_id, "failed to settle job: {e}");
    }
}

async fn heartbeat_loop(ctx: Arc<PipelineContext>, job_id: vreel_queue::JobId) {
    let mut interval = tokio::time::interval(ctx.config.heartbeat_interval);
    loop {
        interval.tick().await;
        if let Err(e) = ctx.registry.heartbeat(&job_id).await {
            warn!(job_id = %job_id, "heartbeat failed: {e}");
        }
    }
}

/// Periodic stall scan and purge across all queues.
async fn maintenance_loop(ctx: Arc<PipelineContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(ctx.config.stall_scan_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }

        for queue in ALL_QUEUES {
            match ctx.registry.scan_stalled(queue, ctx.config.stall_window).await {
                Ok(handled) => {
                    for (job_id, requeued) in handled {
                        warn!(job_id = %job_id, queue, requeued, "stalled job handled");
                    }
                }
                Err(e) => warn!(queue, "stall scan failed: {e}"),
            }
            if let Err(e) = ctx.registry.purge(queue, ctx.config.purge_age).await {
                warn!(queue, "purge failed: {e}");
            }
        }
    }
}
