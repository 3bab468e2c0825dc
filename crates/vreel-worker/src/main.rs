//! Pipeline worker binary.
//!
//! One-shot mode: reads a submission file (`{"owner_id": ..., "request":
//! ...}`), runs the pipeline to a terminal stage, prints the final run
//! snapshot as JSON, and exits non-zero if the run did not complete.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vreel_clients::{DescriptionClient, HttpGenerationClient};
use vreel_media::FfmpegCompiler;
use vreel_models::{PipelineRequest, RunStage};
use vreel_queue::{MemoryJobStore, QueueRegistry, RedisStatusCache};
use vreel_storage::{R2Client, R2Config};
use vreel_worker::artifacts::ArtifactTracker;
use vreel_worker::stages::OutcomeStore;
use vreel_worker::{Executor, PipelineContext, PipelineService, WorkerConfig};

#[derive(Debug, Deserialize)]
struct Submission {
    owner_id: String,
    request: PipelineRequest,
}

#[tokio::main]
async fn main() {
    // Install rustls crypto provider (required for TLS/HTTPS)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env()
        .add_directive("vreel=info".parse().unwrap());

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vreel-worker");

    let Some(path) = std::env::args().nth(1) else {
        error!("usage: vreel-worker <submission.json>");
        std::process::exit(2);
    };
    let submission: Submission = match std::fs::read_to_string(&path)
        .map_err(anyhow::Error::from)
        .and_then(|raw| serde_json::from_str(&raw).map_err(anyhow::Error::from))
    {
        Ok(submission) => submission,
        Err(e) => {
            error!("failed to read submission {path}: {e}");
            std::process::exit(2);
        }
    };

    let config = WorkerConfig::from_env();
    info!("Worker config: {:?}", config);

    let ctx = match build_context(config).await {
        Ok(ctx) => Arc::new(ctx),
        Err(e) => {
            error!("failed to build pipeline context: {e}");
            std::process::exit(1);
        }
    };

    let executor = Executor::start(ctx.clone());
    let service = PipelineService::new(ctx.clone());

    let run_id = match service.submit(&submission.owner_id, submission.request).await {
        Ok(run_id) => run_id,
        Err(e) => {
            error!("submission rejected: {e}");
            executor.shutdown().await;
            std::process::exit(1);
        }
    };
    info!(run_id = %run_id, "run submitted");

    // Wait for a terminal stage; Ctrl-C cancels the run cooperatively.
    let final_run = loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal, cancelling run");
                service.cancel(&run_id).await.ok();
            }
        }
        match service.status(&run_id).await {
            Ok(Some(run)) if run.is_terminal() => break run,
            Ok(_) => {}
            Err(e) => error!("status read failed: {e}"),
        }
    };
    service.join(&run_id).await;

    match serde_json::to_string_pretty(&final_run) {
        Ok(json) => println!("{json}"),
        Err(e) => error!("failed to render final status: {e}"),
    }

    executor.shutdown().await;
    info!("Worker shutdown complete");

    if final_run.stage != RunStage::Completed {
        std::process::exit(1);
    }
}

async fn build_context(config: WorkerConfig) -> anyhow::Result<PipelineContext> {
    let registry = Arc::new(QueueRegistry::new(
        Arc::new(MemoryJobStore::new()),
        config.queue_configs(),
    ));
    let status = Arc::new(RedisStatusCache::from_env()?);
    let description = Arc::new(DescriptionClient::from_env()?);
    let video = Arc::new(HttpGenerationClient::from_env("VIDEO_GEN")?);
    let music = Arc::new(HttpGenerationClient::from_env("MUSIC_GEN")?);
    let store = Arc::new(R2Client::new(R2Config::from_env()?).await?);
    let compiler = Arc::new(FfmpegCompiler::new()?);
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(300))
        .build()?;

    Ok(PipelineContext {
        config,
        registry,
        status,
        description,
        video,
        music,
        store,
        compiler,
        artifacts: ArtifactTracker::new(),
        outcomes: OutcomeStore::new(),
        http,
    })
}
