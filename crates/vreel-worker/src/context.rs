//! Shared dependencies for stage workers and the orchestrator.

use std::path::PathBuf;
use std::sync::Arc;

use vreel_clients::{DescriptionClient, GenerationService};
use vreel_media::MediaCompiler;
use vreel_models::RunId;
use vreel_queue::{QueueRegistry, StatusCache};
use vreel_storage::ObjectStore;

use crate::artifacts::ArtifactTracker;
use crate::config::WorkerConfig;
use crate::poller::PollConfig;
use crate::stages::OutcomeStore;

/// Everything a worker or orchestrator needs to process jobs: the queue
/// registry, external service clients, storage, and scratch bookkeeping.
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub registry: Arc<QueueRegistry>,
    pub status: Arc<dyn StatusCache>,
    pub description: Arc<DescriptionClient>,
    pub video: Arc<dyn GenerationService>,
    pub music: Arc<dyn GenerationService>,
    pub store: Arc<dyn ObjectStore>,
    pub compiler: Arc<dyn MediaCompiler>,
    pub artifacts: ArtifactTracker,
    pub outcomes: OutcomeStore,
    pub http: reqwest::Client,
}

impl PipelineContext {
    /// Scratch directory for one run's intermediate files.
    pub fn run_dir(&self, run: &RunId) -> PathBuf {
        self.config.work_dir.join(run.as_str())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            interval: self.config.poll_interval,
            max_attempts: self.config.poll_max_attempts,
        }
    }
}
