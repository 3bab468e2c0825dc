//! Pipeline worker: orchestration, stage execution, and retry policy.
//!
//! The worker turns an accepted [`vreel_models::PipelineRequest`] into a
//! finished marketing video by driving four stage queues: scene
//! description, clip generation, music generation, and compilation.
//! Upload of the final artifacts is performed by the orchestrator
//! itself rather than a queue job.

pub mod artifacts;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod orchestrator;
pub mod poller;
pub mod retry;
pub mod service;
pub mod stages;

pub use config::WorkerConfig;
pub use context::PipelineContext;
pub use error::{WorkerError, WorkerResult};
pub use executor::Executor;
pub use service::PipelineService;

/// Queue names, one per pipeline stage.
pub const QUEUE_SCENES: &str = "scenes";
pub const QUEUE_CLIPS: &str = "clips";
pub const QUEUE_MUSIC: &str = "music";
pub const QUEUE_COMPILE: &str = "compile";

/// Every stage queue, in pipeline order.
pub const ALL_QUEUES: [&str; 4] = [QUEUE_SCENES, QUEUE_CLIPS, QUEUE_MUSIC, QUEUE_COMPILE];
