//! Shared data models for the vreel backend.
//!
//! This crate provides Serde-serializable types for:
//! - Pipeline runs and their stage machine
//! - Scene briefs and generated scene descriptions
//! - Platform encoding profiles

pub mod encoding;
pub mod run;
pub mod scene;

// Re-export common types
pub use encoding::{EncodingProfile, TargetPlatform};
pub use run::{banded_progress, PipelineRun, RunId, RunStage};
pub use scene::{
    validate_scenes, CameraMovement, Mood, PipelineRequest, SceneDescription,
    SceneValidationError, VehicleRecord, SCENE_COUNT,
};
