//! Stage job execution.
//!
//! One function per pipeline stage, dispatched from the executor by
//! payload type. Stage workers produce a [`StageOutput`] that the
//! orchestrator picks up through the [`OutcomeStore`] when the job's
//! completion event arrives; state transitions stay with the
//! orchestrator.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use tracing::info;

use vreel_clients::GenerationRequest;
use vreel_media::{download_file, CompileRequest, CompiledVideo};
use vreel_models::{validate_scenes, Mood, SceneDescription};
use vreel_queue::{ClipJob, CompileJob, JobId, JobLease, JobPayload, MusicJob, SceneJob};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::poller::{await_operation, PollOutcome};

/// Result of one completed stage job.
#[derive(Debug, Clone)]
pub enum StageOutput {
    Scenes(Vec<SceneDescription>),
    Clip {
        scene_index: usize,
        path: PathBuf,
        remote_url: String,
    },
    Music {
        path: PathBuf,
        remote_url: String,
    },
    Compiled(CompiledVideo),
}

/// Hand-off buffer between stage workers and the orchestrator, keyed by
/// job id. Workers insert before acknowledging completion; the
/// orchestrator takes on the completion event.
pub struct OutcomeStore {
    inner: Mutex<HashMap<JobId, StageOutput>>,
}

impl OutcomeStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, id: JobId, output: StageOutput) {
        if let Ok(mut inner) = self.inner.lock() {
            inner.insert(id, output);
        }
    }

    pub fn take(&self, id: &JobId) -> Option<StageOutput> {
        self.inner.lock().ok()?.remove(id)
    }
}

impl Default for OutcomeStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Prompt sent to the video synthesis service for one scene.
pub fn clip_prompt(scene: &SceneDescription) -> String {
    format!(
        "{} Camera: {:?}. Mood: {}.",
        scene.description.trim(),
        scene.camera,
        scene.mood
    )
}

/// Prompt sent to the music synthesis service.
pub fn music_prompt(mood: Mood) -> String {
    format!("Instrumental backing track, {mood} mood, suitable for a car marketing video.")
}

/// Execute one leased job to completion.
pub async fn execute(ctx: &PipelineContext, lease: &JobLease) -> WorkerResult<StageOutput> {
    match lease.job.payload.clone() {
        JobPayload::GenerateScenes(job) => generate_scenes(ctx, &job).await,
        JobPayload::GenerateClip(job) => generate_clip(ctx, lease, &job).await,
        JobPayload::GenerateMusic(job) => generate_music(ctx, lease, &job).await,
        JobPayload::CompileVideo(job) => compile_video(ctx, &job).await,
    }
}

async fn generate_scenes(ctx: &PipelineContext, job: &SceneJob) -> WorkerResult<StageOutput> {
    let scenes = ctx.description.generate_scenes(&job.request).await?;
    validate_scenes(&scenes)?;

    for scene in &scenes {
        if scene.source_image_index >= job.request.image_urls.len() {
            return Err(WorkerError::validation(format!(
                "scene {} references image {} but only {} provided",
                scene.index,
                scene.source_image_index,
                job.request.image_urls.len()
            )));
        }
    }

    info!(run_id = %job.run_id, count = scenes.len(), "scene descriptions generated");
    Ok(StageOutput::Scenes(scenes))
}

async fn generate_clip(
    ctx: &PipelineContext,
    lease: &JobLease,
    job: &ClipJob,
) -> WorkerResult<StageOutput> {
    let request = GenerationRequest {
        source_urls: vec![job.image_url.clone()],
        prompt: clip_prompt(&job.scene),
        duration_seconds: job.scene.duration_seconds,
    };

    // Each attempt starts a fresh operation; expired operations are
    // never resumed.
    let operation = ctx.video.start(&request).await?;
    let outcome = await_operation(
        ctx.video.as_ref(),
        &operation,
        &ctx.poll_config(),
        || lease.is_cancelled(),
        |fraction| ctx.registry.report_progress(&lease.job, fraction),
    )
    .await?;

    let result_url = match outcome {
        PollOutcome::Completed { result_url } => result_url,
        PollOutcome::Failed { error } => {
            return Err(WorkerError::external(format!(
                "clip operation {operation} failed: {error}"
            )))
        }
        PollOutcome::TimedOut => {
            return Err(WorkerError::timeout(format!("clip operation {operation}")))
        }
        PollOutcome::Cancelled => return Err(WorkerError::Cancelled),
    };

    let path = ctx
        .run_dir(&job.run_id)
        .join(format!("clip_{}.mp4", job.scene.index));
    download_file(&ctx.http, &result_url, &path).await?;
    ctx.artifacts.register(&job.run_id, path.clone()).await;

    info!(run_id = %job.run_id, scene = job.scene.index, "clip generated");
    Ok(StageOutput::Clip {
        scene_index: job.scene.index,
        path,
        remote_url: result_url,
    })
}

async fn generate_music(
    ctx: &PipelineContext,
    lease: &JobLease,
    job: &MusicJob,
) -> WorkerResult<StageOutput> {
    let request = GenerationRequest {
        source_urls: Vec::new(),
        prompt: music_prompt(job.mood),
        duration_seconds: job.duration_seconds,
    };

    let operation = ctx.music.start(&request).await?;
    let outcome = await_operation(
        ctx.music.as_ref(),
        &operation,
        &ctx.poll_config(),
        || lease.is_cancelled(),
        |fraction| ctx.registry.report_progress(&lease.job, fraction),
    )
    .await?;

    let result_url = match outcome {
        PollOutcome::Completed { result_url } => result_url,
        PollOutcome::Failed { error } => {
            return Err(WorkerError::external(format!(
                "music operation {operation} failed: {error}"
            )))
        }
        PollOutcome::TimedOut => {
            return Err(WorkerError::timeout(format!("music operation {operation}")))
        }
        PollOutcome::Cancelled => return Err(WorkerError::Cancelled),
    };

    let path = ctx.run_dir(&job.run_id).join("audio.mp3");
    download_file(&ctx.http, &result_url, &path).await?;
    ctx.artifacts.register(&job.run_id, path.clone()).await;

    info!(run_id = %job.run_id, "music track generated");
    Ok(StageOutput::Music {
        path,
        remote_url: result_url,
    })
}

async fn compile_video(ctx: &PipelineContext, job: &CompileJob) -> WorkerResult<StageOutput> {
    let request = CompileRequest {
        clip_paths: job.clip_paths.clone(),
        clip_durations: job.clip_durations.clone(),
        audio_path: job.audio_path.clone(),
        profile: job.profile.clone(),
        output_dir: ctx.run_dir(&job.run_id),
    };

    let compiled = ctx.compiler.compile(&request).await?;
    ctx.artifacts
        .register(&job.run_id, compiled.video_path.clone())
        .await;
    ctx.artifacts
        .register(&job.run_id, compiled.thumbnail_path.clone())
        .await;

    info!(run_id = %job.run_id, "final video compiled");
    Ok(StageOutput::Compiled(compiled))
}
