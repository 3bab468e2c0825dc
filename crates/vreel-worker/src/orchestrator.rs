//! Pipeline orchestration.
//!
//! One orchestrator task drives one run end to end: it enqueues stage
//! jobs, folds their lifecycle events into the run record, and owns
//! every stage transition. It is the single writer of the run's status
//! cache entry, so progress can only move forward.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tracing::{info, warn};

use vreel_media::CompiledVideo;
use vreel_models::{
    banded_progress, EncodingProfile, PipelineRequest, PipelineRun, RunStage, SCENE_COUNT,
};
use vreel_queue::{
    ClipJob, CompileJob, Job, JobEvent, JobEventKind, JobId, JobPayload, MusicJob, SceneJob,
};

use crate::context::PipelineContext;
use crate::{QUEUE_CLIPS, QUEUE_COMPILE, QUEUE_MUSIC, QUEUE_SCENES};

/// Per-stage completion fractions feeding the global progress value.
#[derive(Debug, Default)]
struct ProgressLedger {
    scenes: f64,
    clips: Vec<f64>,
    music: f64,
    compile: f64,
    upload: f64,
}

impl ProgressLedger {
    fn total(&self) -> u8 {
        banded_progress(self.scenes, &self.clips, self.music, self.compile, self.upload)
    }
}

/// Which ledger entry a pending job feeds.
#[derive(Debug, Clone, Copy)]
enum Slot {
    Scenes,
    Clip(usize),
    Music,
    Compile,
}

/// Why a run stopped short of completion.
enum RunHalt {
    Failed(String),
    Cancelled,
}

/// Drive one run to a terminal stage. Terminal status is always
/// persisted and temp artifacts are always cleaned up, whatever the
/// outcome.
pub async fn run_pipeline(
    ctx: Arc<PipelineContext>,
    run: PipelineRun,
    request: PipelineRequest,
    cancel_rx: watch::Receiver<bool>,
) {
    let run_id = run.run_id.clone();
    // Subscribe before any job is enqueued so no event can be missed.
    let events = ctx.registry.subscribe();

    let mut driver = RunDriver {
        ctx: ctx.clone(),
        run,
        request,
        events,
        cancel_rx,
        cancel_closed: false,
        ledger: ProgressLedger::default(),
        clip_paths: Vec::new(),
        audio_path: None,
        compiled: None,
    };

    match driver.drive().await {
        Ok(()) => info!(run_id = %run_id, "pipeline run completed"),
        Err(RunHalt::Failed(error)) => {
            warn!(run_id = %run_id, "pipeline run failed: {error}");
            driver.run.fail(error);
            driver.persist().await;
        }
        Err(RunHalt::Cancelled) => {
            info!(run_id = %run_id, "pipeline run cancelled");
            driver.run.set_stage(RunStage::Cancelled);
            driver.persist().await;
        }
    }

    ctx.artifacts.cleanup(&run_id).await;
    tokio::fs::remove_dir(ctx.run_dir(&run_id)).await.ok();
}

struct RunDriver {
    ctx: Arc<PipelineContext>,
    run: PipelineRun,
    request: PipelineRequest,
    events: broadcast::Receiver<JobEvent>,
    cancel_rx: watch::Receiver<bool>,
    cancel_closed: bool,
    ledger: ProgressLedger,
    clip_paths: Vec<Option<PathBuf>>,
    audio_path: Option<PathBuf>,
    compiled: Option<CompiledVideo>,
}

impl RunDriver {
    async fn drive(&mut self) -> Result<(), RunHalt> {
        self.generate_scenes().await?;
        self.generate_clips_and_music().await?;
        self.compile().await?;
        self.upload().await?;

        self.transition(RunStage::Completed).await;
        Ok(())
    }

    async fn generate_scenes(&mut self) -> Result<(), RunHalt> {
        self.check_cancelled()?;
        self.transition(RunStage::GeneratingScenes).await;

        let job = self.stage_job(
            "scenes",
            QUEUE_SCENES,
            JobPayload::GenerateScenes(SceneJob {
                run_id: self.run.run_id.clone(),
                request: self.request.clone(),
            }),
        );
        let id = self.enqueue(QUEUE_SCENES, job).await?;
        self.wait_for(HashMap::from([(id, Slot::Scenes)])).await?;

        if self.run.scene_descriptions.len() != SCENE_COUNT {
            return Err(RunHalt::Failed(format!(
                "expected {SCENE_COUNT} scene descriptions, got {}",
                self.run.scene_descriptions.len()
            )));
        }
        Ok(())
    }

    async fn generate_clips_and_music(&mut self) -> Result<(), RunHalt> {
        self.check_cancelled()?;

        let scenes = self.run.scene_descriptions.clone();
        self.ledger.clips = vec![0.0; scenes.len()];
        self.clip_paths = vec![None; scenes.len()];
        self.run.clip_urls = vec![None; scenes.len()];
        self.transition(RunStage::GeneratingClips).await;

        let mut pending = HashMap::new();
        for scene in &scenes {
            let image_url = self
                .request
                .image_urls
                .get(scene.source_image_index)
                .cloned()
                .ok_or_else(|| {
                    RunHalt::Failed(format!(
                        "scene {} references missing image {}",
                        scene.index, scene.source_image_index
                    ))
                })?;
            let job = self.stage_job(
                &format!("clip:{}", scene.index),
                QUEUE_CLIPS,
                JobPayload::GenerateClip(ClipJob {
                    run_id: self.run.run_id.clone(),
                    scene: scene.clone(),
                    image_url,
                }),
            );
            let id = self.enqueue(QUEUE_CLIPS, job).await?;
            pending.insert(id, Slot::Clip(scene.index));
        }

        // Music runs concurrently with the clips; the theme follows the
        // opening scene and the track length matches the summed scene
        // durations.
        let music = self.stage_job(
            "music",
            QUEUE_MUSIC,
            JobPayload::GenerateMusic(MusicJob {
                run_id: self.run.run_id.clone(),
                mood: scenes[0].mood,
                duration_seconds: scenes.iter().map(|s| s.duration_seconds).sum(),
            }),
        );
        let id = self.enqueue(QUEUE_MUSIC, music).await?;
        pending.insert(id, Slot::Music);
        self.transition(RunStage::GeneratingMusic).await;

        // Join barrier: compilation needs every clip and the audio.
        self.wait_for(pending).await
    }

    async fn compile(&mut self) -> Result<(), RunHalt> {
        self.check_cancelled()?;
        self.transition(RunStage::Compiling).await;

        let mut scenes = self.run.scene_descriptions.clone();
        scenes.sort_by_key(|s| s.index);

        // Clips enter the compiler in scene order, never arrival order.
        let mut clip_paths = Vec::with_capacity(scenes.len());
        for scene in &scenes {
            let path = self
                .clip_paths
                .get(scene.index)
                .and_then(|p| p.clone())
                .ok_or_else(|| {
                    RunHalt::Failed(format!("clip for scene {} missing", scene.index))
                })?;
            clip_paths.push(path);
        }
        let audio_path = self
            .audio_path
            .clone()
            .ok_or_else(|| RunHalt::Failed("audio track missing".to_string()))?;

        let job = self.stage_job(
            "compile",
            QUEUE_COMPILE,
            JobPayload::CompileVideo(CompileJob {
                run_id: self.run.run_id.clone(),
                clip_paths,
                clip_durations: scenes.iter().map(|s| s.duration_seconds as f64).collect(),
                audio_path,
                profile: EncodingProfile::for_platform(self.request.platform),
            }),
        );
        let id = self.enqueue(QUEUE_COMPILE, job).await?;
        self.wait_for(HashMap::from([(id, Slot::Compile)])).await
    }

    async fn upload(&mut self) -> Result<(), RunHalt> {
        self.check_cancelled()?;
        self.transition(RunStage::Uploading).await;

        let compiled = self
            .compiled
            .clone()
            .ok_or_else(|| RunHalt::Failed("compiled video missing".to_string()))?;
        let base = format!("runs/{}", self.run.run_id);

        let final_url = self
            .put_with_retry(&compiled.video_path, &format!("{base}/final.mp4"), "video/mp4")
            .await?;
        let thumbnail_url = self
            .put_with_retry(
                &compiled.thumbnail_path,
                &format!("{base}/thumbnail.jpg"),
                "image/jpeg",
            )
            .await?;

        self.run.final_url = Some(final_url);
        self.run.thumbnail_url = Some(thumbnail_url);
        self.ledger.upload = 1.0;
        self.push_progress().await;
        Ok(())
    }

    /// Upload one artifact, retrying a failed put once.
    async fn put_with_retry(
        &self,
        path: &std::path::Path,
        key: &str,
        content_type: &str,
    ) -> Result<String, RunHalt> {
        match self.ctx.store.put_file(path, key, content_type).await {
            Ok(url) => Ok(url),
            Err(first) => {
                warn!(run_id = %self.run.run_id, key, "upload failed, retrying once: {first}");
                self.ctx
                    .store
                    .put_file(path, key, content_type)
                    .await
                    .map_err(|e| RunHalt::Failed(format!("upload of {key} failed: {e}")))
            }
        }
    }

    fn stage_job(&self, suffix: &str, queue: &str, payload: JobPayload) -> Job {
        Job::new(
            JobId::from_string(format!("{}:{suffix}", self.run.run_id)),
            queue,
            payload,
        )
        .with_max_attempts(self.ctx.config.max_attempts)
        .with_backoff(self.ctx.config.backoff)
    }

    async fn enqueue(&self, queue: &str, job: Job) -> Result<JobId, RunHalt> {
        self.ctx
            .registry
            .enqueue(queue, job)
            .await
            .map_err(|e| RunHalt::Failed(format!("enqueue failed: {e}")))
    }

    /// Consume lifecycle events until every pending job is terminal.
    /// Any permanent failure or stall cancels the rest and halts the
    /// run; a run-level cancel does the same.
    async fn wait_for(&mut self, mut pending: HashMap<JobId, Slot>) -> Result<(), RunHalt> {
        while !pending.is_empty() {
            tokio::select! {
                changed = self.cancel_rx.changed(), if !self.cancel_closed => {
                    match changed {
                        Ok(()) if *self.cancel_rx.borrow() => {
                            self.cancel_jobs(pending.keys()).await;
                            return Err(RunHalt::Cancelled);
                        }
                        Ok(()) => {}
                        Err(_) => self.cancel_closed = true,
                    }
                }
                event = self.events.recv() => {
                    let event = match event {
                        Ok(event) => event,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Dropped events may include a completion;
                            // fall back to the store for the truth.
                            warn!(run_id = %self.run.run_id, skipped, "event stream lagged");
                            self.reconcile(&mut pending).await?;
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            return Err(RunHalt::Failed("event stream closed".to_string()));
                        }
                    };
                    let slot = match pending.get(&event.job_id) {
                        Some(slot) => *slot,
                        None => continue,
                    };

                    match event.kind {
                        JobEventKind::Active => {}
                        JobEventKind::Progress { fraction } => {
                            self.set_fraction(slot, fraction);
                            self.push_progress().await;
                        }
                        JobEventKind::Completed => {
                            self.set_fraction(slot, 1.0);
                            self.absorb_output(&event.job_id)?;
                            pending.remove(&event.job_id);
                            self.push_progress().await;
                        }
                        JobEventKind::Failed { error, will_retry } => {
                            if !will_retry {
                                pending.remove(&event.job_id);
                                self.cancel_jobs(pending.keys()).await;
                                return Err(RunHalt::Failed(error));
                            }
                        }
                        JobEventKind::Stalled { requeued } => {
                            if !requeued {
                                pending.remove(&event.job_id);
                                self.cancel_jobs(pending.keys()).await;
                                return Err(RunHalt::Failed(
                                    "stage job stalled twice".to_string(),
                                ));
                            }
                        }
                        JobEventKind::Cancelled => {
                            pending.remove(&event.job_id);
                            self.cancel_jobs(pending.keys()).await;
                            return Err(RunHalt::Cancelled);
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-read pending jobs from the store after the event stream
    /// lagged, folding in any terminal states whose events were lost.
    async fn reconcile(&mut self, pending: &mut HashMap<JobId, Slot>) -> Result<(), RunHalt> {
        let ids: Vec<JobId> = pending.keys().cloned().collect();
        for id in ids {
            let job = match self.ctx.registry.store().get(&id).await {
                Ok(Some(job)) => job,
                Ok(None) => continue,
                Err(e) => return Err(RunHalt::Failed(format!("store read failed: {e}"))),
            };
            match job.state {
                vreel_queue::JobState::Completed => {
                    let slot = match pending.remove(&id) {
                        Some(slot) => slot,
                        None => continue,
                    };
                    self.set_fraction(slot, 1.0);
                    self.absorb_output(&id)?;
                    self.push_progress().await;
                }
                vreel_queue::JobState::Failed => {
                    pending.remove(&id);
                    self.cancel_jobs(pending.keys()).await;
                    return Err(RunHalt::Failed(
                        job.error.unwrap_or_else(|| "stage job failed".to_string()),
                    ));
                }
                vreel_queue::JobState::Cancelled => {
                    pending.remove(&id);
                    self.cancel_jobs(pending.keys()).await;
                    return Err(RunHalt::Cancelled);
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Fold a completed job's output into the run record.
    fn absorb_output(&mut self, id: &JobId) -> Result<(), RunHalt> {
        use crate::stages::StageOutput;

        let output = self
            .ctx
            .outcomes
            .take(id)
            .ok_or_else(|| RunHalt::Failed(format!("job {id} completed without output")))?;

        match output {
            StageOutput::Scenes(scenes) => {
                self.run.scene_descriptions = scenes;
            }
            StageOutput::Clip {
                scene_index,
                path,
                remote_url,
            } => {
                if let Some(slot) = self.run.clip_urls.get_mut(scene_index) {
                    *slot = Some(remote_url);
                }
                if let Some(slot) = self.clip_paths.get_mut(scene_index) {
                    *slot = Some(path);
                }
            }
            StageOutput::Music { path, remote_url } => {
                self.run.audio_url = Some(remote_url);
                self.audio_path = Some(path);
            }
            StageOutput::Compiled(compiled) => {
                self.compiled = Some(compiled);
            }
        }
        Ok(())
    }

    fn set_fraction(&mut self, slot: Slot, fraction: f64) {
        match slot {
            Slot::Scenes => self.ledger.scenes = fraction,
            Slot::Clip(index) => {
                if let Some(entry) = self.ledger.clips.get_mut(index) {
                    *entry = fraction;
                }
            }
            Slot::Music => self.ledger.music = fraction,
            Slot::Compile => self.ledger.compile = fraction,
        }
    }

    /// Apply the ledger total; later-lower values are dropped by the
    /// run record itself.
    async fn push_progress(&mut self) {
        if self.run.apply_progress(self.ledger.total()) {
            self.persist().await;
        }
    }

    async fn cancel_jobs(&self, ids: impl Iterator<Item = &JobId>) {
        for id in ids {
            if let Err(e) = self.ctx.registry.cancel(id).await {
                warn!(job_id = %id, "failed to cancel job: {e}");
            }
        }
    }

    fn check_cancelled(&self) -> Result<(), RunHalt> {
        if !self.cancel_closed && *self.cancel_rx.borrow() {
            return Err(RunHalt::Cancelled);
        }
        Ok(())
    }

    async fn transition(&mut self, stage: RunStage) {
        info!(run_id = %self.run.run_id, stage = %stage, "stage transition");
        self.run.set_stage(stage);
        self.persist().await;
    }

    /// Write the run snapshot to the status cache. Cache write failures
    /// are logged, never fatal to the run.
    async fn persist(&self) {
        persist_run(&self.ctx, &self.run).await;
    }
}

/// Serialize and cache a run snapshot under its status key.
pub async fn persist_run(ctx: &PipelineContext, run: &PipelineRun) {
    let payload = match serde_json::to_string(run) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(run_id = %run.run_id, "failed to serialize run status: {e}");
            return;
        }
    };
    if let Err(e) = ctx
        .status
        .set(&run.run_id.cache_key(), &payload, ctx.config.status_ttl)
        .await
    {
        warn!(run_id = %run.run_id, "failed to write run status: {e}");
    }
}
