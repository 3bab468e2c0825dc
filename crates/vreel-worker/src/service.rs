//! Pipeline submission surface.
//!
//! Callers submit runs, query status, and cancel through this service.
//! Each accepted run gets one orchestrator task; re-submitting a live
//! run id returns the existing run instead of starting a second one.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use vreel_models::{PipelineRequest, PipelineRun, RunId};

use crate::context::PipelineContext;
use crate::error::{WorkerError, WorkerResult};
use crate::orchestrator::{persist_run, run_pipeline};

struct RunHandle {
    cancel: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl RunHandle {
    fn is_live(&self) -> bool {
        self.task.as_ref().map(|t| !t.is_finished()).unwrap_or(false)
    }
}

/// Front door for pipeline runs.
pub struct PipelineService {
    ctx: Arc<PipelineContext>,
    runs: Mutex<HashMap<RunId, RunHandle>>,
}

/// Reject requests the pipeline cannot possibly serve.
pub fn validate_request(request: &PipelineRequest) -> WorkerResult<()> {
    if request.idea.trim().is_empty() {
        return Err(WorkerError::validation("marketing idea is empty"));
    }
    if request.image_urls.is_empty() {
        return Err(WorkerError::validation("at least one source image is required"));
    }
    Ok(())
}

impl PipelineService {
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        Self {
            ctx,
            runs: Mutex::new(HashMap::new()),
        }
    }

    /// Accept a new run with a generated id.
    pub async fn submit(
        &self,
        owner_id: &str,
        request: PipelineRequest,
    ) -> WorkerResult<RunId> {
        self.submit_with_id(RunId::new(), owner_id, request).await
    }

    /// Accept a run under a caller-assigned id. Submitting an id whose
    /// run is still in flight returns that id without side effects.
    pub async fn submit_with_id(
        &self,
        run_id: RunId,
        owner_id: &str,
        request: PipelineRequest,
    ) -> WorkerResult<RunId> {
        validate_request(&request)?;

        let mut runs = self.runs.lock().await;
        runs.retain(|_, handle| handle.is_live());
        if runs.contains_key(&run_id) {
            info!(run_id = %run_id, "duplicate submission, returning live run");
            return Ok(run_id);
        }

        let run = PipelineRun::new(run_id.clone(), owner_id);
        // Status is queryable before the orchestrator takes its first step.
        persist_run(&self.ctx, &run).await;

        let (cancel, cancel_rx) = watch::channel(false);
        let task = tokio::spawn(run_pipeline(self.ctx.clone(), run, request, cancel_rx));
        runs.insert(
            run_id.clone(),
            RunHandle {
                cancel,
                task: Some(task),
            },
        );
        info!(run_id = %run_id, owner_id, "run accepted");
        Ok(run_id)
    }

    /// Latest cached snapshot of a run, `None` once expired or unknown.
    pub async fn status(&self, run_id: &RunId) -> WorkerResult<Option<PipelineRun>> {
        match self.ctx.status.get(&run_id.cache_key()).await? {
            Some(payload) => Ok(Some(serde_json::from_str(&payload)?)),
            None => Ok(None),
        }
    }

    /// Request cancellation of a live run. Returns false for unknown or
    /// already-terminal runs. The run stops at its next checkpoint; the
    /// status entry reflects `cancelled` once it does.
    pub async fn cancel(&self, run_id: &RunId) -> WorkerResult<bool> {
        let runs = self.runs.lock().await;
        match runs.get(run_id) {
            Some(handle) if handle.is_live() => {
                let _ = handle.cancel.send(true);
                info!(run_id = %run_id, "cancellation requested");
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    /// Wait for a run's orchestrator task to finish and drop its
    /// handle. Intended for drains and tests; status stays available
    /// through [`Self::status`].
    pub async fn join(&self, run_id: &RunId) {
        let task = {
            let mut runs = self.runs.lock().await;
            runs.get_mut(run_id).and_then(|handle| handle.task.take())
        };
        if let Some(task) = task {
            task.await.ok();
        }
        let mut runs = self.runs.lock().await;
        if runs.get(run_id).map(|h| !h.is_live()).unwrap_or(false) {
            runs.remove(run_id);
        }
    }

    /// Number of run handles currently retained. Handles for finished
    /// runs are dropped on join and on the next submission.
    pub async fn tracked_runs(&self) -> usize {
        self.runs.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vreel_models::{TargetPlatform, VehicleRecord};

    fn request(idea: &str, images: Vec<String>) -> PipelineRequest {
        PipelineRequest {
            vehicle: VehicleRecord {
                make: "Nimbus".to_string(),
                model: "GT".to_string(),
                year: 2025,
                trim: None,
                color: None,
                mileage: None,
            },
            idea: idea.to_string(),
            image_urls: images,
            platform: TargetPlatform::Vertical,
        }
    }

    #[test]
    fn empty_idea_is_rejected() {
        let err = validate_request(&request("  ", vec!["https://img.example/1.jpg".into()]))
            .unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
    }

    #[test]
    fn missing_images_are_rejected() {
        let err = validate_request(&request("summer sale", vec![])).unwrap_err();
        assert!(matches!(err, WorkerError::Validation(_)));
    }

    #[test]
    fn well_formed_request_passes() {
        assert!(
            validate_request(&request("summer sale", vec!["https://img.example/1.jpg".into()]))
                .is_ok()
        );
    }
}
