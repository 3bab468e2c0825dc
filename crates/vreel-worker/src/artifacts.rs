//! Temporary artifact tracking.
//!
//! Every intermediate file a run produces (downloaded clips, the audio
//! track, compile output) is registered here so terminal cleanup can
//! remove them exactly once. Cleanup is idempotent: a second call for
//! the same run, or a missing file, is a no-op.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use vreel_models::RunId;

/// Registry of temp files per run.
pub struct ArtifactTracker {
    inner: Mutex<HashMap<RunId, Vec<PathBuf>>>,
}

impl ArtifactTracker {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    /// Record a temp file belonging to `run`.
    pub async fn register(&self, run: &RunId, path: PathBuf) {
        self.inner
            .lock()
            .await
            .entry(run.clone())
            .or_default()
            .push(path);
    }

    /// Number of files currently tracked for `run`.
    pub async fn tracked(&self, run: &RunId) -> usize {
        self.inner
            .lock()
            .await
            .get(run)
            .map(|paths| paths.len())
            .unwrap_or(0)
    }

    /// Delete every tracked file for `run` and forget the run. Returns
    /// the number of files removed. Best-effort: unremovable files are
    /// logged and skipped.
    pub async fn cleanup(&self, run: &RunId) -> usize {
        let paths = match self.inner.lock().await.remove(run) {
            Some(paths) => paths,
            None => return 0,
        };

        let mut removed = 0;
        for path in paths {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(run_id = %run, path = %path.display(), "cleanup failed: {e}"),
            }
        }
        debug!(run_id = %run, removed, "cleaned up run artifacts");
        removed
    }
}

impl Default for ArtifactTracker {
    fn default() -> Self {
        Self::new()
    }
}
