//! End-to-end pipeline tests over in-memory infrastructure.
//!
//! The description service is a wiremock server; the video and music
//! services are scripted in-process mocks; compilation is a stub that
//! writes marker files. Only the orchestration logic is real.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

use vreel_clients::{
    ClientResult, DescriptionClient, DescriptionConfig, GenerationRequest, GenerationService,
    OperationId, OperationPoll, OperationStatus,
};
use vreel_media::{CompileRequest, CompiledVideo, MediaCompiler, MediaResult};
use vreel_models::{
    PipelineRequest, RunId, RunStage, TargetPlatform, VehicleRecord,
};
use vreel_queue::{BackoffPolicy, MemoryJobStore, MemoryStatusCache, QueueRegistry};
use vreel_storage::MemoryObjectStore;
use vreel_worker::artifacts::ArtifactTracker;
use vreel_worker::stages::OutcomeStore;
use vreel_worker::{Executor, PipelineContext, PipelineService, WorkerConfig};

/// Generation service mock scripted per operation key. The key is the
/// last path segment of the first source url, or "music" for requests
/// without sources; each poll walks the script, repeating its last
/// entry once exhausted.
struct MockGen {
    scripts: Mutex<HashMap<String, Vec<OperationPoll>>>,
    poll_counts: Mutex<HashMap<String, usize>>,
    starts: Mutex<Vec<String>>,
}

impl MockGen {
    fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            poll_counts: Mutex::new(HashMap::new()),
            starts: Mutex::new(Vec::new()),
        }
    }

    fn script(self, key: &str, polls: Vec<OperationPoll>) -> Self {
        self.scripts.lock().unwrap().insert(key.to_string(), polls);
        self
    }

    fn starts_for(&self, key: &str) -> usize {
        self.starts
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.as_str() == key)
            .count()
    }

    fn total_starts(&self) -> usize {
        self.starts.lock().unwrap().len()
    }

    fn key_of(request: &GenerationRequest) -> String {
        match request.source_urls.first() {
            Some(url) => url.rsplit('/').next().unwrap_or(url).to_string(),
            None => "music".to_string(),
        }
    }
}

#[async_trait]
impl GenerationService for MockGen {
    async fn start(&self, request: &GenerationRequest) -> ClientResult<OperationId> {
        let key = Self::key_of(request);
        self.starts.lock().unwrap().push(key.clone());
        Ok(OperationId(key))
    }

    async fn poll(&self, operation: &OperationId) -> ClientResult<OperationPoll> {
        let key = operation.as_str().to_string();
        let index = {
            let mut counts = self.poll_counts.lock().unwrap();
            let entry = counts.entry(key.clone()).or_insert(0);
            let index = *entry;
            *entry += 1;
            index
        };
        let scripts = self.scripts.lock().unwrap();
        let script = scripts.get(&key).expect("unscripted operation");
        Ok(script[index.min(script.len() - 1)].clone())
    }
}

fn running(progress: f64) -> OperationPoll {
    OperationPoll {
        status: OperationStatus::Running,
        progress,
        result_url: None,
        error: None,
    }
}

fn completed(url: &str) -> OperationPoll {
    OperationPoll {
        status: OperationStatus::Completed,
        progress: 1.0,
        result_url: Some(url.to_string()),
        error: None,
    }
}

fn failed(error: &str) -> OperationPoll {
    OperationPoll {
        status: OperationStatus::Failed,
        progress: 0.0,
        result_url: None,
        error: Some(error.to_string()),
    }
}

/// Compiler stub: records requests and writes marker output files.
struct StubCompiler {
    requests: Mutex<Vec<CompileRequest>>,
}

impl StubCompiler {
    fn new() -> Self {
        Self {
            requests: Mutex::new(Vec::new()),
        }
    }

    fn invocations(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl MediaCompiler for StubCompiler {
    async fn compile(&self, request: &CompileRequest) -> MediaResult<CompiledVideo> {
        self.requests.lock().unwrap().push(request.clone());
        tokio::fs::create_dir_all(&request.output_dir).await?;
        let video_path = request.output_dir.join("final.mp4");
        let thumbnail_path = request.output_dir.join("thumbnail.jpg");
        tokio::fs::write(&video_path, b"compiled video").await?;
        tokio::fs::write(&thumbnail_path, b"thumbnail").await?;
        Ok(CompiledVideo {
            video_path,
            thumbnail_path,
        })
    }
}

fn scene_json(index: usize, image: usize) -> serde_json::Value {
    serde_json::json!({
        "index": index,
        "description": format!("scene {index}"),
        "camera": "zoom_in",
        "mood": "energetic",
        "duration_seconds": 8,
        "source_image_index": image
    })
}

fn three_scenes() -> serde_json::Value {
    serde_json::json!({ "scenes": [scene_json(0, 0), scene_json(1, 1), scene_json(2, 2)] })
}

fn request() -> PipelineRequest {
    PipelineRequest {
        vehicle: VehicleRecord {
            make: "Nimbus".to_string(),
            model: "GT".to_string(),
            year: 2025,
            trim: Some("Touring".to_string()),
            color: Some("midnight blue".to_string()),
            mileage: Some(12_000),
        },
        idea: "weekend escape".to_string(),
        image_urls: vec![
            "https://img.example/img0.jpg".to_string(),
            "https://img.example/img1.jpg".to_string(),
            "https://img.example/img2.jpg".to_string(),
        ],
        platform: TargetPlatform::Vertical,
    }
}

struct Harness {
    _server: MockServer,
    _work_dir: tempfile::TempDir,
    ctx: Arc<PipelineContext>,
    service: PipelineService,
    executor: Option<Executor>,
    video: Arc<MockGen>,
    music: Arc<MockGen>,
    store: Arc<MemoryObjectStore>,
    compiler: Arc<StubCompiler>,
}

impl Harness {
    async fn finish(mut self) {
        if let Some(executor) = self.executor.take() {
            executor.shutdown().await;
        }
    }
}

async fn harness(
    scenes_body: serde_json::Value,
    video: MockGen,
    music: MockGen,
    poll_max_attempts: u32,
    max_attempts: u32,
) -> Harness {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/scenes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(scenes_body))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path_regex(r"^/files/.*"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"media bytes".to_vec()))
        .mount(&server)
        .await;

    let work_dir = tempfile::tempdir().unwrap();
    let mut config = WorkerConfig::default();
    config.work_dir = work_dir.path().to_path_buf();
    config.poll_interval = Duration::from_millis(10);
    config.poll_max_attempts = poll_max_attempts;
    config.idle_delay = Duration::from_millis(5);
    config.heartbeat_interval = Duration::from_millis(20);
    config.stall_window = Duration::from_secs(30);
    config.stall_scan_interval = Duration::from_secs(10);
    config.backoff = BackoffPolicy {
        base_ms: 5,
        max_ms: 50,
    };
    config.max_attempts = max_attempts;
    config.shutdown_grace = Duration::from_secs(2);
    config.status_ttl = Duration::from_secs(60);

    let description = Arc::new(
        DescriptionClient::new(DescriptionConfig {
            base_url: server.uri(),
            api_key: "test-key".to_string(),
            timeout: Duration::from_secs(5),
            max_retries: 0,
        })
        .unwrap(),
    );
    let video = Arc::new(video);
    let music = Arc::new(music);
    let store = Arc::new(MemoryObjectStore::new());
    let compiler = Arc::new(StubCompiler::new());

    let registry = Arc::new(QueueRegistry::new(
        Arc::new(MemoryJobStore::new()),
        config.queue_configs(),
    ));
    let ctx = Arc::new(PipelineContext {
        config,
        registry,
        status: Arc::new(MemoryStatusCache::new()),
        description,
        video: video.clone(),
        music: music.clone(),
        store: store.clone(),
        compiler: compiler.clone(),
        artifacts: ArtifactTracker::new(),
        outcomes: OutcomeStore::new(),
        http: reqwest::Client::new(),
    });

    let executor = Executor::start(ctx.clone());
    let service = PipelineService::new(ctx.clone());

    Harness {
        _server: server,
        _work_dir: work_dir,
        ctx,
        service,
        executor: Some(executor),
        video,
        music,
        store,
        compiler,
    }
}

#[tokio::test]
async fn happy_path_completes_with_final_url() {
    // Scripts need the file server's URI, so they are installed after
    // the harness starts and before the run is submitted.
    let video = MockGen::new();
    let music = MockGen::new();
    let h = harness(three_scenes(), video, music, 20, 3).await;
    let uri = h._server.uri();
    for i in 0..3 {
        h.video.scripts.lock().unwrap().insert(
            format!("img{i}.jpg"),
            vec![
                running(0.5),
                completed(&format!("{uri}/files/clip{i}.mp4")),
            ],
        );
    }
    h.music.scripts.lock().unwrap().insert(
        "music".to_string(),
        vec![running(0.3), completed(&format!("{uri}/files/audio.mp3"))],
    );

    let run_id = h.service.submit("dealer_1", request()).await.unwrap();
    h.service.join(&run_id).await;

    let run = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(run.stage, RunStage::Completed);
    assert_eq!(run.progress, 100);
    assert_eq!(
        run.final_url.as_deref(),
        Some(format!("https://storage.test/runs/{run_id}/final.mp4").as_str())
    );
    assert!(run.thumbnail_url.is_some());
    assert!(run.audio_url.is_some());
    assert_eq!(run.clip_urls.len(), 3);
    assert!(run.clip_urls.iter().all(|u| u.is_some()));
    assert!(run.error.is_none());
    assert!(run.completed_at.is_some());

    // Artifacts uploaded
    assert!(h.store.contains(&format!("runs/{run_id}/final.mp4")).await);
    assert!(h.store.contains(&format!("runs/{run_id}/thumbnail.jpg")).await);

    // Compiler saw the clips in scene order with the audio track
    {
        let requests = h.compiler.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        let compile = &requests[0];
        assert_eq!(compile.clip_paths.len(), 3);
        for (i, clip) in compile.clip_paths.iter().enumerate() {
            assert!(clip.ends_with(format!("clip_{i}.mp4")));
        }
        assert_eq!(compile.clip_durations, vec![8.0, 8.0, 8.0]);
        assert!(compile.audio_path.ends_with("audio.mp3"));
    }

    // Temp files cleaned up at the terminal stage
    assert!(!h.ctx.run_dir(&run_id).exists());

    // One operation per clip plus one for music
    assert_eq!(h.video.total_starts(), 3);
    assert_eq!(h.music.total_starts(), 1);

    // Joining a finished run drops its handle
    assert_eq!(h.service.tracked_runs().await, 0);

    h.finish().await;
}

#[tokio::test]
async fn clip_failure_fails_run_without_compiling() {
    // Scene 0's clip completes and is downloaded well before scene 1's
    // clip reports its permanent failure; scene 2's clip and the music
    // never finish, so cancellation reaches them mid-poll.
    let video = MockGen::new()
        .script(
            "img1.jpg",
            vec![running(0.2), running(0.4), running(0.6), failed("render error")],
        )
        .script("img2.jpg", vec![running(0.2)]);
    let music = MockGen::new().script("music", vec![running(0.1)]);

    let h = harness(three_scenes(), video, music, 1000, 2).await;
    let uri = h._server.uri();
    h.video.scripts.lock().unwrap().insert(
        "img0.jpg".to_string(),
        vec![completed(&format!("{uri}/files/clip0.mp4"))],
    );

    let run_id = h.service.submit("dealer_1", request()).await.unwrap();
    h.service.join(&run_id).await;

    let run = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(run.stage, RunStage::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains("render error"));

    // Compilation never dispatched, nothing uploaded
    assert_eq!(h.compiler.invocations(), 0);
    assert_eq!(h.store.len().await, 0);

    // The failing clip burned its full attempts budget
    assert_eq!(h.video.starts_for("img1.jpg"), 2);

    // Clip 0 finished and was downloaded before the run failed...
    assert_eq!(h.video.starts_for("img0.jpg"), 1);
    assert!(run.clip_urls.first().cloned().flatten().is_some());
    // ...and terminal cleanup deleted its temp file. remove_dir refuses
    // non-empty directories, so a gone directory means a gone file.
    assert!(!h.ctx.run_dir(&run_id).exists());
}

#[tokio::test]
async fn music_timeout_gets_one_fresh_operation_then_fails() {
    let video = MockGen::new();
    let music = MockGen::new().script("music", vec![running(0.1)]);

    // Two polls per attempt before timing out
    let h = harness(three_scenes(), video, music, 2, 3).await;
    let uri = h._server.uri();
    for i in 0..3 {
        h.video.scripts.lock().unwrap().insert(
            format!("img{i}.jpg"),
            vec![completed(&format!("{uri}/files/clip{i}.mp4"))],
        );
    }

    let run_id = h.service.submit("dealer_1", request()).await.unwrap();
    h.service.join(&run_id).await;

    let run = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(run.stage, RunStage::Failed);
    assert!(run.error.as_deref().unwrap_or("").contains("timed out"));

    // Timeout policy: one fresh operation after the first, then permanent
    assert_eq!(h.music.starts_for("music"), 2);
    assert_eq!(h.compiler.invocations(), 0);
}

#[tokio::test]
async fn wrong_scene_count_fails_without_any_generation() {
    let scenes = serde_json::json!({ "scenes": [scene_json(0, 0), scene_json(1, 1)] });
    let h = harness(scenes, MockGen::new(), MockGen::new(), 20, 3).await;

    let run_id = h.service.submit("dealer_1", request()).await.unwrap();
    h.service.join(&run_id).await;

    let run = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(run.stage, RunStage::Failed);
    assert!(run
        .error
        .as_deref()
        .unwrap_or("")
        .contains("expected exactly 3 scenes"));

    // Validation failures never reach the synthesis services
    assert_eq!(h.video.total_starts(), 0);
    assert_eq!(h.music.total_starts(), 0);
    assert_eq!(h.compiler.invocations(), 0);
}

#[tokio::test]
async fn cancellation_stops_a_run_mid_generation() {
    // Operations never finish; the run parks in the generation stages.
    let video = MockGen::new()
        .script("img0.jpg", vec![running(0.2)])
        .script("img1.jpg", vec![running(0.2)])
        .script("img2.jpg", vec![running(0.2)]);
    let music = MockGen::new().script("music", vec![running(0.1)]);

    let h = harness(three_scenes(), video, music, 100_000, 3).await;
    let run_id = h.service.submit("dealer_1", request()).await.unwrap();

    // Wait for the run to reach clip generation
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        if let Some(run) = h.service.status(&run_id).await.unwrap() {
            if matches!(
                run.stage,
                RunStage::GeneratingClips | RunStage::GeneratingMusic
            ) {
                break;
            }
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "run never reached clip generation"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    // Re-submitting the live id is a no-op
    let again = h
        .service
        .submit_with_id(run_id.clone(), "dealer_1", request())
        .await
        .unwrap();
    assert_eq!(again, run_id);

    assert!(h.service.cancel(&run_id).await.unwrap());
    h.service.join(&run_id).await;

    let run = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(run.stage, RunStage::Cancelled);
    assert_eq!(h.compiler.invocations(), 0);
    assert_eq!(h.store.len().await, 0);

    // A finished run can no longer be cancelled, and its handle is gone
    assert!(!h.service.cancel(&run_id).await.unwrap());
    assert_eq!(h.service.tracked_runs().await, 0);
}

#[tokio::test]
async fn finished_run_id_can_be_resubmitted() {
    let h = harness(three_scenes(), MockGen::new(), MockGen::new(), 20, 3).await;
    let uri = h._server.uri();
    for i in 0..3 {
        h.video.scripts.lock().unwrap().insert(
            format!("img{i}.jpg"),
            vec![completed(&format!("{uri}/files/clip{i}.mp4"))],
        );
    }
    h.music.scripts.lock().unwrap().insert(
        "music".to_string(),
        vec![completed(&format!("{uri}/files/audio.mp3"))],
    );

    let run_id = RunId::from_string("rerun-1");
    h.service
        .submit_with_id(run_id.clone(), "dealer_1", request())
        .await
        .unwrap();
    h.service.join(&run_id).await;
    let first = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(first.stage, RunStage::Completed);

    // Same id again after completion: a fresh run, not a hang on the
    // finished stage jobs still sitting in the store.
    h.service
        .submit_with_id(run_id.clone(), "dealer_1", request())
        .await
        .unwrap();
    h.service.join(&run_id).await;
    let second = h.service.status(&run_id).await.unwrap().expect("status cached");
    assert_eq!(second.stage, RunStage::Completed);
    assert_eq!(second.progress, 100);
    assert_eq!(h.video.total_starts(), 6);
    assert_eq!(h.music.total_starts(), 2);
    assert_eq!(h.compiler.invocations(), 2);

    h.finish().await;
}

#[tokio::test]
async fn unknown_run_status_is_none() {
    let h = harness(three_scenes(), MockGen::new(), MockGen::new(), 20, 3).await;
    let status = h
        .service
        .status(&RunId::from_string("nope"))
        .await
        .unwrap();
    assert!(status.is_none());
}
