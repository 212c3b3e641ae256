//! In-memory fakes of the external collaborators.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for
//! downstream crates' tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use vgen_media::{
    DurationProbe, MediaError, MediaResult, Muxer, RenderEngine, RenderProgressFn, RenderRequest,
};
use vgen_speech::{SpeechError, SpeechResult, SpeechSynthesizer, SynthesisResult};
use vgen_storage::{ArtifactStore, StorageError, StorageResult};
use vgen_store::Repositories;

use crate::adapter::ProcessAdapter;
use crate::config::WorkerConfig;
use crate::pipeline::PipelineContext;
use crate::publisher::ArtifactPublisher;

/// Speech service fake. Downloads write a few bytes of "audio".
#[derive(Default)]
pub struct FakeSpeech {
    pub fail: Option<String>,
    pub fail_download: bool,
    pub reported_duration: Option<f64>,
    pub calls: AtomicUsize,
    pub deleted: Mutex<Vec<String>>,
}

impl FakeSpeech {
    pub fn failing(message: &str) -> Self {
        Self {
            fail: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn reporting(duration: f64) -> Self {
        Self {
            reported_duration: Some(duration),
            ..Default::default()
        }
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSpeech {
    async fn synthesize(&self, _text: &str, _language: &str) -> SpeechResult<SynthesisResult> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.fail {
            return Err(SpeechError::Status {
                status: 500,
                body: message.clone(),
            });
        }
        Ok(SynthesisResult {
            file_id: format!("speech-{}", n),
            filename: format!("speech-{}.mp3", n),
            audio_url: format!("http://speech.test/audio/speech-{}.mp3", n),
            duration_seconds: self.reported_duration,
        })
    }

    async fn download(&self, _audio_url: &str, dest: &Path) -> SpeechResult<u64> {
        if self.fail_download {
            return Err(SpeechError::invalid_response("download refused"));
        }
        tokio::fs::write(dest, b"ID3fake-audio").await?;
        Ok(13)
    }

    async fn delete_audio(&self, filename: &str) -> SpeechResult<()> {
        if let Ok(mut deleted) = self.deleted.lock() {
            deleted.push(filename.to_string());
        }
        Ok(())
    }

    async fn health_check(&self) -> SpeechResult<()> {
        Ok(())
    }
}

/// Render engine fake.
pub struct FakeRenderer {
    pub compositions: Vec<String>,
    pub fractions: Vec<f64>,
    pub write_output: bool,
    pub fail: Option<String>,
    /// Block in `render` until the job is cancelled.
    pub block_until_cancelled: bool,
    pub requests: Mutex<Vec<RenderRequest>>,
}

impl Default for FakeRenderer {
    fn default() -> Self {
        Self {
            compositions: vec!["HelloWorld".to_string(), "OnlyLogo".to_string()],
            fractions: vec![0.25, 0.5, 0.75, 1.0],
            write_output: true,
            fail: None,
            block_until_cancelled: false,
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl FakeRenderer {
    pub fn with_fractions(mut self, fractions: Vec<f64>) -> Self {
        self.fractions = fractions;
        self
    }

    pub fn without_output(mut self) -> Self {
        self.write_output = false;
        self
    }

    pub fn failing(mut self, message: &str) -> Self {
        self.fail = Some(message.to_string());
        self
    }

    pub fn blocking(mut self) -> Self {
        self.block_until_cancelled = true;
        self
    }

    pub fn last_request(&self) -> Option<RenderRequest> {
        self.requests.lock().ok()?.last().cloned()
    }
}

#[async_trait]
impl RenderEngine for FakeRenderer {
    async fn compositions(&self, cancel: &CancellationToken) -> MediaResult<Vec<String>> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        Ok(self.compositions.clone())
    }

    async fn render(
        &self,
        request: &RenderRequest,
        on_progress: RenderProgressFn,
        cancel: &CancellationToken,
    ) -> MediaResult<()> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        if self.block_until_cancelled {
            cancel.cancelled().await;
            return Err(MediaError::Cancelled);
        }
        if let Some(message) = &self.fail {
            return Err(MediaError::render_failed(message.clone(), Some(1)));
        }

        for fraction in &self.fractions {
            on_progress(*fraction);
            tokio::task::yield_now().await;
        }

        if self.write_output {
            tokio::fs::write(&request.output, b"fake-video").await?;
        }
        Ok(())
    }
}

/// Muxer fake: concatenates its inputs into the output.
#[derive(Default)]
pub struct FakeMuxer {
    pub fail: Option<String>,
}

#[async_trait]
impl Muxer for FakeMuxer {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> MediaResult<()> {
        if cancel.is_cancelled() {
            return Err(MediaError::Cancelled);
        }
        if let Some(message) = &self.fail {
            return Err(MediaError::ffmpeg_failed(
                format!("exit code 1: {}", message),
                Some(message.clone()),
                Some(1),
            ));
        }
        let mut merged = tokio::fs::read(video).await?;
        merged.extend(tokio::fs::read(audio).await?);
        tokio::fs::write(output, merged).await?;
        Ok(())
    }
}

/// Duration probe fake.
pub struct FakeProbe {
    result: Result<f64, String>,
    pub calls: AtomicUsize,
}

impl FakeProbe {
    pub fn returning(seconds: f64) -> Self {
        Self {
            result: Ok(seconds),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing() -> Self {
        Self {
            result: Err("no duration in probe output".to_string()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl DurationProbe for FakeProbe {
    async fn duration_seconds(&self, _path: &Path) -> MediaResult<f64> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.result.clone().map_err(MediaError::InvalidMedia)
    }
}

/// Object store fake keyed by `(bucket, key)`.
#[derive(Default)]
pub struct FakeArtifactStore {
    pub fail_uploads: bool,
    pub fail_deletes: bool,
    pub objects: Mutex<HashMap<(String, String), usize>>,
}

impl FakeArtifactStore {
    pub fn failing_uploads() -> Self {
        Self {
            fail_uploads: true,
            ..Default::default()
        }
    }

    pub fn failing_deletes() -> Self {
        Self {
            fail_deletes: true,
            ..Default::default()
        }
    }

    pub fn object_count(&self) -> usize {
        self.objects.lock().map(|o| o.len()).unwrap_or(0)
    }
}

#[async_trait]
impl ArtifactStore for FakeArtifactStore {
    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        _content_type: &str,
    ) -> StorageResult<String> {
        if self.fail_uploads {
            return Err(StorageError::upload_failed("connection refused"));
        }
        let size = tokio::fs::read(path).await?.len();
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert((bucket.to_string(), key.to_string()), size);
        }
        Ok(self.public_url(bucket, key))
    }

    async fn delete_object(&self, bucket: &str, key: &str) -> StorageResult<()> {
        if self.fail_deletes {
            return Err(StorageError::delete_failed("access denied"));
        }
        if let Ok(mut objects) = self.objects.lock() {
            objects.remove(&(bucket.to_string(), key.to_string()));
        }
        Ok(())
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        Ok(())
    }

    fn public_base_url(&self) -> &str {
        "http://storage.test"
    }
}

/// A pipeline context wired to fakes and in-memory stores.
pub struct Harness {
    pub ctx: Arc<PipelineContext>,
    pub repos: Repositories,
    pub speech: Arc<FakeSpeech>,
    pub renderer: Arc<FakeRenderer>,
    pub muxer: Arc<FakeMuxer>,
    pub probe: Arc<FakeProbe>,
    pub store: Arc<FakeArtifactStore>,
    pub work_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Harness {
    pub fn builder(root: &Path) -> HarnessBuilder {
        HarnessBuilder {
            root: root.to_path_buf(),
            speech: FakeSpeech::default(),
            renderer: FakeRenderer::default(),
            muxer: FakeMuxer::default(),
            probe: FakeProbe::returning(5.03),
            store: FakeArtifactStore::default(),
            max_concurrent_jobs: 2,
            queue_capacity: 8,
        }
    }
}

pub struct HarnessBuilder {
    root: PathBuf,
    speech: FakeSpeech,
    renderer: FakeRenderer,
    muxer: FakeMuxer,
    probe: FakeProbe,
    store: FakeArtifactStore,
    max_concurrent_jobs: usize,
    queue_capacity: usize,
}

impl HarnessBuilder {
    pub fn speech(mut self, speech: FakeSpeech) -> Self {
        self.speech = speech;
        self
    }

    pub fn renderer(mut self, renderer: FakeRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn muxer(mut self, muxer: FakeMuxer) -> Self {
        self.muxer = muxer;
        self
    }

    pub fn probe(mut self, probe: FakeProbe) -> Self {
        self.probe = probe;
        self
    }

    pub fn store(mut self, store: FakeArtifactStore) -> Self {
        self.store = store;
        self
    }

    pub fn capacity(mut self, max_concurrent_jobs: usize, queue_capacity: usize) -> Self {
        self.max_concurrent_jobs = max_concurrent_jobs;
        self.queue_capacity = queue_capacity;
        self
    }

    pub fn build(self) -> Harness {
        let work_dir = self.root.join("work");
        let output_dir = self.root.join("videos");
        let config = WorkerConfig {
            max_concurrent_jobs: self.max_concurrent_jobs,
            queue_capacity: self.queue_capacity,
            work_dir: work_dir.clone(),
            output_dir: output_dir.clone(),
            ..Default::default()
        };

        let speech = Arc::new(self.speech);
        let renderer = Arc::new(self.renderer);
        let muxer = Arc::new(self.muxer);
        let probe = Arc::new(self.probe);
        let store = Arc::new(self.store);
        let repos = Repositories::in_memory();

        let adapter = ProcessAdapter::new(
            speech.clone(),
            renderer.clone(),
            muxer.clone(),
            probe.clone(),
        );
        let publisher = ArtifactPublisher::new(store.clone(), "video-gen-videos");
        let ctx = Arc::new(PipelineContext::new(
            config,
            repos.jobs.clone(),
            adapter,
            publisher,
        ));

        Harness {
            ctx,
            repos,
            speech,
            renderer,
            muxer,
            probe,
            store,
            work_dir,
            output_dir,
        }
    }
}

/// Every regular file under `dir`, recursively.
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return found;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            found.extend(files_under(&path));
        } else {
            found.push(path);
        }
    }
    found
}
