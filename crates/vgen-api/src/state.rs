//! Application state.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use vgen_media::{check_ffmpeg, check_ffprobe, CliRenderer, FfmpegMuxer, FfprobeDurationProbe, RendererConfig};
use vgen_speech::{SpeechClient, SpeechConfig, SpeechSynthesizer};
use vgen_storage::{ArtifactStore, S3Client, StorageConfig};
use vgen_store::{JobRepository, Repositories, StoreConfig, TtsRepository};
use vgen_worker::{
    ArtifactPublisher, CompositionDefaults, JobExecutor, PipelineContext, ProcessAdapter,
    WorkerConfig,
};

use crate::config::ApiConfig;

/// Bucket names reported by `/api/storage/url`.
#[derive(Debug, Clone)]
pub struct BucketNames {
    pub audio: String,
    pub video: String,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub jobs: Arc<dyn JobRepository>,
    pub tts: Arc<dyn TtsRepository>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub storage: Arc<dyn ArtifactStore>,
    pub buckets: BucketNames,
    pub executor: Arc<JobExecutor>,
    /// Directory local artifacts are written to and served from
    pub output_dir: PathBuf,
    pub defaults: CompositionDefaults,
}

impl AppState {
    /// Create application state from the environment, starting the executor.
    pub async fn new(config: ApiConfig) -> anyhow::Result<Self> {
        let storage_config = StorageConfig::from_env()?;
        let s3 = S3Client::new(storage_config.clone());
        if let Err(e) = s3.ensure_buckets().await {
            warn!("Bucket bootstrap failed, uploads may fail: {}", e);
        }

        let speech_config = SpeechConfig::from_env();
        info!("Speech service at {}", speech_config.base_url);
        let speech: Arc<dyn SpeechSynthesizer> = Arc::new(SpeechClient::new(speech_config)?);

        let repos = Repositories::connect(&StoreConfig::from_env())?;

        let worker_config = WorkerConfig::from_env();
        tokio::fs::create_dir_all(&worker_config.output_dir).await?;
        tokio::fs::create_dir_all(&worker_config.work_dir).await?;

        for (tool, found) in [
            ("ffmpeg", check_ffmpeg().is_ok()),
            ("ffprobe", check_ffprobe().is_ok()),
        ] {
            if !found {
                warn!("{} not found on PATH; narrated jobs will fail", tool);
            }
        }

        let storage: Arc<dyn ArtifactStore> = Arc::new(s3);
        let adapter = ProcessAdapter::new(
            Arc::clone(&speech),
            Arc::new(CliRenderer::new(RendererConfig::from_env())),
            Arc::new(FfmpegMuxer),
            Arc::new(FfprobeDurationProbe),
        );
        let publisher =
            ArtifactPublisher::new(Arc::clone(&storage), storage_config.video_bucket.clone());
        let ctx = Arc::new(PipelineContext::new(
            worker_config,
            repos.jobs.clone(),
            adapter,
            publisher,
        ));

        Ok(Self::from_parts(
            config,
            repos,
            speech,
            storage,
            BucketNames {
                audio: storage_config.audio_bucket,
                video: storage_config.video_bucket,
            },
            ctx,
            CompositionDefaults::from_env(),
        ))
    }

    /// Assemble state from already-built components. Starts an executor over
    /// `ctx`, so it must be called inside a Tokio runtime.
    pub fn from_parts(
        config: ApiConfig,
        repos: Repositories,
        speech: Arc<dyn SpeechSynthesizer>,
        storage: Arc<dyn ArtifactStore>,
        buckets: BucketNames,
        ctx: Arc<PipelineContext>,
        defaults: CompositionDefaults,
    ) -> Self {
        let output_dir = ctx.config.output_dir.clone();
        Self {
            config,
            jobs: repos.jobs,
            tts: repos.tts,
            speech,
            storage,
            buckets,
            executor: Arc::new(JobExecutor::new(ctx)),
            output_dir,
            defaults,
        }
    }
}
