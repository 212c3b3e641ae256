//! Pipeline orchestration.
//!
//! Drives one job record from `pending` to a terminal state:
//!
//! - render-only: composition → render → publish
//! - narrate-and-render: synthesis → duration → composition → render → mux → publish
//!
//! Stages run strictly in order. A fatal stage error stops the run and is
//! recorded as `"<stage> stage failed: <message>"`. Temp files are removed on
//! every exit path.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use vgen_media::fs_utils::ensure_parent_dir;
use vgen_media::RenderRequest;
use vgen_models::{JobRecord, OutputLocation, PipelineKind, RenderParameters};
use vgen_store::JobRepository;

use crate::adapter::ProcessAdapter;
use crate::config::WorkerConfig;
use crate::duration::{resolve_from_audio, resolve_without_audio};
use crate::error::{Stage, StageError};
use crate::logging::JobLogger;
use crate::metrics;
use crate::progress::{budget, map_fraction, ProgressReporter};
use crate::publisher::{ArtifactPublisher, TempFileGuard};

/// Everything a pipeline run needs.
pub struct PipelineContext {
    pub config: WorkerConfig,
    pub repo: Arc<dyn JobRepository>,
    pub adapter: ProcessAdapter,
    pub publisher: ArtifactPublisher,
}

impl PipelineContext {
    pub fn new(
        config: WorkerConfig,
        repo: Arc<dyn JobRepository>,
        adapter: ProcessAdapter,
        publisher: ArtifactPublisher,
    ) -> Self {
        Self {
            config,
            repo,
            adapter,
            publisher,
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq)]
pub enum JobOutcome {
    /// `degraded` when the upload failed and the artifact stayed local.
    Completed {
        location: OutputLocation,
        degraded: bool,
    },
    Failed(String),
    Cancelled,
    /// The record could not be claimed (deleted, or no longer pending).
    Abandoned,
}

/// Per-run state shared by the stage functions.
struct Run<'a> {
    ctx: &'a PipelineContext,
    job: &'a JobRecord,
    cancel: &'a CancellationToken,
    logger: &'a JobLogger,
    progress: ProgressReporter,
}

impl Run<'_> {
    fn ensure_active(&self) -> Result<(), StageError> {
        if self.cancel.is_cancelled() {
            Err(StageError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn timed<T, F>(&self, stage: Stage, fut: F) -> T
    where
        F: Future<Output = T>,
    {
        self.logger.log_stage(stage);
        let started = Instant::now();
        let out = fut.await;
        metrics::record_stage(stage, started.elapsed());
        out
    }

    async fn record_resolved_media(&self, audio_url: Option<String>, frames: u32) {
        if let Err(e) = self
            .ctx
            .repo
            .record_resolved_media(&self.job.id, audio_url, frames)
            .await
        {
            self.logger
                .log_warning(&format!("failed to record resolved media: {}", e));
        }
    }

    async fn render(
        &self,
        parameters: &RenderParameters,
        frames: u32,
        output: &Path,
        range: (u8, u8),
    ) -> Result<PathBuf, StageError> {
        self.ensure_active()?;
        ensure_parent_dir(output)
            .await
            .map_err(|e| StageError::Render(e.to_string()))?;

        let request = RenderRequest {
            composition_id: self.job.composition_id.clone(),
            props: parameters.to_props(),
            frame_count: frames,
            output: output.to_path_buf(),
        };
        let reporter = self.progress.clone();
        let (start, end) = range;

        self.timed(
            Stage::Render,
            self.ctx.adapter.render(
                &request,
                move |fraction| reporter.report_detached(map_fraction(start, end, fraction)),
                self.cancel,
            ),
        )
        .await
    }

    async fn select_composition(&self) -> Result<(), StageError> {
        self.ensure_active()?;
        self.timed(
            Stage::Composition,
            self.ctx
                .adapter
                .select_composition(&self.job.composition_id, self.cancel),
        )
        .await
    }

    async fn render_only(&self, output: &Path) -> Result<PathBuf, StageError> {
        self.select_composition().await?;

        let resolved = resolve_without_audio(self.job.parameters.duration_in_frames);
        self.record_resolved_media(None, resolved.frames).await;
        let mut parameters = self.job.parameters.clone();
        parameters.duration_in_frames = Some(resolved.frames);

        self.render(
            &parameters,
            resolved.frames,
            output,
            (budget::RENDER_ONLY_START, budget::RENDER_ONLY_RENDER_END),
        )
        .await?;
        self.progress.report(budget::RENDER_ONLY_RENDER_END).await;
        Ok(output.to_path_buf())
    }

    async fn narrate_and_render(
        &self,
        output: &Path,
        guard: &mut TempFileGuard,
    ) -> Result<PathBuf, StageError> {
        let narration = self
            .job
            .narration
            .as_ref()
            .ok_or_else(|| StageError::Synthesis("job has no narration".to_string()))?;

        let work_dir = self.ctx.config.job_work_dir(self.job.id.as_str());
        tokio::fs::create_dir_all(&work_dir)
            .await
            .map_err(|e| StageError::Synthesis(format!("work dir: {}", e)))?;
        guard.track_dir(&work_dir);

        self.ensure_active()?;
        let speech = self
            .timed(
                Stage::Synthesis,
                self.ctx
                    .adapter
                    .synthesize(&narration.text, &narration.language),
            )
            .await?;

        let audio = work_dir.join(audio_file_name(&speech.filename));
        guard.track(&audio);
        self.ensure_active()?;
        self.ctx.adapter.fetch_audio(&speech.audio_url, &audio).await?;

        // Narration always decides the length, whatever the caller asked for.
        let resolved = self
            .timed(
                Stage::Duration,
                resolve_from_audio(
                    &self.ctx.adapter,
                    speech.duration_seconds,
                    &audio,
                    self.logger,
                ),
            )
            .await;
        self.logger.log_progress(&format!(
            "narration resolved to {} frames ({:?})",
            resolved.frames, resolved.source
        ));
        self.progress.report(budget::SYNTHESIS_END).await;

        self.record_resolved_media(Some(speech.audio_url.clone()), resolved.frames)
            .await;
        let mut parameters = self.job.parameters.clone();
        parameters.audio_url = Some(speech.audio_url.clone());
        parameters.duration_in_frames = Some(resolved.frames);

        self.select_composition().await?;

        let silent = work_dir.join("silent.mp4");
        guard.track(&silent);
        self.render(
            &parameters,
            resolved.frames,
            &silent,
            (budget::SYNTHESIS_END, budget::NARRATED_RENDER_END),
        )
        .await?;
        self.progress.report(budget::NARRATED_RENDER_END).await;

        self.ensure_active()?;
        ensure_parent_dir(output)
            .await
            .map_err(|e| StageError::Mux(e.to_string()))?;
        let merged = self
            .timed(
                Stage::Mux,
                self.ctx.adapter.mux(&silent, &audio, output, self.cancel),
            )
            .await?;
        self.progress.report(budget::MUX_END).await;
        Ok(merged)
    }
}

/// `narration.<ext>`, keeping the service's extension.
fn audio_file_name(service_filename: &str) -> String {
    let ext = Path::new(service_filename)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty() && e.chars().all(|c| c.is_ascii_alphanumeric()))
        .unwrap_or("mp3");
    format!("narration.{}", ext)
}

/// Local artifact path for a job.
fn local_output(ctx: &PipelineContext, job: &JobRecord) -> PathBuf {
    job.output_location
        .local_path()
        .unwrap_or_else(|| ctx.config.output_dir.join(format!("{}.mp4", job.id)))
}

/// Run one job to a terminal state.
pub async fn run_job(
    ctx: &PipelineContext,
    job: JobRecord,
    cancel: CancellationToken,
) -> JobOutcome {
    let logger = JobLogger::new(&job.id, job.pipeline_kind());
    let span = logger.create_span();
    execute(ctx, job, cancel, logger).instrument(span).await
}

async fn execute(
    ctx: &PipelineContext,
    job: JobRecord,
    cancel: CancellationToken,
    logger: JobLogger,
) -> JobOutcome {
    if cancel.is_cancelled() {
        return finish_cancelled(ctx, &job, &logger).await;
    }

    let kind = job.pipeline_kind();
    let seed = match kind {
        PipelineKind::RenderOnly => budget::RENDER_ONLY_START,
        PipelineKind::NarrateAndRender => budget::NARRATED_START,
    };
    if let Err(e) = ctx.repo.start(&job.id, seed).await {
        logger.log_warning(&format!("could not start job: {}", e));
        return JobOutcome::Abandoned;
    }
    logger.log_start(&format!("composition {}", job.composition_id));

    let output = local_output(ctx, &job);
    let mut guard = TempFileGuard::new();
    guard.track(&output);
    for dir in output
        .ancestors()
        .skip(1)
        .take_while(|d| d.starts_with(&ctx.config.output_dir) && *d != ctx.config.output_dir)
    {
        guard.track_dir(dir);
    }

    let run = Run {
        ctx,
        job: &job,
        cancel: &cancel,
        logger: &logger,
        progress: ProgressReporter::new(ctx.repo.clone(), job.id.clone(), seed),
    };

    let produced = match kind {
        PipelineKind::RenderOnly => run.render_only(&output).await,
        PipelineKind::NarrateAndRender => run.narrate_and_render(&output, &mut guard).await,
    };

    let outcome = match produced.and_then(|local| run.ensure_active().map(|_| local)) {
        Ok(local) => publish_and_complete(&run, &local, &mut guard).await,
        Err(StageError::Cancelled) => finish_cancelled(ctx, &job, &logger).await,
        Err(e) => {
            logger.log_error(&e.to_string());
            metrics::record_failed(e.stage());
            if let Err(store_err) = ctx.repo.fail(&job.id, e.to_string()).await {
                logger.log_warning(&format!("failed to record failure: {}", store_err));
            }
            JobOutcome::Failed(e.to_string())
        }
    };

    guard.finish().await;
    outcome
}

async fn publish_and_complete(
    run: &Run<'_>,
    local: &Path,
    guard: &mut TempFileGuard,
) -> JobOutcome {
    let key = ArtifactPublisher::object_key(&run.job.id, local);
    let published = run
        .timed(Stage::Publish, run.ctx.publisher.publish(local, &key))
        .await;

    let (location, degraded) = match published {
        Ok(url) => (OutputLocation::remote(url), false),
        Err(e) => {
            run.logger
                .log_warning(&format!("{}; keeping local artifact", e));
            guard.keep(local);
            (OutputLocation::local(local), true)
        }
    };

    match run.ctx.repo.complete(&run.job.id, location.clone()).await {
        Ok(_) => {
            metrics::record_completed(degraded);
            run.logger.log_completion(location.as_str());
            JobOutcome::Completed { location, degraded }
        }
        Err(e) => {
            // The record went away or was cancelled while publishing.
            run.logger
                .log_warning(&format!("could not complete job: {}", e));
            guard.track(local);
            if location.is_remote() {
                if let Err(e) = run
                    .ctx
                    .publisher
                    .store()
                    .delete_object(run.ctx.publisher.bucket(), &key)
                    .await
                {
                    run.logger
                        .log_warning(&format!("failed to remove orphaned artifact: {}", e));
                }
            }
            JobOutcome::Abandoned
        }
    }
}

async fn finish_cancelled(
    ctx: &PipelineContext,
    job: &JobRecord,
    logger: &JobLogger,
) -> JobOutcome {
    logger.log_warning("cancelled");
    metrics::record_cancelled();
    if let Err(e) = ctx.repo.cancel(&job.id, "cancelled".to_string()).await {
        if !e.is_not_found() {
            logger.log_warning(&format!("failed to record cancellation: {}", e));
        }
    }
    JobOutcome::Cancelled
}
