//! External process adapter.
//!
//! One façade over the speech service, the render engine, the muxer and the
//! duration probe. Every call returns a [`StageError`] naming the stage it
//! belongs to, so the orchestrator never sees raw subprocess or HTTP errors.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;
use tracing::debug;

use vgen_media::{DurationProbe, MediaError, Muxer, RenderEngine, RenderProgressFn, RenderRequest};
use vgen_speech::{SpeechSynthesizer, SynthesisResult};

use crate::error::StageError;

/// The collaborators the pipeline drives.
#[derive(Clone)]
pub struct ProcessAdapter {
    speech: Arc<dyn SpeechSynthesizer>,
    renderer: Arc<dyn RenderEngine>,
    muxer: Arc<dyn Muxer>,
    probe: Arc<dyn DurationProbe>,
}

fn media_error(err: MediaError, wrap: fn(String) -> StageError) -> StageError {
    if err.is_cancelled() {
        StageError::Cancelled
    } else {
        wrap(err.to_string())
    }
}

impl ProcessAdapter {
    pub fn new(
        speech: Arc<dyn SpeechSynthesizer>,
        renderer: Arc<dyn RenderEngine>,
        muxer: Arc<dyn Muxer>,
        probe: Arc<dyn DurationProbe>,
    ) -> Self {
        Self {
            speech,
            renderer,
            muxer,
            probe,
        }
    }

    pub fn speech(&self) -> &Arc<dyn SpeechSynthesizer> {
        &self.speech
    }

    /// Synthesize narration. Returns the audio URL and, when the service
    /// reports one, its duration.
    pub async fn synthesize(
        &self,
        text: &str,
        language: &str,
    ) -> Result<SynthesisResult, StageError> {
        self.speech
            .synthesize(text, language)
            .await
            .map_err(|e| StageError::Synthesis(e.to_string()))
    }

    /// Download synthesized audio for probing and muxing.
    pub async fn fetch_audio(&self, audio_url: &str, dest: &Path) -> Result<(), StageError> {
        let bytes = self
            .speech
            .download(audio_url, dest)
            .await
            .map_err(|e| StageError::Synthesis(format!("audio download failed: {}", e)))?;
        debug!(bytes, dest = %dest.display(), "Fetched narration audio");
        Ok(())
    }

    /// Duration of a local audio file in seconds.
    pub async fn probe_duration(&self, audio: &Path) -> Result<f64, StageError> {
        self.probe
            .duration_seconds(audio)
            .await
            .map_err(|e| StageError::DurationProbe(e.to_string()))
    }

    /// Fail unless the engine exposes `composition_id`.
    pub async fn select_composition(
        &self,
        composition_id: &str,
        cancel: &CancellationToken,
    ) -> Result<(), StageError> {
        let available = self
            .renderer
            .compositions(cancel)
            .await
            .map_err(|e| media_error(e, StageError::Composition))?;

        if available.iter().any(|id| id == composition_id) {
            Ok(())
        } else {
            Err(StageError::Composition(
                MediaError::UnknownComposition {
                    id: composition_id.to_string(),
                    available,
                }
                .to_string(),
            ))
        }
    }

    /// Render frames to `request.output`.
    ///
    /// `on_progress` sees a non-decreasing fraction in [0, 1]; regressing
    /// values from the engine are dropped. The call fails if the engine
    /// reports success without producing the output file.
    pub async fn render<F>(
        &self,
        request: &RenderRequest,
        on_progress: F,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StageError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let last = Mutex::new(0.0_f64);
        let forward: RenderProgressFn = Arc::new(move |fraction: f64| {
            if !fraction.is_finite() {
                return;
            }
            let fraction = fraction.clamp(0.0, 1.0);
            let advanced = match last.lock() {
                Ok(mut last) if fraction > *last => {
                    *last = fraction;
                    true
                }
                _ => false,
            };
            if advanced {
                on_progress(fraction);
            }
        });

        self.renderer
            .render(request, forward, cancel)
            .await
            .map_err(|e| media_error(e, StageError::Render))?;

        if !tokio::fs::try_exists(&request.output).await.unwrap_or(false) {
            return Err(StageError::Render(format!(
                "engine reported success but {} was not produced",
                request.output.display()
            )));
        }
        Ok(request.output.clone())
    }

    /// Merge narration into a silent video.
    pub async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> Result<PathBuf, StageError> {
        self.muxer
            .mux(video, audio, output, cancel)
            .await
            .map_err(|e| media_error(e, StageError::Mux))?;
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use serde_json::json;

    use super::*;
    use crate::testing::{FakeMuxer, FakeProbe, FakeRenderer, FakeSpeech};

    fn adapter(renderer: FakeRenderer) -> ProcessAdapter {
        ProcessAdapter::new(
            Arc::new(FakeSpeech::default()),
            Arc::new(renderer),
            Arc::new(FakeMuxer::default()),
            Arc::new(FakeProbe::returning(3.0)),
        )
    }

    fn request(output: PathBuf) -> RenderRequest {
        RenderRequest {
            composition_id: "HelloWorld".to_string(),
            props: json!({}),
            frame_count: 150,
            output,
        }
    }

    #[tokio::test]
    async fn test_render_drops_regressing_fractions() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = FakeRenderer::default().with_fractions(vec![0.1, 0.5, 0.3, 0.5, 0.9, 1.0]);
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);

        adapter(renderer)
            .render(
                &request(dir.path().join("out.mp4")),
                move |f| sink.lock().unwrap().push(f),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        assert_eq!(*seen.lock().unwrap(), vec![0.1, 0.5, 0.9, 1.0]);
    }

    #[tokio::test]
    async fn test_render_without_output_fails() {
        let dir = tempfile::TempDir::new().unwrap();
        let renderer = FakeRenderer::default().without_output();

        let err = adapter(renderer)
            .render(
                &request(dir.path().join("out.mp4")),
                |_| {},
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, StageError::Render(_)));
        assert!(err.to_string().starts_with("render stage failed"));
    }

    #[tokio::test]
    async fn test_unknown_composition() {
        let err = adapter(FakeRenderer::default())
            .select_composition("Missing", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, StageError::Composition(msg) if msg.contains("Missing")));
    }

    #[tokio::test]
    async fn test_cancelled_render_maps_to_cancelled() {
        let dir = tempfile::TempDir::new().unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let err = adapter(FakeRenderer::default())
            .render(&request(dir.path().join("out.mp4")), |_| {}, &token)
            .await
            .unwrap_err();
        assert_eq!(err, StageError::Cancelled);
    }
}
