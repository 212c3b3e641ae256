//! HTTP client for the speech service.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, info_span, Instrument};
use url::Url;

use crate::error::{SpeechError, SpeechResult};

/// Speech client configuration.
#[derive(Debug, Clone)]
pub struct SpeechConfig {
    /// Base URL of the speech service
    pub base_url: String,
    /// Total request timeout. Unset by default: synthesis of long narration
    /// and audio downloads may take as long as they need.
    pub timeout: Option<Duration>,
    /// Connect timeout
    pub connect_timeout: Duration,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:5050".to_string(),
            timeout: None,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl SpeechConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timeout = std::env::var("TTS_SERVICE_TIMEOUT")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        Self {
            base_url: std::env::var("TTS_SERVICE_URL").unwrap_or(defaults.base_url),
            timeout,
            connect_timeout: defaults.connect_timeout,
        }
    }
}

/// Outcome of a synthesis call.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisResult {
    pub file_id: String,
    pub filename: String,
    /// Absolute URL of the audio
    pub audio_url: String,
    /// Duration reported by the service, when it reports one
    pub duration_seconds: Option<f64>,
}

/// Text-to-speech backend.
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// Synthesize `text` in `language`.
    async fn synthesize(&self, text: &str, language: &str) -> SpeechResult<SynthesisResult>;

    /// Download audio to `dest`, returning the byte count.
    async fn download(&self, audio_url: &str, dest: &Path) -> SpeechResult<u64>;

    /// Remove a synthesized file from the service.
    async fn delete_audio(&self, filename: &str) -> SpeechResult<()>;

    /// Check the service is reachable.
    async fn health_check(&self) -> SpeechResult<()>;
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    text: &'a str,
    lang: &'a str,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default = "default_success")]
    success: bool,
    file_id: Option<String>,
    filename: Option<String>,
    url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    detail: Option<String>,
}

fn default_success() -> bool {
    true
}

/// reqwest-backed [`SpeechSynthesizer`].
#[derive(Clone)]
pub struct SpeechClient {
    http: Client,
    base_url: Url,
}

impl SpeechClient {
    /// Create a new speech client.
    pub fn new(config: SpeechConfig) -> SpeechResult<Self> {
        let mut builder = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .user_agent(concat!("vgen-speech/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        // A trailing slash keeps `join` from dropping the last path segment.
        let mut base = config.base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url =
            Url::parse(&base).map_err(|e| SpeechError::InvalidUrl(format!("{}: {}", base, e)))?;

        Ok(Self { http, base_url })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str().trim_end_matches('/')
    }

    fn endpoint(&self, path: &str) -> SpeechResult<Url> {
        self.base_url
            .join(path.trim_start_matches('/'))
            .map_err(|e| SpeechError::InvalidUrl(format!("{}: {}", path, e)))
    }

    /// Resolve a URL the service returned, which may be relative to the base.
    pub fn resolve_url(&self, url: &str) -> SpeechResult<String> {
        if url.starts_with("http://") || url.starts_with("https://") {
            return Ok(url.to_string());
        }
        Ok(self.endpoint(url)?.to_string())
    }

    async fn check_status(response: Response) -> SpeechResult<Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(SpeechError::status(status, body))
    }
}

#[async_trait]
impl SpeechSynthesizer for SpeechClient {
    async fn synthesize(&self, text: &str, language: &str) -> SpeechResult<SynthesisResult> {
        let url = self.endpoint("generate")?;
        let span = info_span!("speech_synthesize", language = %language, chars = text.len());

        async move {
            let response = self
                .http
                .post(url)
                .json(&GenerateRequest {
                    text,
                    lang: language,
                })
                .send()
                .await?;
            let response = Self::check_status(response).await?;

            let payload: GenerateResponse = response
                .json()
                .await
                .map_err(|e| SpeechError::invalid_response(format!("malformed body: {}", e)))?;

            if !payload.success {
                return Err(SpeechError::invalid_response(
                    payload
                        .detail
                        .unwrap_or_else(|| "service reported failure".to_string()),
                ));
            }

            let (Some(file_id), Some(filename), Some(url)) =
                (payload.file_id, payload.filename, payload.url)
            else {
                return Err(SpeechError::invalid_response(
                    "response missing file_id, filename or url",
                ));
            };

            let duration_seconds = payload.duration.filter(|d| d.is_finite() && *d > 0.0);
            let audio_url = self.resolve_url(&url)?;

            info!(file_id = %file_id, "Speech synthesized");
            Ok(SynthesisResult {
                file_id,
                filename,
                audio_url,
                duration_seconds,
            })
        }
        .instrument(span)
        .await
    }

    async fn download(&self, audio_url: &str, dest: &Path) -> SpeechResult<u64> {
        let url = self.resolve_url(audio_url)?;
        debug!("Downloading audio {} -> {}", url, dest.display());

        let response = self.http.get(&url).send().await?;
        let response = Self::check_status(response).await?;

        let mut file = tokio::fs::File::create(dest).await?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        if written == 0 {
            return Err(SpeechError::invalid_response("downloaded audio is empty"));
        }
        Ok(written)
    }

    async fn delete_audio(&self, filename: &str) -> SpeechResult<()> {
        let url = self.endpoint(&format!("audio/{}", urlencoding::encode(filename)))?;
        let response = self.http.delete(url).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }

    async fn health_check(&self) -> SpeechResult<()> {
        let response = self.http.get(self.endpoint("health")?).send().await?;
        Self::check_status(response).await?;
        Ok(())
    }
}
