//! Render-engine CLI driver.
//!
//! The composition engine is a black box invoked as a subprocess
//! (`npx remotion render <entry> <composition> <out> --props=<json>`).
//! Progress is scraped from lines like `Rendered 45/150`.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::command::{read_lines, wait_with_cancel};
use crate::error::{MediaError, MediaResult};

const STDERR_TAIL_LINES: usize = 20;

/// Receives render progress as a fraction in [0, 1].
pub type RenderProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Render-engine configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Program plus leading arguments, whitespace separated
    pub command: String,
    /// Bundle entry point holding the compositions
    pub entry_point: String,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            command: "npx remotion".to_string(),
            entry_point: "src/index.ts".to_string(),
        }
    }
}

impl RendererConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            command: std::env::var("RENDER_COMMAND").unwrap_or(defaults.command),
            entry_point: std::env::var("RENDER_ENTRY_POINT").unwrap_or(defaults.entry_point),
        }
    }
}

/// One render invocation.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub composition_id: String,
    /// Full props object handed to the composition
    pub props: Value,
    pub frame_count: u32,
    pub output: PathBuf,
}

/// Frame-rendering engine.
#[async_trait]
pub trait RenderEngine: Send + Sync {
    /// Ids of the compositions the bundle exposes.
    async fn compositions(&self, cancel: &CancellationToken) -> MediaResult<Vec<String>>;

    /// Render `request.frame_count` frames to `request.output`.
    async fn render(
        &self,
        request: &RenderRequest,
        on_progress: RenderProgressFn,
        cancel: &CancellationToken,
    ) -> MediaResult<()>;
}

/// [`RenderEngine`] that shells out to the configured render command.
#[derive(Debug, Clone)]
pub struct CliRenderer {
    config: RendererConfig,
}

impl CliRenderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    fn command(&self) -> MediaResult<Command> {
        let mut parts = self.config.command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| MediaError::RendererNotFound(self.config.command.clone()))?;
        let program = which::which(program)
            .map_err(|_| MediaError::RendererNotFound(program.to_string()))?;

        let mut cmd = Command::new(program);
        cmd.args(parts).stdin(Stdio::null()).kill_on_drop(true);
        Ok(cmd)
    }

    /// Arguments after the configured command for a render.
    pub fn render_args(&self, request: &RenderRequest) -> Vec<String> {
        let mut args = vec![
            "render".to_string(),
            self.config.entry_point.clone(),
            request.composition_id.clone(),
            request.output.to_string_lossy().to_string(),
            format!("--props={}", request.props),
        ];
        if request.frame_count > 0 {
            args.push(format!("--frames=0-{}", request.frame_count - 1));
        }
        args
    }
}

#[async_trait]
impl RenderEngine for CliRenderer {
    async fn compositions(&self, cancel: &CancellationToken) -> MediaResult<Vec<String>> {
        let mut cmd = self.command()?;
        cmd.args(["compositions", &self.config.entry_point, "--quiet"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let output = tokio::select! {
            output = cmd.output() => output?,
            _ = cancel.cancelled() => return Err(MediaError::Cancelled),
        };

        if !output.status.success() {
            return Err(MediaError::render_failed(
                format!(
                    "listing compositions failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
                output.status.code(),
            ));
        }

        Ok(parse_composition_list(&String::from_utf8_lossy(
            &output.stdout,
        )))
    }

    async fn render(
        &self,
        request: &RenderRequest,
        on_progress: RenderProgressFn,
        cancel: &CancellationToken,
    ) -> MediaResult<()> {
        let args = self.render_args(request);
        debug!(
            composition_id = %request.composition_id,
            frames = request.frame_count,
            "Running renderer: {} {}",
            self.config.command,
            args.join(" ")
        );

        let mut child = self
            .command()?
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| MediaError::internal("renderer stdout not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| MediaError::internal("renderer stderr not captured"))?;

        let stdout_progress = Arc::clone(&on_progress);
        let stdout_task = tokio::spawn(read_lines(stdout, 0, move |line| {
            if let Some(fraction) = parse_render_progress(line) {
                stdout_progress(fraction);
            }
        }));
        let stderr_task = tokio::spawn(read_lines(stderr, STDERR_TAIL_LINES, move |line| {
            if let Some(fraction) = parse_render_progress(line) {
                on_progress(fraction);
            }
        }));

        let status = wait_with_cancel(&mut child, Some(cancel)).await;
        let _ = stdout_task.await;
        let tail = stderr_task.await.unwrap_or_default();
        let status = status?;

        if !status.success() {
            let message = if tail.is_empty() {
                format!("renderer exited with {}", status)
            } else {
                tail
            };
            return Err(MediaError::render_failed(message, status.code()));
        }

        info!(composition_id = %request.composition_id, "Render finished");
        Ok(())
    }
}

fn progress_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\brender(?:ed|ing)\b\D*?(\d+)\s*/\s*(\d+)").unwrap())
}

/// Parse a progress fraction from one line of renderer output.
pub fn parse_render_progress(line: &str) -> Option<f64> {
    let caps = progress_regex().captures(line)?;
    let done: f64 = caps.get(1)?.as_str().parse().ok()?;
    let total: f64 = caps.get(2)?.as_str().parse().ok()?;
    if total <= 0.0 {
        return None;
    }
    Some((done / total).clamp(0.0, 1.0))
}

/// Composition ids from `compositions --quiet` output.
fn parse_composition_list(stdout: &str) -> Vec<String> {
    stdout
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn renderer() -> CliRenderer {
        CliRenderer::new(RendererConfig {
            command: "npx remotion".to_string(),
            entry_point: "src/index.ts".to_string(),
        })
    }

    #[test]
    fn test_parse_render_progress() {
        assert_eq!(parse_render_progress("Rendered 45/150"), Some(0.3));
        assert_eq!(parse_render_progress("Rendering frames (150/150)"), Some(1.0));
        assert_eq!(parse_render_progress("Bundling 50%"), None);
        assert_eq!(parse_render_progress("Rendered 0/0"), None);
    }

    #[test]
    fn test_render_args() {
        let request = RenderRequest {
            composition_id: "HelloWorld".to_string(),
            props: json!({"titleText": "Hi", "durationInFrames": 152}),
            frame_count: 152,
            output: PathBuf::from("/tmp/job/silent.mp4"),
        };

        let args = renderer().render_args(&request);
        assert_eq!(args[0], "render");
        assert_eq!(args[1], "src/index.ts");
        assert_eq!(args[2], "HelloWorld");
        assert_eq!(args[3], "/tmp/job/silent.mp4");
        assert!(args[4].starts_with("--props={"));
        assert!(args[4].contains("\"durationInFrames\":152"));
        assert_eq!(args[5], "--frames=0-151");
    }

    #[test]
    fn test_parse_composition_list() {
        assert_eq!(
            parse_composition_list("HelloWorld OnlyLogo\nIntro\n"),
            vec!["HelloWorld", "OnlyLogo", "Intro"]
        );
        assert!(parse_composition_list("").is_empty());
    }

    #[test]
    fn test_config_defaults() {
        let config = RendererConfig::default();
        assert_eq!(config.command, "npx remotion");
    }
}
