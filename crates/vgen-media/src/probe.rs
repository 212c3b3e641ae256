//! FFprobe duration probing.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;

use crate::command::check_ffprobe;
use crate::error::{MediaError, MediaResult};

/// Reads the playback duration of a media file.
#[async_trait]
pub trait DurationProbe: Send + Sync {
    /// Duration in seconds.
    async fn duration_seconds(&self, path: &Path) -> MediaResult<f64>;
}

/// [`DurationProbe`] backed by the `ffprobe` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfprobeDurationProbe;

#[async_trait]
impl DurationProbe for FfprobeDurationProbe {
    async fn duration_seconds(&self, path: &Path) -> MediaResult<f64> {
        probe_duration(path).await
    }
}

/// FFprobe JSON output, format section only.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// Probe a media file for its container duration in seconds.
pub async fn probe_duration(path: impl AsRef<Path>) -> MediaResult<f64> {
    let path = path.as_ref();

    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    let ffprobe = check_ffprobe()?;

    let output = Command::new(ffprobe)
        .args(["-v", "quiet", "-print_format", "json", "-show_format"])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::FfprobeFailed {
            message: "FFprobe failed".to_string(),
            stderr: Some(String::from_utf8_lossy(&output.stderr).to_string()),
        });
    }

    parse_format_duration(&output.stdout)
}

/// Extract `format.duration` from ffprobe JSON output.
pub(crate) fn parse_format_duration(stdout: &[u8]) -> MediaResult<f64> {
    let probe: FfprobeOutput = serde_json::from_slice(stdout)?;

    let duration = probe
        .format
        .duration
        .as_deref()
        .and_then(|d| d.trim().parse::<f64>().ok())
        .ok_or_else(|| MediaError::InvalidMedia("no duration in probe output".to_string()))?;

    if !duration.is_finite() || duration <= 0.0 {
        return Err(MediaError::InvalidMedia(format!(
            "non-positive duration {}",
            duration
        )));
    }

    Ok(duration)
}
