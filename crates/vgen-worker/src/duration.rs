//! Frame count resolution.

use std::path::Path;

use vgen_models::{DEFAULT_DURATION_IN_FRAMES, FRAME_RATE};

use crate::adapter::ProcessAdapter;
use crate::logging::JobLogger;
use crate::metrics;

/// Where a frame count came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    /// Derived from narration audio.
    Audio,
    /// Supplied by the caller.
    Explicit,
    /// No audio and no caller value.
    Default,
    /// Narration present but its duration could not be determined.
    ProbeFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedDuration {
    pub frames: u32,
    pub source: FrameSource,
}

/// `ceil(seconds * 30)`, never less than one frame.
pub fn frames_for_seconds(seconds: f64) -> u32 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 1;
    }
    // Round away float noise first: 0.1 * 30 is 3.0000000000000004.
    let exact = (seconds * FRAME_RATE as f64 * 1e6).round() / 1e6;
    let frames = exact.ceil();
    if frames >= u32::MAX as f64 {
        u32::MAX
    } else {
        (frames as u32).max(1)
    }
}

/// Frame count for a job without narration.
pub fn resolve_without_audio(explicit: Option<u32>) -> ResolvedDuration {
    match explicit {
        Some(frames) if frames > 0 => ResolvedDuration {
            frames,
            source: FrameSource::Explicit,
        },
        _ => ResolvedDuration {
            frames: DEFAULT_DURATION_IN_FRAMES,
            source: FrameSource::Default,
        },
    }
}

/// Frame count for a narrated job.
///
/// Uses the duration the speech service reported when it is usable, else
/// probes the downloaded audio. A failed probe falls back to the default
/// length instead of failing the job.
pub async fn resolve_from_audio(
    adapter: &ProcessAdapter,
    reported_seconds: Option<f64>,
    audio: &Path,
    logger: &JobLogger,
) -> ResolvedDuration {
    if let Some(seconds) = reported_seconds.filter(|s| s.is_finite() && *s > 0.0) {
        return ResolvedDuration {
            frames: frames_for_seconds(seconds),
            source: FrameSource::Audio,
        };
    }

    match adapter.probe_duration(audio).await {
        Ok(seconds) => ResolvedDuration {
            frames: frames_for_seconds(seconds),
            source: FrameSource::Audio,
        },
        Err(e) => {
            logger.log_warning(&format!(
                "{}; rendering {} frames",
                e, DEFAULT_DURATION_IN_FRAMES
            ));
            metrics::record_duration_fallback();
            ResolvedDuration {
                frames: DEFAULT_DURATION_IN_FRAMES,
                source: FrameSource::ProbeFallback,
            }
        }
    }
}
