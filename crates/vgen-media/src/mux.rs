//! Audio/video muxing.

use std::path::Path;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::command::{FfmpegCommand, FfmpegRunner};
use crate::error::{MediaError, MediaResult};

/// Combines a silent video with a narration track.
#[async_trait]
pub trait Muxer: Send + Sync {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> MediaResult<()>;
}

/// [`Muxer`] backed by the `ffmpeg` binary.
#[derive(Debug, Default, Clone, Copy)]
pub struct FfmpegMuxer;

/// Copy the video stream, encode the audio as AAC, stop at the shorter input.
pub fn mux_command(video: &Path, audio: &Path, output: &Path) -> FfmpegCommand {
    FfmpegCommand::new(video, output)
        .input(audio)
        .map("0:v:0")
        .map("1:a:0")
        .video_codec("copy")
        .audio_codec("aac")
        .shortest()
}

#[async_trait]
impl Muxer for FfmpegMuxer {
    async fn mux(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        cancel: &CancellationToken,
    ) -> MediaResult<()> {
        for input in [video, audio] {
            if !input.exists() {
                return Err(MediaError::FileNotFound(input.to_path_buf()));
            }
        }

        debug!(
            video = %video.display(),
            audio = %audio.display(),
            output = %output.display(),
            "Muxing narration into video"
        );

        FfmpegRunner::new()
            .with_cancel(cancel.clone())
            .run(&mux_command(video, audio, output))
            .await?;

        if !output.exists() {
            return Err(MediaError::OutputMissing(output.to_path_buf()));
        }
        Ok(())
    }
}
