//! Subprocess wrappers for video generation.
//!
//! This crate provides:
//! - Type-safe FFmpeg command building with multiple inputs
//! - Cancellable process execution (`kill_on_drop` + `CancellationToken`)
//! - Audio/video muxing
//! - FFprobe duration probing
//! - The render-engine CLI driver with progress parsing

pub mod command;
pub mod error;
pub mod fs_utils;
pub mod mux;
pub mod probe;
pub mod render;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use mux::{mux_command, FfmpegMuxer, Muxer};
pub use probe::{probe_duration, DurationProbe, FfprobeDurationProbe};
pub use render::{
    parse_render_progress, CliRenderer, RenderEngine, RenderProgressFn, RenderRequest,
    RendererConfig,
};
