//! Shared data models for the video generation backend.
//!
//! This crate provides Serde-serializable types for:
//! - Video generation jobs and their lifecycle state machine
//! - Render parameters handed to the composition engine
//! - Narration (text-to-speech) records
//! - Fixed timing constants

pub mod job;
pub mod parameters;
pub mod tts;

pub use job::{
    JobId, JobRecord, JobStatus, Narration, OutputLocation, PipelineKind, TransitionError,
    UnknownStatus, DEFAULT_LANGUAGE,
};
pub use parameters::{default_composition_parameters, RenderParameters};
pub use tts::{TtsRecord, TtsStatus};

/// Frame rate every composition is rendered at. Not configurable per job.
pub const FRAME_RATE: u32 = 30;

/// Frame count used when neither audio nor an explicit duration is available (5s).
pub const DEFAULT_DURATION_IN_FRAMES: u32 = 150;

/// Composition rendered when a request names none.
pub const DEFAULT_COMPOSITION_ID: &str = "HelloWorld";
