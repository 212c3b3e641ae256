//! Video generation pipeline.
//!
//! This crate provides:
//! - The external process adapter (speech, render, mux, probe)
//! - Frame count resolution from narration audio
//! - The pipeline orchestrator with fixed progress budgets
//! - Artifact publishing and temp file cleanup
//! - A bounded executor with per-job cancellation and graceful shutdown

pub mod adapter;
pub mod config;
pub mod duration;
pub mod error;
pub mod executor;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod publisher;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use adapter::ProcessAdapter;
pub use config::{CompositionDefaults, WorkerConfig};
pub use duration::{frames_for_seconds, FrameSource, ResolvedDuration};
pub use error::{Stage, StageError, WorkerError, WorkerResult};
pub use executor::JobExecutor;
pub use logging::JobLogger;
pub use pipeline::{run_job, JobOutcome, PipelineContext};
pub use publisher::{ArtifactPublisher, TempFileGuard};
