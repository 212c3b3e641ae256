//! Worker error types.

use thiserror::Error;

pub type WorkerResult<T> = Result<T, WorkerError>;

/// Errors surfaced to callers of the executor.
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("job queue is full ({0} waiting)")]
    QueueFull(usize),

    #[error("job {0} is already queued or running")]
    DuplicateJob(String),

    #[error("executor is shutting down")]
    ShuttingDown,
}

impl WorkerError {
    /// Whether the submission may succeed later.
    pub fn is_capacity(&self) -> bool {
        matches!(self, WorkerError::QueueFull(_) | WorkerError::ShuttingDown)
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Synthesis,
    Duration,
    Composition,
    Render,
    Mux,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Synthesis => "synthesis",
            Stage::Duration => "duration",
            Stage::Composition => "composition",
            Stage::Render => "render",
            Stage::Mux => "mux",
            Stage::Publish => "publish",
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one pipeline stage. The display form is what lands in the
/// job record's `error` field.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StageError {
    #[error("synthesis stage failed: {0}")]
    Synthesis(String),

    #[error("duration stage failed: {0}")]
    DurationProbe(String),

    #[error("composition stage failed: {0}")]
    Composition(String),

    #[error("render stage failed: {0}")]
    Render(String),

    #[error("mux stage failed: {0}")]
    Mux(String),

    #[error("publish stage failed: {0}")]
    Publish(String),

    #[error("cancelled")]
    Cancelled,
}

impl StageError {
    /// Stage the error came from; `None` for cancellation.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            StageError::Synthesis(_) => Some(Stage::Synthesis),
            StageError::DurationProbe(_) => Some(Stage::Duration),
            StageError::Composition(_) => Some(Stage::Composition),
            StageError::Render(_) => Some(Stage::Render),
            StageError::Mux(_) => Some(Stage::Mux),
            StageError::Publish(_) => Some(Stage::Publish),
            StageError::Cancelled => None,
        }
    }
}
