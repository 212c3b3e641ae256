//! Video generation job records.
//!
//! A [`JobRecord`] is the durable state of one generation request. All
//! status changes go through the transition methods on the record so the
//! in-memory and Redis stores enforce the same state machine.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::parameters::RenderParameters;

/// Narration language used when a request does not name one.
pub const DEFAULT_LANGUAGE: &str = "en";

/// Unique identifier for a job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub String);

impl JobId {
    /// Generate a new random job ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, waiting for a worker slot
    #[default]
    Pending,
    /// A pipeline run owns the job
    Processing,
    /// Artifact produced
    Completed,
    /// A stage failed
    Failed,
    /// Cancelled by a delete or by shutdown
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is an edge of the lifecycle graph.
    ///
    /// `pending` may fail or be cancelled before a worker picks it up
    /// (queue full, deleted while queued).
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status string that does not name a [`JobStatus`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown job status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for JobStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "processing" => Ok(JobStatus::Processing),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            "cancelled" | "canceled" => Ok(JobStatus::Cancelled),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// Rejected status change.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },
}

/// Which stage sequence a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// select composition -> render -> publish
    RenderOnly,
    /// synthesize -> resolve duration -> select composition -> render -> mux -> publish
    NarrateAndRender,
}

impl PipelineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineKind::RenderOnly => "render_only",
            PipelineKind::NarrateAndRender => "narrate_and_render",
        }
    }
}

/// Narration requested for a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Narration {
    pub text: String,
    #[serde(default = "default_language")]
    pub language: String,
}

fn default_language() -> String {
    DEFAULT_LANGUAGE.to_string()
}

impl Narration {
    pub fn new(text: impl Into<String>, language: Option<String>) -> Self {
        Self {
            text: text.into(),
            language: language
                .filter(|l| !l.trim().is_empty())
                .unwrap_or_else(default_language),
        }
    }
}

/// Where the artifact lives.
///
/// A local filesystem path until the publisher uploads it, then the public
/// URL of the stored object. The two are told apart by URL scheme.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutputLocation(String);

impl OutputLocation {
    pub fn local(path: impl AsRef<Path>) -> Self {
        Self(path.as_ref().to_string_lossy().to_string())
    }

    pub fn remote(url: impl Into<String>) -> Self {
        Self(url.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True once the artifact has been published.
    pub fn is_remote(&self) -> bool {
        self.0.starts_with("http://") || self.0.starts_with("https://")
    }

    /// Local path, if the artifact has not been published.
    pub fn local_path(&self) -> Option<PathBuf> {
        if self.is_remote() {
            None
        } else {
            Some(PathBuf::from(&self.0))
        }
    }

    /// Last path segment of either form.
    pub fn file_name(&self) -> Option<&str> {
        self.0
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
    }
}

impl fmt::Display for OutputLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable state of one generation request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRecord {
    /// Unique job ID
    pub id: JobId,
    /// Composition (visual template) to render
    pub composition_id: String,
    /// Parameters passed to the composition
    #[serde(default)]
    pub parameters: RenderParameters,
    /// Narration, present for narrate-and-render jobs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narration: Option<Narration>,
    /// Local path before upload, public URL after
    pub output_location: OutputLocation,
    pub status: JobStatus,
    /// Percentage in [0, 100]
    pub progress: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Create a new pending job.
    pub fn new(
        composition_id: impl Into<String>,
        parameters: RenderParameters,
        output_location: OutputLocation,
        narration: Option<Narration>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            composition_id: composition_id.into(),
            parameters,
            narration,
            output_location,
            status: JobStatus::Pending,
            progress: 0,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn pipeline_kind(&self) -> PipelineKind {
        if self.narration.is_some() {
            PipelineKind::NarrateAndRender
        } else {
            PipelineKind::RenderOnly
        }
    }

    fn transition(&mut self, next: JobStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }

        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        if next.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// `pending -> processing`, seeding progress.
    pub fn start(&mut self, seed: u8) -> Result<(), TransitionError> {
        self.transition(JobStatus::Processing)?;
        self.progress = seed.min(100);
        Ok(())
    }

    /// Raise progress. Returns false (and changes nothing) unless the job is
    /// processing and `value` is greater than the current progress.
    pub fn advance_progress(&mut self, value: u8) -> bool {
        let value = value.min(100);
        if self.status != JobStatus::Processing || value <= self.progress {
            return false;
        }
        self.progress = value;
        self.updated_at = Utc::now();
        true
    }

    /// Merge the values the pipeline resolved into the parameters.
    pub fn record_resolved_media(&mut self, audio_url: Option<String>, duration_in_frames: u32) {
        if audio_url.is_some() {
            self.parameters.audio_url = audio_url;
        }
        self.parameters.duration_in_frames = Some(duration_in_frames);
        self.updated_at = Utc::now();
    }

    /// `processing -> completed`.
    pub fn complete(&mut self, output_location: OutputLocation) -> Result<(), TransitionError> {
        self.transition(JobStatus::Completed)?;
        self.progress = 100;
        self.output_location = output_location;
        self.error = None;
        Ok(())
    }

    /// `* -> failed`. Progress keeps its last value.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Failed)?;
        let error = error.into();
        self.error = Some(if error.trim().is_empty() {
            "unknown error".to_string()
        } else {
            error
        });
        Ok(())
    }

    /// `* -> cancelled`.
    pub fn cancel(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.transition(JobStatus::Cancelled)?;
        self.error = Some(reason.into());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> JobRecord {
        JobRecord::new(
            "HelloWorld",
            RenderParameters::default(),
            OutputLocation::local("/tmp/out/HelloWorld-1.mp4"),
            None,
        )
    }

    #[test]
    fn test_new_record_is_pending() {
        let job = record();
        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.progress, 0);
        assert!(job.completed_at.is_none());
        assert_eq!(job.pipeline_kind(), PipelineKind::RenderOnly);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut job = record();
        job.start(0).unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        assert!(job.advance_progress(40));
        job.complete(OutputLocation::remote("http://localhost:9000/videos/a.mp4"))
            .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.output_location.is_remote());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_terminal_states_do_not_transition() {
        let mut job = record();
        job.start(5).unwrap();
        job.fail("render stage failed: boom").unwrap();
        let completed_at = job.completed_at;

        assert!(job.complete(OutputLocation::remote("https://x/y.mp4")).is_err());
        assert!(job.start(0).is_err());
        assert!(job.cancel("deleted").is_err());
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.completed_at, completed_at);
    }

    #[test]
    fn test_pending_cannot_complete() {
        let mut job = record();
        let err = job
            .complete(OutputLocation::local("/tmp/a.mp4"))
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidTransition {
                from: JobStatus::Pending,
                to: JobStatus::Completed
            }
        );
    }

    #[test]
    fn test_progress_is_monotonic() {
        let mut job = record();
        assert!(!job.advance_progress(10), "pending jobs ignore progress");

        job.start(5).unwrap();
        assert!(job.advance_progress(30));
        assert!(!job.advance_progress(20));
        assert!(!job.advance_progress(30));
        assert_eq!(job.progress, 30);

        assert!(job.advance_progress(250));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_failed_keeps_progress_and_error() {
        let mut job = record();
        job.start(0).unwrap();
        job.advance_progress(42);
        job.fail("  ").unwrap();
        assert_eq!(job.progress, 42);
        assert_eq!(job.error.as_deref(), Some("unknown error"));
    }

    #[test]
    fn test_output_location_kinds() {
        let local = OutputLocation::local("/var/videos/HelloWorld-1.mp4");
        assert!(!local.is_remote());
        assert_eq!(local.file_name(), Some("HelloWorld-1.mp4"));
        assert!(local.local_path().is_some());

        let remote = OutputLocation::remote("https://cdn.example.com/videos/abc/out.mp4");
        assert!(remote.is_remote());
        assert_eq!(remote.file_name(), Some("out.mp4"));
        assert!(remote.local_path().is_none());
    }

    #[test]
    fn test_status_parse() {
        assert_eq!("Completed".parse::<JobStatus>().unwrap(), JobStatus::Completed);
        assert_eq!("canceled".parse::<JobStatus>().unwrap(), JobStatus::Cancelled);
        assert!("done".parse::<JobStatus>().is_err());
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let mut job = record();
        job.narration = Some(Narration::new("hello", None));
        let value = serde_json::to_value(&job).unwrap();

        assert_eq!(value["compositionId"], "HelloWorld");
        assert_eq!(value["status"], "pending");
        assert_eq!(value["narration"]["language"], "en");
        assert!(value.get("error").is_none());
        assert_eq!(job.pipeline_kind(), PipelineKind::NarrateAndRender);
    }
}
