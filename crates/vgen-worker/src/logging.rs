//! Structured job logging.

use tracing::{error, info, warn, Span};
use vgen_models::{JobId, PipelineKind};

use crate::error::Stage;

/// Consistent job lifecycle log lines tagged with job id and pipeline kind.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: &'static str,
}

impl JobLogger {
    pub fn new(job_id: &JobId, kind: PipelineKind) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: kind.as_str(),
        }
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job started: {}", message
        );
    }

    /// Log the start of a stage.
    pub fn log_stage(&self, stage: Stage) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            stage = %stage,
            "Stage started"
        );
    }

    pub fn log_progress(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job progress: {}", message
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        self.operation
    }

    /// Span wrapping a whole pipeline run.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::from_string("job-123");
        let logger = JobLogger::new(&job_id, PipelineKind::NarrateAndRender);

        assert_eq!(logger.job_id(), "job-123");
        assert_eq!(logger.operation(), "narrate_and_render");
    }
}
