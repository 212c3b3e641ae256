//! Progress reporting.
//!
//! Writes go through [`JobRepository::update_progress`], which only applies
//! a value greater than the stored one while the job is processing. The
//! reporter additionally skips values it already sent, so render callbacks
//! firing per frame turn into one store write per percentage point.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tracing::{debug, warn};
use vgen_models::JobId;
use vgen_store::JobRepository;

/// Fixed progress budgets.
pub mod budget {
    pub const NARRATED_START: u8 = 5;
    pub const SYNTHESIS_END: u8 = 25;
    pub const NARRATED_RENDER_END: u8 = 65;
    pub const MUX_END: u8 = 80;
    pub const RENDER_ONLY_START: u8 = 0;
    pub const RENDER_ONLY_RENDER_END: u8 = 80;
    pub const PUBLISH_END: u8 = 100;
}

/// Map an engine fraction in [0, 1] linearly onto `[start, end]`.
pub fn map_fraction(start: u8, end: u8, fraction: f64) -> u8 {
    let fraction = if fraction.is_finite() {
        fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let span = end.saturating_sub(start) as f64;
    (start as f64 + span * fraction).floor() as u8
}

#[derive(Clone)]
pub struct ProgressReporter {
    repo: Arc<dyn JobRepository>,
    job_id: JobId,
    last: Arc<AtomicU8>,
}

impl ProgressReporter {
    pub fn new(repo: Arc<dyn JobRepository>, job_id: JobId, initial: u8) -> Self {
        Self {
            repo,
            job_id,
            last: Arc::new(AtomicU8::new(initial)),
        }
    }

    /// Highest value handed to the store so far.
    pub fn last(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }

    fn claim(&self, value: u8) -> bool {
        let value = value.min(100);
        self.last.fetch_max(value, Ordering::SeqCst) < value
    }

    /// Write `value` and wait for the store.
    pub async fn report(&self, value: u8) {
        if !self.claim(value) {
            return;
        }
        write(self.repo.as_ref(), &self.job_id, value).await;
    }

    /// Write `value` from a detached task. Used from render callbacks, which
    /// cannot await.
    pub fn report_detached(&self, value: u8) {
        if !self.claim(value) {
            return;
        }
        let repo = Arc::clone(&self.repo);
        let job_id = self.job_id.clone();
        tokio::spawn(async move {
            write(repo.as_ref(), &job_id, value).await;
        });
    }
}

async fn write(repo: &dyn JobRepository, job_id: &JobId, value: u8) {
    match repo.update_progress(job_id, value).await {
        Ok(true) => debug!(job_id = %job_id, progress = value, "Progress updated"),
        Ok(false) => debug!(job_id = %job_id, progress = value, "Stale progress update skipped"),
        Err(e) => warn!(job_id = %job_id, progress = value, "Failed to update progress: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use vgen_models::{JobRecord, OutputLocation, RenderParameters};
    use vgen_store::MemoryJobRepository;

    use super::*;

    #[test]
    fn test_map_fraction() {
        assert_eq!(map_fraction(25, 65, 0.0), 25);
        assert_eq!(map_fraction(25, 65, 0.5), 45);
        assert_eq!(map_fraction(25, 65, 1.0), 65);
        assert_eq!(map_fraction(0, 80, 0.999), 79);
        assert_eq!(map_fraction(0, 80, 7.0), 80);
        assert_eq!(map_fraction(0, 80, f64::NAN), 0);
    }

    async fn started_job(repo: &Arc<dyn JobRepository>) -> JobId {
        let job = JobRecord::new(
            "HelloWorld",
            RenderParameters::default(),
            OutputLocation::local("/tmp/a.mp4"),
            None,
        );
        repo.create(&job).await.unwrap();
        repo.start(&job.id, 0).await.unwrap();
        job.id
    }

    #[tokio::test]
    async fn test_detached_updates_never_regress() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        let id = started_job(&repo).await;
        let reporter = ProgressReporter::new(repo.clone(), id.clone(), 0);

        for value in [10, 40, 30, 60, 20, 80] {
            reporter.report_detached(value);
        }
        reporter.report(50).await;

        tokio::time::sleep(Duration::from_millis(50)).await;
        let job = repo.get(&id).await.unwrap().unwrap();
        assert_eq!(job.progress, 80);
        assert_eq!(reporter.last(), 80);
    }

    #[tokio::test]
    async fn test_missing_job_is_swallowed() {
        let repo: Arc<dyn JobRepository> = Arc::new(MemoryJobRepository::new());
        let reporter = ProgressReporter::new(repo, JobId::from_string("gone"), 0);
        reporter.report(40).await;
        assert_eq!(reporter.last(), 40);
    }
}
