//! Pipeline metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

use crate::error::Stage;

/// Metric name constants.
pub mod names {
    /// Stage wall time in seconds, by stage.
    pub const STAGE_DURATION_SECONDS: &str = "vgen_stage_duration_seconds";
    pub const JOBS_COMPLETED_TOTAL: &str = "vgen_jobs_completed_total";
    /// Failed jobs by failing stage.
    pub const JOBS_FAILED_TOTAL: &str = "vgen_jobs_failed_total";
    pub const JOBS_CANCELLED_TOTAL: &str = "vgen_jobs_cancelled_total";
    /// Jobs completed with a local artifact because upload failed.
    pub const PUBLISH_DEGRADED_TOTAL: &str = "vgen_publish_degraded_total";
    /// Narrated jobs rendered at the default length because probing failed.
    pub const DURATION_FALLBACK_TOTAL: &str = "vgen_duration_probe_fallback_total";
    /// Jobs waiting for a worker slot.
    pub const QUEUE_DEPTH: &str = "vgen_queue_depth";
    /// Submissions rejected because the queue was full.
    pub const QUEUE_REJECTED_TOTAL: &str = "vgen_queue_rejected_total";
}

pub fn record_stage(stage: Stage, elapsed: Duration) {
    histogram!(names::STAGE_DURATION_SECONDS, "stage" => stage.as_str()).record(elapsed.as_secs_f64());
}

pub fn record_completed(degraded: bool) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    if degraded {
        counter!(names::PUBLISH_DEGRADED_TOTAL).increment(1);
    }
}

pub fn record_failed(stage: Option<Stage>) {
    let stage = stage.map(|s| s.as_str()).unwrap_or("unknown");
    counter!(names::JOBS_FAILED_TOTAL, "stage" => stage).increment(1);
}

pub fn record_cancelled() {
    counter!(names::JOBS_CANCELLED_TOTAL).increment(1);
}

pub fn record_duration_fallback() {
    counter!(names::DURATION_FALLBACK_TOTAL).increment(1);
}

pub fn set_queue_depth(depth: usize) {
    gauge!(names::QUEUE_DEPTH).set(depth as f64);
}

pub fn record_queue_rejected() {
    counter!(names::QUEUE_REJECTED_TOTAL).increment(1);
}
