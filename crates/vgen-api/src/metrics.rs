//! Prometheus metrics for the API server.

use std::sync::OnceLock;
use std::time::Instant;

use axum::body::Body;
use axum::http::{Request, Response};
use axum::middleware::Next;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use regex::Regex;

/// Initialize the Prometheus metrics recorder.
/// Returns a handle that can be used to render metrics.
pub fn init_metrics() -> PrometheusHandle {
    PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus recorder")
}

/// Metric names as constants for consistency.
pub mod names {
    // HTTP metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "vgen_http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "vgen_http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "vgen_http_requests_in_flight";

    // Job admission
    pub const JOBS_SUBMITTED_TOTAL: &str = "vgen_jobs_submitted_total";
    pub const JOBS_REJECTED_TOTAL: &str = "vgen_jobs_rejected_total";

    // Narration-only requests
    pub const TTS_REQUESTS_TOTAL: &str = "vgen_tts_requests_total";

    // Rate limiting metrics
    pub const RATE_LIMIT_HITS_TOTAL: &str = "vgen_rate_limit_hits_total";
}

/// Record an HTTP request.
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let labels = [
        ("method", method.to_string()),
        ("path", sanitize_path(path)),
        ("status", status.to_string()),
    ];

    counter!(names::HTTP_REQUESTS_TOTAL, &labels).increment(1);
    histogram!(names::HTTP_REQUEST_DURATION_SECONDS, &labels).record(duration_secs);
}

/// Record a job handed to the executor.
pub fn record_job_submitted(pipeline: &str) {
    let labels = [("pipeline", pipeline.to_string())];
    counter!(names::JOBS_SUBMITTED_TOTAL, &labels).increment(1);
}

/// Record a job the executor refused.
pub fn record_job_rejected(pipeline: &str) {
    let labels = [("pipeline", pipeline.to_string())];
    counter!(names::JOBS_REJECTED_TOTAL, &labels).increment(1);
}

pub fn record_tts_request(status: &str) {
    let labels = [("status", status.to_string())];
    counter!(names::TTS_REQUESTS_TOTAL, &labels).increment(1);
}

/// Record rate limit hit.
pub fn record_rate_limit_hit(endpoint: &str) {
    let labels = [("endpoint", sanitize_path(endpoint))];
    counter!(names::RATE_LIMIT_HITS_TOTAL, &labels).increment(1);
}

/// Collapse ids and file names so label cardinality stays bounded.
fn sanitize_path(path: &str) -> String {
    static PATTERNS: OnceLock<[(Regex, &'static str); 4]> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        [
            (Regex::new(r"^/api/video/files/.+$").unwrap(), "/api/video/files/:file"),
            (
                Regex::new(r"^/api/video/jobs/[^/]+$").unwrap(),
                "/api/video/jobs/:job_id",
            ),
            (
                Regex::new(r"^/api/tts/(?:[^/]+)$").unwrap(),
                "/api/tts/:file_id",
            ),
            (
                Regex::new(r"[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}")
                    .unwrap(),
                ":id",
            ),
        ]
    });

    if matches!(path, "/api/tts/generate" | "/api/tts/history") {
        return path.to_string();
    }
    for (pattern, replacement) in patterns {
        if pattern.is_match(path) {
            return pattern.replace_all(path, *replacement).into_owned();
        }
    }
    path.to_string()
}

/// Metrics middleware for HTTP requests.
pub async fn metrics_middleware(request: Request<Body>, next: Next) -> Response<Body> {
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let start = Instant::now();

    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(1.0);
    let response = next.run(request).await;
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).decrement(1.0);

    record_http_request(
        &method,
        &path,
        response.status().as_u16(),
        start.elapsed().as_secs_f64(),
    );

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_path() {
        assert_eq!(
            sanitize_path("/api/video/jobs/550e8400-e29b-41d4-a716-446655440000"),
            "/api/video/jobs/:job_id"
        );
        assert_eq!(
            sanitize_path("/api/video/files/sub/HelloWorld-1.mp4"),
            "/api/video/files/:file"
        );
        assert_eq!(sanitize_path("/api/tts/abc123"), "/api/tts/:file_id");
        assert_eq!(sanitize_path("/api/tts/history"), "/api/tts/history");
        assert_eq!(sanitize_path("/api/video/jobs"), "/api/video/jobs");
    }
}
