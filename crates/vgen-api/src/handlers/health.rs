//! Liveness and readiness probes.

use std::fmt::Display;
use std::future::Future;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
}

/// Liveness: the process is up and serving.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: Utc::now().to_rfc3339(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadinessResponse {
    pub status: &'static str,
    pub checks: ReadinessChecks,
    pub active_jobs: usize,
    pub queue_depth: usize,
}

#[derive(Serialize)]
pub struct ReadinessChecks {
    pub store: DependencyCheck,
    pub storage: DependencyCheck,
    pub speech: DependencyCheck,
    pub executor: DependencyCheck,
}

impl ReadinessChecks {
    fn all_ok(&self) -> bool {
        [&self.store, &self.storage, &self.speech, &self.executor]
            .iter()
            .all(|c| c.status == "ok")
    }
}

/// Outcome of probing one dependency.
#[derive(Serialize)]
pub struct DependencyCheck {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

impl DependencyCheck {
    async fn probe<F, E>(check: F) -> Self
    where
        F: Future<Output = Result<(), E>>,
        E: Display,
    {
        let started = Instant::now();
        match check.await {
            Ok(()) => Self {
                status: "ok",
                error: None,
                latency_ms: Some(started.elapsed().as_millis() as u64),
            },
            Err(e) => Self::failed(e.to_string()),
        }
    }

    fn failed(error: String) -> Self {
        Self {
            status: "error",
            error: Some(error),
            latency_ms: None,
        }
    }
}

/// Readiness: the record store, the object store and the speech service are
/// reachable and the executor still accepts work.
pub async fn ready(
    State(state): State<AppState>,
) -> Result<Json<ReadinessResponse>, (StatusCode, Json<ReadinessResponse>)> {
    let checks = ReadinessChecks {
        store: DependencyCheck::probe(state.jobs.health_check()).await,
        storage: DependencyCheck::probe(state.storage.check_connectivity()).await,
        speech: DependencyCheck::probe(state.speech.health_check()).await,
        executor: if state.executor.is_shutting_down() {
            DependencyCheck::failed("shutting down".to_string())
        } else {
            DependencyCheck {
                status: "ok",
                error: None,
                latency_ms: None,
            }
        },
    };

    let ready = checks.all_ok();
    let response = ReadinessResponse {
        status: if ready { "ready" } else { "degraded" },
        checks,
        active_jobs: state.executor.active_jobs(),
        queue_depth: state.executor.queue_depth(),
    };

    if ready {
        Ok(Json(response))
    } else {
        Err((StatusCode::SERVICE_UNAVAILABLE, Json(response)))
    }
}
