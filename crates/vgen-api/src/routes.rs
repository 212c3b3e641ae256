//! API routes.

use std::sync::Arc;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::services::ServeDir;

use crate::handlers::storage::storage_urls;
use crate::handlers::tts::{delete_tts, generate_tts, get_tts, tts_history};
use crate::handlers::video::{delete_job, generate_with_audio, get_job, list_jobs, render_video};
use crate::handlers::{health, ready};
use crate::metrics::metrics_middleware;
use crate::middleware::{
    cors_layer, rate_limit_middleware, request_id, request_logging, security_headers,
    RateLimiterCache,
};
use crate::state::AppState;

/// Create the API router.
pub fn create_router(state: AppState, metrics_handle: Option<PrometheusHandle>) -> Router {
    let video_routes = Router::new()
        .route("/video/render", post(render_video))
        .route("/video/generate-with-audio", post(generate_with_audio))
        .route("/video/jobs", get(list_jobs))
        .route("/video/jobs/:job_id", get(get_job).delete(delete_job))
        // Local artifacts that were never published
        .nest_service("/video/files", ServeDir::new(&state.output_dir));

    let tts_routes = Router::new()
        .route("/tts/generate", post(generate_tts))
        .route("/tts/history", get(tts_history))
        .route("/tts/:file_id", get(get_tts).delete(delete_tts));

    let storage_routes = Router::new().route("/storage/url", get(storage_urls));

    let rate_limiter = Arc::new(RateLimiterCache::new(state.config.rate_limit_rps));

    let api_routes = Router::new()
        .merge(video_routes)
        .merge(tts_routes)
        .merge(storage_routes)
        .layer(middleware::from_fn_with_state(
            rate_limiter,
            rate_limit_middleware,
        ));

    let health_routes = Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
        .route("/ready", get(ready));

    let metrics_routes = if let Some(handle) = metrics_handle {
        Router::new().route("/metrics", get(move || async move { handle.render() }))
    } else {
        Router::new()
    };

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .merge(metrics_routes)
        .layer(RequestBodyLimitLayer::new(state.config.max_body_size))
        .layer(middleware::from_fn(metrics_middleware))
        .layer(middleware::from_fn(security_headers))
        .layer(middleware::from_fn(request_id))
        .layer(middleware::from_fn(request_logging))
        .layer(cors_layer(&state.config.cors_origins))
        .with_state(state)
}
