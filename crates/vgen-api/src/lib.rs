//! Axum HTTP API server.
//!
//! This crate provides:
//! - Job submission, status, listing and deletion
//! - Narration-only (text-to-speech) endpoints
//! - Serving of locally kept artifacts
//! - Rate limiting and security headers
//! - Prometheus metrics
//!
//! Jobs run on an in-process [`vgen_worker::JobExecutor`] owned by [`AppState`].

pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod state;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::{AppState, BucketNames};
