//! Durable record storage.
//!
//! This crate provides:
//! - [`JobRepository`] / [`TtsRepository`] traits used by the API and worker
//! - A Redis backend (JSON documents plus a creation-time index)
//! - An in-memory backend for single-process deployments and tests
//!
//! Every status change is applied through the transition methods of
//! [`vgen_models::JobRecord`], so both backends enforce the same lifecycle.

pub mod config;
pub mod error;
pub mod memory;
pub mod redis_store;
pub mod repository;

use std::sync::Arc;

pub use config::{StoreBackend, StoreConfig};
pub use error::{StoreError, StoreResult};
pub use memory::{MemoryJobRepository, MemoryTtsRepository};
pub use redis_store::{RedisJobRepository, RedisTtsRepository};
pub use repository::{JobRepository, ListQuery, Page, TtsRepository};

/// Repositories selected by configuration.
#[derive(Clone)]
pub struct Repositories {
    pub jobs: Arc<dyn JobRepository>,
    pub tts: Arc<dyn TtsRepository>,
}

impl Repositories {
    /// Build the configured backend.
    pub fn connect(config: &StoreConfig) -> StoreResult<Self> {
        match config.backend {
            StoreBackend::Memory => {
                tracing::info!("Using in-memory record store");
                Ok(Self::in_memory())
            }
            StoreBackend::Redis => {
                let client = redis::Client::open(config.redis_url.as_str())?;
                tracing::info!("Using Redis record store");
                Ok(Self {
                    jobs: Arc::new(RedisJobRepository::new(client.clone())),
                    tts: Arc::new(RedisTtsRepository::new(client)),
                })
            }
        }
    }

    pub fn in_memory() -> Self {
        Self {
            jobs: Arc::new(MemoryJobRepository::new()),
            tts: Arc::new(MemoryTtsRepository::new()),
        }
    }
}
