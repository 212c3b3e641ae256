//! Store configuration.

/// Which backend holds the records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Redis,
    Memory,
}

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub redis_url: String,
}

impl StoreConfig {
    /// Create config from environment variables.
    ///
    /// `JOB_STORE` picks the backend explicitly; otherwise Redis is used when
    /// `REDIS_URL` is set and memory when it is not.
    pub fn from_env() -> Self {
        let redis_url = std::env::var("REDIS_URL").ok();
        let backend = match std::env::var("JOB_STORE")
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Ok("memory") => StoreBackend::Memory,
            Ok("redis") => StoreBackend::Redis,
            _ if redis_url.is_some() => StoreBackend::Redis,
            _ => StoreBackend::Memory,
        };

        Self {
            backend,
            redis_url: redis_url.unwrap_or_else(|| "redis://127.0.0.1:6379".to_string()),
        }
    }
}
