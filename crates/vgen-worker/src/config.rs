//! Worker configuration.

use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::warn;

use vgen_models::{default_composition_parameters, DEFAULT_COMPOSITION_ID};

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum pipelines running at once
    pub max_concurrent_jobs: usize,
    /// Jobs that may wait for a slot before submissions are rejected
    pub queue_capacity: usize,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Scratch space; each job gets `<work_dir>/<job_id>`
    pub work_dir: PathBuf,
    /// Where finished artifacts are written before upload
    pub output_dir: PathBuf,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            queue_capacity: 64,
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/vgen"),
            output_dir: PathBuf::from("storage/videos"),
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: std::env::var("WORKER_MAX_JOBS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.max_concurrent_jobs),
            queue_capacity: std::env::var("WORKER_QUEUE_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            shutdown_timeout: Duration::from_secs(
                std::env::var("WORKER_SHUTDOWN_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(defaults.shutdown_timeout.as_secs()),
            ),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            output_dir: std::env::var("VIDEO_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
        }
    }

    pub fn job_work_dir(&self, job_id: &str) -> PathBuf {
        self.work_dir.join(job_id)
    }
}

/// Composition used when a request leaves it out.
#[derive(Debug, Clone)]
pub struct CompositionDefaults {
    pub composition_id: String,
    pub parameters: Map<String, Value>,
}

impl Default for CompositionDefaults {
    fn default() -> Self {
        Self {
            composition_id: DEFAULT_COMPOSITION_ID.to_string(),
            parameters: default_composition_parameters(),
        }
    }
}

impl CompositionDefaults {
    /// Create from `DEFAULT_COMPOSITION_ID` and `DEFAULT_COMPOSITION_PARAMS` (a JSON object).
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let parameters = match std::env::var("DEFAULT_COMPOSITION_PARAMS") {
            Ok(raw) => parse_parameters(&raw).unwrap_or_else(|| {
                warn!("DEFAULT_COMPOSITION_PARAMS is not a JSON object, using built-in defaults");
                defaults.parameters.clone()
            }),
            Err(_) => defaults.parameters,
        };

        Self {
            composition_id: std::env::var("DEFAULT_COMPOSITION_ID")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.composition_id),
            parameters,
        }
    }
}

fn parse_parameters(raw: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str(raw) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.max_concurrent_jobs, 2);
        assert_eq!(config.queue_capacity, 64);
        assert_eq!(
            config.job_work_dir("abc"),
            PathBuf::from("/tmp/vgen").join("abc")
        );

        let composition = CompositionDefaults::default();
        assert_eq!(composition.composition_id, "HelloWorld");
        assert_eq!(composition.parameters["logoColor1"], "#91EAE4");
    }

    #[test]
    fn test_parse_parameters() {
        assert!(parse_parameters(r#"{"titleText": "Hi"}"#).is_some());
        assert!(parse_parameters("[1, 2]").is_none());
        assert!(parse_parameters("not json").is_none());
    }
}
