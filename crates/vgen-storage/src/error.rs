//! Object store errors.

use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage misconfigured: {0}")]
    Config(String),

    #[error("upload failed: {0}")]
    Upload(String),

    #[error("delete failed: {0}")]
    Delete(String),

    #[error("bucket {bucket} could not be prepared: {message}")]
    BucketSetup { bucket: String, message: String },

    /// Empty keys, leading slashes and `..` segments are refused.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error("object store unreachable: {0}")]
    Unreachable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn upload_failed(msg: impl Into<String>) -> Self {
        Self::Upload(msg.into())
    }

    pub fn delete_failed(msg: impl Into<String>) -> Self {
        Self::Delete(msg.into())
    }

    pub fn bucket_setup(bucket: &str, err: impl std::fmt::Display) -> Self {
        Self::BucketSetup {
            bucket: bucket.to_string(),
            message: err.to_string(),
        }
    }
}
