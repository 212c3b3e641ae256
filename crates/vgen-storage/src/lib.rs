//! S3-compatible artifact storage.
//!
//! This crate provides:
//! - File upload and deletion against MinIO / R2 / S3
//! - Public URL construction and reverse lookup
//! - Bucket bootstrap with a public-read policy

pub mod client;
pub mod error;

pub use client::{content_type_for, ArtifactStore, S3Client, StorageConfig};
pub use error::{StorageError, StorageResult};
