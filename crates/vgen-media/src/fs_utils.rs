//! Filesystem helpers for transient job files.
//!
//! Removal here is best-effort: a file that is already gone counts as
//! removed, and other failures are logged rather than returned.

use std::io::ErrorKind;
use std::path::Path;
use tokio::fs;

use crate::error::MediaResult;

/// Create the parent directory of `path` if it does not exist.
pub async fn ensure_parent_dir(path: impl AsRef<Path>) -> MediaResult<()> {
    if let Some(parent) = path.as_ref().parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).await?;
        }
    }
    Ok(())
}

/// Remove a file. Returns false only when removal failed for a reason
/// other than the file being absent.
pub async fn remove_file_quietly(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match fs::remove_file(path).await {
        Ok(()) => {
            tracing::debug!("Removed {}", path.display());
            true
        }
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Blocking variant of [`remove_file_quietly`] for use from `Drop`.
pub fn remove_file_quietly_blocking(path: impl AsRef<Path>) -> bool {
    let path = path.as_ref();
    match std::fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == ErrorKind::NotFound => true,
        Err(e) => {
            tracing::warn!("Failed to remove {}: {}", path.display(), e);
            false
        }
    }
}

/// Remove a directory if it is empty. Non-empty or missing directories are left alone.
pub async fn remove_dir_if_empty(path: impl AsRef<Path>) {
    let path = path.as_ref();
    if let Err(e) = fs::remove_dir(path).await {
        if e.kind() != ErrorKind::NotFound {
            tracing::debug!("Leaving directory {}: {}", path.display(), e);
        }
    }
}
