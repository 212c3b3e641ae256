//! Artifact publishing and temp file cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};
use vgen_media::fs_utils::{remove_dir_if_empty, remove_file_quietly, remove_file_quietly_blocking};
use vgen_models::JobId;
use vgen_storage::{content_type_for, ArtifactStore};

use crate::error::StageError;

/// Uploads finished videos to the video bucket.
#[derive(Clone)]
pub struct ArtifactPublisher {
    store: Arc<dyn ArtifactStore>,
    bucket: String,
}

impl ArtifactPublisher {
    pub fn new(store: Arc<dyn ArtifactStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Object key for a job's artifact: `videos/<job id>/<file name>`.
    pub fn object_key(job_id: &JobId, local: &Path) -> String {
        let file_name = local
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "output.mp4".to_string());
        format!("videos/{}/{}", job_id, file_name)
    }

    /// Upload `local` under `key` and return its public URL.
    pub async fn publish(&self, local: &Path, key: &str) -> Result<String, StageError> {
        let url = self
            .store
            .put_file(&self.bucket, key, local, content_type_for(local))
            .await
            .map_err(|e| StageError::Publish(e.to_string()))?;
        info!(bucket = %self.bucket, key, url = %url, "Published artifact");
        Ok(url)
    }
}

/// Best-effort removal of `paths`. Missing files are not errors.
pub async fn cleanup(paths: &[PathBuf]) -> usize {
    let mut removed = 0;
    for path in paths {
        if remove_file_quietly(path).await {
            removed += 1;
        }
    }
    removed
}

/// Scoped ownership of a run's temporary files.
///
/// Call [`TempFileGuard::finish`] on every exit path. If the guard is dropped
/// without it (a panic unwinding through the pipeline) the files are removed
/// synchronously from `Drop`.
#[derive(Debug, Default)]
pub struct TempFileGuard {
    files: Vec<PathBuf>,
    dirs: Vec<PathBuf>,
    finished: bool,
}

impl TempFileGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove `path` when the run ends.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.files.contains(&path) {
            self.files.push(path);
        }
    }

    /// Remove `dir` at the end if nothing else is left in it.
    pub fn track_dir(&mut self, dir: impl Into<PathBuf>) {
        let dir = dir.into();
        if !self.dirs.contains(&dir) {
            self.dirs.push(dir);
        }
    }

    /// Stop tracking `path`; it outlives the run.
    pub fn keep(&mut self, path: &Path) {
        self.files.retain(|p| p != path);
    }

    pub fn tracked(&self) -> &[PathBuf] {
        &self.files
    }

    pub async fn finish(mut self) {
        self.finished = true;
        let files = std::mem::take(&mut self.files);
        let removed = cleanup(&files).await;
        for dir in std::mem::take(&mut self.dirs) {
            remove_dir_if_empty(&dir).await;
        }
        debug!(tracked = files.len(), removed, "Temp files cleaned up");
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(
            files = self.files.len(),
            "TempFileGuard dropped without finish(), removing files synchronously"
        );
        for path in &self.files {
            remove_file_quietly_blocking(path);
        }
        for dir in &self.dirs {
            let _ = std::fs::remove_dir(dir);
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::testing::FakeArtifactStore;

    #[test]
    fn test_object_key() {
        let id = JobId::from_string("abc");
        assert_eq!(
            ArtifactPublisher::object_key(&id, Path::new("/out/HelloWorld-1.mp4")),
            "videos/abc/HelloWorld-1.mp4"
        );
    }

    #[tokio::test]
    async fn test_publish_returns_public_url() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp4");
        std::fs::write(&file, b"video").unwrap();

        let store = Arc::new(FakeArtifactStore::default());
        let publisher = ArtifactPublisher::new(store.clone(), "video-gen-videos");
        let url = publisher.publish(&file, "videos/j/a.mp4").await.unwrap();

        assert_eq!(url, "http://storage.test/video-gen-videos/videos/j/a.mp4");
        assert_eq!(store.object_count(), 1);
    }

    #[tokio::test]
    async fn test_publish_failure_is_publish_error() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("a.mp4");
        std::fs::write(&file, b"video").unwrap();

        let publisher =
            ArtifactPublisher::new(Arc::new(FakeArtifactStore::failing_uploads()), "videos");
        let err = publisher.publish(&file, "k").await.unwrap_err();
        assert!(matches!(err, StageError::Publish(_)));
    }

    #[tokio::test]
    async fn test_guard_finish_removes_files_and_empty_dir() {
        let root = TempDir::new().unwrap();
        let work = root.path().join("job");
        std::fs::create_dir_all(&work).unwrap();
        let audio = work.join("audio.mp3");
        let kept = root.path().join("final.mp4");
        std::fs::write(&audio, b"a").unwrap();
        std::fs::write(&kept, b"v").unwrap();

        let mut guard = TempFileGuard::new();
        guard.track(&audio);
        guard.track(work.join("never-created.mp4"));
        guard.track(&kept);
        guard.track_dir(&work);
        guard.keep(&kept);
        guard.finish().await;

        assert!(!audio.exists());
        assert!(!work.exists());
        assert!(kept.exists());
    }

    #[test]
    fn test_guard_drop_sweeps() {
        let root = TempDir::new().unwrap();
        let file = root.path().join("silent.mp4");
        std::fs::write(&file, b"v").unwrap();

        {
            let mut guard = TempFileGuard::new();
            guard.track(&file);
        }
        assert!(!file.exists());
    }
}
