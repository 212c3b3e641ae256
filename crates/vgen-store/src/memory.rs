//! In-memory repositories.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use vgen_models::{JobId, JobRecord, OutputLocation, TtsRecord};

use crate::error::{StoreError, StoreResult};
use crate::repository::{JobRepository, ListQuery, Page, TtsRepository};

/// Job records held in a process-local map.
#[derive(Default)]
pub struct MemoryJobRepository {
    jobs: RwLock<HashMap<JobId, JobRecord>>,
}

impl MemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply `change` to a copy of the record and store it if the change
    /// succeeds and reports a modification.
    async fn mutate<F>(&self, id: &JobId, change: F) -> StoreResult<(JobRecord, bool)>
    where
        F: FnOnce(&mut JobRecord) -> StoreResult<bool>,
    {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(id)
            .ok_or_else(|| StoreError::not_found(id.as_str()))?;

        let mut updated = stored.clone();
        let changed = change(&mut updated)?;
        if changed {
            *stored = updated.clone();
        }
        Ok((updated, changed))
    }
}

/// Newest first; ids break ties so paging is stable.
pub(crate) fn sort_newest_first(jobs: &mut [JobRecord]) {
    jobs.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| a.id.as_str().cmp(b.id.as_str()))
    });
}

#[async_trait]
impl JobRepository for MemoryJobRepository {
    async fn create(&self, job: &JobRecord) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.id) {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn list(&self, query: ListQuery) -> StoreResult<Page<JobRecord>> {
        let query = query.normalized();
        let mut matching: Vec<JobRecord> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| query.status.map_or(true, |status| job.status == status))
            .cloned()
            .collect();
        sort_newest_first(&mut matching);
        Ok(query.slice(matching))
    }

    async fn start(&self, id: &JobId, seed: u8) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.start(seed)?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn update_progress(&self, id: &JobId, value: u8) -> StoreResult<bool> {
        let (_, applied) = self
            .mutate(id, |job| Ok(job.advance_progress(value)))
            .await?;
        Ok(applied)
    }

    async fn record_resolved_media(
        &self,
        id: &JobId,
        audio_url: Option<String>,
        duration_in_frames: u32,
    ) -> StoreResult<()> {
        self.mutate(id, |job| {
            job.record_resolved_media(audio_url, duration_in_frames);
            Ok(true)
        })
        .await?;
        Ok(())
    }

    async fn complete(&self, id: &JobId, location: OutputLocation) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.complete(location)?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn fail(&self, id: &JobId, error: String) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.fail(error)?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn cancel(&self, id: &JobId, reason: String) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.cancel(reason)?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn delete(&self, id: &JobId) -> StoreResult<Option<JobRecord>> {
        Ok(self.jobs.write().await.remove(id))
    }

    async fn health_check(&self) -> StoreResult<()> {
        Ok(())
    }
}

/// Narration records held in a process-local map.
#[derive(Default)]
pub struct MemoryTtsRepository {
    records: RwLock<HashMap<String, TtsRecord>>,
}

impl MemoryTtsRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TtsRepository for MemoryTtsRepository {
    async fn create(&self, record: &TtsRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.file_id) {
            return Err(StoreError::AlreadyExists(record.file_id.clone()));
        }
        records.insert(record.file_id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, file_id: &str) -> StoreResult<Option<TtsRecord>> {
        Ok(self.records.read().await.get(file_id).cloned())
    }

    async fn list(&self, query: ListQuery) -> StoreResult<Page<TtsRecord>> {
        let query = query.normalized();
        let mut records: Vec<TtsRecord> = self.records.read().await.values().cloned().collect();
        records.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.file_id.cmp(&b.file_id))
        });
        Ok(query.slice(records))
    }

    async fn delete(&self, file_id: &str) -> StoreResult<Option<TtsRecord>> {
        Ok(self.records.write().await.remove(file_id))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use vgen_models::{JobStatus, RenderParameters, TransitionError};

    use super::*;

    fn job() -> JobRecord {
        JobRecord::new(
            "HelloWorld",
            RenderParameters::default(),
            OutputLocation::local("/tmp/out.mp4"),
            None,
        )
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let repo = MemoryJobRepository::new();
        let job = job();
        repo.create(&job).await.unwrap();

        let started = repo.start(&job.id, 5).await.unwrap();
        assert_eq!(started.status, JobStatus::Processing);
        assert_eq!(started.progress, 5);

        assert!(repo.update_progress(&job.id, 50).await.unwrap());
        let done = repo
            .complete(&job.id, OutputLocation::remote("http://s3/b/k.mp4"))
            .await
            .unwrap();
        assert_eq!(done.progress, 100);
        assert_eq!(done.status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_rejected_transition_leaves_record_unchanged() {
        let repo = MemoryJobRepository::new();
        let job = job();
        repo.create(&job).await.unwrap();

        let err = repo
            .complete(&job.id, OutputLocation::local("/x.mp4"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InvalidTransition(TransitionError::InvalidTransition { .. })
        ));
        assert_eq!(repo.get(&job.id).await.unwrap().unwrap(), job);
    }

    #[tokio::test]
    async fn test_progress_never_regresses_under_concurrency() {
        let repo = Arc::new(MemoryJobRepository::new());
        let job = job();
        repo.create(&job).await.unwrap();
        repo.start(&job.id, 0).await.unwrap();

        let mut handles = Vec::new();
        for value in (1..=80u8).rev() {
            let repo = Arc::clone(&repo);
            let id = job.id.clone();
            handles.push(tokio::spawn(async move {
                repo.update_progress(&id, value).await.unwrap();
                repo.get(&id).await.unwrap().unwrap().progress
            }));
        }

        for handle in handles {
            let seen = handle.await.unwrap();
            assert!(seen >= 1);
        }
        assert_eq!(repo.get(&job.id).await.unwrap().unwrap().progress, 80);
    }

    #[tokio::test]
    async fn test_progress_after_terminal_is_ignored() {
        let repo = MemoryJobRepository::new();
        let job = job();
        repo.create(&job).await.unwrap();
        repo.start(&job.id, 0).await.unwrap();
        repo.fail(&job.id, "render stage failed: x".into())
            .await
            .unwrap();

        assert!(!repo.update_progress(&job.id, 99).await.unwrap());
        let stored = repo.get(&job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.progress, 0);
    }

    #[tokio::test]
    async fn test_list_filters_and_pages() {
        let repo = MemoryJobRepository::new();
        let base = Utc::now();
        for i in 0..5 {
            let mut job = job();
            job.created_at = base + Duration::seconds(i);
            repo.create(&job).await.unwrap();
            if i % 2 == 0 {
                repo.start(&job.id, 0).await.unwrap();
            }
        }

        let page = repo
            .list(ListQuery {
                page: 1,
                limit: 2,
                status: None,
            })
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.pages(), 3);
        assert!(page.items[0].created_at > page.items[1].created_at);

        let processing = repo
            .list(ListQuery {
                status: Some(JobStatus::Processing),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(processing.total, 3);
    }

    #[tokio::test]
    async fn test_delete_and_missing() {
        let repo = MemoryJobRepository::new();
        let job = job();
        repo.create(&job).await.unwrap();

        assert!(repo.delete(&job.id).await.unwrap().is_some());
        assert!(repo.delete(&job.id).await.unwrap().is_none());
        assert!(repo.get(&job.id).await.unwrap().is_none());
        assert!(repo.start(&job.id, 0).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_tts_records() {
        let repo = MemoryTtsRepository::new();
        let record = TtsRecord::completed("hi", "en", "abc", "abc.mp3", "/audio/abc.mp3");
        repo.create(&record).await.unwrap();
        repo.create(&TtsRecord::failed("oops", "en")).await.unwrap();

        let page = repo.list(ListQuery::default()).await.unwrap();
        assert_eq!(page.total, 2);
        assert_eq!(repo.get("abc").await.unwrap(), Some(record));
        assert!(repo.delete("abc").await.unwrap().is_some());
        assert!(repo.get("abc").await.unwrap().is_none());
    }
}
