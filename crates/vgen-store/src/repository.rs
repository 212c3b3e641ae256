//! Repository traits and paging types.

use async_trait::async_trait;
use serde::Serialize;

use vgen_models::{JobId, JobRecord, JobStatus, OutputLocation, TtsRecord};

use crate::error::StoreResult;

/// Paging and filter options for listings. `page` is 1-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListQuery {
    pub page: u32,
    pub limit: u32,
    pub status: Option<JobStatus>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: 10,
            status: None,
        }
    }
}

impl ListQuery {
    pub const MAX_LIMIT: u32 = 100;

    /// Clamp page and limit into their valid ranges.
    pub fn normalized(self) -> Self {
        Self {
            page: self.page.max(1),
            limit: self.limit.clamp(1, Self::MAX_LIMIT),
            status: self.status,
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.saturating_sub(1) as usize) * self.limit as usize
    }

    /// Cut the page out of a full, already sorted listing.
    pub fn slice<T>(&self, items: Vec<T>) -> Page<T> {
        let total = items.len() as u64;
        let items = items
            .into_iter()
            .skip(self.offset())
            .take(self.limit as usize)
            .collect();
        Page {
            items,
            page: self.page,
            limit: self.limit,
            total,
        }
    }
}

/// One page of a listing, newest first.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub limit: u32,
    pub total: u64,
}

impl<T> Page<T> {
    /// Number of pages, `ceil(total / limit)`.
    pub fn pages(&self) -> u64 {
        if self.limit == 0 {
            return 0;
        }
        self.total.div_ceil(self.limit as u64)
    }
}

/// Persistent store for job records.
///
/// Mutating methods validate the lifecycle and leave the record untouched
/// when a transition is rejected.
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Insert a new record.
    async fn create(&self, job: &JobRecord) -> StoreResult<()>;

    async fn get(&self, id: &JobId) -> StoreResult<Option<JobRecord>>;

    /// Newest first, optionally filtered by status.
    async fn list(&self, query: ListQuery) -> StoreResult<Page<JobRecord>>;

    /// `pending -> processing` with a seeded progress value.
    async fn start(&self, id: &JobId, seed: u8) -> StoreResult<JobRecord>;

    /// Monotonic check-and-set: applied only while processing and only when
    /// `value` exceeds the stored progress. Returns whether it was applied.
    async fn update_progress(&self, id: &JobId, value: u8) -> StoreResult<bool>;

    /// Merge the resolved audio URL and frame count into the parameters.
    async fn record_resolved_media(
        &self,
        id: &JobId,
        audio_url: Option<String>,
        duration_in_frames: u32,
    ) -> StoreResult<()>;

    async fn complete(&self, id: &JobId, location: OutputLocation) -> StoreResult<JobRecord>;

    async fn fail(&self, id: &JobId, error: String) -> StoreResult<JobRecord>;

    async fn cancel(&self, id: &JobId, reason: String) -> StoreResult<JobRecord>;

    /// Remove a record, returning it if it existed.
    async fn delete(&self, id: &JobId) -> StoreResult<Option<JobRecord>>;

    async fn health_check(&self) -> StoreResult<()>;
}

/// Persistent store for narration-only records.
#[async_trait]
pub trait TtsRepository: Send + Sync {
    async fn create(&self, record: &TtsRecord) -> StoreResult<()>;

    async fn get(&self, file_id: &str) -> StoreResult<Option<TtsRecord>>;

    /// Newest first. `query.status` is ignored.
    async fn list(&self, query: ListQuery) -> StoreResult<Page<TtsRecord>>;

    async fn delete(&self, file_id: &str) -> StoreResult<Option<TtsRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_count() {
        let page = ListQuery::default().slice((0..21).collect::<Vec<_>>());
        assert_eq!(page.total, 21);
        assert_eq!(page.pages(), 3);
        assert_eq!(page.items, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_slice_last_and_past_end() {
        let query = ListQuery {
            page: 3,
            limit: 10,
            status: None,
        };
        assert_eq!(query.slice((0..21).collect::<Vec<_>>()).items, vec![20]);

        let query = ListQuery { page: 9, ..query };
        assert!(query.slice((0..21).collect::<Vec<_>>()).items.is_empty());
    }

    #[test]
    fn test_normalized() {
        let query = ListQuery {
            page: 0,
            limit: 5000,
            status: None,
        }
        .normalized();
        assert_eq!(query.page, 1);
        assert_eq!(query.limit, ListQuery::MAX_LIMIT);
    }
}
