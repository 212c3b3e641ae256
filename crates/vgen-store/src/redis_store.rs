//! Redis repositories.
//!
//! Records are JSON strings under `vgen:job:{id}` / `vgen:tts:{file_id}`,
//! indexed by creation time in a sorted set. Updates are optimistic: read
//! the document, apply the change in Rust, then write it back with a Lua
//! compare-and-set that only succeeds if the document is unchanged.

use async_trait::async_trait;
use redis::{AsyncCommands, Script};
use tracing::{debug, warn};

use vgen_models::{JobId, JobRecord, OutputLocation, TtsRecord};

use crate::error::{StoreError, StoreResult};
use crate::memory::sort_newest_first;
use crate::repository::{JobRepository, ListQuery, Page, TtsRepository};

const JOB_KEY_PREFIX: &str = "vgen:job";
const JOB_INDEX_KEY: &str = "vgen:jobs";
const TTS_KEY_PREFIX: &str = "vgen:tts";
const TTS_INDEX_KEY: &str = "vgen:tts_records";

/// Compare-and-set attempts before giving up with [`StoreError::Conflict`].
const MAX_CAS_ATTEMPTS: usize = 16;

const CAS_SCRIPT: &str = r#"
local current = redis.call('GET', KEYS[1])
if not current then
    return -1
end
if current ~= ARGV[1] then
    return 0
end
redis.call('SET', KEYS[1], ARGV[2])
return 1
"#;

fn job_key(id: &JobId) -> String {
    format!("{}:{}", JOB_KEY_PREFIX, id)
}

fn tts_key(file_id: &str) -> String {
    format!("{}:{}", TTS_KEY_PREFIX, file_id)
}

/// Job records in Redis.
#[derive(Clone)]
pub struct RedisJobRepository {
    client: redis::Client,
}

impl RedisJobRepository {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Optimistically apply `change` and write the result back.
    async fn mutate<F>(&self, id: &JobId, mut change: F) -> StoreResult<(JobRecord, bool)>
    where
        F: FnMut(&mut JobRecord) -> StoreResult<bool> + Send,
    {
        let mut conn = self.connection().await?;
        let key = job_key(id);
        let script = Script::new(CAS_SCRIPT);

        for attempt in 0..MAX_CAS_ATTEMPTS {
            let raw: Option<String> = conn.get(&key).await?;
            let raw = raw.ok_or_else(|| StoreError::not_found(id.as_str()))?;

            let mut job: JobRecord = serde_json::from_str(&raw)?;
            if !change(&mut job)? {
                return Ok((job, false));
            }

            let updated = serde_json::to_string(&job)?;
            let outcome: i32 = script
                .key(&key)
                .arg(&raw)
                .arg(&updated)
                .invoke_async(&mut conn)
                .await?;

            match outcome {
                1 => return Ok((job, true)),
                -1 => return Err(StoreError::not_found(id.as_str())),
                _ => debug!(job_id = %id, attempt, "Job record changed concurrently, retrying"),
            }
        }

        warn!(job_id = %id, "Gave up updating job record after repeated conflicts");
        Err(StoreError::Conflict(id.to_string()))
    }

    async fn load_many(
        conn: &mut redis::aio::MultiplexedConnection,
        ids: &[String],
    ) -> StoreResult<Vec<JobRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let keys: Vec<String> = ids
            .iter()
            .map(|id| format!("{}:{}", JOB_KEY_PREFIX, id))
            .collect();
        let raws: Vec<Option<String>> = redis::cmd("MGET").arg(&keys).query_async(conn).await?;

        let mut jobs = Vec::with_capacity(raws.len());
        for raw in raws.into_iter().flatten() {
            match serde_json::from_str::<JobRecord>(&raw) {
                Ok(job) => jobs.push(job),
                Err(e) => warn!("Skipping unreadable job record: {}", e),
            }
        }
        Ok(jobs)
    }
}

#[async_trait]
impl JobRepository for RedisJobRepository {
    async fn create(&self, job: &JobRecord) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(job)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(job_key(&job.id))
            .arg(&payload)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            return Err(StoreError::AlreadyExists(job.id.to_string()));
        }

        conn.zadd::<_, _, _, ()>(
            JOB_INDEX_KEY,
            job.id.as_str(),
            job.created_at.timestamp_millis(),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, id: &JobId) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(job_key(id)).await?;
        raw.map(|r| serde_json::from_str(&r).map_err(StoreError::from))
            .transpose()
    }

    async fn list(&self, query: ListQuery) -> StoreResult<Page<JobRecord>> {
        let query = query.normalized();
        let mut conn = self.connection().await?;

        if query.status.is_none() {
            let total: u64 = conn.zcard(JOB_INDEX_KEY).await?;
            let start = query.offset() as isize;
            let stop = start + query.limit as isize - 1;
            let ids: Vec<String> = conn.zrevrange(JOB_INDEX_KEY, start, stop).await?;
            let mut items = Self::load_many(&mut conn, &ids).await?;
            sort_newest_first(&mut items);
            return Ok(Page {
                items,
                page: query.page,
                limit: query.limit,
                total,
            });
        }

        let ids: Vec<String> = conn.zrevrange(JOB_INDEX_KEY, 0, -1).await?;
        let mut jobs: Vec<JobRecord> = Self::load_many(&mut conn, &ids)
            .await?
            .into_iter()
            .filter(|job| Some(job.status) == query.status)
            .collect();
        sort_newest_first(&mut jobs);
        Ok(query.slice(jobs))
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
            job.record_resolved_media(audio_url.clone(), duration_in_frames);
            Ok(true)
        })
        .await?;
        Ok(())
    }

    async fn complete(&self, id: &JobId, location: OutputLocation) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.complete(location.clone())?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn fail(&self, id: &JobId, error: String) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.fail(error.clone())?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn cancel(&self, id: &JobId, reason: String) -> StoreResult<JobRecord> {
        let (job, _) = self
            .mutate(id, |job| {
                job.cancel(reason.clone())?;
                Ok(true)
            })
            .await?;
        Ok(job)
    }

    async fn delete(&self, id: &JobId) -> StoreResult<Option<JobRecord>> {
        let mut conn = self.connection().await?;
        let key = job_key(id);

        let (raw, _, _): (Option<String>, i64, i64) = redis::pipe()
            .atomic()
            .get(&key)
            .del(&key)
            .zrem(JOB_INDEX_KEY, id.as_str())
            .query_async(&mut conn)
            .await?;

        raw.map(|r| serde_json::from_str(&r).map_err(StoreError::from))
            .transpose()
    }

    async fn health_check(&self) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }
}

/// Narration records in Redis.
#[derive(Clone)]
pub struct RedisTtsRepository {
    client: redis::Client,
}

impl RedisTtsRepository {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> StoreResult<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }
}

#[async_trait]
impl TtsRepository for RedisTtsRepository {
    async fn create(&self, record: &TtsRecord) -> StoreResult<()> {
        let mut conn = self.connection().await?;
        let payload = serde_json::to_string(record)?;

        let created: Option<String> = redis::cmd("SET")
            .arg(tts_key(&record.file_id))
            .arg(&payload)
            .arg("NX")
            .query_async(&mut conn)
            .await?;
        if created.is_none() {
            return Err(StoreError::AlreadyExists(record.file_id.clone()));
        }

        conn.zadd::<_, _, _, ()>(
            TTS_INDEX_KEY,
            &record.file_id,
            record.created_at.timestamp_millis(),
        )
        .await?;
        Ok(())
    }

    async fn get(&self, file_id: &str) -> StoreResult<Option<TtsRecord>> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn.get(tts_key(file_id)).await?;
        raw.map(|r| serde_json::from_str(&r).map_err(StoreError::from))
            .transpose()
    }

    async fn list(&self, query: ListQuery) -> StoreResult<Page<TtsRecord>> {
        let query = query.normalized();
        let mut conn = self.connection().await?;

        let total: u64 = conn.zcard(TTS_INDEX_KEY).await?;
        let start = query.offset() as isize;
        let stop = start + query.limit as isize - 1;
        let ids: Vec<String> = conn.zrevrange(TTS_INDEX_KEY, start, stop).await?;

        let mut items = Vec::with_capacity(ids.len());
        if !ids.is_empty() {
            let keys: Vec<String> = ids.iter().map(|id| tts_key(id)).collect();
            let raws: Vec<Option<String>> =
                redis::cmd("MGET").arg(&keys).query_async(&mut conn).await?;
            for raw in raws.into_iter().flatten() {
                match serde_json::from_str::<TtsRecord>(&raw) {
                    Ok(record) => items.push(record),
                    Err(e) => warn!("Skipping unreadable TTS record: {}", e),
                }
            }
        }

        Ok(Page {
            items,
            page: query.page,
            limit: query.limit,
            total,
        })
    }

    async fn delete(&self, file_id: &str) -> StoreResult<Option<TtsRecord>> {
        let mut conn = self.connection().await?;
        let key = tts_key(file_id);

        let (raw, _, _): (Option<String>, i64, i64) = redis::pipe()
            .atomic()
            .get(&key)
            .del(&key)
            .zrem(TTS_INDEX_KEY, file_id)
            .query_async(&mut conn)
            .await?;

        raw.map(|r| serde_json::from_str(&r).map_err(StoreError::from))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let id = JobId::from_string("abc");
        assert_eq!(job_key(&id), "vgen:job:abc");
        assert_eq!(tts_key("f1"), "vgen:tts:f1");
    }

    #[test]
    fn test_client_open_is_lazy() {
        // Opening a client parses the URL only; no server is contacted.
        let client = redis::Client::open("redis://127.0.0.1:1/").unwrap();
        let _repo = RedisJobRepository::new(client);
        assert!(redis::Client::open("not a url").is_err());
    }
}
