//! Bounded job executor.
//!
//! Submissions go into a bounded queue. A dispatcher task takes a semaphore
//! permit, then the next queued job, and runs its pipeline on a spawned task.
//! Every admitted job gets a child of the executor's root cancellation token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use vgen_models::{JobId, JobRecord};

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;
use crate::pipeline::{run_job, PipelineContext};

struct Admitted {
    job: JobRecord,
    token: CancellationToken,
}

struct Inner {
    ctx: Arc<PipelineContext>,
    semaphore: Arc<Semaphore>,
    max_concurrent_jobs: usize,
    root: CancellationToken,
    /// Tokens of queued and running jobs.
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
    queued: AtomicUsize,
}

impl Inner {
    fn release(&self, id: &JobId) {
        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.remove(id);
        }
    }

    fn dequeued(&self) {
        let depth = self.queued.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);
        metrics::set_queue_depth(depth);
    }
}

/// Runs pipelines with bounded concurrency.
pub struct JobExecutor {
    inner: Arc<Inner>,
    sender: mpsc::Sender<Admitted>,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

impl JobExecutor {
    /// Create the executor and start its dispatcher. Must be called inside a
    /// Tokio runtime.
    pub fn new(ctx: Arc<PipelineContext>) -> Self {
        let max_concurrent_jobs = ctx.config.max_concurrent_jobs.max(1);
        let (sender, receiver) = mpsc::channel(ctx.config.queue_capacity.max(1));

        info!(
            "Starting job executor with {} max concurrent jobs, queue capacity {}",
            max_concurrent_jobs, ctx.config.queue_capacity
        );

        let inner = Arc::new(Inner {
            ctx,
            semaphore: Arc::new(Semaphore::new(max_concurrent_jobs)),
            max_concurrent_jobs,
            root: CancellationToken::new(),
            tokens: Mutex::new(HashMap::new()),
            queued: AtomicUsize::new(0),
        });
        let dispatcher = tokio::spawn(dispatch(Arc::clone(&inner), receiver));

        Self {
            inner,
            sender,
            dispatcher: Mutex::new(Some(dispatcher)),
        }
    }

    /// Admit a pending job. Never waits: a full queue is an error.
    pub fn submit(&self, job: JobRecord) -> WorkerResult<()> {
        if self.inner.root.is_cancelled() {
            return Err(WorkerError::ShuttingDown);
        }

        let id = job.id.clone();
        let token = self.inner.root.child_token();
        {
            let mut tokens = self
                .inner
                .tokens
                .lock()
                .map_err(|_| WorkerError::ShuttingDown)?;
            if tokens.contains_key(&id) {
                return Err(WorkerError::DuplicateJob(id.to_string()));
            }
            tokens.insert(id.clone(), token.clone());
        }

        self.inner.queued.fetch_add(1, Ordering::SeqCst);
        match self.sender.try_send(Admitted { job, token }) {
            Ok(()) => {
                let depth = self.queue_depth();
                metrics::set_queue_depth(depth);
                debug!(job_id = %id, queue_depth = depth, "Job queued");
                Ok(())
            }
            Err(e) => {
                self.inner.queued.fetch_sub(1, Ordering::SeqCst);
                self.inner.release(&id);
                match e {
                    TrySendError::Full(_) => {
                        metrics::record_queue_rejected();
                        warn!(job_id = %id, "Job queue is full, rejecting");
                        Err(WorkerError::QueueFull(self.queue_depth()))
                    }
                    TrySendError::Closed(_) => Err(WorkerError::ShuttingDown),
                }
            }
        }
    }

    /// Cancel a queued or running job. Returns false if the executor does
    /// not know the job.
    pub fn cancel(&self, id: &JobId) -> bool {
        let token = match self.inner.tokens.lock() {
            Ok(tokens) => tokens.get(id).cloned(),
            Err(_) => None,
        };
        match token {
            Some(token) => {
                info!(job_id = %id, "Cancelling job");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Jobs waiting for a worker slot.
    pub fn queue_depth(&self) -> usize {
        self.inner.queued.load(Ordering::SeqCst)
    }

    /// Pipelines currently running.
    pub fn active_jobs(&self) -> usize {
        self.inner.max_concurrent_jobs - self.inner.semaphore.available_permits()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.root.is_cancelled()
    }

    /// Cancel everything and wait up to the configured timeout for running
    /// pipelines to clean up.
    pub async fn shutdown(&self) {
        info!("Shutdown signal received, stopping executor");
        self.inner.root.cancel();

        let dispatcher = self.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = dispatcher {
            if let Err(e) = handle.await {
                warn!("Dispatcher task ended abnormally: {}", e);
            }
        }

        info!("Waiting for in-flight jobs to complete...");
        let timeout = self.inner.ctx.config.shutdown_timeout;
        if tokio::time::timeout(timeout, self.wait_for_jobs()).await.is_err() {
            warn!(
                active = self.active_jobs(),
                "Timed out after {:?} waiting for jobs", timeout
            );
        }
        info!("Job executor stopped");
    }

    /// Wait for all in-flight jobs to complete.
    async fn wait_for_jobs(&self) {
        loop {
            let available = self.inner.semaphore.available_permits();
            if available == self.inner.max_concurrent_jobs {
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

async fn dispatch(inner: Arc<Inner>, mut receiver: mpsc::Receiver<Admitted>) {
    loop {
        let permit = tokio::select! {
            biased;
            _ = inner.root.cancelled() => break,
            permit = Arc::clone(&inner.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let admitted = tokio::select! {
            biased;
            _ = inner.root.cancelled() => break,
            next = receiver.recv() => match next {
                Some(admitted) => admitted,
                None => break,
            },
        };
        inner.dequeued();

        let task_inner = Arc::clone(&inner);
        tokio::spawn(async move {
            let _permit = permit;
            let id = admitted.job.id.clone();
            let outcome = run_job(&task_inner.ctx, admitted.job, admitted.token).await;
            debug!(job_id = %id, ?outcome, "Job finished");
            task_inner.release(&id);
        });
    }

    // Jobs still queued never started; record them as cancelled.
    receiver.close();
    while let Ok(admitted) = receiver.try_recv() {
        inner.dequeued();
        let id = admitted.job.id.clone();
        admitted.token.cancel();
        run_job(&inner.ctx, admitted.job, admitted.token).await;
        inner.release(&id);
    }
    debug!("Dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tempfile::TempDir;
    use vgen_models::{JobStatus, OutputLocation, RenderParameters};

    use super::*;
    use crate::testing::{FakeRenderer, Harness};

    fn job(h: &Harness, name: &str) -> JobRecord {
        JobRecord::new(
            "HelloWorld",
            RenderParameters::default(),
            OutputLocation::local(h.output_dir.join(format!("{}.mp4", name))),
            None,
        )
    }

    async fn created(h: &Harness, name: &str) -> JobRecord {
        let job = job(h, name);
        h.repos.jobs.create(&job).await.unwrap();
        job
    }

    async fn wait_until<F>(mut check: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..400 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    async fn wait_for_status(h: &Harness, id: &JobId, status: JobStatus) -> JobRecord {
        for _ in 0..400 {
            let record = h.repos.jobs.get(id).await.unwrap().unwrap();
            if record.status == status {
                return record;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("job {} never reached {:?}", id, status);
    }

    fn render_calls(h: &Harness) -> usize {
        h.renderer.requests.lock().unwrap().len()
    }

    #[tokio::test]
    async fn test_submitted_jobs_complete() {
        let root = TempDir::new().unwrap();
        let h = Harness::builder(root.path()).build();
        let executor = JobExecutor::new(Arc::clone(&h.ctx));

        let a = created(&h, "a").await;
        let b = created(&h, "b").await;
        executor.submit(a.clone()).unwrap();
        executor.submit(b.clone()).unwrap();

        let a = wait_for_status(&h, &a.id, JobStatus::Completed).await;
        let b = wait_for_status(&h, &b.id, JobStatus::Completed).await;
        assert_eq!(a.progress, 100);
        assert_eq!(b.progress, 100);

        executor.shutdown().await;
        assert_eq!(executor.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_duplicate_submission_rejected() {
        let root = TempDir::new().unwrap();
        let h = Harness::builder(root.path())
            .renderer(FakeRenderer::default().blocking())
            .build();
        let executor = JobExecutor::new(Arc::clone(&h.ctx));

        let a = created(&h, "a").await;
        executor.submit(a.clone()).unwrap();
        let err = executor.submit(a.clone()).unwrap_err();
        assert!(matches!(err, WorkerError::DuplicateJob(_)));

        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let root = TempDir::new().unwrap();
        let h = Harness::builder(root.path())
            .renderer(FakeRenderer::default().blocking())
            .capacity(2, 8)
            .build();
        let executor = JobExecutor::new(Arc::clone(&h.ctx));

        for name in ["a", "b", "c"] {
            executor.submit(created(&h, name).await).unwrap();
        }

        wait_until(|| render_calls(&h) == 2).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(render_calls(&h), 2);
        assert_eq!(executor.active_jobs(), 2);
        assert_eq!(executor.queue_depth(), 1);

        executor.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_rejects_and_shutdown_cancels() {
        let root = TempDir::new().unwrap();
        let h = Harness::builder(root.path())
            .renderer(FakeRenderer::default().blocking())
            .capacity(1, 1)
            .build();
        let executor = JobExecutor::new(Arc::clone(&h.ctx));

        let running = created(&h, "running").await;
        executor.submit(running.clone()).unwrap();
        wait_until(|| render_calls(&h) == 1).await;

        let waiting = created(&h, "waiting").await;
        executor.submit(waiting.clone()).unwrap();
        assert_eq!(executor.queue_depth(), 1);

        let rejected = created(&h, "rejected").await;
        let err = executor.submit(rejected.clone()).unwrap_err();
        assert!(matches!(err, WorkerError::QueueFull(1)));
        assert!(err.is_capacity());

        executor.shutdown().await;

        let running = h.repos.jobs.get(&running.id).await.unwrap().unwrap();
        let waiting = h.repos.jobs.get(&waiting.id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Cancelled);
        assert_eq!(waiting.status, JobStatus::Cancelled);
        assert_eq!(executor.queue_depth(), 0);

        let late = created(&h, "late").await;
        assert!(matches!(
            executor.submit(late).unwrap_err(),
            WorkerError::ShuttingDown
        ));
    }

    #[tokio::test]
    async fn test_cancel_running_job() {
        let root = TempDir::new().unwrap();
        let h = Harness::builder(root.path())
            .renderer(FakeRenderer::default().blocking())
            .build();
        let executor = JobExecutor::new(Arc::clone(&h.ctx));

        let a = created(&h, "a").await;
        executor.submit(a.clone()).unwrap();
        wait_until(|| render_calls(&h) == 1).await;

        assert!(executor.cancel(&a.id));
        let record = wait_for_status(&h, &a.id, JobStatus::Cancelled).await;
        assert_eq!(record.error.as_deref(), Some("cancelled"));
        wait_until(|| !executor.cancel(&a.id)).await;
        assert!(!executor.cancel(&JobId::from_string("unknown")));
        assert_eq!(h.probe.calls.load(Ordering::SeqCst), 0);

        executor.shutdown().await;
    }
}
