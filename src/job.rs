use crate::blob_store::BlobStore;
use crate::errors::{BlobStoreError, PathNotFoundError, SafeDisplay};
use crate::metadata_store::{with_retries, MetadataStore, TransactionResult};
use crate::model::{Blob, JobMetadata, JobStatus, OperationType};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Semaphore};
use tracing::{info, warn};
use uuid::Uuid;

/// `database_transaction_retries`/`database_transaction_retry_backoff`
/// (spec §4.4), threaded into each `Job` from `QueueConfig` so every
/// persisted transition gets the same retry budget.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub retries: u32,
    pub backoff: Duration,
}

/// Either a `Job` ran to completion (possibly with the operational `error`
/// field set on the returned `Blob`), or the request targeted a path that
/// doesn't exist (spec §4.3, §7).
pub enum RunOutcome {
    Blob(Blob),
    NotFound(PathNotFoundError),
}

/// A small worker pool scoped to one `Job`, mirroring the source's
/// thread-pool-per-job pattern (spec §9): here it's a `tokio::Semaphore`
/// guarding a fixed number of concurrent permits, released on every exit
/// path via the RAII guard.
struct JobWorkers {
    semaphore: Semaphore,
}

impl JobWorkers {
    fn new(size: usize) -> Self {
        Self {
            semaphore: Semaphore::new(size.max(1)),
        }
    }

    async fn acquire(&self) -> tokio::sync::SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("job worker semaphore is never closed while the job is alive")
    }

    fn close(&self) {
        self.semaphore.close();
    }
}

/// Binds one `Blob` request to one execution against a `BlobStore`,
/// persisting every status transition to a shared `MetadataStore` (spec
/// §4.3).
pub struct Job {
    pub id: Uuid,
    blob: Blob,
    metadata_store: Arc<dyn MetadataStore>,
    retry_policy: RetryPolicy,
    workers: JobWorkers,
    current: Mutex<JobMetadata>,
    pub job_start_time: Instant,
}

impl Job {
    pub fn new(
        blob: Blob,
        metadata_store: Arc<dyn MetadataStore>,
        max_workers: usize,
        retry_policy: RetryPolicy,
    ) -> Self {
        let id = Uuid::new_v4();
        let initial = JobMetadata::new(id, &blob, JobStatus::Creating, "job created");
        Self {
            id,
            blob,
            metadata_store,
            retry_policy,
            workers: JobWorkers::new(max_workers),
            current: Mutex::new(initial),
            job_start_time: Instant::now(),
        }
    }

    pub async fn metadata(&self) -> JobMetadata {
        self.current.lock().await.clone()
    }

    /// Persists a transition with the queue's transaction retry budget
    /// (spec §4.4). Exhausting retries is logged, not propagated: the
    /// in-memory status still advances so a caller polling `metadata()`
    /// observes progress even if the durable row lagged behind.
    async fn persist(&self, metadata: JobMetadata) -> JobMetadata {
        let mut guard = self.current.lock().await;
        *guard = metadata.clone();
        drop(guard);
        let result = with_retries(self.retry_policy.retries, self.retry_policy.backoff, || {
            self.metadata_store.upsert_by_path(&metadata)
        })
        .await;
        match result {
            Ok(TransactionResult::Failed) => {
                warn!(job_id = %self.id, "metadata store rejected job transition as a terminal failure");
            }
            Err(e) => {
                warn!(job_id = %self.id, error = %e, "exhausted retries persisting job metadata transition");
            }
            Ok(_) => {}
        }
        metadata
    }

    /// Persists the initial `CREATING` row (spec §4.3 `create()`).
    pub async fn create(&self) -> JobMetadata {
        let initial = self.current.lock().await.clone();
        let result = with_retries(self.retry_policy.retries, self.retry_policy.backoff, || {
            self.metadata_store.upsert_by_path(&initial)
        })
        .await;
        match result {
            Ok(TransactionResult::Success | TransactionResult::Retry) => initial,
            Ok(TransactionResult::Failed) | Err(_) => {
                let failed = initial.failed(
                    "job metadata could not be persisted",
                    "metadata store unavailable",
                );
                *self.current.lock().await = failed.clone();
                failed
            }
        }
    }

    /// Dispatches to the operation implied by `operation_type` (spec §4.3
    /// `run()`). `data` is only used for uploads.
    pub async fn run(&self, store: &dyn BlobStore, data: Option<Vec<u8>>) -> RunOutcome {
        let outcome = match self.blob.operation_type {
            OperationType::Upload => self.run_upload(store, data.unwrap_or_default()).await,
            OperationType::Download => self.run_download(store).await,
            OperationType::Delete => self.run_delete(store).await,
            OperationType::List => {
                RunOutcome::Blob(self.blob.clone())
            }
        };
        self.workers.close();
        outcome
    }

    async fn run_upload(&self, store: &dyn BlobStore, data: Vec<u8>) -> RunOutcome {
        let _permit = self.workers.acquire().await;
        let current = self.current.lock().await.clone();
        self.persist(current.with_status(JobStatus::Writing, "writing blob"))
            .await;

        let namespace = self.blob.namespace.clone();
        let path = self.blob.path.clone();
        let result: Result<(), BlobStoreError> = async {
            store.make_dirs(&namespace).await?;
            store.write(&path, data).await
        }
        .await;

        let current = self.current.lock().await.clone();
        match result {
            Ok(()) => {
                let final_meta = self
                    .persist(current.with_status(JobStatus::Done, "upload complete"))
                    .await;
                info!(job_id = %self.id, path = %path, "upload done");
                RunOutcome::Blob(final_meta.as_blob())
            }
            Err(e) => {
                let final_meta = self
                    .persist(current.failed("upload failed", e.to_safe_string()))
                    .await;
                RunOutcome::Blob(final_meta.as_blob())
            }
        }
    }

    async fn run_download(&self, store: &dyn BlobStore) -> RunOutcome {
        let path = self.blob.path.clone();
        match store.exists(&path).await {
            Ok(true) => {}
            Ok(false) | Err(BlobStoreError::NotFound(_)) => {
                return RunOutcome::NotFound(PathNotFoundError { path });
            }
            Err(e) => {
                let current = self.current.lock().await.clone();
                let final_meta = self
                    .persist(current.failed("download precheck failed", e.to_safe_string()))
                    .await;
                return RunOutcome::Blob(final_meta.as_blob());
            }
        }

        let _permit = self.workers.acquire().await;
        let current = self.current.lock().await.clone();
        self.persist(current.with_status(JobStatus::Reading, "reading blob"))
            .await;

        let current = self.current.lock().await.clone();
        match store.read(&path).await {
            Ok(data) => {
                let final_meta = self
                    .persist(current.with_status(JobStatus::Done, "download complete"))
                    .await;
                let mut blob = final_meta.as_blob();
                blob.data = Some(data);
                RunOutcome::Blob(blob)
            }
            Err(e) => {
                let final_meta = self
                    .persist(current.failed("download failed", e.to_safe_string()))
                    .await;
                RunOutcome::Blob(final_meta.as_blob())
            }
        }
    }

    async fn run_delete(&self, store: &dyn BlobStore) -> RunOutcome {
        let path = self.blob.path.clone();
        match store.exists(&path).await {
            Ok(true) => {}
            Ok(false) => return RunOutcome::NotFound(PathNotFoundError { path }),
            Err(e) => {
                let current = self.current.lock().await.clone();
                let final_meta = self
                    .persist(current.failed("delete precheck failed", e.to_safe_string()))
                    .await;
                return RunOutcome::Blob(final_meta.as_blob());
            }
        }

        let _permit = self.workers.acquire().await;
        let current = self.current.lock().await.clone();
        self.persist(current.with_status(JobStatus::Deleting, "deleting blob"))
            .await;

        let current = self.current.lock().await.clone();
        match store.remove(&path).await {
            Ok(()) => {
                let final_meta = self
                    .persist(current.with_status(JobStatus::Done, "delete complete"))
                    .await;
                RunOutcome::Blob(final_meta.as_blob())
            }
            Err(e) => {
                let final_meta = self
                    .persist(current.failed("delete failed", e.to_safe_string()))
                    .await;
                RunOutcome::Blob(final_meta.as_blob())
            }
        }
    }

    /// Transitions to `CANCELLED` if the job is currently in a cancellable
    /// state (spec §4.2); a no-op from a terminal status.
    pub async fn cancel(&self) -> JobMetadata {
        let current = self.current.lock().await.clone();
        if !current.status.is_cancellable() {
            return current;
        }
        drop(current);
        let current = self.current.lock().await.clone();
        self.persist(current.with_status(JobStatus::Cancelled, "cancelled"))
            .await
    }

    /// Releases the job's worker pool. Idempotent.
    pub fn close(&self) {
        self.workers.close();
    }
}
