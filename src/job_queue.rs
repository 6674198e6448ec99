use crate::blob_store::{BlobStore, InMemoryBlobStore};
use crate::config::QueueConfig;
use crate::errors::{JobQueueError, PathNotFoundError, ServerLimitError};
use crate::job::{Job, RetryPolicy, RunOutcome};
use crate::metadata_store::MetadataStore;
use crate::model::{Blob, JobMetadata, JobStatus, OperationType};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Admission control, the two bounded queues, the background pruner, and
/// orderly shutdown (spec §4.5).
///
/// All mutation of `jobs`/`running_jobs`/`pending_jobs`/`active_tasks`
/// happens behind a single `tokio::Mutex` held only across synchronous
/// bookkeeping, mirroring spec §5's "single scheduler thread" model: workers
/// never touch this state directly, only their own `BlobStore` calls.
pub struct JobQueue {
    blob_store: Arc<dyn BlobStore>,
    metadata_store: Arc<dyn MetadataStore>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    pruner: Mutex<Option<JoinHandle<()>>>,
    run_cleanup: Arc<std::sync::atomic::AtomicBool>,
}

struct QueueState {
    jobs: HashMap<uuid::Uuid, Arc<Job>>,
    running_jobs: VecDeque<uuid::Uuid>,
    pending_jobs: VecDeque<uuid::Uuid>,
    active_tasks: HashMap<uuid::Uuid, JoinHandle<()>>,
    completed_closers: Vec<JoinHandle<()>>,
}

impl QueueState {
    fn new() -> Self {
        Self {
            jobs: HashMap::new(),
            running_jobs: VecDeque::new(),
            pending_jobs: VecDeque::new(),
            active_tasks: HashMap::new(),
            completed_closers: Vec::new(),
        }
    }
}

impl JobQueue {
    pub fn new(metadata_store: Arc<dyn MetadataStore>, config: QueueConfig) -> Self {
        Self::with_blob_store(Arc::new(InMemoryBlobStore::new()), metadata_store, config)
    }

    pub fn with_blob_store(
        blob_store: Arc<dyn BlobStore>,
        metadata_store: Arc<dyn MetadataStore>,
        config: QueueConfig,
    ) -> Self {
        Self {
            blob_store,
            metadata_store,
            config,
            state: Mutex::new(QueueState::new()),
            pruner: Mutex::new(None),
            run_cleanup: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Spawns the background pruner (spec §4.5).
    pub async fn start(self: &Arc<Self>) {
        self.run_cleanup
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let queue = Arc::clone(self);
        let handle = tokio::spawn(async move {
            queue.prune_loop().await;
        });
        *self.pruner.lock().await = Some(handle);
    }

    async fn prune_loop(self: Arc<Self>) {
        while self.run_cleanup.load(std::sync::atomic::Ordering::SeqCst) {
            self.prune_tick().await;
            tokio::time::sleep(self.config.prune_interval).await;
        }
    }

    /// One pruner tick (spec §4.5): reap terminal jobs past `blob_max_age`,
    /// promote pending work into freed running slots, reap finished closers.
    async fn prune_tick(&self) {
        let mut state = self.state.lock().await;

        let snapshot: Vec<(uuid::Uuid, Arc<Job>)> =
            state.jobs.iter().map(|(id, job)| (*id, Arc::clone(job))).collect();
        for (id, job) in snapshot {
            let status = job.metadata().await.status;
            if !status.is_terminal() {
                continue;
            }
            let job_for_close = Arc::clone(&job);
            let closer = tokio::spawn(async move {
                job_for_close.close();
            });
            state.completed_closers.push(closer);

            if job.job_start_time.elapsed() > self.config.blob_max_age {
                let path = job.metadata().await.path;
                match self.blob_store.remove(&path).await {
                    Ok(())
                    | Err(crate::errors::BlobStoreError::NotFound(_))
                    | Err(crate::errors::BlobStoreError::ReadOnly) => {}
                    Err(e) => warn!(path = %path, error = %e, "pruner failed to remove aged blob"),
                }
                state.jobs.remove(&id);
                debug!(job_id = %id, "pruner reclaimed terminal job");
            }
        }

        let running_count = state.running_jobs.len();
        for _ in 0..running_count {
            let Some(id) = state.running_jobs.pop_front() else {
                break;
            };
            let status = match state.jobs.get(&id) {
                Some(job) => job.metadata().await.status,
                None => JobStatus::Done,
            };
            if status.is_terminal() {
                if let Some(pending_id) = state.pending_jobs.pop_front() {
                    state.running_jobs.push_back(pending_id);
                }
            } else {
                state.running_jobs.push_back(id);
            }
        }

        let pending_count = state.pending_jobs.len();
        let mut retained = VecDeque::with_capacity(pending_count);
        for _ in 0..pending_count {
            let Some(id) = state.pending_jobs.pop_front() else {
                break;
            };
            let status = match state.jobs.get(&id) {
                Some(job) => job.metadata().await.status,
                None => JobStatus::Done,
            };
            if !status.is_terminal() {
                retained.push_back(id);
            }
        }
        state.pending_jobs = retained;

        state.completed_closers.retain(|h| !h.is_finished());
    }

    fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            retries: self.config.database_transaction_retries,
            backoff: self.config.database_transaction_retry_backoff,
        }
    }

    fn running_count_sync(state: &QueueState) -> usize {
        state.running_jobs.len()
    }

    fn pending_count_sync(state: &QueueState) -> usize {
        state.pending_jobs.len()
    }

    /// Admits and asynchronously runs an upload (spec §4.5 `upload`).
    pub async fn upload(
        self: &Arc<Self>,
        blob: Blob,
        data: Vec<u8>,
    ) -> Result<JobMetadata, ServerLimitError> {
        let job = Arc::new(Job::new(
            blob,
            Arc::clone(&self.metadata_store),
            self.config.workers,
            self.retry_policy(),
        ));
        let created = job.create().await;
        if created.status == JobStatus::Failed {
            return Ok(created);
        }

        let mut state = self.state.lock().await;
        let running_count = Self::running_count_sync(&state);
        let pending_count = Self::pending_count_sync(&state);

        if running_count >= self.config.max_jobs {
            if pending_count < self.config.max_pending_jobs {
                state.pending_jobs.push_back(job.id);
            } else {
                return Err(ServerLimitError {
                    message: "too many pending jobs".to_string(),
                    limit: self.config.max_pending_jobs,
                    current: pending_count,
                });
            }
        } else {
            state.running_jobs.push_back(job.id);
        }

        let store = Arc::clone(&self.blob_store);
        let job_for_task = Arc::clone(&job);
        let handle = tokio::spawn(async move {
            job_for_task.run(store.as_ref(), Some(data)).await;
        });
        state.active_tasks.insert(job.id, handle);
        state.jobs.insert(job.id, job);

        Ok(created)
    }

    /// Runs a download inline, never touching admission (spec §4.5
    /// `download`).
    pub async fn download(&self, blob: Blob) -> Result<Blob, PathNotFoundError> {
        let job = Job::new(
            blob,
            Arc::clone(&self.metadata_store),
            self.config.workers,
            self.retry_policy(),
        );
        job.create().await;
        match job.run(self.blob_store.as_ref(), None).await {
            RunOutcome::Blob(blob) => Ok(blob),
            RunOutcome::NotFound(e) => Err(e),
        }
    }

    /// Runs a delete inline and creates an audit job record without
    /// consuming admission capacity (spec §4.5 `delete`, spec §9 on the
    /// delete-admission open question: this repo follows the non-admitted
    /// variant).
    pub async fn delete(&self, blob: Blob) -> Result<JobMetadata, PathNotFoundError> {
        let job = Job::new(
            blob,
            Arc::clone(&self.metadata_store),
            self.config.workers,
            self.retry_policy(),
        );
        job.create().await;
        match job.run(self.blob_store.as_ref(), None).await {
            RunOutcome::Blob(result_blob) => {
                if let Some(error) = result_blob.error {
                    let mut meta = job.metadata().await;
                    meta.status = JobStatus::Failed;
                    meta.error = Some(error);
                    Ok(meta)
                } else {
                    Ok(job.metadata().await)
                }
            }
            RunOutcome::NotFound(e) => Err(e),
        }
    }

    pub async fn get_job_metadata(
        &self,
        namespace: &str,
        key: &str,
    ) -> Result<JobMetadata, PathNotFoundError> {
        let path = crate::model::join_path(namespace, key);
        self.metadata_store
            .select(&path)
            .await
            .ok()
            .flatten()
            .ok_or(PathNotFoundError { path })
    }

    pub async fn get_blob_metadata(
        &self,
        namespace: &str,
        key: &str,
        operation_type: OperationType,
    ) -> Result<Blob, PathNotFoundError> {
        let metadata = self.get_job_metadata(namespace, key).await?;
        let mut blob = metadata.as_blob();
        blob.operation_type = operation_type;
        Ok(blob)
    }

    /// Cancels an in-flight job if it's still in a cancellable state (spec
    /// §4.5 `cancel`).
    pub async fn cancel(&self, job_id: uuid::Uuid) -> Result<JobMetadata, JobQueueError> {
        let mut state = self.state.lock().await;

        let job = state
            .jobs
            .get(&job_id)
            .cloned()
            .ok_or(JobQueueError::JobNotFound(job_id))?;

        let status = job.metadata().await.status;
        if !status.is_cancellable() {
            return Err(JobQueueError::NotCancellable(job_id, status));
        }

        if let Some(handle) = state.active_tasks.remove(&job_id) {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        drop(state);

        let metadata = job.cancel().await;
        info!(job_id = %job_id, "job cancelled");
        Ok(metadata)
    }

    /// Orderly shutdown (spec §5): close the blob store, stop the pruner,
    /// drain both queues closing every job, and abort stragglers.
    pub async fn close(&self) {
        let _ = self.blob_store.close().await;

        self.run_cleanup
            .store(false, std::sync::atomic::Ordering::SeqCst);
        if let Some(handle) = self.pruner.lock().await.take() {
            let _ = handle.await;
        }

        let mut state = self.state.lock().await;

        let mut closers = Vec::new();
        for id in state.pending_jobs.drain(..).collect::<Vec<_>>() {
            if let Some(job) = state.jobs.get(&id).cloned() {
                closers.push(tokio::spawn(async move {
                    job.close();
                }));
            }
        }
        for id in state.running_jobs.drain(..).collect::<Vec<_>>() {
            if let Some(job) = state.jobs.get(&id).cloned() {
                closers.push(tokio::spawn(async move {
                    job.close();
                }));
            }
        }
        for closer in closers {
            let _ = closer.await;
        }

        for (_, handle) in state.active_tasks.drain() {
            if !handle.is_finished() {
                handle.abort();
            }
        }
        for closer in state.completed_closers.drain(..) {
            let _ = closer.await;
        }
    }

    #[cfg(test)]
    pub async fn running_count(&self) -> usize {
        Self::running_count_sync(&*self.state.lock().await)
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        Self::pending_count_sync(&*self.state.lock().await)
    }

    #[cfg(test)]
    pub async fn force_prune_tick(&self) {
        self.prune_tick().await;
    }
}

/// Polls `get_job_metadata` until the job reaches a terminal status or
/// `timeout` elapses. Test/diagnostic helper only; production callers read
/// metadata directly.
#[allow(dead_code)]
pub async fn wait_for_terminal(
    queue: &JobQueue,
    namespace: &str,
    key: &str,
    timeout: Duration,
) -> Option<JobMetadata> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(metadata) = queue.get_job_metadata(namespace, key).await {
            if metadata.status.is_terminal() {
                return Some(metadata);
            }
        }
        if Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata_store::TransactionResult;
    use crate::model::{Blob, OperationType};
    use async_trait::async_trait;
    use std::collections::HashMap as StdHashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct FakeMetadataStore {
        rows: StdMutex<StdHashMap<String, JobMetadata>>,
    }

    #[async_trait]
    impl MetadataStore for FakeMetadataStore {
        async fn init(&self) -> Result<(), crate::errors::MetadataStoreError> {
            Ok(())
        }
        async fn select(
            &self,
            path: &str,
        ) -> Result<Option<JobMetadata>, crate::errors::MetadataStoreError> {
            Ok(self.rows.lock().unwrap().get(path).cloned())
        }
        async fn select_by_id(
            &self,
            id: uuid::Uuid,
        ) -> Result<Option<JobMetadata>, crate::errors::MetadataStoreError> {
            Ok(self.rows.lock().unwrap().values().find(|m| m.id == id).cloned())
        }
        async fn insert(
            &self,
            metadata: &JobMetadata,
        ) -> Result<TransactionResult, crate::errors::MetadataStoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(metadata.path.clone(), metadata.clone());
            Ok(TransactionResult::Success)
        }
        async fn update(
            &self,
            metadata: &JobMetadata,
        ) -> Result<TransactionResult, crate::errors::MetadataStoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(metadata.path.clone(), metadata.clone());
            Ok(TransactionResult::Success)
        }
        async fn upsert_by_path(
            &self,
            metadata: &JobMetadata,
        ) -> Result<TransactionResult, crate::errors::MetadataStoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(metadata.path.clone(), metadata.clone());
            Ok(TransactionResult::Success)
        }
        async fn delete(
            &self,
            path: &str,
        ) -> Result<TransactionResult, crate::errors::MetadataStoreError> {
            self.rows.lock().unwrap().remove(path);
            Ok(TransactionResult::Success)
        }
        async fn drop_all(&self) -> Result<(), crate::errors::MetadataStoreError> {
            self.rows.lock().unwrap().clear();
            Ok(())
        }
        async fn close(&self) -> Result<(), crate::errors::MetadataStoreError> {
            Ok(())
        }
    }

    fn test_config(max_jobs: usize, max_pending_jobs: usize) -> QueueConfig {
        QueueConfig {
            max_jobs,
            max_pending_jobs,
            workers: 2,
            blob_max_age: Duration::from_secs(60),
            prune_interval: Duration::from_millis(50),
            database_transaction_retries: 3,
            database_transaction_retry_backoff: Duration::from_millis(1),
        }
    }

    fn new_queue(max_jobs: usize, max_pending_jobs: usize) -> Arc<JobQueue> {
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(FakeMetadataStore::default());
        Arc::new(JobQueue::new(metadata_store, test_config(max_jobs, max_pending_jobs)))
    }

    #[tokio::test]
    async fn happy_upload_then_download_round_trips() {
        let queue = new_queue(2, 2);
        let blob = Blob::new("a", "x", "x.bin", OperationType::Upload);
        let created = queue
            .upload(blob, b"\x01\x02\x03".to_vec())
            .await
            .unwrap();
        assert_eq!(created.status, JobStatus::Creating);

        let done = wait_for_terminal(&queue, "a", "x", Duration::from_secs(2))
            .await
            .expect("job should reach a terminal status");
        assert_eq!(done.status, JobStatus::Done);

        let download_blob = Blob::new("a", "x", "x.bin", OperationType::Download);
        let result = queue.download(download_blob).await.unwrap();
        assert_eq!(result.data, Some(b"\x01\x02\x03".to_vec()));
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn download_of_never_uploaded_path_is_not_found() {
        let queue = new_queue(2, 2);
        let blob = Blob::new("a", "missing", "missing", OperationType::Download);
        let err = queue.download(blob).await.unwrap_err();
        assert_eq!(err.path, "a/missing");
        assert!(queue.get_job_metadata("a", "missing").await.is_err());
    }

    #[tokio::test]
    async fn upload_then_delete_then_download_is_not_found() {
        let queue = new_queue(2, 2);
        let blob = Blob::new("a", "y", "y", OperationType::Upload);
        queue.upload(blob, b"hi".to_vec()).await.unwrap();
        wait_for_terminal(&queue, "a", "y", Duration::from_secs(2))
            .await
            .unwrap();

        let delete_blob = Blob::new("a", "y", "y", OperationType::Delete);
        let deleted = queue.delete(delete_blob).await.unwrap();
        assert_eq!(deleted.status, JobStatus::Done);

        let download_blob = Blob::new("a", "y", "y", OperationType::Download);
        let err = queue.download(download_blob).await.unwrap_err();
        assert_eq!(err.path, "a/y");
    }

    #[tokio::test]
    async fn third_upload_past_capacity_is_rejected() {
        let queue = new_queue(1, 1);
        queue
            .upload(
                Blob::new("a", "one", "one", OperationType::Upload),
                vec![1],
            )
            .await
            .unwrap();
        queue
            .upload(
                Blob::new("a", "two", "two", OperationType::Upload),
                vec![2],
            )
            .await
            .unwrap();
        let err = queue
            .upload(
                Blob::new("a", "three", "three", OperationType::Upload),
                vec![3],
            )
            .await
            .unwrap_err();
        assert_eq!(err.limit, 1);
    }

    #[tokio::test]
    async fn cancel_rejects_unknown_job() {
        let queue = new_queue(2, 2);
        let err = queue.cancel(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, JobQueueError::JobNotFound(_)));
    }

    #[tokio::test]
    async fn pruner_reclaims_terminal_job_and_blob_after_max_age() {
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(FakeMetadataStore::default());
        let config = QueueConfig {
            blob_max_age: Duration::from_millis(1),
            ..test_config(2, 2)
        };
        let queue = Arc::new(JobQueue::new(metadata_store, config));
        let blob = Blob::new("a", "z", "z", OperationType::Upload);
        queue.upload(blob, b"data".to_vec()).await.unwrap();
        wait_for_terminal(&queue, "a", "z", Duration::from_secs(2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        queue.force_prune_tick().await;

        assert!(!queue.blob_store.exists("a/z").await.unwrap());
        let metadata = queue.get_job_metadata("a", "z").await.unwrap();
        assert_eq!(metadata.status, JobStatus::Done);
    }
}
