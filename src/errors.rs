use poem_openapi::Object;
use serde::Serialize;

/// Renders the user-facing half of an error, keeping internals (SQL text,
/// filesystem paths, lock state) out of anything that reaches an HTTP client.
pub trait SafeDisplay {
    fn to_safe_string(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Object)]
pub struct ErrorBody {
    pub error: String,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self { error: message.into() }
    }
}

/// `BlobStore` failure taxonomy (spec §4.1).
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    #[error("store is read-only")]
    ReadOnly,
    #[error("path is locked: {0}")]
    Locked(String),
    #[error("path not found: {0}")]
    NotFound(String),
    #[error("blob store error: {0}")]
    Generic(String),
}

impl SafeDisplay for BlobStoreError {
    fn to_safe_string(&self) -> String {
        match self {
            BlobStoreError::ReadOnly => "store is read-only".to_string(),
            BlobStoreError::Locked(path) => format!("path is locked: {path}"),
            BlobStoreError::NotFound(path) => format!("path not found: {path}"),
            BlobStoreError::Generic(_) => "internal storage error".to_string(),
        }
    }
}

/// Raised when a lookup by path finds nothing, independent of the blob store
/// layer (e.g. metadata-only lookups). Mirrors spec §7's
/// `PathNotFoundException`.
#[derive(Debug, thiserror::Error)]
#[error("path not found: {path}")]
pub struct PathNotFoundError {
    pub path: String,
}

/// Raised by `JobQueue` admission control. Mirrors spec §7's
/// `ServerLimitException`.
#[derive(Debug, thiserror::Error)]
#[error("{message} (limit={limit}, current={current})")]
pub struct ServerLimitError {
    pub message: String,
    pub limit: usize,
    pub current: usize,
}

/// `MetadataStore` failure taxonomy (spec §4.4).
#[derive(Debug, thiserror::Error)]
pub enum MetadataStoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("transaction failed after retries: {0}")]
    RetriesExhausted(String),
}

impl SafeDisplay for MetadataStoreError {
    fn to_safe_string(&self) -> String {
        match self {
            MetadataStoreError::Database(_) => "internal metadata store error".to_string(),
            MetadataStoreError::Migration(_) => "internal metadata store error".to_string(),
            MetadataStoreError::RetriesExhausted(_) => {
                "metadata store unavailable, please retry".to_string()
            }
        }
    }
}

/// Failure connecting the backing pool or running its migrations at startup
/// (spec §6 "relational metadata store"). Kept separate from
/// `MetadataStoreError` since it only ever occurs once, during bootstrap.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    #[error(transparent)]
    Connect(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

/// Top-level error type for the job queue core, uniting the collaborator
/// error kinds behind one enum the HTTP layer converts from.
#[derive(Debug, thiserror::Error)]
pub enum JobQueueError {
    #[error(transparent)]
    BlobStore(#[from] BlobStoreError),
    #[error(transparent)]
    PathNotFound(#[from] PathNotFoundError),
    #[error(transparent)]
    ServerLimit(#[from] ServerLimitError),
    #[error(transparent)]
    MetadataStore(#[from] MetadataStoreError),
    #[error("job {0} not found")]
    JobNotFound(uuid::Uuid),
    #[error("job {0} is not cancellable in status {1}")]
    NotCancellable(uuid::Uuid, crate::model::JobStatus),
}

impl SafeDisplay for JobQueueError {
    fn to_safe_string(&self) -> String {
        match self {
            JobQueueError::BlobStore(e) => e.to_safe_string(),
            JobQueueError::PathNotFound(e) => e.to_string(),
            JobQueueError::ServerLimit(e) => e.to_string(),
            JobQueueError::MetadataStore(e) => e.to_safe_string(),
            JobQueueError::JobNotFound(id) => format!("job {id} not found"),
            JobQueueError::NotCancellable(id, status) => {
                format!("job {id} is not cancellable in status {status}")
            }
        }
    }
}
