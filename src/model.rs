use poem_openapi::Enum;
use poem_openapi::Object;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use uuid::Uuid;

/// Joins a namespace and a key into the canonical storage path.
///
/// `path` is the only value `MetadataStore` and `BlobStore` key off of, so every
/// caller that constructs a `Blob` or a `JobMetadata` must go through this.
pub fn join_path(namespace: &str, key: &str) -> String {
    format!("{namespace}/{key}")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum OperationType {
    Upload,
    Download,
    Delete,
    List,
}

impl Display for OperationType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationType::Upload => "upload",
            OperationType::Download => "download",
            OperationType::Delete => "delete",
            OperationType::List => "list",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
#[serde(rename_all = "lowercase")]
#[oai(rename_all = "lowercase")]
pub enum BackupType {
    Disk,
    Aws,
    Gcs,
    Azure,
}

impl Default for BackupType {
    fn default() -> Self {
        BackupType::Disk
    }
}

impl Display for BackupType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            BackupType::Disk => "disk",
            BackupType::Aws => "aws",
            BackupType::Gcs => "gcs",
            BackupType::Azure => "azure",
        };
        write!(f, "{s}")
    }
}

/// The lifecycle of a single `Job`.
///
/// Non-terminal: `Creating | Created | Writing | Reading | Deleting`.
/// Terminal (absorbing): `Done | Failed | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Enum)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[oai(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Creating,
    Created,
    Writing,
    Reading,
    Deleting,
    Done,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed | JobStatus::Cancelled)
    }

    pub fn is_cancellable(&self) -> bool {
        matches!(
            self,
            JobStatus::Creating | JobStatus::Writing | JobStatus::Reading | JobStatus::Deleting
        )
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Creating => "CREATING",
            JobStatus::Created => "CREATED",
            JobStatus::Writing => "WRITING",
            JobStatus::Reading => "READING",
            JobStatus::Deleting => "DELETING",
            JobStatus::Done => "DONE",
            JobStatus::Failed => "FAILED",
            JobStatus::Cancelled => "CANCELLED",
        };
        write!(f, "{s}")
    }
}

/// Request/response envelope that crosses the storage/transport boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct Blob {
    pub key: String,
    pub namespace: String,
    pub filename: String,
    pub path: String,
    pub content_type: String,
    pub operation_type: OperationType,
    pub backup_type: BackupType,
    pub encoding: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[oai(skip_serializing_if_is_none)]
    pub data: Option<Vec<u8>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[oai(skip_serializing_if_is_none)]
    pub error: Option<String>,
}

impl Blob {
    pub fn new(
        namespace: impl Into<String>,
        key: impl Into<String>,
        filename: impl Into<String>,
        operation_type: OperationType,
    ) -> Self {
        let namespace = namespace.into();
        let key = key.into();
        let path = join_path(&namespace, &key);
        Self {
            key,
            namespace,
            filename: filename.into(),
            path,
            content_type: "application/octet-stream".to_string(),
            operation_type,
            backup_type: BackupType::default(),
            encoding: "utf-8".to_string(),
            data: None,
            error: None,
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn with_backup_type(mut self, backup_type: BackupType) -> Self {
        self.backup_type = backup_type;
        self
    }

    pub fn with_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.encoding = encoding.into();
        self
    }
}

/// The durable, per-operation audit row. Keyed by `path`; later writes for the
/// same path overwrite earlier rows (see `MetadataStore::upsert_by_path`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Object)]
#[serde(rename_all = "camelCase")]
#[oai(rename_all = "camelCase")]
pub struct JobMetadata {
    pub id: Uuid,
    pub key: String,
    pub namespace: String,
    pub filename: String,
    pub path: String,
    pub content_type: String,
    pub operation_type: OperationType,
    pub backup_type: BackupType,
    pub encoding: String,
    pub context: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[oai(skip_serializing_if_is_none)]
    pub error: Option<String>,
}

impl JobMetadata {
    pub fn new(id: Uuid, blob: &Blob, status: JobStatus, context: impl Into<String>) -> Self {
        Self {
            id,
            key: blob.key.clone(),
            namespace: blob.namespace.clone(),
            filename: blob.filename.clone(),
            path: blob.path.clone(),
            content_type: blob.content_type.clone(),
            operation_type: blob.operation_type,
            backup_type: blob.backup_type,
            encoding: blob.encoding.clone(),
            context: context.into(),
            status,
            error: None,
        }
    }

    pub fn failed(mut self, context: impl Into<String>, error: impl Into<String>) -> Self {
        self.status = JobStatus::Failed;
        self.context = context.into();
        self.error = Some(error.into());
        self
    }

    pub fn with_status(mut self, status: JobStatus, context: impl Into<String>) -> Self {
        self.status = status;
        self.context = context.into();
        self
    }

    pub fn as_blob(&self) -> Blob {
        Blob {
            key: self.key.clone(),
            namespace: self.namespace.clone(),
            filename: self.filename.clone(),
            path: self.path.clone(),
            content_type: self.content_type.clone(),
            operation_type: self.operation_type,
            backup_type: self.backup_type,
            encoding: self.encoding.clone(),
            data: None,
            error: self.error.clone(),
        }
    }
}
