mod mysql;
mod postgres;
mod sqlite;

pub use mysql::DbMetadataRepo as MysqlMetadataRepo;
pub use postgres::DbMetadataRepo as PostgresMetadataRepo;
pub use sqlite::DbMetadataRepo as SqliteMetadataRepo;

use crate::model::{BackupType, JobMetadata, JobStatus, OperationType};

/// Row shape shared by all three dialects' `blobs` table (spec §6 persisted
/// schema). Each dialect module owns its own `sqlx::FromRow` mapping since
/// the underlying column types differ (e.g. Postgres booleans vs SQLite
/// integers), but they all convert through this struct.
pub(crate) struct BlobRow {
    pub id: String,
    pub key: String,
    pub namespace: String,
    pub filename: String,
    pub path: String,
    pub content_type: String,
    pub operation_type: String,
    pub backup_type: String,
    pub encoding: String,
    pub context: String,
    pub status: String,
    pub error: Option<String>,
}

impl TryFrom<BlobRow> for JobMetadata {
    type Error = sqlx::Error;

    fn try_from(row: BlobRow) -> Result<Self, Self::Error> {
        let id = uuid::Uuid::parse_str(&row.id)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        let operation_type = parse_operation_type(&row.operation_type)?;
        let backup_type = parse_backup_type(&row.backup_type)?;
        let status = parse_status(&row.status)?;
        Ok(JobMetadata {
            id,
            key: row.key,
            namespace: row.namespace,
            filename: row.filename,
            path: row.path,
            content_type: row.content_type,
            operation_type,
            backup_type,
            encoding: row.encoding,
            context: row.context,
            status,
            error: row.error,
        })
    }
}

fn parse_operation_type(value: &str) -> Result<OperationType, sqlx::Error> {
    match value {
        "upload" => Ok(OperationType::Upload),
        "download" => Ok(OperationType::Download),
        "delete" => Ok(OperationType::Delete),
        "list" => Ok(OperationType::List),
        other => Err(sqlx::Error::Decode(
            format!("unknown operation_type: {other}").into(),
        )),
    }
}

fn parse_backup_type(value: &str) -> Result<BackupType, sqlx::Error> {
    match value {
        "disk" => Ok(BackupType::Disk),
        "aws" => Ok(BackupType::Aws),
        "gcs" => Ok(BackupType::Gcs),
        "azure" => Ok(BackupType::Azure),
        other => Err(sqlx::Error::Decode(format!("unknown backup_type: {other}").into())),
    }
}

fn parse_status(value: &str) -> Result<JobStatus, sqlx::Error> {
    match value {
        "CREATING" => Ok(JobStatus::Creating),
        "CREATED" => Ok(JobStatus::Created),
        "WRITING" => Ok(JobStatus::Writing),
        "READING" => Ok(JobStatus::Reading),
        "DELETING" => Ok(JobStatus::Deleting),
        "DONE" => Ok(JobStatus::Done),
        "FAILED" => Ok(JobStatus::Failed),
        "CANCELLED" => Ok(JobStatus::Cancelled),
        other => Err(sqlx::Error::Decode(format!("unknown status: {other}").into())),
    }
}

pub(crate) fn status_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Creating => "CREATING",
        JobStatus::Created => "CREATED",
        JobStatus::Writing => "WRITING",
        JobStatus::Reading => "READING",
        JobStatus::Deleting => "DELETING",
        JobStatus::Done => "DONE",
        JobStatus::Failed => "FAILED",
        JobStatus::Cancelled => "CANCELLED",
    }
}
