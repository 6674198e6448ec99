use super::{status_str, BlobRow};
use crate::errors::MetadataStoreError;
use crate::metadata_store::{MetadataStore, TransactionResult};
use crate::model::JobMetadata;
use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

pub struct DbMetadataRepo {
    pool: Pool<Postgres>,
}

impl DbMetadataRepo {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

fn row_to_blob_row(row: &sqlx::postgres::PgRow) -> BlobRow {
    BlobRow {
        id: row.get("id"),
        key: row.get("key"),
        namespace: row.get("namespace"),
        filename: row.get("filename"),
        path: row.get("path"),
        content_type: row.get("content_type"),
        operation_type: row.get("operation_type"),
        backup_type: row.get("backup_type"),
        encoding: row.get("encoding"),
        context: row.get("context"),
        status: row.get("status"),
        error: row.get("error"),
    }
}

#[async_trait]
impl MetadataStore for DbMetadataRepo {
    async fn init(&self) -> Result<(), MetadataStoreError> {
        Ok(())
    }

    async fn select(&self, path: &str) -> Result<Option<JobMetadata>, MetadataStoreError> {
        let row = sqlx::query("SELECT * FROM blobs WHERE path = $1")
            .bind(path)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(
                JobMetadata::try_from(row_to_blob_row(&row)).map_err(MetadataStoreError::Database)?,
            )),
            None => Ok(None),
        }
    }

    async fn select_by_id(
        &self,
        id: uuid::Uuid,
    ) -> Result<Option<JobMetadata>, MetadataStoreError> {
        let row = sqlx::query("SELECT * FROM blobs WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(
                JobMetadata::try_from(row_to_blob_row(&row)).map_err(MetadataStoreError::Database)?,
            )),
            None => Ok(None),
        }
    }

    async fn insert(&self, metadata: &JobMetadata) -> Result<TransactionResult, MetadataStoreError> {
        let result = sqlx::query(
            "INSERT INTO blobs (id, key, namespace, filename, path, content_type, operation_type, backup_type, encoding, context, status, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (path) DO NOTHING",
        )
        .bind(metadata.id.to_string())
        .bind(&metadata.key)
        .bind(&metadata.namespace)
        .bind(&metadata.filename)
        .bind(&metadata.path)
        .bind(&metadata.content_type)
        .bind(metadata.operation_type.to_string())
        .bind(metadata.backup_type.to_string())
        .bind(&metadata.encoding)
        .bind(&metadata.context)
        .bind(status_str(metadata.status))
        .bind(&metadata.error)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(TransactionResult::Retry);
        }
        Ok(TransactionResult::Success)
    }

    async fn update(&self, metadata: &JobMetadata) -> Result<TransactionResult, MetadataStoreError> {
        let result = sqlx::query(
            "UPDATE blobs SET status = $1, context = $2, error = $3 WHERE id = $4",
        )
        .bind(status_str(metadata.status))
        .bind(&metadata.context)
        .bind(&metadata.error)
        .bind(metadata.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(TransactionResult::Failed);
        }
        Ok(TransactionResult::Success)
    }

    async fn upsert_by_path(
        &self,
        metadata: &JobMetadata,
    ) -> Result<TransactionResult, MetadataStoreError> {
        sqlx::query(
            "INSERT INTO blobs (id, key, namespace, filename, path, content_type, operation_type, backup_type, encoding, context, status, error)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
             ON CONFLICT (path) DO UPDATE SET
               id = EXCLUDED.id,
               filename = EXCLUDED.filename,
               content_type = EXCLUDED.content_type,
               operation_type = EXCLUDED.operation_type,
               backup_type = EXCLUDED.backup_type,
               encoding = EXCLUDED.encoding,
               context = EXCLUDED.context,
               status = EXCLUDED.status,
               error = EXCLUDED.error",
        )
        .bind(metadata.id.to_string())
        .bind(&metadata.key)
        .bind(&metadata.namespace)
        .bind(&metadata.filename)
        .bind(&metadata.path)
        .bind(&metadata.content_type)
        .bind(metadata.operation_type.to_string())
        .bind(metadata.backup_type.to_string())
        .bind(&metadata.encoding)
        .bind(&metadata.context)
        .bind(status_str(metadata.status))
        .bind(&metadata.error)
        .execute(&self.pool)
        .await?;
        Ok(TransactionResult::Success)
    }

    async fn delete(&self, path: &str) -> Result<TransactionResult, MetadataStoreError> {
        let result = sqlx::query("DELETE FROM blobs WHERE path = $1")
            .bind(path)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Ok(TransactionResult::Failed);
        }
        Ok(TransactionResult::Success)
    }

    async fn drop_all(&self) -> Result<(), MetadataStoreError> {
        sqlx::query("DELETE FROM blobs").execute(&self.pool).await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), MetadataStoreError> {
        self.pool.close().await;
        Ok(())
    }
}
