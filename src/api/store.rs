use crate::api::ApiTags;
use crate::errors::{ErrorBody, PathNotFoundError, SafeDisplay, ServerLimitError};
use crate::job_queue::JobQueue;
use crate::model::{BackupType, Blob, JobMetadata, OperationType};
use poem_openapi::param::{Path, Query};
use poem_openapi::payload::{Binary, Json};
use poem_openapi::types::multipart::Upload;
use poem_openapi::{ApiResponse, Multipart, OpenApi};
use std::sync::Arc;

#[derive(Multipart)]
pub struct UploadPayload {
    blob: Upload,
}

#[derive(Debug, ApiResponse)]
pub enum UploadResponse {
    #[oai(status = 202)]
    Accepted(Json<JobMetadata>),
    #[oai(status = 400)]
    CreationFailed(Json<JobMetadata>),
    #[oai(status = 429)]
    LimitReached(Json<ErrorBody>),
}

#[derive(Debug, ApiResponse)]
pub enum DownloadResponse {
    #[oai(status = 200)]
    Found(
        Binary<Vec<u8>>,
        #[oai(header = "Content-Type")] String,
        #[oai(header = "Content-Disposition")] String,
    ),
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
}

#[derive(Debug, ApiResponse)]
pub enum DeleteResponse {
    #[oai(status = 200)]
    Done(Json<JobMetadata>),
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
}

#[derive(Debug, ApiResponse)]
pub enum MetadataResponse {
    #[oai(status = 200)]
    Found(Json<JobMetadata>),
    #[oai(status = 404)]
    NotFound(Json<ErrorBody>),
}

impl From<PathNotFoundError> for MetadataResponse {
    fn from(err: PathNotFoundError) -> Self {
        MetadataResponse::NotFound(Json(ErrorBody::new(err.to_string())))
    }
}

impl From<PathNotFoundError> for DownloadResponse {
    fn from(err: PathNotFoundError) -> Self {
        DownloadResponse::NotFound(Json(ErrorBody::new(err.to_string())))
    }
}

impl From<PathNotFoundError> for DeleteResponse {
    fn from(err: PathNotFoundError) -> Self {
        DeleteResponse::NotFound(Json(ErrorBody::new(err.to_string())))
    }
}

impl From<ServerLimitError> for UploadResponse {
    fn from(err: ServerLimitError) -> Self {
        UploadResponse::LimitReached(Json(ErrorBody::new(err.to_safe_string())))
    }
}

pub struct StoreApi {
    pub queue: Arc<JobQueue>,
}

#[OpenApi(prefix_path = "/store", tag = ApiTags::Store)]
impl StoreApi {
    /// Uploads a blob to `(namespace, key)` (spec §6 `PUT
    /// /store/put/{namespace}/{key}`). Admission-controlled: returns `202`
    /// with the `CREATING` metadata row on acceptance, `429` when both the
    /// running and pending queues are full, `400` when the job's initial
    /// metadata write itself fails.
    #[oai(path = "/put/:namespace/:key", method = "put", operation_id = "upload_blob")]
    async fn put(
        &self,
        namespace: Path<String>,
        key: Path<String>,
        payload: UploadPayload,
        persist: Query<Option<BackupType>>,
        encoding: Query<Option<String>>,
        mime_type: Query<Option<String>>,
    ) -> poem::Result<UploadResponse> {
        let filename = payload
            .blob
            .file_name()
            .map(str::to_string)
            .unwrap_or_else(|| key.0.clone());
        let content_type = mime_type
            .0
            .or_else(|| payload.blob.content_type().map(str::to_string));
        let data = payload.blob.into_vec().await?;

        let mut blob = Blob::new(namespace.0, key.0, filename, OperationType::Upload);
        if let Some(content_type) = content_type {
            blob = blob.with_content_type(content_type);
        }
        if let Some(backup_type) = persist.0 {
            blob = blob.with_backup_type(backup_type);
        }
        if let Some(encoding) = encoding.0 {
            blob = blob.with_encoding(encoding);
        }

        match self.queue.upload(blob, data).await {
            Ok(metadata) if metadata.status == crate::model::JobStatus::Failed => {
                Ok(UploadResponse::CreationFailed(Json(metadata)))
            }
            Ok(metadata) => Ok(UploadResponse::Accepted(Json(metadata))),
            Err(e) => Ok(e.into()),
        }
    }

    /// Downloads the bytes stored at `(namespace, key)` (spec §6 `GET
    /// /store/get/{namespace}/{key}`). Recovers the stored filename/content
    /// type via `get_blob_metadata` first, matching the original's
    /// `download_blob` (`examples/original_source`), so the response carries
    /// what was actually uploaded rather than blank defaults.
    #[oai(path = "/get/:namespace/:key", method = "get", operation_id = "download_blob")]
    async fn get(&self, namespace: Path<String>, key: Path<String>) -> DownloadResponse {
        let blob = match self
            .queue
            .get_blob_metadata(&namespace.0, &key.0, OperationType::Download)
            .await
        {
            Ok(blob) => blob,
            Err(e) => return e.into(),
        };
        match self.queue.download(blob).await {
            Ok(result) => {
                if let Some(error) = result.error {
                    return DownloadResponse::NotFound(Json(ErrorBody::new(error)));
                }
                let disposition = format!("attachment; filename=\"{}\"", result.filename);
                DownloadResponse::Found(
                    Binary(result.data.unwrap_or_default()),
                    result.content_type,
                    disposition,
                )
            }
            Err(e) => e.into(),
        }
    }

    /// Deletes the blob stored at `(namespace, key)` (spec §6 `DELETE
    /// /store/delete/{namespace}/{key}`: `404` on absent path or operational
    /// failure). Creates an audit job record but, per spec §9, is not
    /// subject to upload admission limits. Recovers the stored filename/
    /// content type via `get_blob_metadata` first, matching the original's
    /// `delete_blob`, so the audit row this writes doesn't blank those
    /// fields out.
    #[oai(path = "/delete/:namespace/:key", method = "delete", operation_id = "delete_blob")]
    async fn delete(&self, namespace: Path<String>, key: Path<String>) -> DeleteResponse {
        let blob = match self
            .queue
            .get_blob_metadata(&namespace.0, &key.0, OperationType::Delete)
            .await
        {
            Ok(blob) => blob,
            Err(e) => return e.into(),
        };
        match self.queue.delete(blob).await {
            Ok(metadata) if metadata.status == crate::model::JobStatus::Failed => {
                let message = metadata.error.clone().unwrap_or_else(|| "delete failed".to_string());
                DeleteResponse::NotFound(Json(ErrorBody::new(message)))
            }
            Ok(metadata) => DeleteResponse::Done(Json(metadata)),
            Err(e) => e.into(),
        }
    }

    /// Fetches the persisted `JobMetadata` row for `(namespace, key)` (spec
    /// §6 `GET /store/metadata/get/{namespace}/{key}`).
    #[oai(
        path = "/metadata/get/:namespace/:key",
        method = "get",
        operation_id = "get_blob_metadata"
    )]
    async fn metadata(&self, namespace: Path<String>, key: Path<String>) -> MetadataResponse {
        match self.queue.get_job_metadata(&namespace.0, &key.0).await {
            Ok(metadata) => MetadataResponse::Found(Json(metadata)),
            Err(e) => e.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::errors::MetadataStoreError;
    use crate::metadata_store::{MetadataStore, TransactionResult};
    use async_trait::async_trait;
    use poem::http::StatusCode;
    use poem::test::TestClient;
    use poem_openapi::OpenApiService;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeMetadataStore {
        rows: StdMutex<HashMap<String, JobMetadata>>,
    }

    #[async_trait]
    impl MetadataStore for FakeMetadataStore {
        async fn init(&self) -> Result<(), MetadataStoreError> {
            Ok(())
        }
        async fn select(&self, path: &str) -> Result<Option<JobMetadata>, MetadataStoreError> {
            Ok(self.rows.lock().unwrap().get(path).cloned())
        }
        async fn select_by_id(
            &self,
            id: uuid::Uuid,
        ) -> Result<Option<JobMetadata>, MetadataStoreError> {
            Ok(self.rows.lock().unwrap().values().find(|m| m.id == id).cloned())
        }
        async fn insert(
            &self,
            metadata: &JobMetadata,
        ) -> Result<TransactionResult, MetadataStoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(metadata.path.clone(), metadata.clone());
            Ok(TransactionResult::Success)
        }
        async fn update(
            &self,
            metadata: &JobMetadata,
        ) -> Result<TransactionResult, MetadataStoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(metadata.path.clone(), metadata.clone());
            Ok(TransactionResult::Success)
        }
        async fn upsert_by_path(
            &self,
            metadata: &JobMetadata,
        ) -> Result<TransactionResult, MetadataStoreError> {
            self.rows
                .lock()
                .unwrap()
                .insert(metadata.path.clone(), metadata.clone());
            Ok(TransactionResult::Success)
        }
        async fn delete(&self, path: &str) -> Result<TransactionResult, MetadataStoreError> {
            self.rows.lock().unwrap().remove(path);
            Ok(TransactionResult::Success)
        }
        async fn drop_all(&self) -> Result<(), MetadataStoreError> {
            self.rows.lock().unwrap().clear();
            Ok(())
        }
        async fn close(&self) -> Result<(), MetadataStoreError> {
            Ok(())
        }
    }

    fn test_config() -> QueueConfig {
        QueueConfig {
            max_jobs: 4,
            max_pending_jobs: 4,
            workers: 2,
            blob_max_age: Duration::from_secs(60),
            prune_interval: Duration::from_millis(50),
            database_transaction_retries: 3,
            database_transaction_retry_backoff: Duration::from_millis(1),
        }
    }

    fn test_client() -> (TestClient<poem::Route>, Arc<JobQueue>) {
        let metadata_store: Arc<dyn MetadataStore> = Arc::new(FakeMetadataStore::default());
        let queue = Arc::new(JobQueue::new(metadata_store, test_config()));
        let api_service = OpenApiService::new(
            StoreApi { queue: queue.clone() },
            "blob service API",
            "test",
        );
        let route = poem::Route::new().nest("/", api_service);
        (TestClient::new(route), queue)
    }

    /// Builds a raw `multipart/form-data` body for the `blob` field, the
    /// wire format the `put` handler's `Upload` extractor parses (spec §6
    /// `PUT /store/put/{namespace}/{key}`).
    fn multipart_body(boundary: &str, filename: &str, data: &[u8]) -> Vec<u8> {
        let mut body = format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"blob\"; filename=\"{filename}\"\r\nContent-Type: application/octet-stream\r\n\r\n"
        )
        .into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
        body
    }

    async fn upload_and_wait(
        client: &TestClient<poem::Route>,
        queue: &JobQueue,
        namespace: &str,
        key: &str,
        filename: &str,
        data: &[u8],
    ) {
        let boundary = "X-TEST-BOUNDARY";
        let resp = client
            .put(format!("/store/put/{namespace}/{key}"))
            .header(
                "Content-Type",
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(multipart_body(boundary, filename, data))
            .send()
            .await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::ACCEPTED.as_u16());

        crate::job_queue::wait_for_terminal(queue, namespace, key, Duration::from_secs(2))
            .await
            .expect("upload should reach a terminal status");
    }

    #[tokio::test]
    async fn upload_then_download_returns_stored_filename_and_bytes() {
        let (client, queue) = test_client();
        upload_and_wait(&client, &queue, "a", "x", "hello.txt", b"hello world").await;

        let resp = client.get("/store/get/a/x").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::OK.as_u16());
        assert_eq!(
            resp.0
                .headers()
                .get("content-disposition")
                .and_then(|v| v.to_str().ok()),
            Some("attachment; filename=\"hello.txt\"")
        );
        let body = resp.0.into_body().into_bytes().await.unwrap();
        assert_eq!(body.as_ref(), b"hello world");
    }

    #[tokio::test]
    async fn download_of_missing_path_is_not_found() {
        let (client, _queue) = test_client();
        let resp = client.get("/store/get/a/missing").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::NOT_FOUND.as_u16());
    }

    #[tokio::test]
    async fn delete_then_metadata_preserves_filename_and_reports_done() {
        let (client, queue) = test_client();
        upload_and_wait(&client, &queue, "a", "y", "keep.bin", b"data").await;

        let resp = client.delete("/store/delete/a/y").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::OK.as_u16());
        let body = resp.0.into_body().into_bytes().await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"filename\":\"keep.bin\""));
        assert!(text.contains("\"status\":\"DONE\""));

        let resp = client.get("/store/metadata/get/a/y").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::OK.as_u16());
        let body = resp.0.into_body().into_bytes().await.unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("\"filename\":\"keep.bin\""));

        let resp = client.get("/store/get/a/y").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::NOT_FOUND.as_u16());
    }

    #[tokio::test]
    async fn metadata_of_missing_path_is_not_found() {
        let (client, _queue) = test_client();
        let resp = client.get("/store/metadata/get/a/missing").send().await;
        assert_eq!(resp.0.status().as_u16(), StatusCode::NOT_FOUND.as_u16());
    }
}
