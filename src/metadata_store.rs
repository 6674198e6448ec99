use crate::errors::MetadataStoreError;
use crate::model::JobMetadata;
use async_trait::async_trait;
use std::time::Duration;

/// Outcome of a single `MetadataStore` mutation attempt (spec §4.4,
/// supplemented from `database_transaction_result.py`, see SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionResult {
    Success,
    Retry,
    Failed,
}

/// Durable, SQL-backed persistence for `JobMetadata` rows (spec §4.4).
/// Implementations are written per-dialect (postgres/sqlite/mysql) rather
/// than behind one generic `sqlx::Database` impl — see `src/repo/`.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn init(&self) -> Result<(), MetadataStoreError>;
    async fn select(&self, path: &str) -> Result<Option<JobMetadata>, MetadataStoreError>;
    async fn select_by_id(
        &self,
        id: uuid::Uuid,
    ) -> Result<Option<JobMetadata>, MetadataStoreError>;
    async fn insert(&self, metadata: &JobMetadata) -> Result<TransactionResult, MetadataStoreError>;
    async fn update(&self, metadata: &JobMetadata) -> Result<TransactionResult, MetadataStoreError>;
    async fn upsert_by_path(
        &self,
        metadata: &JobMetadata,
    ) -> Result<TransactionResult, MetadataStoreError>;
    async fn delete(&self, path: &str) -> Result<TransactionResult, MetadataStoreError>;
    async fn drop_all(&self) -> Result<(), MetadataStoreError>;
    async fn close(&self) -> Result<(), MetadataStoreError>;
}

/// Retries a `MetadataStore` mutation up to `retries` times, sleeping
/// `backoff` between attempts, per spec §4.4's
/// `database_transaction_retries` knob. Stops immediately on `Success` or
/// `Failed` (non-retryable); only `Retry` triggers another attempt.
pub async fn with_retries<F, Fut>(
    retries: u32,
    backoff: Duration,
    mut attempt: F,
) -> Result<TransactionResult, MetadataStoreError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<TransactionResult, MetadataStoreError>>,
{
    for attempt_no in 0..=retries {
        match attempt().await? {
            TransactionResult::Success => return Ok(TransactionResult::Success),
            TransactionResult::Failed => return Ok(TransactionResult::Failed),
            TransactionResult::Retry => {
                if attempt_no < retries {
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(MetadataStoreError::RetriesExhausted(format!(
        "exhausted {retries} retries"
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retrying_when_first_attempt_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(TransactionResult::Success) }
        })
        .await
        .unwrap();
        assert_eq!(result, TransactionResult::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries() {
        let result = with_retries(2, Duration::from_millis(1), || async {
            Ok(TransactionResult::Retry)
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn does_not_retry_a_terminal_failure() {
        let calls = AtomicU32::new(0);
        let result = with_retries(3, Duration::from_millis(1), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok(TransactionResult::Failed) }
        })
        .await
        .unwrap();
        assert_eq!(result, TransactionResult::Failed);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
