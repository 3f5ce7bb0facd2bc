//! A [`DocumentStore`] decorator that injects throttling.
//!
//! Each armed call fails with `TooManyRequests` before reaching the inner
//! store. Used to exercise retry paths against a real backend.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::client::DocumentStore;
use crate::document::{BatchOperation, Document, ETag, PartitionKey};
use crate::error::{StoreError, StoreResult};
use crate::query::{Page, Query};

pub struct ThrottlingStore {
    inner: Arc<dyn DocumentStore>,
    remaining: AtomicU32,
    retry_after: Option<Duration>,
}

impl ThrottlingStore {
    pub fn new(inner: Arc<dyn DocumentStore>, retry_after: Option<Duration>) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(0),
            retry_after,
        }
    }

    /// Fail the next `count` calls (of any kind) with `TooManyRequests`.
    pub fn throttle_next(&self, count: u32) {
        self.remaining.store(count, Ordering::SeqCst);
    }

    /// Throttled calls still pending.
    pub fn pending(&self) -> u32 {
        self.remaining.load(Ordering::SeqCst)
    }

    fn gate(&self, operation: &str) -> StoreResult<()> {
        let armed = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if armed {
            trace!(operation, "injecting throttle");
            return Err(StoreError::TooManyRequests {
                retry_after: self.retry_after,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for ThrottlingStore {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        partition_key_path: &str,
    ) -> StoreResult<bool> {
        self.gate("create_container")?;
        self.inner
            .create_container_if_not_exists(container, partition_key_path)
            .await
    }

    async fn delete_container(&self, container: &str) -> StoreResult<bool> {
        self.gate("delete_container")?;
        self.inner.delete_container(container).await
    }

    async fn read(&self, container: &str, pk: &PartitionKey, id: &str) -> StoreResult<Document> {
        self.gate("read")?;
        self.inner.read(container, pk, id).await
    }

    async fn create(
        &self,
        container: &str,
        pk: &PartitionKey,
        document: Document,
    ) -> StoreResult<Document> {
        self.gate("create")?;
        self.inner.create(container, pk, document).await
    }

    async fn replace(
        &self,
        container: &str,
        pk: &PartitionKey,
        id: &str,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document> {
        self.gate("replace")?;
        self.inner.replace(container, pk, id, document, if_match).await
    }

    async fn upsert(
        &self,
        container: &str,
        pk: &PartitionKey,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document> {
        self.gate("upsert")?;
        self.inner.upsert(container, pk, document, if_match).await
    }

    async fn delete(
        &self,
        container: &str,
        pk: &PartitionKey,
        id: &str,
        if_match: Option<&ETag>,
    ) -> StoreResult<()> {
        self.gate("delete")?;
        self.inner.delete(container, pk, id, if_match).await
    }

    async fn query(
        &self,
        container: &str,
        query: &Query,
        continuation: Option<String>,
    ) -> StoreResult<Page> {
        self.gate("query")?;
        self.inner.query(container, query, continuation).await
    }

    async fn execute_batch(
        &self,
        container: &str,
        pk: &PartitionKey,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<Vec<Option<Document>>> {
        self.gate("batch")?;
        self.inner.execute_batch(container, pk, operations).await
    }
}
