//! The document store client contract.
//!
//! Everything the membership and reminder tables need from a document
//! database: partition-scoped point operations with optional if-match
//! preconditions, paged queries, and atomic single-partition batches.
//! Backends report throttling, precondition failures, conflicts, missing
//! documents and missing containers as distinct [`StoreError`] variants.
//! Every operation on a container that does not exist fails with
//! `ContainerNotFound`.
//!
//! [`StoreError`]: crate::StoreError

use async_trait::async_trait;

use crate::document::{BatchOperation, Document, ETag, PartitionKey};
use crate::error::StoreResult;
use crate::query::{Page, Query};

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Create a container partitioned by `partition_key_path` (e.g.
    /// `/ClusterId`). Returns true if it was created, false if it
    /// already existed.
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        partition_key_path: &str,
    ) -> StoreResult<bool>;

    /// Drop a container and every document in it. Returns true if it
    /// existed.
    async fn delete_container(&self, container: &str) -> StoreResult<bool>;

    /// Read one document. `NotFound` if absent.
    async fn read(&self, container: &str, pk: &PartitionKey, id: &str) -> StoreResult<Document>;

    /// Create a document. `Conflict` if the id already exists.
    async fn create(&self, container: &str, pk: &PartitionKey, document: Document)
    -> StoreResult<Document>;

    /// Replace an existing document. `NotFound` if absent,
    /// `PreconditionFailed` if `if_match` does not match.
    async fn replace(
        &self,
        container: &str,
        pk: &PartitionKey,
        id: &str,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document>;

    /// Create or replace. `if_match` is only checked when the document
    /// already exists.
    async fn upsert(
        &self,
        container: &str,
        pk: &PartitionKey,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document>;

    /// Delete a document. `NotFound` if absent, `PreconditionFailed` if
    /// `if_match` does not match.
    async fn delete(
        &self,
        container: &str,
        pk: &PartitionKey,
        id: &str,
        if_match: Option<&ETag>,
    ) -> StoreResult<()>;

    /// Fetch one page of results, resuming from `continuation`.
    async fn query(
        &self,
        container: &str,
        query: &Query,
        continuation: Option<String>,
    ) -> StoreResult<Page>;

    /// Apply every operation atomically within one partition. The first
    /// failing operation's error is returned and nothing is applied.
    /// On success returns one entry per operation (`None` for deletes).
    async fn execute_batch(
        &self,
        container: &str,
        pk: &PartitionKey,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<Vec<Option<Document>>>;

    /// Drain every page of a query.
    async fn query_all(&self, container: &str, query: &Query) -> StoreResult<Vec<Document>> {
        let mut documents = Vec::new();
        let mut continuation = None;
        loop {
            let page = self.query(container, query, continuation).await?;
            documents.extend(page.documents);
            match page.continuation {
                Some(token) => continuation = Some(token),
                None => return Ok(documents),
            }
        }
    }
}
