//! RedbDocumentStore: embedded document store backed by redb.
//!
//! Implements [`DocumentStore`] with the same contract a hosted document
//! database offers: per-document etags, if-match preconditions, paged
//! partition-scoped or cross-partition queries, and atomic batches. A
//! batch runs inside one redb write transaction, so either every
//! operation commits or the transaction is aborted. Transactions run on
//! tokio's blocking pool. The store supports both on-disk and in-memory
//! backends (the latter for testing).

use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::client::DocumentStore;
use crate::document::{
    BatchOperation, Document, ETag, PartitionKey, ETAG_FIELD, document_etag, document_id,
    partition_value,
};
use crate::error::{StoreError, StoreResult};
use crate::query::{Page, Query};
use crate::tables::*;

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// Persisted definition of a container.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ContainerMeta {
    partition_key_path: String,
}

/// Cloneable handle to a redb-backed document store.
#[derive(Clone)]
pub struct RedbDocumentStore {
    db: Arc<Database>,
}

impl RedbDocumentStore {
    /// Open the redb file at `path`, creating it if needed.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "document store opened");
        Ok(store)
    }

    /// Store whose contents live only as long as the handle.
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory document store opened");
        Ok(store)
    }

    /// Create the registry tables if they don't exist yet.
    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        txn.open_table(META).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn container_meta_in_write(
        txn: &WriteTransaction,
        container: &str,
    ) -> StoreResult<ContainerMeta> {
        let table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
        let guard = table
            .get(container)
            .map_err(map_err!(Read))?
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))
    }

    // ── Container management ───────────────────────────────────────

    fn create_container_sync(&self, container: &str, partition_key_path: &str) -> StoreResult<bool> {
        if !partition_key_path.starts_with('/') || partition_key_path.len() < 2 {
            return Err(StoreError::BadRequest(format!(
                "partition key path {partition_key_path:?} must look like /Field"
            )));
        }

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let created;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            let exists = table.get(container).map_err(map_err!(Read))?.is_some();
            created = !exists;
            if created {
                let meta = ContainerMeta {
                    partition_key_path: partition_key_path.to_string(),
                };
                let value = serde_json::to_vec(&meta).map_err(map_err!(Serialize))?;
                table
                    .insert(container, value.as_slice())
                    .map_err(map_err!(Write))?;
                let name = documents_table_name(container);
                txn.open_table(documents(&name)).map_err(map_err!(Table))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%container, %partition_key_path, created, "container ensured");
        Ok(created)
    }

    fn delete_container_sync(&self, container: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            existed = table.remove(container).map_err(map_err!(Write))?.is_some();
        }
        let name = documents_table_name(container);
        txn.delete_table(documents(&name)).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%container, existed, "container deleted");
        Ok(existed)
    }

    // ── Reads ──────────────────────────────────────────────────────

    fn read_sync(&self, container: &str, pk: &PartitionKey, id: &str) -> StoreResult<Document> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        {
            let registry = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            if registry.get(container).map_err(map_err!(Read))?.is_none() {
                return Err(StoreError::ContainerNotFound(container.to_string()));
            }
        }
        let name = documents_table_name(container);
        let table = txn.open_table(documents(&name)).map_err(map_err!(Table))?;
        let key = document_key(pk.as_str(), id);
        load(&table, &key)?.ok_or_else(|| StoreError::NotFound(format!("{container}/{pk}/{id}")))
    }

    fn query_sync(
        &self,
        container: &str,
        query: &Query,
        continuation: Option<String>,
    ) -> StoreResult<Page> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        {
            let registry = txn.open_table(CONTAINERS).map_err(map_err!(Table))?;
            if registry.get(container).map_err(map_err!(Read))?.is_none() {
                return Err(StoreError::ContainerNotFound(container.to_string()));
            }
        }
        let name = documents_table_name(container);
        let table = txn.open_table(documents(&name)).map_err(map_err!(Table))?;

        let prefix = query.partition.as_ref().map(|pk| partition_prefix(pk.as_str()));
        let resume = continuation.map(|token| decode_continuation(&token)).transpose()?;
        let start = match (&resume, &prefix) {
            (Some(key), _) => Bound::Excluded(key.as_str()),
            (None, Some(prefix)) => Bound::Included(prefix.as_str()),
            (None, None) => Bound::Unbounded,
        };

        let mut page = Page::default();
        for entry in table
            .range::<&str>((start, Bound::Unbounded))
            .map_err(map_err!(Read))?
        {
            let (key, value) = entry.map_err(map_err!(Read))?;
            let key = key.value();
            if let Some(prefix) = &prefix {
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
            }
            let doc: Document = serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            if query.filter.matches(&doc) {
                page.documents.push(doc);
                if page.documents.len() >= query.page_size {
                    page.continuation = Some(hex::encode(key.as_bytes()));
                    break;
                }
            }
        }

        debug!(%container, partition = ?query.partition, returned = page.documents.len(), more = page.has_more(), "query page");
        Ok(page)
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Run `operations` in one write transaction; commit only if every
    /// operation succeeds.
    fn write_sync(
        &self,
        container: &str,
        pk: &PartitionKey,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<Vec<Option<Document>>> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        match apply_all(&txn, container, pk, operations) {
            Ok(results) => {
                txn.commit().map_err(map_err!(Transaction))?;
                Ok(results)
            }
            Err(e) => {
                txn.abort().map_err(map_err!(Transaction))?;
                debug!(%container, %pk, error = %e, "write rolled back");
                Err(e)
            }
        }
    }

    async fn write_one(
        &self,
        container: &str,
        pk: &PartitionKey,
        operation: BatchOperation,
    ) -> StoreResult<Option<Document>> {
        let (container, pk) = (container.to_string(), pk.clone());
        let mut results = self
            .blocking(move |store| store.write_sync(&container, &pk, vec![operation]))
            .await?;
        Ok(results.pop().flatten())
    }
}

fn apply_all(
    txn: &WriteTransaction,
    container: &str,
    pk: &PartitionKey,
    operations: Vec<BatchOperation>,
) -> StoreResult<Vec<Option<Document>>> {
    let meta = RedbDocumentStore::container_meta_in_write(txn, container)?;
    let mut counters = txn.open_table(META).map_err(map_err!(Table))?;
    let mut sequence = counters
        .get(ETAG_SEQUENCE)
        .map_err(map_err!(Read))?
        .map(|guard| guard.value())
        .unwrap_or(0);

    let name = documents_table_name(container);
    let mut table = txn.open_table(documents(&name)).map_err(map_err!(Table))?;

    let mut results = Vec::with_capacity(operations.len());
    for operation in operations {
        let result = apply(
            &mut table,
            container,
            pk,
            &meta.partition_key_path,
            operation,
            &mut sequence,
        )?;
        results.push(result);
    }

    counters
        .insert(ETAG_SEQUENCE, sequence)
        .map_err(map_err!(Write))?;
    Ok(results)
}

fn apply(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    container: &str,
    pk: &PartitionKey,
    partition_key_path: &str,
    operation: BatchOperation,
    sequence: &mut u64,
) -> StoreResult<Option<Document>> {
    match operation {
        BatchOperation::Create { document } => {
            check_partition(&document, pk, partition_key_path)?;
            let key = document_key(pk.as_str(), document_id(&document)?);
            if load(table, &key)?.is_some() {
                return Err(StoreError::Conflict(format!("{container}/{pk}/{}", document_id(&document)?)));
            }
            stamp_and_store(table, container, &key, document, sequence).map(Some)
        }
        BatchOperation::Replace {
            id,
            document,
            if_match,
        } => {
            check_partition(&document, pk, partition_key_path)?;
            if document_id(&document)? != id {
                return Err(StoreError::BadRequest(format!(
                    "replace of {id} carries a different document id"
                )));
            }
            let key = document_key(pk.as_str(), &id);
            let existing = load(table, &key)?
                .ok_or_else(|| StoreError::NotFound(format!("{container}/{pk}/{id}")))?;
            check_etag(&existing, if_match.as_ref(), container, &id)?;
            stamp_and_store(table, container, &key, document, sequence).map(Some)
        }
        BatchOperation::Upsert { document, if_match } => {
            check_partition(&document, pk, partition_key_path)?;
            let id = document_id(&document)?.to_string();
            let key = document_key(pk.as_str(), &id);
            if let Some(existing) = load(table, &key)? {
                check_etag(&existing, if_match.as_ref(), container, &id)?;
            }
            stamp_and_store(table, container, &key, document, sequence).map(Some)
        }
        BatchOperation::Delete { id, if_match } => {
            let key = document_key(pk.as_str(), &id);
            let existing = load(table, &key)?
                .ok_or_else(|| StoreError::NotFound(format!("{container}/{pk}/{id}")))?;
            check_etag(&existing, if_match.as_ref(), container, &id)?;
            table.remove(key.as_str()).map_err(map_err!(Write))?;
            Ok(None)
        }
    }
}

fn load<T>(table: &T, key: &str) -> StoreResult<Option<Document>>
where
    T: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key).map_err(map_err!(Read))? {
        Some(guard) => {
            let doc = serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
            Ok(Some(doc))
        }
        None => Ok(None),
    }
}

fn check_partition(document: &Document, pk: &PartitionKey, path: &str) -> StoreResult<()> {
    match partition_value(document, path) {
        Some(value) if value == pk.as_str() => Ok(()),
        other => Err(StoreError::BadRequest(format!(
            "document partition {other:?} at {path} does not match {pk}"
        ))),
    }
}

fn check_etag(
    existing: &Document,
    if_match: Option<&ETag>,
    container: &str,
    id: &str,
) -> StoreResult<()> {
    match if_match {
        Some(expected) if document_etag(existing).as_ref() != Some(expected) => Err(
            StoreError::PreconditionFailed(format!("{container}/{id} etag is not {expected}")),
        ),
        _ => Ok(()),
    }
}

/// Assign a fresh etag and persist. Returns the stored document.
fn stamp_and_store(
    table: &mut redb::Table<'_, &'static str, &'static [u8]>,
    container: &str,
    key: &str,
    mut document: Document,
    sequence: &mut u64,
) -> StoreResult<Document> {
    let object = document
        .as_object_mut()
        .ok_or_else(|| StoreError::BadRequest("document is not a JSON object".into()))?;
    object.remove(ETAG_FIELD);

    *sequence += 1;
    let body = serde_json::to_vec(&*object).map_err(map_err!(Serialize))?;
    let etag = compute_etag(container, key, *sequence, &body);
    object.insert(ETAG_FIELD.to_string(), Value::String(etag));

    let value = serde_json::to_vec(&document).map_err(map_err!(Serialize))?;
    table
        .insert(key, value.as_slice())
        .map_err(map_err!(Write))?;
    Ok(document)
}

fn compute_etag(container: &str, key: &str, sequence: u64, body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(container.as_bytes());
    hasher.update(key.as_bytes());
    hasher.update(sequence.to_be_bytes());
    hasher.update(body);
    let digest = hasher.finalize();
    format!("\"{}\"", hex::encode(&digest[..8]))
}

fn decode_continuation(token: &str) -> StoreResult<String> {
    hex::decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(|| StoreError::BadRequest("malformed continuation token".into()))
}

impl RedbDocumentStore {
    /// Run a redb transaction on the blocking pool so commits and fsyncs
    /// never stall a runtime worker.
    async fn blocking<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(RedbDocumentStore) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || f(store))
            .await
            .map_err(map_err!(Task))?
    }
}

#[async_trait]
impl DocumentStore for RedbDocumentStore {
    async fn create_container_if_not_exists(
        &self,
        container: &str,
        partition_key_path: &str,
    ) -> StoreResult<bool> {
        let container = container.to_string();
        let path = partition_key_path.to_string();
        self.blocking(move |store| store.create_container_sync(&container, &path))
            .await
    }

    async fn delete_container(&self, container: &str) -> StoreResult<bool> {
        let container = container.to_string();
        self.blocking(move |store| store.delete_container_sync(&container))
            .await
    }

    async fn read(&self, container: &str, pk: &PartitionKey, id: &str) -> StoreResult<Document> {
        let (container, pk, id) = (container.to_string(), pk.clone(), id.to_string());
        self.blocking(move |store| store.read_sync(&container, &pk, &id))
            .await
    }

    async fn create(
        &self,
        container: &str,
        pk: &PartitionKey,
        document: Document,
    ) -> StoreResult<Document> {
        self.write_one(container, pk, BatchOperation::create(document))
            .await?
            .ok_or_else(|| StoreError::Write("create returned no document".into()))
    }

    async fn replace(
        &self,
        container: &str,
        pk: &PartitionKey,
        id: &str,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document> {
        self.write_one(container, pk, BatchOperation::replace(id, document, if_match.cloned()))
            .await?
            .ok_or_else(|| StoreError::Write("replace returned no document".into()))
    }

    async fn upsert(
        &self,
        container: &str,
        pk: &PartitionKey,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document> {
        self.write_one(container, pk, BatchOperation::upsert(document, if_match.cloned()))
            .await?
            .ok_or_else(|| StoreError::Write("upsert returned no document".into()))
    }

    async fn delete(
        &self,
        container: &str,
        pk: &PartitionKey,
        id: &str,
        if_match: Option<&ETag>,
    ) -> StoreResult<()> {
        self.write_one(container, pk, BatchOperation::delete(id, if_match.cloned()))
            .await?;
        Ok(())
    }

    async fn query(
        &self,
        container: &str,
        query: &Query,
        continuation: Option<String>,
    ) -> StoreResult<Page> {
        let (container, query) = (container.to_string(), query.clone());
        self.blocking(move |store| store.query_sync(&container, &query, continuation))
            .await
    }

    async fn execute_batch(
        &self,
        container: &str,
        pk: &PartitionKey,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<Vec<Option<Document>>> {
        if operations.is_empty() {
            return Ok(Vec::new());
        }
        let count = operations.len();
        let (owned_container, owned_pk) = (container.to_string(), pk.clone());
        let results = self
            .blocking(move |store| store.write_sync(&owned_container, &owned_pk, operations))
            .await?;
        debug!(%container, %pk, count, "batch committed");
        Ok(results)
    }
}
