//! Membership table: cluster members and the table version.
//!
//! Every mutation of cluster membership shape (insert, update) runs as an
//! atomic single-partition batch that also replaces the version document
//! conditioned on the caller's version etag. That conditional write is
//! the only linearization point: of two writers starting from the same
//! version, at most one commits. Losing a race is reported as `false`,
//! never as an error, so the caller's read-and-retry loop (see
//! [`crate::OptimisticRetry`]) can treat it as ordinary control flow.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::try_join_all;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use tablegrid_core::config::MembershipConfig;
use tablegrid_core::{MembershipEntry, MembershipTableData, SiloAddress, SiloStatus, TableVersion};
use tablegrid_store::{
    BatchOperation, DocumentStore, ETag, Filter, PartitionKey, Query, StoreError, document_etag,
    execute_with_retries, query_all_with_retries,
};

use crate::entity::*;
use crate::error::{ClusteringError, ClusteringResult};

/// Attempts of the heartbeat read-patch-replace loop.
const I_AM_ALIVE_MAX_ATTEMPTS: u32 = 3;

/// Membership table of one cluster.
#[derive(Clone)]
pub struct MembershipTable {
    store: Arc<dyn DocumentStore>,
    cluster_id: String,
    partition: PartitionKey,
    options: MembershipConfig,
}

impl MembershipTable {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cluster_id: impl Into<String>,
        options: MembershipConfig,
    ) -> Self {
        let cluster_id = cluster_id.into();
        Self {
            store,
            partition: PartitionKey::new(cluster_id.clone()),
            cluster_id,
            options,
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    fn collection(&self) -> &str {
        &self.options.collection
    }

    // ── Initialization ─────────────────────────────────────────────

    /// Ensure the cluster container exists and, with `try_init_version`,
    /// that the version document exists (created at version 0).
    ///
    /// Safe to call from every silo concurrently: losing the creation race
    /// just re-reads the winner's document.
    pub async fn initialize(&self, try_init_version: bool) -> ClusteringResult<()> {
        let started = std::time::Instant::now();
        let result = self.initialize_inner(try_init_version).await;
        match &result {
            Ok(()) => info!(
                cluster_id = %self.cluster_id,
                collection = %self.collection(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "membership table initialized"
            ),
            Err(e) => error!(
                cluster_id = %self.cluster_id,
                collection = %self.collection(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                error = %e,
                "membership table initialization failed"
            ),
        }
        result
    }

    /// [`initialize`](Self::initialize), abandoned with `Cancelled` once
    /// `shutdown` flips to true.
    pub async fn initialize_with_shutdown(
        &self,
        try_init_version: bool,
        mut shutdown: watch::Receiver<bool>,
    ) -> ClusteringResult<()> {
        if *shutdown.borrow() {
            return Err(ClusteringError::Cancelled("membership initialization".into()));
        }
        tokio::select! {
            result = self.initialize(try_init_version) => result,
            _ = async {
                while shutdown.changed().await.is_ok() {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                // Sender dropped without signalling; never cancel.
                std::future::pending::<()>().await
            } => {
                warn!(cluster_id = %self.cluster_id, "membership initialization cancelled");
                Err(ClusteringError::Cancelled("membership initialization".into()))
            }
        }
    }

    async fn initialize_inner(&self, try_init_version: bool) -> ClusteringResult<()> {
        if self.options.can_create_resources {
            if self.options.drop_collection_on_init {
                let dropped = execute_with_retries("delete_container", || {
                    self.store.delete_container(self.collection())
                })
                .await?;
                warn!(collection = %self.collection(), dropped, "dropped membership collection on init");
            }
            let created = execute_with_retries("create_container", || {
                self.store
                    .create_container_if_not_exists(self.collection(), CLUSTER_PARTITION_KEY_PATH)
            })
            .await?;
            debug!(collection = %self.collection(), created, "membership collection ensured");
        }

        if try_init_version {
            self.ensure_version().await?;
        }
        Ok(())
    }

    /// Read the version document, creating it at version 0 if absent.
    async fn ensure_version(&self) -> ClusteringResult<TableVersion> {
        if let Some(version) = self.read_version().await? {
            return Ok(version);
        }

        let document = ClusterEntity::from(ClusterVersionEntity::new(&self.cluster_id, 0)).to_document()?;
        let created = execute_with_retries("create_version", || {
            self.store
                .create(self.collection(), &self.partition, document.clone())
        })
        .await;

        match created {
            Ok(doc) => {
                let version = decode_version(doc)?.to_table_version()?;
                info!(cluster_id = %self.cluster_id, "created cluster version document");
                Ok(version)
            }
            Err(StoreError::Conflict(_)) => {
                debug!(cluster_id = %self.cluster_id, "cluster version created concurrently; re-reading");
                self.read_version().await?.ok_or_else(|| {
                    ClusteringError::decode(CLUSTER_VERSION_ID, "vanished after creation conflict")
                })
            }
            Err(e) => Err(self.fail("create_version", CLUSTER_VERSION_ID, e.into())),
        }
    }

    async fn read_version(&self) -> ClusteringResult<Option<TableVersion>> {
        let read = execute_with_retries("read_version", || {
            self.store
                .read(self.collection(), &self.partition, CLUSTER_VERSION_ID)
        })
        .await;
        match read {
            Ok(doc) => Ok(Some(decode_version(doc)?.to_table_version()?)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(self.fail("read_version", CLUSTER_VERSION_ID, e.into())),
        }
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// Every silo row plus the current version. A row that fails to decode
    /// aborts the whole read.
    ///
    /// The version is read before the rows. A row scan may span several
    /// pages, so rows committed after the version read can appear in the
    /// snapshot, but a write conditioned on the snapshot's version can never
    /// succeed over a row the snapshot missed.
    pub async fn read_all(&self) -> ClusteringResult<MembershipTableData> {
        let version = self.read_version().await?;
        if version.is_none() {
            error!(cluster_id = %self.cluster_id, "cluster version document is missing");
        }
        let members = self.read_silos("read_all", Filter::ne("id", CLUSTER_VERSION_ID)).await?;
        debug!(cluster_id = %self.cluster_id, members = members.len(), version = ?version.as_ref().map(|v| v.version), "read all members");
        Ok(MembershipTableData::new(members, version))
    }

    /// One silo row plus the current version. Missing version yields an
    /// empty result rather than an error.
    pub async fn read_row(&self, silo: &SiloAddress) -> ClusteringResult<MembershipTableData> {
        let Some(version) = self.read_version().await? else {
            warn!(cluster_id = %self.cluster_id, %silo, "cluster version document is missing; returning empty membership");
            return Ok(MembershipTableData::new(Vec::new(), None));
        };
        let id = silo_id(silo);
        let members = self.read_silos("read_row", Filter::eq("id", id.as_str())).await?;
        Ok(MembershipTableData::new(members, Some(version)))
    }

    /// Silo rows of the cluster partition matching `filter`, with their etags.
    async fn read_silos(
        &self,
        operation: &'static str,
        filter: Filter,
    ) -> ClusteringResult<Vec<(MembershipEntry, String)>> {
        let query = Query::in_partition(self.partition.clone(), filter);
        let documents = query_all_with_retries(self.store.as_ref(), self.collection(), &query)
            .await
            .map_err(|e| self.fail(operation, &self.cluster_id, e.into()))?;

        let mut members = Vec::with_capacity(documents.len());
        for document in documents {
            let silo = decode_silo(document).map_err(|e| self.fail(operation, &self.cluster_id, e))?;
            let entry = silo.to_entry().map_err(|e| self.fail(operation, &silo.id, e))?;
            members.push((entry, silo.etag.unwrap_or_default()));
        }
        Ok(members)
    }

    // ── Mutations ──────────────────────────────────────────────────

    /// Insert a new silo row and bump the version, atomically. `false` if
    /// `expected` is stale or the row already exists.
    pub async fn insert_row(
        &self,
        entry: &MembershipEntry,
        expected: &TableVersion,
    ) -> ClusteringResult<bool> {
        let silo = SiloEntity::from_entry(entry, &self.cluster_id);
        let id = silo.id.clone();
        let operations = vec![
            self.version_replace(expected)?,
            BatchOperation::create(ClusterEntity::from(silo).to_document()?),
        ];
        self.commit_batch("insert_row", &id, expected, operations).await
    }

    /// Replace an existing silo row (conditioned on `row_etag`) and bump the
    /// version, atomically. `false` if either token is stale.
    pub async fn update_row(
        &self,
        entry: &MembershipEntry,
        row_etag: &str,
        expected: &TableVersion,
    ) -> ClusteringResult<bool> {
        let silo = SiloEntity::from_entry(entry, &self.cluster_id);
        let id = silo.id.clone();
        let operations = vec![
            self.version_replace(expected)?,
            BatchOperation::replace(
                id.clone(),
                ClusterEntity::from(silo).to_document()?,
                Some(ETag::new(row_etag)),
            ),
        ];
        self.commit_batch("update_row", &id, expected, operations).await
    }

    fn version_replace(&self, expected: &TableVersion) -> ClusteringResult<BatchOperation> {
        let next = expected.next().ok_or(ClusteringError::VersionExhausted {
            version: expected.version,
        })?;
        let document =
            ClusterEntity::from(ClusterVersionEntity::new(&self.cluster_id, next.version)).to_document()?;
        Ok(BatchOperation::replace(
            CLUSTER_VERSION_ID,
            document,
            Some(ETag::new(next.etag)),
        ))
    }

    async fn commit_batch(
        &self,
        operation: &'static str,
        id: &str,
        expected: &TableVersion,
        operations: Vec<BatchOperation>,
    ) -> ClusteringResult<bool> {
        let result = execute_with_retries(operation, || {
            self.store
                .execute_batch(self.collection(), &self.partition, operations.clone())
        })
        .await;

        match result {
            Ok(_) => {
                info!(cluster_id = %self.cluster_id, silo = %id, expected_version = expected.version, "{operation} committed");
                Ok(true)
            }
            // `NotFound` names a missing document; a missing container is
            // `ContainerNotFound` and propagates below.
            Err(e @ (StoreError::PreconditionFailed(_) | StoreError::Conflict(_) | StoreError::NotFound(_))) => {
                debug!(cluster_id = %self.cluster_id, silo = %id, expected_version = expected.version, reason = %e, "{operation} lost the race");
                Ok(false)
            }
            Err(e) => Err(self.fail(operation, id, e.into())),
        }
    }

    /// Refresh only the heartbeat of a row. The version is untouched.
    ///
    /// Reads the current row, patches `IAmAliveTime`, and replaces it
    /// conditioned on the row etag, retrying a bounded number of times when
    /// a concurrent writer gets there first.
    pub async fn update_i_am_alive(&self, entry: &MembershipEntry) -> ClusteringResult<()> {
        let id = silo_id(&entry.silo_address);
        for attempt in 1..=I_AM_ALIVE_MAX_ATTEMPTS {
            let current = execute_with_retries("update_i_am_alive", || {
                self.store.read(self.collection(), &self.partition, &id)
            })
            .await
            .map_err(|e| self.fail("update_i_am_alive", &id, e.into()))?;

            let etag = document_etag(&current);
            let mut silo = decode_silo(current).map_err(|e| self.fail("update_i_am_alive", &id, e))?;
            silo.i_am_alive_time = entry.i_am_alive_time;
            silo.etag = None;
            let document = ClusterEntity::from(silo).to_document()?;

            let replaced = execute_with_retries("update_i_am_alive", || {
                self.store.replace(
                    self.collection(),
                    &self.partition,
                    &id,
                    document.clone(),
                    etag.as_ref(),
                )
            })
            .await;

            match replaced {
                Ok(_) => {
                    debug!(cluster_id = %self.cluster_id, silo = %id, at = %entry.i_am_alive_time, "heartbeat recorded");
                    return Ok(());
                }
                Err(StoreError::PreconditionFailed(_)) => {
                    debug!(cluster_id = %self.cluster_id, silo = %id, attempt, "heartbeat contended; re-reading");
                }
                Err(e) => return Err(self.fail("update_i_am_alive", &id, e.into())),
            }
        }

        let err = ClusteringError::ContentionExhausted {
            operation: "update_i_am_alive",
            attempts: I_AM_ALIVE_MAX_ATTEMPTS,
        };
        Err(self.fail("update_i_am_alive", &id, err))
    }

    // ── Administration ─────────────────────────────────────────────

    /// Delete every row and the version document of `cluster_id`.
    /// Documents already gone count as deleted.
    pub async fn delete_membership_table_entries(&self, cluster_id: &str) -> ClusteringResult<usize> {
        let partition = PartitionKey::new(cluster_id);
        let query = Query::in_partition(partition.clone(), Filter::All);
        let documents = query_all_with_retries(self.store.as_ref(), self.collection(), &query)
            .await
            .map_err(|e| self.fail("delete_membership_table_entries", cluster_id, e.into()))?;

        let ids: Vec<String> = documents
            .iter()
            .filter_map(|doc| doc.get("id").and_then(|v| v.as_str()).map(str::to_string))
            .collect();
        let count = self
            .delete_all("delete_membership_table_entries", &partition, &ids)
            .await?;
        info!(%cluster_id, deleted = count, "membership table entries deleted");
        Ok(count)
    }

    /// Delete every `Dead` row whose heartbeat predates `before`. Returns
    /// the number of rows deleted. Any failed delete fails the cleanup.
    pub async fn cleanup_defunct_silo_entries(&self, before: DateTime<Utc>) -> ClusteringResult<usize> {
        let data = self.read_all().await?;
        let ids: Vec<String> = data
            .members
            .iter()
            .filter(|(entry, _)| entry.status == SiloStatus::Dead && entry.i_am_alive_time < before)
            .map(|(entry, _)| silo_id(&entry.silo_address))
            .collect();
        if ids.is_empty() {
            debug!(cluster_id = %self.cluster_id, %before, "no defunct silo entries");
            return Ok(0);
        }

        let count = self
            .delete_all("cleanup_defunct_silo_entries", &self.partition, &ids)
            .await?;
        info!(cluster_id = %self.cluster_id, %before, deleted = count, "defunct silo entries removed");
        Ok(count)
    }

    /// Fan out one delete per id and join on all of them.
    async fn delete_all(
        &self,
        operation: &'static str,
        partition: &PartitionKey,
        ids: &[String],
    ) -> ClusteringResult<usize> {
        let deletes = ids.iter().map(|id| async move {
            let result = execute_with_retries(operation, || {
                self.store.delete(self.collection(), partition, id, None)
            })
            .await;
            match result {
                Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
                Err(e) => Err(self.fail(operation, id, e.into())),
            }
        });
        try_join_all(deletes).await?;
        Ok(ids.len())
    }

    /// Log a failed operation with its context and hand the error back.
    fn fail(&self, operation: &str, key: &str, err: ClusteringError) -> ClusteringError {
        error!(%operation, cluster_id = %self.cluster_id, %key, error = %err, "membership table operation failed");
        err
    }
}
