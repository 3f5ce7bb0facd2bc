//! Reminder table: per-grain reminders for one service.
//!
//! Point lookups and per-grain listings stay inside the grain's
//! partition. Hash-range listings scan across partitions: a silo owns an
//! arc `(begin, end]` of the 32-bit ring, and an arc may wrap past the
//! ring's maximum back to zero.

use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use tracing::{debug, error, info};

use tablegrid_core::config::ReminderConfig;
use tablegrid_core::{GrainId, ReminderEntry, ReminderTableData};
use tablegrid_store::{
    DocumentStore, ETag, Filter, PartitionKey, Query, StoreError, document_etag,
    execute_with_retries, query_all_with_retries,
};

use crate::entity::*;
use crate::error::{ReminderError, ReminderResult};

/// Ring predicate for the owned arc `(begin, end]`.
pub fn ring_range_filter(begin: u32, end: u32) -> Filter {
    if begin < end {
        Filter::and([Filter::gt("GrainHash", begin), Filter::le("GrainHash", end)])
    } else if begin > end {
        Filter::or([Filter::gt("GrainHash", begin), Filter::le("GrainHash", end)])
    } else {
        Filter::le("GrainHash", end)
    }
}

#[derive(Clone)]
pub struct ReminderTable {
    store: Arc<dyn DocumentStore>,
    service_id: String,
    options: ReminderConfig,
}

impl ReminderTable {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        service_id: impl Into<String>,
        options: ReminderConfig,
    ) -> Self {
        Self {
            store,
            service_id: service_id.into(),
            options,
        }
    }

    pub fn service_id(&self) -> &str {
        &self.service_id
    }

    fn collection(&self) -> &str {
        &self.options.collection
    }

    /// Reminders of this service, optionally narrowed further.
    fn service_filter(&self, narrow: Filter) -> Filter {
        Filter::and([
            Filter::eq("EntityType", REMINDER_ENTITY_TYPE),
            Filter::eq("ServiceId", self.service_id.as_str()),
            narrow,
        ])
    }

    // ── Initialization ─────────────────────────────────────────────

    /// Provision the reminder container when allowed to.
    pub async fn initialize(&self) -> ReminderResult<()> {
        let started = Instant::now();
        info!(service_id = %self.service_id, collection = %self.collection(), "reminder table initializing");

        match self.provision().await {
            Ok(()) => {
                info!(service_id = %self.service_id, elapsed_ms = started.elapsed().as_millis() as u64, "reminder table initialized");
                Ok(())
            }
            Err(e) => {
                error!(service_id = %self.service_id, elapsed_ms = started.elapsed().as_millis() as u64, error = %e, "reminder table initialization failed");
                Err(e)
            }
        }
    }

    async fn provision(&self) -> ReminderResult<()> {
        if !self.options.can_create_resources {
            return Ok(());
        }
        if self.options.drop_collection_on_init {
            let dropped = execute_with_retries("delete_container", || {
                self.store.delete_container(self.collection())
            })
            .await?;
            info!(collection = %self.collection(), dropped, "dropped reminder collection on init");
        }
        let created = execute_with_retries("create_container", || {
            self.store
                .create_container_if_not_exists(self.collection(), REMINDER_PARTITION_KEY_PATH)
        })
        .await?;
        debug!(collection = %self.collection(), created, "reminder collection ensured");
        Ok(())
    }

    // ── Reads ──────────────────────────────────────────────────────

    /// One reminder, or `None` if it does not exist.
    pub async fn read_row(&self, grain: &GrainId, name: &str) -> ReminderResult<Option<ReminderEntry>> {
        let id = reminder_id(grain, name);
        let partition = reminder_partition(&self.service_id, grain);
        let read = execute_with_retries("read_row", || {
            self.store.read(self.collection(), &partition, &id)
        })
        .await;

        match read {
            Ok(doc) => {
                let entity = ReminderEntity::from_document(doc).map_err(|e| self.fail("read_row", &id, e))?;
                Ok(Some(entity.to_entry().map_err(|e| self.fail("read_row", &id, e))?))
            }
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(self.fail("read_row", &id, e.into())),
        }
    }

    /// Every reminder of one grain.
    pub async fn read_rows_for_grain(&self, grain: &GrainId) -> ReminderResult<ReminderTableData> {
        let query = Query::in_partition(
            reminder_partition(&self.service_id, grain),
            self.service_filter(Filter::eq("GrainId", grain.key())),
        );
        self.read_rows("read_rows_for_grain", grain.key(), &query).await
    }

    /// Every reminder whose grain hash lies in the ring arc `(begin, end]`.
    /// `begin > end` wraps past `u32::MAX`; `begin == end` selects
    /// `hash <= end`.
    pub async fn read_rows_in_range(&self, begin: u32, end: u32) -> ReminderResult<ReminderTableData> {
        let query = Query::new(self.service_filter(ring_range_filter(begin, end)));
        let key = format!("({begin:#010x}, {end:#010x}]");
        self.read_rows("read_rows_in_range", &key, &query).await
    }

    /// Every reminder of the service.
    pub async fn read_all_rows(&self) -> ReminderResult<ReminderTableData> {
        let query = Query::new(self.service_filter(Filter::All));
        self.read_rows("read_all_rows", &self.service_id, &query).await
    }

    async fn read_rows(
        &self,
        operation: &'static str,
        key: &str,
        query: &Query,
    ) -> ReminderResult<ReminderTableData> {
        let documents = query_all_with_retries(self.store.as_ref(), self.collection(), query)
            .await
            .map_err(|e| self.fail(operation, key, e.into()))?;

        let mut reminders = Vec::with_capacity(documents.len());
        for document in documents {
            let entity = ReminderEntity::from_document(document).map_err(|e| self.fail(operation, key, e))?;
            reminders.push(entity.to_entry().map_err(|e| self.fail(operation, &entity.id, e))?);
        }
        debug!(service_id = %self.service_id, operation, %key, count = reminders.len(), "read reminders");
        Ok(ReminderTableData::new(reminders))
    }

    // ── Writes ─────────────────────────────────────────────────────

    /// Create or replace a reminder. A stored entry (one carrying an
    /// etag) only replaces the row if that etag is still current.
    /// Returns the new etag, or `None` if the etag was stale.
    pub async fn upsert_row(&self, entry: &ReminderEntry) -> ReminderResult<Option<String>> {
        let entity = ReminderEntity::from_entry(entry, &self.service_id);
        let id = entity.id.clone();
        let partition = PartitionKey::new(entity.partition_key.clone());
        let document = entity.to_document()?;
        let if_match = entry.etag.as_deref().map(ETag::new);

        let result = execute_with_retries("upsert_row", || {
            self.store
                .upsert(self.collection(), &partition, document.clone(), if_match.as_ref())
        })
        .await;

        match result {
            Ok(stored) => {
                let etag = document_etag(&stored)
                    .ok_or_else(|| self.fail("upsert_row", &id, ReminderError::decode(&id, "store returned no _etag")))?;
                debug!(service_id = %self.service_id, reminder = %id, %etag, "reminder upserted");
                Ok(Some(etag.into_string()))
            }
            Err(StoreError::PreconditionFailed(_)) => {
                debug!(service_id = %self.service_id, reminder = %id, "reminder upsert lost to a newer write");
                Ok(None)
            }
            Err(e) => Err(self.fail("upsert_row", &id, e.into())),
        }
    }

    /// Delete a reminder if `etag` is still current. `false` when the
    /// etag is stale or the reminder is already gone.
    pub async fn remove_row(&self, grain: &GrainId, name: &str, etag: &str) -> ReminderResult<bool> {
        let id = reminder_id(grain, name);
        let partition = reminder_partition(&self.service_id, grain);
        let if_match = ETag::new(etag);

        let result = execute_with_retries("remove_row", || {
            self.store
                .delete(self.collection(), &partition, &id, Some(&if_match))
        })
        .await;

        match result {
            Ok(()) => {
                debug!(service_id = %self.service_id, reminder = %id, "reminder removed");
                Ok(true)
            }
            Err(e @ (StoreError::PreconditionFailed(_) | StoreError::NotFound(_))) => {
                debug!(service_id = %self.service_id, reminder = %id, reason = %e, "reminder not removed");
                Ok(false)
            }
            Err(e) => Err(self.fail("remove_row", &id, e.into())),
        }
    }

    /// Delete every reminder of the service. Test harnesses only.
    pub async fn test_only_clear_table(&self) -> ReminderResult<usize> {
        let query = Query::new(self.service_filter(Filter::All));
        let documents = query_all_with_retries(self.store.as_ref(), self.collection(), &query)
            .await
            .map_err(|e| self.fail("test_only_clear_table", &self.service_id, e.into()))?;

        let mut targets = Vec::with_capacity(documents.len());
        for document in documents {
            let entity = ReminderEntity::from_document(document)
                .map_err(|e| self.fail("test_only_clear_table", &self.service_id, e))?;
            targets.push((PartitionKey::new(entity.partition_key), entity.id));
        }

        let deletes = targets.iter().map(|(partition, id)| async move {
            let result = execute_with_retries("test_only_clear_table", || {
                self.store.delete(self.collection(), partition, id, None)
            })
            .await;
            match result {
                Ok(()) | Err(StoreError::NotFound(_)) => Ok(()),
                Err(e) => Err(self.fail("test_only_clear_table", id, e.into())),
            }
        });
        try_join_all(deletes).await?;

        info!(service_id = %self.service_id, deleted = targets.len(), "reminder table cleared");
        Ok(targets.len())
    }

    /// Log a failed operation with its context and hand the error back.
    fn fail(&self, operation: &str, key: &str, err: ReminderError) -> ReminderError {
        error!(%operation, service_id = %self.service_id, %key, error = %err, "reminder table operation failed");
        err
    }
}
