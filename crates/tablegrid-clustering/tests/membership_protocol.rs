//! Membership table protocol tests.
//!
//! Drive the full protocol against the embedded document store: the
//! two-silo join scenario, write races, stale tokens, heartbeats,
//! cleanup, the gateway directory, and throttling.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::future::join_all;
use serde_json::json;
use tokio::sync::watch;

use tablegrid_clustering::*;
use tablegrid_core::config::MembershipConfig;
use tablegrid_core::*;
use tablegrid_store::*;

const CLUSTER: &str = "C1";

fn memory_store() -> Arc<dyn DocumentStore> {
    Arc::new(RedbDocumentStore::open_in_memory().unwrap())
}

async fn initialized_table(store: Arc<dyn DocumentStore>) -> MembershipTable {
    let table = MembershipTable::new(store, CLUSTER, MembershipConfig::default());
    table.initialize(true).await.unwrap();
    table
}

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn silo(endpoint: &str, generation: i32) -> SiloAddress {
    SiloAddress::new(endpoint.parse::<SocketAddr>().unwrap(), generation)
}

fn entry(endpoint: &str, generation: i32, status: SiloStatus, proxy_port: Option<u16>) -> MembershipEntry {
    MembershipEntry::new(
        silo(endpoint, generation),
        format!("host-{endpoint}"),
        format!("silo-{generation}"),
        status,
        proxy_port,
        at(0),
    )
}

async fn current_version(table: &MembershipTable) -> TableVersion {
    table.read_all().await.unwrap().version.unwrap()
}

/// Store that lets another silo join through a second table right before
/// the second page of a query is served.
struct JoinBetweenPages {
    inner: Arc<dyn DocumentStore>,
    joiner: Mutex<Option<MembershipEntry>>,
}

#[async_trait]
impl DocumentStore for JoinBetweenPages {
    async fn create_container_if_not_exists(&self, container: &str, partition_key_path: &str) -> StoreResult<bool> {
        self.inner.create_container_if_not_exists(container, partition_key_path).await
    }

    async fn delete_container(&self, container: &str) -> StoreResult<bool> {
        self.inner.delete_container(container).await
    }

    async fn read(&self, container: &str, pk: &PartitionKey, id: &str) -> StoreResult<Document> {
        self.inner.read(container, pk, id).await
    }

    async fn create(&self, container: &str, pk: &PartitionKey, document: Document) -> StoreResult<Document> {
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
        self.inner.replace(container, pk, id, document, if_match).await
    }

    async fn upsert(
        &self,
        container: &str,
        pk: &PartitionKey,
        document: Document,
        if_match: Option<&ETag>,
    ) -> StoreResult<Document> {
        self.inner.upsert(container, pk, document, if_match).await
    }

    async fn delete(&self, container: &str, pk: &PartitionKey, id: &str, if_match: Option<&ETag>) -> StoreResult<()> {
        self.inner.delete(container, pk, id, if_match).await
    }

    async fn query(&self, container: &str, query: &Query, continuation: Option<String>) -> StoreResult<Page> {
        if continuation.is_some() {
            let joiner = self.joiner.lock().unwrap().take();
            if let Some(joiner) = joiner {
                let other = MembershipTable::new(self.inner.clone(), CLUSTER, MembershipConfig::default());
                let version = current_version(&other).await;
                assert!(other.insert_row(&joiner, &version).await.unwrap());
            }
        }
        self.inner.query(container, query, continuation).await
    }

    async fn execute_batch(
        &self,
        container: &str,
        pk: &PartitionKey,
        operations: Vec<BatchOperation>,
    ) -> StoreResult<Vec<Option<Document>>> {
        self.inner.execute_batch(container, pk, operations).await
    }
}

// ── Initialization ─────────────────────────────────────────────────

#[tokio::test]
async fn initialize_creates_version_zero() {
    let table = initialized_table(memory_store()).await;
    let data = table.read_all().await.unwrap();
    assert!(data.is_empty());
    assert_eq!(data.version.unwrap().version, 0);
}

#[tokio::test]
async fn initialize_is_idempotent_and_race_safe() {
    let store = memory_store();
    let tables: Vec<_> = (0..8)
        .map(|_| MembershipTable::new(store.clone(), CLUSTER, MembershipConfig::default()))
        .collect();
    let results = join_all(tables.iter().map(|t| t.initialize(true))).await;
    assert!(results.iter().all(Result::is_ok));

    let data = tables[0].read_all().await.unwrap();
    assert_eq!(data.version.unwrap().version, 0);
}

#[tokio::test]
async fn initialize_without_version_leaves_table_unversioned() {
    let table = MembershipTable::new(memory_store(), CLUSTER, MembershipConfig::default());
    table.initialize(false).await.unwrap();
    let data = table.read_all().await.unwrap();
    assert!(data.version.is_none());
}

#[tokio::test]
async fn drop_collection_on_init_wipes_existing_rows() {
    let store = memory_store();
    let table = initialized_table(store.clone()).await;
    let v0 = current_version(&table).await;
    assert!(table.insert_row(&entry("10.0.0.1:11111", 1, SiloStatus::Active, None), &v0).await.unwrap());

    let options = MembershipConfig {
        drop_collection_on_init: true,
        ..MembershipConfig::default()
    };
    let fresh = MembershipTable::new(store, CLUSTER, options);
    fresh.initialize(true).await.unwrap();

    let data = fresh.read_all().await.unwrap();
    assert!(data.is_empty());
    assert_eq!(data.version.unwrap().version, 0);
}

#[tokio::test]
async fn initialize_without_resources_requires_existing_collection() {
    let options = MembershipConfig {
        can_create_resources: false,
        ..MembershipConfig::default()
    };
    let table = MembershipTable::new(memory_store(), CLUSTER, options);
    let err = table.initialize(true).await.unwrap_err();
    assert!(matches!(err, ClusteringError::Store(StoreError::ContainerNotFound(_))));
}

#[tokio::test]
async fn writes_to_missing_collection_are_errors_not_lost_races() {
    let options = MembershipConfig {
        collection: "NoSuchCollection".into(),
        can_create_resources: false,
        ..MembershipConfig::default()
    };
    let table = MembershipTable::new(memory_store(), CLUSTER, options);
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Active, None);
    let version = TableVersion::new(0, "\"v0\"");

    let err = table.insert_row(&e, &version).await.unwrap_err();
    assert!(matches!(err, ClusteringError::Store(StoreError::ContainerNotFound(_))));

    let err = table.update_row(&e, "\"row\"", &version).await.unwrap_err();
    assert!(matches!(err, ClusteringError::Store(StoreError::ContainerNotFound(_))));
}

#[tokio::test]
async fn initialize_with_shutdown_already_signalled() {
    let table = MembershipTable::new(memory_store(), CLUSTER, MembershipConfig::default());
    let (_tx, rx) = watch::channel(true);
    let err = table.initialize_with_shutdown(true, rx).await.unwrap_err();
    assert!(matches!(err, ClusteringError::Cancelled(_)));
}

#[tokio::test]
async fn initialize_with_shutdown_completes_when_not_signalled() {
    let table = MembershipTable::new(memory_store(), CLUSTER, MembershipConfig::default());
    let (tx, rx) = watch::channel(false);
    table.initialize_with_shutdown(true, rx).await.unwrap();
    drop(tx);
    assert_eq!(current_version(&table).await.version, 0);
}

// ── Insert / update ────────────────────────────────────────────────

#[tokio::test]
async fn two_silo_join_scenario() {
    let table = initialized_table(memory_store()).await;
    let v0 = current_version(&table).await;
    assert_eq!(v0.version, 0);

    let a = entry("10.0.0.1:11111", 1, SiloStatus::Joining, None);
    let b = entry("10.0.0.2:11111", 1, SiloStatus::Joining, None);

    assert!(table.insert_row(&a, &v0).await.unwrap());
    // B raced with the same starting version and loses.
    assert!(!table.insert_row(&b, &v0).await.unwrap());

    let v1 = current_version(&table).await;
    assert_eq!(v1.version, 1);
    assert!(table.insert_row(&b, &v1).await.unwrap());

    let data = table.read_all().await.unwrap();
    assert_eq!(data.len(), 2);
    assert_eq!(data.version.unwrap().version, 2);
}

#[tokio::test]
async fn insert_then_read_row_round_trips() {
    let table = initialized_table(memory_store()).await;
    let v0 = current_version(&table).await;

    let mut e = entry("10.0.0.1:11111", 3, SiloStatus::Active, Some(30000));
    e.add_suspector(silo("10.0.0.9:11111", 2), Utc.timestamp_opt(1_700_000_100, 123_000_000).unwrap());
    assert!(table.insert_row(&e, &v0).await.unwrap());

    let data = table.read_row(&e.silo_address).await.unwrap();
    assert_eq!(data.version.as_ref().unwrap().version, v0.version + 1);
    assert_eq!(data.len(), 1);
    let (read, etag) = data.get(&e.silo_address).unwrap();
    assert_eq!(read, &e);
    assert!(!etag.is_empty());
}

#[tokio::test]
async fn inserting_an_existing_row_returns_false() {
    let table = initialized_table(memory_store()).await;
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Joining, None);
    assert!(table.insert_row(&e, &current_version(&table).await).await.unwrap());
    assert!(!table.insert_row(&e, &current_version(&table).await).await.unwrap());
    assert_eq!(current_version(&table).await.version, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_inserts_exactly_one_wins() {
    let table = initialized_table(memory_store()).await;
    let v0 = current_version(&table).await;

    let attempts = (0..10).map(|i| {
        let table = table.clone();
        let v0 = v0.clone();
        tokio::spawn(async move {
            let e = entry(&format!("10.0.1.{i}:11111"), 1, SiloStatus::Joining, None);
            table.insert_row(&e, &v0).await
        })
    });

    let mut winners = 0;
    for outcome in join_all(attempts).await {
        if outcome.unwrap().unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);

    let data = table.read_all().await.unwrap();
    assert_eq!(data.len(), 1);
    assert_eq!(data.version.unwrap().version, 1);
}

#[tokio::test]
async fn concurrent_updates_exactly_one_wins() {
    let table = initialized_table(memory_store()).await;
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Joining, None);
    assert!(table.insert_row(&e, &current_version(&table).await).await.unwrap());

    let data = table.read_all().await.unwrap();
    let version = data.version.clone().unwrap();
    let (_, row_etag) = data.get(&e.silo_address).unwrap().clone();

    let mut active = e.clone();
    active.status = SiloStatus::Active;
    let mut dead = e.clone();
    dead.status = SiloStatus::Dead;

    let (first, second) = tokio::join!(
        table.update_row(&active, &row_etag, &version),
        table.update_row(&dead, &row_etag, &version),
    );
    let outcomes = [first.unwrap(), second.unwrap()];
    assert_eq!(outcomes.iter().filter(|won| **won).count(), 1);
    assert_eq!(current_version(&table).await.version, 2);
}

#[tokio::test]
async fn update_with_stale_row_etag_returns_false() {
    let table = initialized_table(memory_store()).await;
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Joining, None);
    assert!(table.insert_row(&e, &current_version(&table).await).await.unwrap());

    let data = table.read_all().await.unwrap();
    let (_, stale_etag) = data.get(&e.silo_address).unwrap().clone();

    // A third party updates the row.
    let mut active = e.clone();
    active.status = SiloStatus::Active;
    assert!(table.update_row(&active, &stale_etag, &current_version(&table).await).await.unwrap());

    // Valid version token, stale row token.
    let mut dead = e.clone();
    dead.status = SiloStatus::Dead;
    let fresh_version = current_version(&table).await;
    assert!(!table.update_row(&dead, &stale_etag, &fresh_version).await.unwrap());

    let data = table.read_row(&e.silo_address).await.unwrap();
    assert_eq!(data.get(&e.silo_address).unwrap().0.status, SiloStatus::Active);
    assert_eq!(data.version.unwrap().version, fresh_version.version);
}

#[tokio::test]
async fn update_with_stale_version_returns_false() {
    let table = initialized_table(memory_store()).await;
    let v0 = current_version(&table).await;
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Joining, None);
    assert!(table.insert_row(&e, &v0).await.unwrap());

    let data = table.read_all().await.unwrap();
    let (_, row_etag) = data.get(&e.silo_address).unwrap().clone();

    let mut active = e.clone();
    active.status = SiloStatus::Active;
    assert!(!table.update_row(&active, &row_etag, &v0).await.unwrap());
}

#[tokio::test]
async fn update_of_missing_row_returns_false() {
    let table = initialized_table(memory_store()).await;
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Active, None);
    let ok = table
        .update_row(&e, "\"whatever\"", &current_version(&table).await)
        .await
        .unwrap();
    assert!(!ok);
}

#[tokio::test]
async fn exhausted_version_counter_is_an_error() {
    let table = initialized_table(memory_store()).await;
    let exhausted = TableVersion::new(i32::MAX, current_version(&table).await.etag);
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Joining, None);

    let err = table.insert_row(&e, &exhausted).await.unwrap_err();
    assert!(matches!(err, ClusteringError::VersionExhausted { version: i32::MAX }));
    assert!(table.read_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn optimistic_retry_rereads_after_losing() {
    let table = initialized_table(memory_store()).await;
    let v0 = current_version(&table).await;

    // Someone else bumps the version first.
    assert!(table.insert_row(&entry("10.0.0.1:11111", 1, SiloStatus::Active, None), &v0).await.unwrap());

    let mine = entry("10.0.0.2:11111", 1, SiloStatus::Joining, None);
    let mut first_attempt = true;
    let attempts = OptimisticRetry::new(3)
        .run(&table, "join", |snapshot| {
            // First attempt deliberately presents the stale version.
            let version = if first_attempt { v0.clone() } else { snapshot.version.unwrap() };
            first_attempt = false;
            let table = table.clone();
            let mine = mine.clone();
            async move { table.insert_row(&mine, &version).await }
        })
        .await
        .unwrap();

    assert_eq!(attempts, 2);
    assert_eq!(table.read_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn optimistic_retry_gives_up() {
    let table = initialized_table(memory_store()).await;
    let err = OptimisticRetry::new(2)
        .run(&table, "never", |_| async { Ok(false) })
        .await
        .unwrap_err();
    assert!(matches!(err, ClusteringError::ContentionExhausted { attempts: 2, .. }));
}

// ── Heartbeats ─────────────────────────────────────────────────────

#[tokio::test]
async fn i_am_alive_updates_heartbeat_without_version_bump() {
    let table = initialized_table(memory_store()).await;
    let mut e = entry("10.0.0.1:11111", 1, SiloStatus::Active, None);
    assert!(table.insert_row(&e, &current_version(&table).await).await.unwrap());
    let before = table.read_row(&e.silo_address).await.unwrap();
    let (_, etag_before) = before.get(&e.silo_address).unwrap().clone();

    e.i_am_alive_time = at(120);
    // Status changes in the caller's copy are not written by a heartbeat.
    e.status = SiloStatus::Dead;
    table.update_i_am_alive(&e).await.unwrap();

    let after = table.read_row(&e.silo_address).await.unwrap();
    let (row, etag_after) = after.get(&e.silo_address).unwrap();
    assert_eq!(row.i_am_alive_time, at(120));
    assert_eq!(row.status, SiloStatus::Active);
    assert_ne!(etag_after, &etag_before);
    assert_eq!(after.version.unwrap().version, 1);
}

#[tokio::test]
async fn i_am_alive_for_unknown_silo_fails() {
    let table = initialized_table(memory_store()).await;
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Active, None);
    let err = table.update_i_am_alive(&e).await.unwrap_err();
    assert!(matches!(err, ClusteringError::Store(StoreError::NotFound(_))));
}

// ── Reads ──────────────────────────────────────────────────────────

#[tokio::test]
async fn read_row_without_version_is_empty() {
    let store = memory_store();
    let table = MembershipTable::new(store.clone(), CLUSTER, MembershipConfig::default());
    table.initialize(false).await.unwrap();

    let e = entry("10.0.0.1:11111", 1, SiloStatus::Active, None);
    let doc = ClusterEntity::from(SiloEntity::from_entry(&e, CLUSTER)).to_document().unwrap();
    store.create("OrleansCluster", &PartitionKey::new(CLUSTER), doc).await.unwrap();

    let data = table.read_row(&e.silo_address).await.unwrap();
    assert!(data.is_empty());
    assert!(data.version.is_none());
}

#[tokio::test]
async fn read_all_version_never_runs_ahead_of_its_rows() {
    let store = memory_store();
    let table = initialized_table(store.clone()).await;
    for i in 0..150u16 {
        let e = entry(&format!("10.0.{}.{}:11111", i / 100, i % 100), 1, SiloStatus::Active, None);
        assert!(table.insert_row(&e, &current_version(&table).await).await.unwrap());
    }

    // Sorts next to the very first row, so the scan has already passed it.
    let joiner = entry("10.0.0.0:11111", 2, SiloStatus::Joining, None);
    let racing: Arc<dyn DocumentStore> = Arc::new(JoinBetweenPages {
        inner: store,
        joiner: Mutex::new(Some(joiner.clone())),
    });
    let observer = MembershipTable::new(racing, CLUSTER, MembershipConfig::default());

    let snapshot = observer.read_all().await.unwrap();
    assert_eq!(snapshot.len(), 150);
    assert!(snapshot.get(&joiner.silo_address).is_none());
    let seen = snapshot.version.unwrap();
    assert_eq!(seen.version, 150);

    // A write based on a view that missed the joiner must lose.
    let late = entry("10.0.9.9:11111", 1, SiloStatus::Joining, None);
    assert!(!observer.insert_row(&late, &seen).await.unwrap());

    let fresh = table.read_all().await.unwrap();
    assert_eq!(fresh.len(), 151);
    assert!(fresh.get(&joiner.silo_address).is_some());
    assert!(table.insert_row(&late, fresh.version.as_ref().unwrap()).await.unwrap());
}

#[tokio::test]
async fn corrupt_row_aborts_read_all() {
    let store = memory_store();
    let table = initialized_table(store.clone()).await;

    let e = entry("10.0.0.1:11111", 1, SiloStatus::Active, None);
    let mut doc = ClusterEntity::from(SiloEntity::from_entry(&e, CLUSTER)).to_document().unwrap();
    doc["SuspectingSilos"] = json!(["10.0.0.2:11111@1"]);
    doc["SuspectingTimes"] = json!([]);
    store.create("OrleansCluster", &PartitionKey::new(CLUSTER), doc).await.unwrap();

    let err = table.read_all().await.unwrap_err();
    assert!(matches!(err, ClusteringError::Decode { .. }));
}

#[tokio::test]
async fn clusters_are_isolated_by_partition() {
    let store = memory_store();
    let c1 = initialized_table(store.clone()).await;
    let c2 = MembershipTable::new(store, "C2", MembershipConfig::default());
    c2.initialize(true).await.unwrap();

    assert!(c1.insert_row(&entry("10.0.0.1:11111", 1, SiloStatus::Active, None), &current_version(&c1).await).await.unwrap());
    assert!(c2.read_all().await.unwrap().is_empty());
    assert_eq!(current_version(&c2).await.version, 0);
}

// ── Administration ─────────────────────────────────────────────────

#[tokio::test]
async fn cleanup_removes_only_old_dead_rows() {
    let table = initialized_table(memory_store()).await;

    let mut old_dead = entry("10.0.0.1:11111", 1, SiloStatus::Dead, None);
    old_dead.i_am_alive_time = at(10);
    let mut new_dead = entry("10.0.0.2:11111", 1, SiloStatus::Dead, None);
    new_dead.i_am_alive_time = at(500);
    let mut old_active = entry("10.0.0.3:11111", 1, SiloStatus::Active, None);
    old_active.i_am_alive_time = at(10);

    for e in [&old_dead, &new_dead, &old_active] {
        assert!(table.insert_row(e, &current_version(&table).await).await.unwrap());
    }

    let deleted = table.cleanup_defunct_silo_entries(at(100)).await.unwrap();
    assert_eq!(deleted, 1);

    let data = table.read_all().await.unwrap();
    assert_eq!(data.len(), 2);
    assert!(data.get(&old_dead.silo_address).is_none());
    // Cleanup is not a membership change.
    assert_eq!(data.version.unwrap().version, 3);

    assert_eq!(table.cleanup_defunct_silo_entries(at(100)).await.unwrap(), 0);
}

#[tokio::test]
async fn delete_entries_removes_rows_and_version() {
    let table = initialized_table(memory_store()).await;
    assert!(table.insert_row(&entry("10.0.0.1:11111", 1, SiloStatus::Active, None), &current_version(&table).await).await.unwrap());

    let deleted = table.delete_membership_table_entries(CLUSTER).await.unwrap();
    assert_eq!(deleted, 2);

    let data = table.read_all().await.unwrap();
    assert!(data.is_empty());
    assert!(data.version.is_none());

    // Initializing again starts a fresh version history.
    table.initialize(true).await.unwrap();
    assert_eq!(current_version(&table).await.version, 0);
}

// ── Gateways ───────────────────────────────────────────────────────

#[tokio::test]
async fn gateways_are_active_silos_with_proxy_port() {
    let store = memory_store();
    let table = initialized_table(store.clone()).await;

    let rows = [
        entry("10.0.0.1:11111", 1, SiloStatus::Active, Some(30000)),
        entry("10.0.0.2:11111", 1, SiloStatus::Active, None),
        entry("10.0.0.3:11111", 1, SiloStatus::Active, Some(0)),
        entry("10.0.0.4:11111", 1, SiloStatus::Joining, Some(30000)),
        entry("10.0.0.5:11111", 1, SiloStatus::Dead, Some(30000)),
        entry("10.0.0.6:11111", 2, SiloStatus::Active, Some(30001)),
    ];
    for row in &rows {
        assert!(table.insert_row(row, &current_version(&table).await).await.unwrap());
    }

    let directory = GatewayDirectory::new(store, CLUSTER, &MembershipConfig::default()).unwrap();
    let mut gateways = directory.get_gateways().await.unwrap();
    gateways.sort_by_key(|g| g.endpoint);
    assert_eq!(
        gateways,
        vec![silo("10.0.0.1:30000", 1), silo("10.0.0.6:30001", 2)]
    );

    let mut uris = directory.get_gateway_uris().await.unwrap();
    uris.sort();
    assert_eq!(uris, vec!["gwy.tcp://10.0.0.1:30000/1", "gwy.tcp://10.0.0.6:30001/2"]);

    assert_eq!(directory.max_staleness(), Duration::from_secs(60));
    assert!(directory.is_updatable());
}

#[tokio::test]
async fn gateways_span_many_pages() {
    let store = memory_store();
    let table = initialized_table(store.clone()).await;
    for i in 0..150u16 {
        let e = entry(&format!("10.0.{}.{}:11111", i / 100, i % 100), 1, SiloStatus::Active, Some(30000 + i));
        assert!(table.insert_row(&e, &current_version(&table).await).await.unwrap());
    }

    let directory = GatewayDirectory::new(store, CLUSTER, &MembershipConfig::default()).unwrap();
    assert_eq!(directory.get_gateways().await.unwrap().len(), 150);
}

// ── Throttling ─────────────────────────────────────────────────────

#[tokio::test]
async fn protocol_completes_under_throttling() {
    let throttled = Arc::new(ThrottlingStore::new(memory_store(), Some(Duration::from_millis(1))));
    let store: Arc<dyn DocumentStore> = throttled.clone();

    throttled.throttle_next(3);
    let table = initialized_table(store.clone()).await;

    throttled.throttle_next(2);
    let v0 = current_version(&table).await;

    throttled.throttle_next(4);
    let e = entry("10.0.0.1:11111", 1, SiloStatus::Active, Some(30000));
    assert!(table.insert_row(&e, &v0).await.unwrap());

    throttled.throttle_next(2);
    let directory = GatewayDirectory::new(store, CLUSTER, &MembershipConfig::default()).unwrap();
    assert_eq!(directory.get_gateways().await.unwrap().len(), 1);
    assert_eq!(throttled.pending(), 0);
}
