//! Gateway directory: the client-facing view of the membership table.
//!
//! Lists active silos exposing a non-zero proxy port. Every call
//! re-queries the store; how long a list may be cached is the caller's
//! decision, informed by [`GatewayDirectory::max_staleness`].

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, error};

use tablegrid_core::config::MembershipConfig;
use tablegrid_core::{SiloAddress, SiloStatus};
use tablegrid_store::{DocumentStore, Filter, PartitionKey, Query, query_all_with_retries};

use crate::entity::*;
use crate::error::ClusteringResult;

pub struct GatewayDirectory {
    store: Arc<dyn DocumentStore>,
    cluster_id: String,
    collection: String,
    max_staleness: Duration,
}

impl GatewayDirectory {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        cluster_id: impl Into<String>,
        options: &MembershipConfig,
    ) -> ClusteringResult<Self> {
        Ok(Self {
            store,
            cluster_id: cluster_id.into(),
            collection: options.collection.clone(),
            max_staleness: options.gateway_refresh()?,
        })
    }

    /// How long a gateway list may be trusted before re-querying.
    pub fn max_staleness(&self) -> Duration {
        self.max_staleness
    }

    /// Gateway lists change as silos come and go.
    pub fn is_updatable(&self) -> bool {
        true
    }

    fn gateway_query(&self) -> Query {
        Query::in_partition(
            PartitionKey::new(self.cluster_id.clone()),
            Filter::and([
                Filter::eq("EntityType", SILO_ENTITY_TYPE),
                Filter::eq("Status", SiloStatus::Active.as_str()),
                Filter::ne("ProxyPort", Value::Null),
                Filter::ne("ProxyPort", 0),
            ]),
        )
    }

    /// Client-connectable addresses (proxy port endpoint) of every gateway.
    pub async fn get_gateways(&self) -> ClusteringResult<Vec<SiloAddress>> {
        let documents = query_all_with_retries(self.store.as_ref(), &self.collection, &self.gateway_query())
            .await
            .map_err(|e| {
                error!(cluster_id = %self.cluster_id, error = %e, "failed to list gateways");
                e
            })?;

        let mut gateways = Vec::with_capacity(documents.len());
        for document in documents {
            let silo = decode_silo(document)?;
            if let Some(address) = silo.gateway_address()? {
                gateways.push(address);
            }
        }
        debug!(cluster_id = %self.cluster_id, count = gateways.len(), "listed gateways");
        Ok(gateways)
    }

    /// Gateways rendered as `gwy.tcp://{address}:{port}/{generation}`.
    pub async fn get_gateway_uris(&self) -> ClusteringResult<Vec<String>> {
        Ok(self
            .get_gateways()
            .await?
            .iter()
            .map(SiloAddress::to_gateway_uri)
            .collect())
    }
}
