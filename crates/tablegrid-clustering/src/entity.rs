//! Persisted document shapes of the membership table.
//!
//! The cluster container holds two kinds of documents in the same
//! partition (the cluster id), discriminated by `EntityType`:
//!
//! - `SiloEntity`, one per silo incarnation, id `{address}-{port}-{generation}`
//! - `ClusterVersionEntity`, exactly one per cluster, id `ClusterVersion`
//!
//! Field names are the wire format shared with existing deployments.

use std::net::{IpAddr, SocketAddr};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tablegrid_core::{MembershipEntry, SiloAddress, SiloStatus, TableVersion};
use tablegrid_store::Document;

use crate::error::{ClusteringError, ClusteringResult};

/// Partition-key path of the cluster container.
pub const CLUSTER_PARTITION_KEY_PATH: &str = "/ClusterId";

/// Fixed id of the cluster version document.
pub const CLUSTER_VERSION_ID: &str = "ClusterVersion";

pub const SILO_ENTITY_TYPE: &str = "SiloEntity";
pub const CLUSTER_VERSION_ENTITY_TYPE: &str = "ClusterVersionEntity";

/// Persisted format of suspicion timestamps.
const SUSPECT_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f GMT";

/// Any document of the cluster container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "EntityType")]
pub enum ClusterEntity {
    #[serde(rename = "SiloEntity")]
    Silo(SiloEntity),
    #[serde(rename = "ClusterVersionEntity")]
    Version(ClusterVersionEntity),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiloEntity {
    pub id: String,
    #[serde(rename = "ClusterId")]
    pub cluster_id: String,
    #[serde(rename = "Address")]
    pub address: String,
    #[serde(rename = "Port")]
    pub port: u16,
    #[serde(rename = "Generation")]
    pub generation: i32,
    #[serde(rename = "Hostname")]
    pub hostname: String,
    #[serde(rename = "Status")]
    pub status: SiloStatus,
    #[serde(rename = "ProxyPort")]
    pub proxy_port: Option<u16>,
    #[serde(rename = "SiloName")]
    pub silo_name: String,
    #[serde(rename = "SuspectingSilos", default)]
    pub suspecting_silos: Vec<String>,
    #[serde(rename = "SuspectingTimes", default)]
    pub suspecting_times: Vec<String>,
    #[serde(rename = "StartTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "IAmAliveTime")]
    pub i_am_alive_time: DateTime<Utc>,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterVersionEntity {
    pub id: String,
    #[serde(rename = "ClusterId")]
    pub cluster_id: String,
    #[serde(rename = "ClusterVersion")]
    pub cluster_version: i32,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Document id of a silo row.
pub fn silo_id(address: &SiloAddress) -> String {
    format!("{}-{}-{}", address.ip(), address.port(), address.generation)
}

/// Render a suspicion timestamp in its persisted form.
pub fn format_suspect_time(at: &DateTime<Utc>) -> String {
    at.format(SUSPECT_TIME_FORMAT).to_string()
}

/// Parse a persisted suspicion timestamp.
pub fn parse_suspect_time(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, SUSPECT_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

impl SiloEntity {
    pub fn from_entry(entry: &MembershipEntry, cluster_id: &str) -> Self {
        let address = &entry.silo_address;
        let (suspecting_silos, suspecting_times): (Vec<String>, Vec<String>) = entry
            .suspect_times
            .iter()
            .map(|(silo, at)| (silo.to_parsable_string(), format_suspect_time(at)))
            .unzip();

        Self {
            id: silo_id(address),
            cluster_id: cluster_id.to_string(),
            address: address.ip().to_string(),
            port: address.port(),
            generation: address.generation,
            hostname: entry.host_name.clone(),
            status: entry.status,
            proxy_port: entry.proxy_port,
            silo_name: entry.silo_name.clone(),
            suspecting_silos,
            suspecting_times,
            start_time: entry.start_time,
            i_am_alive_time: entry.i_am_alive_time,
            etag: None,
        }
    }

    /// Decode into the domain entry. Mismatched suspector lists or
    /// unparsable addresses mean the row is corrupt.
    pub fn to_entry(&self) -> ClusteringResult<MembershipEntry> {
        if self.suspecting_silos.len() != self.suspecting_times.len() {
            return Err(ClusteringError::decode(
                &self.id,
                format!(
                    "SuspectingSilos has {} entries but SuspectingTimes has {}",
                    self.suspecting_silos.len(),
                    self.suspecting_times.len()
                ),
            ));
        }

        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|e| ClusteringError::decode(&self.id, format!("Address: {e}")))?;
        let silo_address = SiloAddress::new(SocketAddr::new(ip, self.port), self.generation);

        let mut suspect_times = Vec::with_capacity(self.suspecting_silos.len());
        for (silo, at) in self.suspecting_silos.iter().zip(&self.suspecting_times) {
            let silo = SiloAddress::from_parsable_string(silo)
                .map_err(|e| ClusteringError::decode(&self.id, e))?;
            let at = parse_suspect_time(at).ok_or_else(|| {
                ClusteringError::decode(&self.id, format!("bad suspicion time {at:?}"))
            })?;
            suspect_times.push((silo, at));
        }

        Ok(MembershipEntry {
            silo_address,
            host_name: self.hostname.clone(),
            silo_name: self.silo_name.clone(),
            status: self.status,
            proxy_port: self.proxy_port,
            start_time: self.start_time,
            i_am_alive_time: self.i_am_alive_time,
            suspect_times,
        })
    }

    /// Client-facing endpoint of a gateway row, if it exposes one.
    pub fn gateway_address(&self) -> ClusteringResult<Option<SiloAddress>> {
        let port = match self.proxy_port {
            Some(port) if port != 0 => port,
            _ => return Ok(None),
        };
        let ip: IpAddr = self
            .address
            .parse()
            .map_err(|e| ClusteringError::decode(&self.id, format!("Address: {e}")))?;
        Ok(Some(SiloAddress::new(SocketAddr::new(ip, port), self.generation)))
    }
}

impl ClusterVersionEntity {
    pub fn new(cluster_id: &str, version: i32) -> Self {
        Self {
            id: CLUSTER_VERSION_ID.to_string(),
            cluster_id: cluster_id.to_string(),
            cluster_version: version,
            etag: None,
        }
    }

    /// The table version this document represents.
    pub fn to_table_version(&self) -> ClusteringResult<TableVersion> {
        let etag = self
            .etag
            .clone()
            .ok_or_else(|| ClusteringError::decode(&self.id, "missing _etag"))?;
        Ok(TableVersion::new(self.cluster_version, etag))
    }
}

// ── Document conversion ────────────────────────────────────────────

impl ClusterEntity {
    /// Decode a raw document, dispatching on `EntityType`. An unknown or
    /// missing tag is a fatal decode error.
    pub fn from_document(doc: Document) -> ClusteringResult<Self> {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<no id>")
            .to_string();
        match doc.get("EntityType").and_then(Value::as_str) {
            Some(SILO_ENTITY_TYPE) | Some(CLUSTER_VERSION_ENTITY_TYPE) => {}
            Some(other) => {
                return Err(ClusteringError::decode(id, format!("unknown EntityType {other:?}")));
            }
            None => return Err(ClusteringError::decode(id, "missing EntityType")),
        }
        serde_json::from_value(doc).map_err(|e| ClusteringError::decode(id, e))
    }

    pub fn to_document(&self) -> ClusteringResult<Document> {
        serde_json::to_value(self).map_err(|e| ClusteringError::Encode(e.to_string()))
    }
}

impl From<SiloEntity> for ClusterEntity {
    fn from(silo: SiloEntity) -> Self {
        ClusterEntity::Silo(silo)
    }
}

impl From<ClusterVersionEntity> for ClusterEntity {
    fn from(version: ClusterVersionEntity) -> Self {
        ClusterEntity::Version(version)
    }
}

/// Decode a document expected to be a silo row.
pub fn decode_silo(doc: Document) -> ClusteringResult<SiloEntity> {
    match ClusterEntity::from_document(doc)? {
        ClusterEntity::Silo(silo) => Ok(silo),
        ClusterEntity::Version(version) => Err(ClusteringError::decode(
            version.id,
            "expected SiloEntity, found ClusterVersionEntity",
        )),
    }
}

/// Decode a document expected to be the cluster version.
pub fn decode_version(doc: Document) -> ClusteringResult<ClusterVersionEntity> {
    match ClusterEntity::from_document(doc)? {
        ClusterEntity::Version(version) => Ok(version),
        ClusterEntity::Silo(silo) => Err(ClusteringError::decode(
            silo.id,
            "expected ClusterVersionEntity, found SiloEntity",
        )),
    }
}
