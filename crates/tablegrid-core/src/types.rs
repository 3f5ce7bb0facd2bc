//! Domain types for the membership and reminder tables.
//!
//! These are the records the host runtime reads and writes. Their
//! persisted document shapes live in the clustering and reminder
//! crates; this module only knows about the logical fields.

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Error returned when a textual silo address cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid silo address {input:?}: {reason}")]
pub struct ParseSiloAddressError {
    pub input: String,
    pub reason: &'static str,
}

// ── Silo addressing ────────────────────────────────────────────────

/// Network identity of a silo process.
///
/// The generation disambiguates restarts on the same endpoint: a
/// restarted process always gets a new generation and therefore a new
/// membership row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SiloAddress {
    pub endpoint: SocketAddr,
    pub generation: i32,
}

impl SiloAddress {
    pub fn new(endpoint: SocketAddr, generation: i32) -> Self {
        Self {
            endpoint,
            generation,
        }
    }

    pub fn ip(&self) -> IpAddr {
        self.endpoint.ip()
    }

    pub fn port(&self) -> u16 {
        self.endpoint.port()
    }

    /// Render as `{address}:{port}@{generation}`, the form persisted in
    /// suspector lists.
    pub fn to_parsable_string(&self) -> String {
        format!("{}:{}@{}", self.ip(), self.port(), self.generation)
    }

    /// Inverse of [`SiloAddress::to_parsable_string`].
    pub fn from_parsable_string(s: &str) -> Result<Self, ParseSiloAddressError> {
        let fail = |reason| ParseSiloAddressError {
            input: s.to_string(),
            reason,
        };

        let (endpoint, generation) = s.rsplit_once('@').ok_or_else(|| fail("missing '@'"))?;
        let generation = generation
            .parse::<i32>()
            .map_err(|_| fail("bad generation"))?;
        // rsplit so that IPv6 literals keep their colons.
        let (ip, port) = endpoint
            .rsplit_once(':')
            .ok_or_else(|| fail("missing port"))?;
        let ip = ip
            .trim_start_matches('[')
            .trim_end_matches(']')
            .parse::<IpAddr>()
            .map_err(|_| fail("bad ip address"))?;
        let port = port.parse::<u16>().map_err(|_| fail("bad port"))?;

        Ok(Self::new(SocketAddr::new(ip, port), generation))
    }

    /// Client-connectable gateway URI for this address.
    pub fn to_gateway_uri(&self) -> String {
        format!("gwy.tcp://{}:{}/{}", self.ip(), self.port(), self.generation)
    }
}

impl fmt::Display for SiloAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_parsable_string())
    }
}

impl FromStr for SiloAddress {
    type Err = ParseSiloAddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_parsable_string(s)
    }
}

// ── Membership ────────────────────────────────────────────────────

/// Lifecycle status of a silo as recorded in the membership table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SiloStatus {
    Joining,
    Active,
    ShuttingDown,
    Stopping,
    Dead,
}

impl SiloStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiloStatus::Joining => "Joining",
            SiloStatus::Active => "Active",
            SiloStatus::ShuttingDown => "ShuttingDown",
            SiloStatus::Stopping => "Stopping",
            SiloStatus::Dead => "Dead",
        }
    }
}

impl fmt::Display for SiloStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One silo's row in the membership table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipEntry {
    pub silo_address: SiloAddress,
    pub host_name: String,
    pub silo_name: String,
    pub status: SiloStatus,
    /// Client-facing gateway port, if the silo exposes one.
    pub proxy_port: Option<u16>,
    pub start_time: DateTime<Utc>,
    /// Last liveness heartbeat ("I am alive").
    pub i_am_alive_time: DateTime<Utc>,
    /// Ordered (suspector, suspicion time) pairs.
    pub suspect_times: Vec<(SiloAddress, DateTime<Utc>)>,
}

impl MembershipEntry {
    /// Build a fresh entry with no suspicions; the heartbeat starts at
    /// `start_time`.
    pub fn new(
        silo_address: SiloAddress,
        host_name: impl Into<String>,
        silo_name: impl Into<String>,
        status: SiloStatus,
        proxy_port: Option<u16>,
        start_time: DateTime<Utc>,
    ) -> Self {
        Self {
            silo_address,
            host_name: host_name.into(),
            silo_name: silo_name.into(),
            status,
            proxy_port,
            start_time,
            i_am_alive_time: start_time,
            suspect_times: Vec::new(),
        }
    }

    pub fn add_suspector(&mut self, suspector: SiloAddress, at: DateTime<Utc>) {
        self.suspect_times.push((suspector, at));
    }
}

/// Version of the membership table plus its concurrency token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableVersion {
    pub version: i32,
    pub etag: String,
}

impl TableVersion {
    pub fn new(version: i32, etag: impl Into<String>) -> Self {
        Self {
            version,
            etag: etag.into(),
        }
    }

    /// The version a successful mutation will publish. Keeps the etag so
    /// the write can still be conditioned on the version it was read at.
    /// `None` once the counter is exhausted.
    pub fn next(&self) -> Option<Self> {
        Some(Self {
            version: self.version.checked_add(1)?,
            etag: self.etag.clone(),
        })
    }
}

/// Snapshot of the membership table: rows with their etags, and the
/// table version (absent only if the table was never initialized).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipTableData {
    pub members: Vec<(MembershipEntry, String)>,
    pub version: Option<TableVersion>,
}

impl MembershipTableData {
    pub fn new(members: Vec<(MembershipEntry, String)>, version: Option<TableVersion>) -> Self {
        Self { members, version }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Find the row (and its etag) for a silo.
    pub fn get(&self, silo: &SiloAddress) -> Option<&(MembershipEntry, String)> {
        self.members.iter().find(|(e, _)| &e.silo_address == silo)
    }
}

// ── Reminders ─────────────────────────────────────────────────────

/// Stable string identity of a grain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GrainId(String);

impl GrainId {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn key(&self) -> &str {
        &self.0
    }

    /// 32-bit position of this grain on the reminder hash ring.
    ///
    /// First four bytes (big-endian) of the SHA-256 of the key string, so
    /// every process computes the same value.
    pub fn uniform_hash(&self) -> u32 {
        let digest = Sha256::digest(self.0.as_bytes());
        u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
    }
}

impl fmt::Display for GrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GrainId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A scheduled reminder for one grain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReminderEntry {
    pub grain_id: GrainId,
    pub reminder_name: String,
    pub start_at: DateTime<Utc>,
    pub period: Duration,
    /// Concurrency token of the stored row; `None` for a not-yet-stored entry.
    pub etag: Option<String>,
}

impl ReminderEntry {
    pub fn new(
        grain_id: GrainId,
        reminder_name: impl Into<String>,
        start_at: DateTime<Utc>,
        period: Duration,
    ) -> Self {
        Self {
            grain_id,
            reminder_name: reminder_name.into(),
            start_at,
            period,
            etag: None,
        }
    }
}

/// Result set of a reminder table read.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderTableData {
    pub reminders: Vec<ReminderEntry>,
}

impl ReminderTableData {
    pub fn new(reminders: Vec<ReminderEntry>) -> Self {
        Self { reminders }
    }

    pub fn len(&self) -> usize {
        self.reminders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reminders.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReminderEntry> {
        self.reminders.iter()
    }
}
