//! Persisted document shape of the reminder table.
//!
//! One `ReminderEntity` per (grain, reminder name), id
//! `{grainKey}-{reminderName}`, partitioned by `{serviceId}_{hash:X8}`
//! where the hash is the grain's position on the reminder ring.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tablegrid_core::{GrainId, ReminderEntry};
use tablegrid_store::{Document, PartitionKey};

use crate::error::{ReminderError, ReminderResult};

/// Partition-key path of the reminder container.
pub const REMINDER_PARTITION_KEY_PATH: &str = "/PartitionKey";

pub const REMINDER_ENTITY_TYPE: &str = "ReminderEntity";

const TICKS_PER_SECOND: u64 = 10_000_000;
const NANOS_PER_TICK: u32 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReminderEntity {
    pub id: String,
    #[serde(rename = "EntityType")]
    pub entity_type: String,
    #[serde(rename = "PartitionKey")]
    pub partition_key: String,
    #[serde(rename = "ServiceId")]
    pub service_id: String,
    #[serde(rename = "GrainId")]
    pub grain_id: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "StartAt")]
    pub start_at: DateTime<Utc>,
    #[serde(rename = "Period")]
    pub period: String,
    #[serde(rename = "GrainHash")]
    pub grain_hash: u32,
    #[serde(rename = "_etag", default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
}

/// Document id of a reminder row.
pub fn reminder_id(grain: &GrainId, name: &str) -> String {
    format!("{}-{}", grain.key(), name)
}

/// Partition holding every reminder of `grain` within `service_id`.
pub fn reminder_partition(service_id: &str, grain: &GrainId) -> PartitionKey {
    PartitionKey::new(format!("{}_{:08X}", service_id, grain.uniform_hash()))
}

/// Render a period as `[d.]hh:mm:ss[.fffffff]`.
pub fn format_period(period: Duration) -> String {
    let total = period.as_secs();
    let days = total / 86_400;
    let hours = (total % 86_400) / 3_600;
    let minutes = (total % 3_600) / 60;
    let seconds = total % 60;
    let ticks = period.subsec_nanos() / NANOS_PER_TICK;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}."));
    }
    out.push_str(&format!("{hours:02}:{minutes:02}:{seconds:02}"));
    if ticks > 0 {
        out.push_str(&format!(".{ticks:07}"));
    }
    out
}

/// Parse a `[d.]hh:mm:ss[.fffffff]` period.
pub fn parse_period(s: &str) -> Option<Duration> {
    let first_colon = s.find(':')?;
    let (days, clock) = match s[..first_colon].find('.') {
        Some(dot) => (s[..dot].parse::<u64>().ok()?, &s[dot + 1..]),
        None => (0, s),
    };

    let (clock, fraction) = match clock.split_once('.') {
        Some((clock, fraction)) => (clock, Some(fraction)),
        None => (clock, None),
    };

    let mut parts = clock.split(':');
    let hours = parts.next()?.parse::<u64>().ok()?;
    let minutes = parts.next()?.parse::<u64>().ok()?;
    let seconds = parts.next()?.parse::<u64>().ok()?;
    if parts.next().is_some() || hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }

    let ticks = match fraction {
        Some(f) if !f.is_empty() && f.len() <= 7 && f.bytes().all(|b| b.is_ascii_digit()) => {
            // Right-pad to seven digits: ".5" is 5_000_000 ticks.
            format!("{f:0<7}").parse::<u64>().ok()?
        }
        Some(_) => return None,
        None => 0,
    };

    let secs = days * 86_400 + hours * 3_600 + minutes * 60 + seconds;
    Some(Duration::from_secs(secs) + Duration::from_nanos(ticks * (1_000_000_000 / TICKS_PER_SECOND)))
}

impl ReminderEntity {
    /// Build the document for `entry`. The ring hash and partition are
    /// recomputed from the grain identity.
    pub fn from_entry(entry: &ReminderEntry, service_id: &str) -> Self {
        Self {
            id: reminder_id(&entry.grain_id, &entry.reminder_name),
            entity_type: REMINDER_ENTITY_TYPE.to_string(),
            partition_key: reminder_partition(service_id, &entry.grain_id).as_str().to_string(),
            service_id: service_id.to_string(),
            grain_id: entry.grain_id.key().to_string(),
            name: entry.reminder_name.clone(),
            start_at: entry.start_at,
            period: format_period(entry.period),
            grain_hash: entry.grain_id.uniform_hash(),
            etag: None,
        }
    }

    pub fn to_entry(&self) -> ReminderResult<ReminderEntry> {
        let period = parse_period(&self.period)
            .ok_or_else(|| ReminderError::decode(&self.id, format!("bad Period {:?}", self.period)))?;
        Ok(ReminderEntry {
            grain_id: GrainId::new(self.grain_id.clone()),
            reminder_name: self.name.clone(),
            start_at: self.start_at,
            period,
            etag: self.etag.clone(),
        })
    }

    /// Decode a raw document; anything but a `ReminderEntity` is fatal.
    pub fn from_document(doc: Document) -> ReminderResult<Self> {
        let id = doc
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or("<no id>")
            .to_string();
        match doc.get("EntityType").and_then(Value::as_str) {
            Some(REMINDER_ENTITY_TYPE) => {}
            Some(other) => {
                return Err(ReminderError::decode(id, format!("unknown EntityType {other:?}")));
            }
            None => return Err(ReminderError::decode(id, "missing EntityType")),
        }
        serde_json::from_value(doc).map_err(|e| ReminderError::decode(id, e))
    }

    pub fn to_document(&self) -> ReminderResult<Document> {
        serde_json::to_value(self).map_err(|e| ReminderError::Encode(e.to_string()))
    }
}
