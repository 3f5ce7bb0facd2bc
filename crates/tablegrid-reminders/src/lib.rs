//! TableGrid reminders.
//!
//! The reminder table protocol over a [`tablegrid_store::DocumentStore`]:
//! one document per (grain, reminder name), etag-conditioned upserts and
//! deletes, and hash-ring range listings used when reminder ownership is
//! rebalanced across silos.

pub mod entity;
pub mod error;
pub mod table;

pub use entity::{ReminderEntity, format_period, parse_period, reminder_id, reminder_partition};
pub use error::{ReminderError, ReminderResult};
pub use table::{ReminderTable, ring_range_filter};
