//! tablegrid-core: shared types for the TableGrid coordination tables.
//!
//! Holds the domain records exchanged with the host runtime (silo
//! membership entries, table versions, reminder entries), the grain
//! uniform hash used to place reminders on the hash ring, and the
//! TOML configuration shared by the daemon and the table crates.
//!
//! Nothing in this crate performs I/O beyond reading a config file.

pub mod config;
pub mod types;

pub use config::{ConfigError, TableGridConfig};
pub use types::*;
