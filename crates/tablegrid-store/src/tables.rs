//! redb table definitions for the embedded document store.
//!
//! Each container gets its own document table whose keys are
//! `{partition}\u{1f}{id}`, so a partition is one contiguous key range.
//! Values are the JSON-serialized documents including their `_etag`.

use redb::TableDefinition;

/// Container definitions keyed by container name (JSON `ContainerMeta`).
pub const CONTAINERS: TableDefinition<&str, &[u8]> = TableDefinition::new("containers");

/// Store-wide counters keyed by name.
pub const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

/// Key in [`META`] holding the last etag sequence number issued.
pub const ETAG_SEQUENCE: &str = "etag_sequence";

/// Separates the partition key from the document id in document-table keys.
pub const KEY_SEPARATOR: char = '\u{1f}';

/// Name of the redb table holding a container's documents.
pub fn documents_table_name(container: &str) -> String {
    format!("docs/{container}")
}

/// Table definition for a container's documents.
pub fn documents(table_name: &str) -> TableDefinition<'_, &'static str, &'static [u8]> {
    TableDefinition::new(table_name)
}

/// Document-table key for `id` within `partition`.
pub fn document_key(partition: &str, id: &str) -> String {
    format!("{partition}{KEY_SEPARATOR}{id}")
}

/// Key prefix shared by every document of `partition`.
pub fn partition_prefix(partition: &str) -> String {
    format!("{partition}{KEY_SEPARATOR}")
}
