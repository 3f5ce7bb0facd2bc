//! TableGrid document store.
//!
//! Defines the [`DocumentStore`] contract the membership and reminder
//! tables are written against, an embedded redb implementation with
//! etags and atomic batches, and the throttle-retry executor every
//! store call is wrapped in.

pub mod client;
pub mod document;
pub mod error;
pub mod query;
pub mod retry;
pub mod store;
pub mod tables;
pub mod throttle;

pub use client::DocumentStore;
pub use document::{
    BatchOperation, Document, ETAG_FIELD, ETag, ID_FIELD, PartitionKey, document_etag,
    document_id,
};
pub use error::{StoreError, StoreResult};
pub use query::{DEFAULT_PAGE_SIZE, Filter, Page, Query};
pub use retry::{execute_with_retries, query_all_with_retries};
pub use store::RedbDocumentStore;
pub use throttle::ThrottlingStore;
