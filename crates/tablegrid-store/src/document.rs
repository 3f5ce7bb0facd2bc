//! Document model shared by every store backend.
//!
//! A document is a JSON object carrying a string `id`. Backends add the
//! store-managed `_etag` field on every read; writers never set it.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// Field holding a document's identifier.
pub const ID_FIELD: &str = "id";

/// Store-managed field holding a document's concurrency token.
pub const ETAG_FIELD: &str = "_etag";

/// A JSON document as exchanged with the store.
pub type Document = Value;

/// Unit of atomic batches and of data placement within a container.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PartitionKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PartitionKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Opaque entity tag; changes on every successful write of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ETag {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// Return the document's `id`, or `BadRequest` if it has none.
pub fn document_id(doc: &Document) -> StoreResult<&str> {
    doc.get(ID_FIELD)
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| StoreError::BadRequest("document has no string `id`".into()))
}

/// Return the store-assigned etag of a document read from the store.
pub fn document_etag(doc: &Document) -> Option<ETag> {
    doc.get(ETAG_FIELD).and_then(Value::as_str).map(ETag::new)
}

/// Value of a top-level partition-key path such as `/ClusterId`.
pub fn partition_value<'a>(doc: &'a Document, path: &str) -> Option<&'a str> {
    let field = path.strip_prefix('/')?;
    doc.get(field).and_then(Value::as_str)
}

/// One step of an atomic single-partition batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOperation {
    /// Create a document; fails with `Conflict` if the id exists.
    Create { document: Document },
    /// Replace an existing document, optionally conditioned on its etag.
    Replace {
        id: String,
        document: Document,
        if_match: Option<ETag>,
    },
    /// Create or replace; `if_match` only applies when the document exists.
    Upsert {
        document: Document,
        if_match: Option<ETag>,
    },
    /// Delete an existing document, optionally conditioned on its etag.
    Delete { id: String, if_match: Option<ETag> },
}

impl BatchOperation {
    pub fn create(document: Document) -> Self {
        BatchOperation::Create { document }
    }

    pub fn replace(id: impl Into<String>, document: Document, if_match: Option<ETag>) -> Self {
        BatchOperation::Replace {
            id: id.into(),
            document,
            if_match,
        }
    }

    pub fn upsert(document: Document, if_match: Option<ETag>) -> Self {
        BatchOperation::Upsert { document, if_match }
    }

    pub fn delete(id: impl Into<String>, if_match: Option<ETag>) -> Self {
        BatchOperation::Delete {
            id: id.into(),
            if_match,
        }
    }
}
