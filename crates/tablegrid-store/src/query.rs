//! Query model: a partition scope, a predicate over top-level fields,
//! and page-at-a-time results.
//!
//! Comparison semantics follow document-database conventions: numbers
//! compare numerically, strings lexically, and any comparison involving
//! a missing field or mismatched types is false.

use std::cmp::Ordering;

use serde_json::Value;

use crate::document::{Document, PartitionKey};

/// Default number of documents returned per page.
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// Predicate over top-level document fields.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    Eq(String, Value),
    Ne(String, Value),
    Gt(String, Value),
    Ge(String, Value),
    Lt(String, Value),
    Le(String, Value),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.to_string(), value.into())
    }

    pub fn ne(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ne(field.to_string(), value.into())
    }

    pub fn gt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gt(field.to_string(), value.into())
    }

    pub fn ge(field: &str, value: impl Into<Value>) -> Self {
        Filter::Ge(field.to_string(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.to_string(), value.into())
    }

    pub fn le(field: &str, value: impl Into<Value>) -> Self {
        Filter::Le(field.to_string(), value.into())
    }

    pub fn and(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::And(filters.into_iter().collect())
    }

    pub fn or(filters: impl IntoIterator<Item = Filter>) -> Self {
        Filter::Or(filters.into_iter().collect())
    }

    /// Evaluate the predicate against a document.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::All => true,
            Filter::Eq(field, v) => compare(doc, field, v) == Some(Ordering::Equal),
            Filter::Ne(field, v) => {
                matches!(compare(doc, field, v), Some(Ordering::Less | Ordering::Greater))
                    || differs_in_kind(doc, field, v)
            }
            Filter::Gt(field, v) => compare(doc, field, v) == Some(Ordering::Greater),
            Filter::Ge(field, v) => {
                matches!(compare(doc, field, v), Some(Ordering::Greater | Ordering::Equal))
            }
            Filter::Lt(field, v) => compare(doc, field, v) == Some(Ordering::Less),
            Filter::Le(field, v) => {
                matches!(compare(doc, field, v), Some(Ordering::Less | Ordering::Equal))
            }
            Filter::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Filter::Or(filters) => filters.iter().any(|f| f.matches(doc)),
        }
    }
}

/// Order a document field against a literal. `None` when the field is
/// missing or the two values are not comparable.
fn compare(doc: &Document, field: &str, literal: &Value) -> Option<Ordering> {
    let value = doc.get(field)?;
    match (value, literal) {
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Number(a), Value::Number(b)) => {
            match (a.as_i64(), b.as_i64(), a.as_u64(), b.as_u64()) {
                (Some(x), Some(y), _, _) => Some(x.cmp(&y)),
                (_, _, Some(x), Some(y)) => Some(x.cmp(&y)),
                _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
            }
        }
        _ => None,
    }
}

/// A present field whose JSON kind differs from the literal's is
/// unequal to it (e.g. `null != 0`).
fn differs_in_kind(doc: &Document, field: &str, literal: &Value) -> bool {
    match doc.get(field) {
        Some(value) => std::mem::discriminant(value) != std::mem::discriminant(literal),
        None => false,
    }
}

/// A query over one container.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Restrict to one partition; `None` scans across partitions.
    pub partition: Option<PartitionKey>,
    pub filter: Filter,
    pub page_size: usize,
}

impl Query {
    /// Cross-partition query.
    pub fn new(filter: Filter) -> Self {
        Self {
            partition: None,
            filter,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Query scoped to a single partition.
    pub fn in_partition(partition: PartitionKey, filter: Filter) -> Self {
        Self {
            partition: Some(partition),
            filter,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }
}

/// One page of query results.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub documents: Vec<Document>,
    /// Opaque token to fetch the next page; `None` on the last page.
    pub continuation: Option<String>,
}

impl Page {
    pub fn has_more(&self) -> bool {
        self.continuation.is_some()
    }
}
