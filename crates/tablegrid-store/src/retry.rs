//! Throttle-aware execution of store operations.
//!
//! A throttled request carries a server-suggested delay. The operation is
//! re-invoked after that delay until it succeeds or fails with anything
//! other than throttling. There is no attempt cap; an operation that is
//! throttled forever never returns.

use std::future::Future;

use tracing::debug;

use crate::client::DocumentStore;
use crate::document::Document;
use crate::error::{StoreError, StoreResult};
use crate::query::Query;

/// Run `f` until it returns anything but `TooManyRequests`.
///
/// The closure is invoked anew on every attempt, so it must rebuild its
/// request each time. Non-throttling errors are returned unchanged.
pub async fn execute_with_retries<T, F, Fut>(operation: &str, mut f: F) -> StoreResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StoreResult<T>>,
{
    let mut attempt: u32 = 1;
    loop {
        match f().await {
            Err(StoreError::TooManyRequests { retry_after }) => {
                let delay = retry_after.unwrap_or_default();
                debug!(operation, attempt, ?delay, "throttled; retrying");
                tokio::time::sleep(delay).await;
                attempt = attempt.saturating_add(1);
            }
            other => return other,
        }
    }
}

/// Drain a query page by page, retrying each throttled page request.
pub async fn query_all_with_retries(
    store: &dyn DocumentStore,
    container: &str,
    query: &Query,
) -> StoreResult<Vec<Document>> {
    let mut documents = Vec::new();
    let mut continuation: Option<String> = None;
    loop {
        let token = continuation.clone();
        let page = execute_with_retries("query", || store.query(container, query, token.clone())).await?;
        documents.extend(page.documents);
        match page.continuation {
            Some(next) => continuation = Some(next),
            None => return Ok(documents),
        }
    }
}
