//! Read-then-conditionally-write loop over the membership table.
//!
//! Membership mutations return `false` when the table moved underneath
//! the caller. [`OptimisticRetry`] re-reads the table and re-runs the
//! mutation until it commits or the attempt budget is spent.

use std::future::Future;

use tracing::{debug, warn};

use tablegrid_core::MembershipTableData;

use crate::error::{ClusteringError, ClusteringResult};
use crate::membership::MembershipTable;

const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct OptimisticRetry {
    max_attempts: u32,
}

impl Default for OptimisticRetry {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl OptimisticRetry {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    /// Read a fresh snapshot and hand it to `mutate`; repeat while `mutate`
    /// reports a lost race. Returns the attempt that committed.
    pub async fn run<F, Fut>(
        &self,
        table: &MembershipTable,
        operation: &'static str,
        mut mutate: F,
    ) -> ClusteringResult<u32>
    where
        F: FnMut(MembershipTableData) -> Fut,
        Fut: Future<Output = ClusteringResult<bool>>,
    {
        for attempt in 1..=self.max_attempts {
            let snapshot = table.read_all().await?;
            if mutate(snapshot).await? {
                debug!(cluster_id = %table.cluster_id(), operation, attempt, "optimistic write committed");
                return Ok(attempt);
            }
            debug!(cluster_id = %table.cluster_id(), operation, attempt, "optimistic write lost; re-reading");
        }

        warn!(cluster_id = %table.cluster_id(), operation, attempts = self.max_attempts, "optimistic write exhausted attempts");
        Err(ClusteringError::ContentionExhausted {
            operation,
            attempts: self.max_attempts,
        })
    }
}
