//! TableGrid clustering.
//!
//! The membership table protocol over a [`tablegrid_store::DocumentStore`]:
//! silo rows and a cluster version document sharing one partition per
//! cluster, version-guarded atomic batches for membership changes, the
//! gateway directory derived from it, and the optimistic retry loop
//! callers drive mutations with.

pub mod entity;
pub mod error;
pub mod gateway;
pub mod membership;
pub mod optimistic;

pub use entity::{ClusterEntity, ClusterVersionEntity, SiloEntity, silo_id};
pub use error::{ClusteringError, ClusteringResult};
pub use gateway::GatewayDirectory;
pub use membership::MembershipTable;
pub use optimistic::OptimisticRetry;
