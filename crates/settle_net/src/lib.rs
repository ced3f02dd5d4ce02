//! Settle Distribution Layer
//!
//! Block partitioning of the domain, per-rank particle ownership, ghost
//! replication and the collectives (reduce, broadcast, all-reduce) the
//! simulation loop synchronizes on. Ranks live in one process; all
//! cross-rank traffic goes through explicit message exchanges on the
//! [`Cluster`].

pub mod authority;
pub mod block;
pub mod cluster;
pub mod notifications;
pub mod replication;

pub use authority::ContactFilter;
pub use block::BlockForest;
pub use cluster::{Cluster, RankDomain};
pub use replication::SyncStrategy;
pub use settle_core::data::Rank;

/// Block (spatial partition) identifier in linear x-fastest order
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub usize);
