//! The leader-side log-replication engine of a Raft cluster.
//!
//! A Raft leader owns one [`Replicator`] per follower. The replicator drives
//! that follower toward log convergence: it ships newly appended entries,
//! emits keep-alive heartbeats while the log is idle, falls back to streaming
//! a snapshot when the follower has dropped behind the log-start boundary,
//! and feeds progress events back to the leader's commit tracker.
//!
//! The durable log, the RPC transport and the leader's event loop are
//! external collaborators, reached through the [`LogSource`],
//! [`ReplicationTransport`] and event-channel contracts.

pub mod config;
pub mod error;
pub mod network;
pub mod progress;
pub mod protocol;
pub mod replication;
pub mod storage;

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

pub use async_trait;
pub use crate::config::Config;
pub use crate::error::ConfigError;
pub use crate::error::ReplicationError;
pub use crate::error::TransportError;
pub use crate::network::ReplicationTransport;
pub use crate::progress::FollowerProgress;
pub use crate::replication::ReplicaEvent;
pub use crate::replication::ReplicationMetrics;
pub use crate::replication::Replicator;
pub use crate::storage::LogSource;
pub use crate::storage::Snapshot;

/// A Raft node's ID.
pub type NodeId = u64;

/// The identity of a log position: the term in which the entry was created
/// and its index in the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogId {
    pub term: u64,
    pub index: u64,
}

impl LogId {
    pub fn new(term: u64, index: u64) -> Self {
        Self { term, index }
    }
}

impl fmt::Display for LogId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.term, self.index)
    }
}

/// A compact, human readable description of a message, for logging.
///
/// `Debug` output of a request carrying a payload of entries is far too noisy
/// for the replication hot path; `summary()` keeps log lines short.
pub trait MessageSummary {
    fn summary(&self) -> String;
}
