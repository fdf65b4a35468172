//! Error types exposed by this crate.

use thiserror::Error;

use crate::NodeId;

/// An error produced by the RPC transport.
///
/// Cancellation is kept apart from I/O failure on purpose: a cancelled call
/// must never be retried, while a transient failure is retried after the
/// configured sync interval.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The call was interrupted by shutdown.
    #[error("rpc cancelled")]
    Cancelled,
    /// The call failed in a way that is expected to be recoverable.
    #[error("transport failure: {0}")]
    Transient(#[from] anyhow::Error),
}

/// An error which terminates a replication task.
///
/// Recoverable conditions (transient transport failures, follower
/// inconsistency, unknown reply codes) never surface here; they are handled
/// inside the replication loop.
#[derive(Debug, Error)]
pub enum ReplicationError {
    /// The replicator was told to stop, or a transport call was cancelled.
    #[error("replication cancelled")]
    Cancelled,
    /// A SUCCESS reply moved the follower's next index backwards.
    ///
    /// The next index is monotone under successful appends; a regression
    /// means the follower and leader disagree about already-acknowledged
    /// entries and no further progress can be trusted.
    #[error("follower {target} acked next index {acked} behind {next_index}")]
    RegressedAck {
        target: NodeId,
        next_index: u64,
        acked: u64,
    },
    /// The log store failed; the leader-level supervisor decides what to do.
    #[error("log store failure: {0}")]
    Storage(#[source] anyhow::Error),
}

/// Error variants related to configuration validation.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    /// The batch buffer must hold at least one entry.
    #[error("buffer_capacity must be greater than 0")]
    InvalidBufferCapacity,
    /// Snapshot chunks must carry at least one byte.
    #[error("snapshot_chunk_max_size must be greater than 0")]
    InvalidSnapshotChunkSize,
    /// The election timeout must leave room for a heartbeat cadence.
    #[error("min_election_timeout is too small to derive a heartbeat interval")]
    InvalidElectionTimeout,
    /// The retry backoff must fit within one heartbeat period.
    #[error("sync_interval must be positive and no greater than half the minimum election timeout")]
    InvalidSyncInterval,
}
