//! The replication transport interface.

use async_trait::async_trait;

use crate::error::TransportError;
use crate::protocol::AppendEntriesRequest;
use crate::protocol::AppendEntriesResponse;
use crate::protocol::InstallSnapshotRequest;
use crate::protocol::InstallSnapshotResponse;
use crate::NodeId;

/// A trait defining the interface for sending replication RPCs to peers.
///
/// Implementations must keep cancellation apart from failure: a call cut
/// short by shutdown returns [`TransportError::Cancelled`] and is never
/// retried, while any other failure is treated as transient and retried by
/// the caller. Followers are expected to handle redelivery idempotently:
/// AppendEntries by `(term, prev_log_id, entries[0].index)`, InstallSnapshot
/// by `(request_id, request_index)`.
///
/// No per-RPC timeout is imposed at this layer; the transport either enforces
/// its own or blocks until cancelled.
#[async_trait]
pub trait ReplicationTransport: Send + Sync + 'static {
    /// Send an AppendEntries RPC to the target node.
    async fn send_append_entries(
        &self,
        target: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError>;

    /// Send an InstallSnapshot RPC to the target node.
    async fn send_install_snapshot(
        &self,
        target: NodeId,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse, TransportError>;
}
