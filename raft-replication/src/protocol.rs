//! Replication RPC data types.

use serde::Deserialize;
use serde::Serialize;

use crate::LogId;
use crate::MessageSummary;
use crate::NodeId;

/// A Raft log entry.
///
/// Entries are immutable once appended; indices are dense and monotonically
/// increasing from the log's start index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub log_id: LogId,
    /// The opaque application payload carried by this entry.
    pub payload: Vec<u8>,
}

impl Entry {
    pub fn new(log_id: LogId, payload: Vec<u8>) -> Self {
        Self { log_id, payload }
    }
}

impl MessageSummary for Entry {
    fn summary(&self) -> String {
        format!("{}({}B)", self.log_id, self.payload.len())
    }
}

impl MessageSummary for &[Entry] {
    fn summary(&self) -> String {
        self.iter().map(|x| x.summary()).collect::<Vec<_>>().join(",")
    }
}

/// An RPC sent by a cluster leader to replicate log entries (§5.3), and as a
/// heartbeat (§5.2).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesRequest {
    /// The leader's current term.
    pub term: u64,
    /// The leader's ID.
    pub leader_id: NodeId,
    /// The ID of the follower this request is addressed to.
    pub target: NodeId,
    /// The log position immediately preceding `entries[0]`, or the log tip
    /// when `entries` is empty.
    ///
    /// `None` only at leader genesis, when no entry precedes the first index
    /// and no snapshot exists.
    pub prev_log_id: Option<LogId>,
    /// The new log entries to store.
    ///
    /// This may be empty when the leader is sending heartbeats. Entries are
    /// batched for efficiency.
    pub entries: Vec<Entry>,
    /// True when this request carries no entries and only asserts leadership.
    pub is_heartbeat: bool,
}

impl MessageSummary for AppendEntriesRequest {
    fn summary(&self) -> String {
        format!(
            "term={}, leader_id={}, target={}, prev_log_id={:?}, heartbeat={}, n={}",
            self.term,
            self.leader_id,
            self.target,
            self.prev_log_id,
            self.is_heartbeat,
            self.entries.len()
        )
    }
}

/// The result code of an AppendEntries RPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AppendResult {
    /// The follower appended the entries; `next_index` is its new expectation.
    Success,
    /// The follower no longer recognizes the sender as leader.
    NotLeader,
    /// The consistency check failed; `next_index` is the follower-supplied
    /// backoff point.
    Inconsistency,
    /// A reply code this implementation does not understand.
    Unrecognized,
}

/// The response to an `AppendEntriesRequest`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppendEntriesResponse {
    pub result: AppendResult,
    /// The responding node's current term, for the leader to update itself.
    pub term: u64,
    /// The next log index the follower expects.
    pub next_index: u64,
}

impl MessageSummary for AppendEntriesResponse {
    fn summary(&self) -> String {
        format!("result={:?}, term={}, next_index={}", self.result, self.term, self.next_index)
    }
}

/// One contiguous piece of one snapshot file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FileChunk {
    /// The file's path relative to the snapshot root.
    pub filename: String,
    /// Byte offset of `data` within the file.
    pub offset: u64,
    /// 0-based index of this chunk within the file.
    pub chunk_index: u64,
    pub data: Vec<u8>,
    /// True on the final chunk of the file.
    pub done: bool,
    /// The whole file's digest, carried on every chunk of that file.
    pub digest: Vec<u8>,
}

/// An RPC sent by the Raft leader to stream a snapshot to a follower (§7).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallSnapshotRequest {
    /// The leader's current term.
    pub term: u64,
    /// The leader's ID.
    pub leader_id: NodeId,
    /// The ID of the follower this request is addressed to.
    pub target: NodeId,
    /// A token unique to one snapshot install pass.
    pub request_id: u64,
    /// Increments across all chunks of all files of one install pass.
    pub request_index: u64,
    /// The log position the snapshot covers, inclusive.
    pub snapshot: LogId,
    /// The single file chunk carried by this request.
    pub chunk: FileChunk,
    /// True only on the chunk that closes the last file of the snapshot.
    pub done: bool,
}

impl MessageSummary for InstallSnapshotRequest {
    fn summary(&self) -> String {
        format!(
            "term={}, leader_id={}, target={}, request_id={:x}/{}, snapshot={}, file={}, offset={}, len={}, done={}",
            self.term,
            self.leader_id,
            self.target,
            self.request_id,
            self.request_index,
            self.snapshot,
            self.chunk.filename,
            self.chunk.offset,
            self.chunk.data.len(),
            self.done
        )
    }
}

/// The result code of an InstallSnapshot RPC.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstallSnapshotResult {
    /// The chunk was accepted.
    Success,
    /// The chunk was accepted and more are expected.
    InProgress,
    /// The follower already holds this snapshot.
    AlreadyInstalled,
    /// The follower no longer recognizes the sender as leader.
    NotLeader,
}

/// The response to an `InstallSnapshotRequest`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstallSnapshotResponse {
    /// The responding node's current term, for the leader to update itself.
    pub term: u64,
    pub result: InstallSnapshotResult,
}

impl InstallSnapshotResponse {
    /// Whether the stream may continue after this reply.
    pub fn is_success(&self) -> bool {
        !matches!(self.result, InstallSnapshotResult::NotLeader)
    }
}

impl MessageSummary for InstallSnapshotResponse {
    fn summary(&self) -> String {
        format!("result={:?}, term={}", self.result, self.term)
    }
}
