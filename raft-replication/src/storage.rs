//! The log store interface and snapshot data types.

use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;

use crate::protocol::Entry;
use crate::LogId;

/// Metadata of one file belonging to a snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct FileInfo {
    /// The file's path relative to the snapshot root.
    pub relative_path: String,
    /// The file's size in bytes.
    pub size: u64,
    /// The file's precomputed digest.
    pub digest: Vec<u8>,
}

/// An immutable snapshot manifest.
///
/// The files are streamed to a follower in list order. The manifest is
/// produced by the state-machine side; this crate only reads it.
#[derive(Clone, Debug)]
pub struct Snapshot {
    /// The log position the snapshot covers, inclusive.
    pub term_index: LogId,
    /// The directory the file paths are relative to.
    pub root: PathBuf,
    pub files: Vec<FileInfo>,
}

/// A trait defining the interface to the durable Raft log.
///
/// All reads are point-in-time: the log may grow concurrently, but retained
/// entries are immutable and ranges below `next_index()` stay contiguous.
///
/// Errors returned from these methods terminate the calling replication task;
/// the leader-level supervisor decides whether to restart it.
#[async_trait]
pub trait LogSource: Send + Sync + 'static {
    /// The first log index still retained; entries below it have been
    /// truncated into a snapshot.
    async fn start_index(&self) -> u64;

    /// One past the index of the last appended entry.
    async fn next_index(&self) -> u64;

    /// Try to get a log entry.
    ///
    /// Returns `None` when the entry has been truncated into a snapshot.
    async fn try_get_entry(&self, index: u64) -> Result<Option<Entry>>;

    /// Get a contiguous series of log entries, `[start, stop)`.
    async fn get_entries(&self, start: u64, stop: u64) -> Result<Vec<Entry>>;

    /// The most recent snapshot, if one has been taken.
    async fn latest_snapshot(&self) -> Result<Option<Snapshot>>;
}
