//! An in-memory log store implementing the `LogSource` trait.
//!
//! Used by the replication engine's test suite: entries live in a
//! `BTreeMap`, snapshots are real files under a caller-provided root so the
//! chunk streamer exercises its actual I/O path.

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use anyhow::anyhow;
use anyhow::Result;
use async_trait::async_trait;
use raft_replication::protocol::Entry;
use raft_replication::storage::FileInfo;
use raft_replication::storage::LogSource;
use raft_replication::storage::Snapshot;
use raft_replication::LogId;
use sha2::Digest;
use sha2::Sha256;
use tokio::sync::RwLock;

/// An in-memory Raft log with an optional snapshot manifest.
pub struct MemLog {
    inner: RwLock<MemLogInner>,
}

struct MemLogInner {
    /// First retained index; everything below lives in the snapshot.
    start_index: u64,
    /// One past the last appended index.
    next_index: u64,
    entries: BTreeMap<u64, Entry>,
    snapshot: Option<Snapshot>,
}

impl Default for MemLog {
    fn default() -> Self {
        Self::new()
    }
}

impl MemLog {
    /// Create a new, empty log starting at index 1.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemLogInner {
                start_index: 1,
                next_index: 1,
                entries: BTreeMap::new(),
                snapshot: None,
            }),
        }
    }

    /// Append one entry per payload, all in the given term.
    pub async fn append_payloads(&self, term: u64, payloads: impl IntoIterator<Item = Vec<u8>>) {
        let mut inner = self.inner.write().await;
        for payload in payloads {
            let index = inner.next_index;
            inner.entries.insert(index, Entry::new(LogId::new(term, index), payload));
            inner.next_index += 1;
        }
    }

    /// Install a snapshot manifest, pruning every entry it covers.
    ///
    /// The log's start index advances to `snapshot.term_index.index + 1`; the
    /// next index never moves backwards.
    pub async fn install_snapshot(&self, snapshot: Snapshot) {
        let mut inner = self.inner.write().await;
        let covered_next = snapshot.term_index.index + 1;
        tracing::debug!(snapshot=%snapshot.term_index, "installing snapshot manifest");
        inner.entries = inner.entries.split_off(&covered_next);
        inner.start_index = covered_next;
        if inner.next_index < covered_next {
            inner.next_index = covered_next;
        }
        inner.snapshot = Some(snapshot);
    }
}

#[async_trait]
impl LogSource for MemLog {
    async fn start_index(&self) -> u64 {
        self.inner.read().await.start_index
    }

    async fn next_index(&self) -> u64 {
        self.inner.read().await.next_index
    }

    async fn try_get_entry(&self, index: u64) -> Result<Option<Entry>> {
        Ok(self.inner.read().await.entries.get(&index).cloned())
    }

    async fn get_entries(&self, start: u64, stop: u64) -> Result<Vec<Entry>> {
        let inner = self.inner.read().await;
        if start < inner.start_index || stop > inner.next_index {
            return Err(anyhow!(
                "range [{}, {}) is outside the retained log [{}, {})",
                start,
                stop,
                inner.start_index,
                inner.next_index
            ));
        }
        Ok(inner.entries.range(start..stop).map(|(_, entry)| entry.clone()).collect())
    }

    async fn latest_snapshot(&self) -> Result<Option<Snapshot>> {
        Ok(self.inner.read().await.snapshot.clone())
    }
}

/// Write the given files under `root` and assemble a snapshot manifest with
/// their SHA-256 digests, the way a state-machine snapshotter would.
pub async fn build_snapshot(
    term_index: LogId,
    root: impl AsRef<Path>,
    files: &[(&str, &[u8])],
) -> Result<Snapshot> {
    let root: PathBuf = root.as_ref().to_path_buf();
    let mut infos = Vec::with_capacity(files.len());
    for (name, data) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, data).await?;
        infos.push(FileInfo {
            relative_path: (*name).to_string(),
            size: data.len() as u64,
            digest: Sha256::digest(data).to_vec(),
        });
    }
    Ok(Snapshot {
        term_index,
        root,
        files: infos,
    })
}
