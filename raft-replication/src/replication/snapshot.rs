//! Lazy chunk stream over a snapshot's files.

use std::cmp;
use std::io;
use std::path::PathBuf;

use tokio::fs::File;
use tokio::io::AsyncReadExt;

use crate::protocol::FileChunk;
use crate::protocol::InstallSnapshotRequest;
use crate::storage::FileInfo;
use crate::storage::Snapshot;
use crate::LogId;
use crate::NodeId;

/// A pull-based producer of ordered InstallSnapshot requests for one
/// snapshot.
///
/// Files are streamed in manifest order, one chunk per request. The streamer
/// owns the handle of the file it is currently reading; the handle is
/// released when the file is exhausted, when a read fails, or when the
/// streamer itself is dropped mid-pass.
pub(crate) struct SnapshotStreamer {
    term: u64,
    leader_id: NodeId,
    target: NodeId,
    snapshot: LogId,
    root: PathBuf,
    files: Vec<FileInfo>,
    chunk_max: u64,
    /// Fresh unique token for this install pass.
    request_id: u64,
    /// Increments across all chunks of all files.
    request_index: u64,
    file_idx: usize,
    current: Option<OpenFile>,
}

struct OpenFile {
    file: File,
    info: FileInfo,
    offset: u64,
    chunk_index: u64,
    /// One reusable read buffer per file, sized `min(chunk_max, file size)`.
    buf: Vec<u8>,
}

impl SnapshotStreamer {
    pub(crate) fn new(snapshot: &Snapshot, term: u64, leader_id: NodeId, target: NodeId, chunk_max: u64) -> Self {
        Self {
            term,
            leader_id,
            target,
            snapshot: snapshot.term_index,
            root: snapshot.root.clone(),
            files: snapshot.files.clone(),
            chunk_max,
            request_id: rand::random(),
            request_index: 0,
            file_idx: 0,
            current: None,
        }
    }

    /// The log position covered by the snapshot being streamed.
    pub(crate) fn snapshot_id(&self) -> LogId {
        self.snapshot
    }

    /// Produce the next request, or `None` once every file has been fully
    /// chunked. A read failure terminates the stream; the current file handle
    /// is released on that path as well.
    pub(crate) async fn next_request(&mut self) -> Result<Option<InstallSnapshotRequest>, io::Error> {
        if self.current.is_none() {
            if self.file_idx == self.files.len() {
                return Ok(None);
            }
            let info = self.files[self.file_idx].clone();
            let path = self.root.join(&info.relative_path);
            let file = File::open(&path).await?;
            let buf = vec![0u8; cmp::min(self.chunk_max, info.size) as usize];
            self.current = Some(OpenFile {
                file,
                info,
                offset: 0,
                chunk_index: 0,
                buf,
            });
        }

        let cur = self.current.as_mut().expect("current file was just opened");
        let len = cmp::min(self.chunk_max, cur.info.size - cur.offset) as usize;
        if let Err(err) = cur.file.read_exact(&mut cur.buf[..len]).await {
            self.current = None;
            return Err(err);
        }

        let file_done = cur.offset + len as u64 == cur.info.size;
        let chunk = FileChunk {
            filename: cur.info.relative_path.clone(),
            offset: cur.offset,
            chunk_index: cur.chunk_index,
            data: cur.buf[..len].to_vec(),
            done: file_done,
            digest: cur.info.digest.clone(),
        };
        let is_last_file = self.file_idx + 1 == self.files.len();
        let req = InstallSnapshotRequest {
            term: self.term,
            leader_id: self.leader_id,
            target: self.target,
            request_id: self.request_id,
            request_index: self.request_index,
            snapshot: self.snapshot,
            chunk,
            done: file_done && is_last_file,
        };

        self.request_index += 1;
        cur.offset += len as u64;
        cur.chunk_index += 1;
        if file_done {
            self.current = None;
            self.file_idx += 1;
        }
        Ok(Some(req))
    }
}
