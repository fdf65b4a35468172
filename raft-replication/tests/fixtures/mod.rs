//! Fixtures for testing the replication engine.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use memlog::MemLog;
use raft_replication::error::TransportError;
use raft_replication::network::ReplicationTransport;
use raft_replication::progress::FollowerProgress;
use raft_replication::protocol::AppendEntriesRequest;
use raft_replication::protocol::AppendEntriesResponse;
use raft_replication::protocol::AppendResult;
use raft_replication::protocol::InstallSnapshotRequest;
use raft_replication::protocol::InstallSnapshotResponse;
use raft_replication::protocol::InstallSnapshotResult;
use raft_replication::replication::ReplicaEvent;
use raft_replication::Config;
use raft_replication::NodeId;
use raft_replication::Replicator;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio::time::Instant;
use tracing::Span;
use tracing_subscriber::prelude::*;

pub const LEADER_ID: NodeId = 0;
pub const TARGET_ID: NodeId = 1;

/// Initialize the tracing system.
pub fn init_tracing() {
    let fmt_layer = tracing_subscriber::fmt::Layer::default()
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::FULL)
        .with_ansi(false);
    let subscriber = tracing_subscriber::Registry::default()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(fmt_layer);
    let _ = tracing::subscriber::set_global_default(subscriber);
}

/// A request observed by the stub transport, with the instant it was sent.
#[derive(Debug, Clone)]
pub enum SeenRpc {
    Append(Instant, AppendEntriesRequest),
    Snapshot(Instant, InstallSnapshotRequest),
}

impl SeenRpc {
    pub fn append(self) -> (Instant, AppendEntriesRequest) {
        match self {
            SeenRpc::Append(at, req) => (at, req),
            SeenRpc::Snapshot(_, req) => panic!("expected an AppendEntries request, got snapshot chunk {:?}", req),
        }
    }

    pub fn snapshot(self) -> (Instant, InstallSnapshotRequest) {
        match self {
            SeenRpc::Snapshot(at, req) => (at, req),
            SeenRpc::Append(_, req) => panic!("expected an InstallSnapshot request, got {:?}", req),
        }
    }
}

/// A stub transport which records every request in send order and answers
/// from a programmable reply queue, acknowledging success when the queue is
/// empty.
pub struct StubTransport {
    seen_tx: mpsc::UnboundedSender<SeenRpc>,
    append_replies: Mutex<VecDeque<Result<AppendEntriesResponse, TransportError>>>,
    snapshot_replies: Mutex<VecDeque<Result<InstallSnapshotResponse, TransportError>>>,
}

impl StubTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<SeenRpc>) {
        let (seen_tx, seen_rx) = mpsc::unbounded_channel();
        let this = Arc::new(Self {
            seen_tx,
            append_replies: Mutex::new(VecDeque::new()),
            snapshot_replies: Mutex::new(VecDeque::new()),
        });
        (this, seen_rx)
    }

    pub fn push_append_reply(&self, reply: Result<AppendEntriesResponse, TransportError>) {
        self.append_replies.lock().unwrap().push_back(reply);
    }

    pub fn push_snapshot_reply(&self, reply: Result<InstallSnapshotResponse, TransportError>) {
        self.snapshot_replies.lock().unwrap().push_back(reply);
    }

    /// The reply a healthy, in-sync follower would send.
    pub fn ack(req: &AppendEntriesRequest) -> AppendEntriesResponse {
        let next_index = match req.entries.last() {
            Some(entry) => entry.log_id.index + 1,
            None => req.prev_log_id.map(|id| id.index + 1).unwrap_or(1),
        };
        AppendEntriesResponse {
            result: AppendResult::Success,
            term: req.term,
            next_index,
        }
    }
}

#[async_trait]
impl ReplicationTransport for StubTransport {
    async fn send_append_entries(
        &self,
        _target: NodeId,
        req: AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, TransportError> {
        let _ = self.seen_tx.send(SeenRpc::Append(Instant::now(), req.clone()));
        match self.append_replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(Self::ack(&req)),
        }
    }

    async fn send_install_snapshot(
        &self,
        _target: NodeId,
        req: InstallSnapshotRequest,
    ) -> Result<InstallSnapshotResponse, TransportError> {
        let _ = self.seen_tx.send(SeenRpc::Snapshot(Instant::now(), req));
        match self.snapshot_replies.lock().unwrap().pop_front() {
            Some(reply) => reply,
            None => Ok(InstallSnapshotResponse {
                term: 0,
                result: InstallSnapshotResult::Success,
            }),
        }
    }
}

/// A replicator wired to a `MemLog` and a `StubTransport`.
pub struct Harness {
    pub replicator: Replicator,
    pub progress: Arc<FollowerProgress>,
    pub log: Arc<MemLog>,
    pub transport: Arc<StubTransport>,
    pub seen_rx: mpsc::UnboundedReceiver<SeenRpc>,
    pub event_rx: mpsc::UnboundedReceiver<(ReplicaEvent, Span)>,
}

impl Harness {
    pub fn spawn(term: u64, config: Arc<Config>, log: Arc<MemLog>, next_index: u64, attending_vote: bool) -> Self {
        let (transport, seen_rx) = StubTransport::new();
        Self::spawn_with_transport(term, config, log, transport, seen_rx, next_index, attending_vote)
    }

    pub fn spawn_with_transport(
        term: u64,
        config: Arc<Config>,
        log: Arc<MemLog>,
        transport: Arc<StubTransport>,
        seen_rx: mpsc::UnboundedReceiver<SeenRpc>,
        next_index: u64,
        attending_vote: bool,
    ) -> Self {
        let progress = Arc::new(FollowerProgress::new(next_index, attending_vote));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let replicator = Replicator::spawn(
            LEADER_ID,
            TARGET_ID,
            term,
            config,
            progress.clone(),
            log.clone(),
            transport.clone(),
            event_tx,
        );
        Self {
            replicator,
            progress,
            log,
            transport,
            seen_rx,
            event_rx,
        }
    }

    /// Await the next request the transport sees.
    pub async fn next_seen(&mut self) -> SeenRpc {
        timeout(Duration::from_secs(5), self.seen_rx.recv())
            .await
            .expect("timed out waiting for an rpc")
            .expect("transport channel closed")
    }

    /// Await the next event emitted toward the leader.
    pub async fn next_event(&mut self) -> ReplicaEvent {
        let (event, _span) = timeout(Duration::from_secs(5), self.event_rx.recv())
            .await
            .expect("timed out waiting for a replica event")
            .expect("event channel closed");
        event
    }
}
