//! Replication stream.
//!
//! One [`Replicator`] task runs per follower, owned by the leader. The task
//! is purely sequential: it never has more than one RPC in flight, so replies
//! are always consumed in send order.

mod buffer;
mod snapshot;

use std::cmp;
use std::sync::Arc;

use anyhow::anyhow;
use futures::future::FutureExt;
use serde::Deserialize;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio::time::sleep_until;
use tokio::time::Instant;
use tracing::Span;
use tracing_futures::Instrument;

use crate::config::Config;
use crate::error::ReplicationError;
use crate::error::TransportError;
use crate::network::ReplicationTransport;
use crate::progress::FollowerProgress;
use crate::protocol::AppendEntriesRequest;
use crate::protocol::AppendEntriesResponse;
use crate::protocol::AppendResult;
use crate::protocol::InstallSnapshotResult;
use crate::replication::buffer::BatchBuffer;
use crate::replication::snapshot::SnapshotStreamer;
use crate::storage::LogSource;
use crate::storage::Snapshot;
use crate::LogId;
use crate::MessageSummary;
use crate::NodeId;

/// A point-in-time sample of a replication stream's progress.
#[derive(Default, Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicationMetrics {
    /// The highest log index known replicated on the target.
    pub matched: u64,
}

/// The public handle to a spawned replication stream.
///
/// Dropping the handle closes the stream's event channel, which the task
/// treats the same as an explicit [`stop`](Replicator::stop).
pub struct Replicator {
    repl_tx: mpsc::UnboundedSender<(ReplicatorEvent, Span)>,
    rx_metrics: watch::Receiver<ReplicationMetrics>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Replicator {
    /// Spawn a new replication task for the target follower.
    ///
    /// The leader's `term` is fixed for the lifetime of the task; observing a
    /// higher term in any reply stops the task. `progress` is shared with the
    /// leader's commit calculator and is written only from the spawned task.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<L: LogSource, N: ReplicationTransport>(
        id: NodeId,
        target: NodeId,
        term: u64,
        config: Arc<Config>,
        progress: Arc<FollowerProgress>,
        log: Arc<L>,
        network: Arc<N>,
        event_tx: mpsc::UnboundedSender<(ReplicaEvent, Span)>,
    ) -> Self {
        ReplicationCore::spawn(id, target, term, config, progress, log, network, event_tx)
    }

    /// Wake the replication task because new entries were appended to the log.
    pub fn notify_append(&self) {
        let _ = self.repl_tx.send((ReplicatorEvent::Appended, tracing::debug_span!("CH")));
    }

    /// Ask the replication task to stop. Idempotent and non-blocking.
    pub fn stop(&self) {
        let _ = self.repl_tx.send((ReplicatorEvent::Terminate, tracing::debug_span!("CH")));
    }

    /// Stop the replication task and wait for it to exit.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.stop();
        if let Some(handle) = self.handle.lock().await.take() {
            handle.await?;
        }
        Ok(())
    }

    /// Get a handle to the metrics channel.
    pub fn metrics(&self) -> watch::Receiver<ReplicationMetrics> {
        self.rx_metrics.clone()
    }
}

/// An event sent to a replication task by its owner.
pub(crate) enum ReplicatorEvent {
    /// New entries were appended to the leader's log.
    Appended,
    /// Stop replicating and exit.
    Terminate,
}

/// An event coming from a replication stream.
pub enum ReplicaEvent {
    /// A non-voting follower advanced its match index.
    StagingProgress { target: NodeId, match_index: u64 },
    /// A voting follower advanced its match index; the commit index may move.
    UpdateCommit { target: NodeId, match_index: u64 },
    /// A reply carried a term above the leader's; the leader must step down.
    StepDown { target: NodeId, term: u64 },
}

impl MessageSummary for ReplicaEvent {
    fn summary(&self) -> String {
        match self {
            ReplicaEvent::StagingProgress { target, match_index } => {
                format!("StagingProgress: target: {}, match_index: {}", target, match_index)
            }
            ReplicaEvent::UpdateCommit { target, match_index } => {
                format!("UpdateCommit: target: {}, match_index: {}", target, match_index)
            }
            ReplicaEvent::StepDown { target, term } => {
                format!("StepDown: target: {}, term: {}", target, term)
            }
        }
    }
}

/// The lifecycle of a replication task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReplicatorState {
    Running,
    Stopping,
    Stopped,
}

/// A task responsible for replicating the leader's log to one target
/// follower.
struct ReplicationCore<L: LogSource, N: ReplicationTransport> {
    /// The ID of this Raft node.
    id: NodeId,
    /// The ID of the follower which replication events are to be sent to.
    target: NodeId,
    /// The leader's term, which will never change during the lifetime of
    /// this task.
    term: u64,

    config: Arc<Config>,
    /// Progress shared with the leader's commit calculator; this task is the
    /// only writer.
    progress: Arc<FollowerProgress>,
    log: Arc<L>,
    network: Arc<N>,

    /// A channel for sending events to the leader's event loop.
    event_tx: mpsc::UnboundedSender<(ReplicaEvent, Span)>,
    /// A channel for receiving wakeups and termination from the owner.
    repl_rx: mpsc::UnboundedReceiver<(ReplicatorEvent, Span)>,
    tx_metrics: watch::Sender<ReplicationMetrics>,

    /// Staging area for entries pending in the next AppendEntries request.
    buffer: BatchBuffer,
    state: ReplicatorState,
}

impl<L: LogSource, N: ReplicationTransport> ReplicationCore<L, N> {
    #[allow(clippy::too_many_arguments)]
    fn spawn(
        id: NodeId,
        target: NodeId,
        term: u64,
        config: Arc<Config>,
        progress: Arc<FollowerProgress>,
        log: Arc<L>,
        network: Arc<N>,
        event_tx: mpsc::UnboundedSender<(ReplicaEvent, Span)>,
    ) -> Replicator {
        let (repl_tx, repl_rx) = mpsc::unbounded_channel();
        let (tx_metrics, rx_metrics) = watch::channel(ReplicationMetrics {
            matched: progress.match_index(),
        });
        let buffer = BatchBuffer::new(config.buffer_capacity as usize);
        let this = Self {
            id,
            target,
            term,
            config,
            progress,
            log,
            network,
            event_tx,
            repl_rx,
            tx_metrics,
            buffer,
            state: ReplicatorState::Running,
        };

        let handle = tokio::spawn(this.main().instrument(tracing::debug_span!("spawn")));

        Replicator {
            repl_tx,
            rx_metrics,
            handle: Mutex::new(Some(handle)),
        }
    }

    #[tracing::instrument(level="debug", skip(self), fields(id=self.id, target=self.target, cluster=%self.config.cluster_name))]
    async fn main(mut self) {
        tracing::debug!("replication stream started");
        while self.is_running() {
            self.poll_events();
            if !self.is_running() {
                break;
            }

            match self.should_send().await {
                Ok(true) => {
                    if let Err(err) = self.tick().await {
                        self.handle_loop_error(err);
                    }
                }
                Ok(false) => self.wait_for_work().await,
                Err(err) => self.handle_loop_error(err),
            }
        }
        self.state = ReplicatorState::Stopped;
        tracing::debug!("replication stream closed");
    }

    fn is_running(&self) -> bool {
        self.state == ReplicatorState::Running
    }

    fn handle_loop_error(&mut self, err: ReplicationError) {
        match &err {
            ReplicationError::Cancelled => {}
            err => tracing::error!(error=%err, "fatal replication error"),
        }
        self.state = ReplicatorState::Stopping;
    }

    /// Whether this tick has anything to do: entries the follower still
    /// needs, or a heartbeat falling due.
    async fn should_send(&self) -> Result<bool, ReplicationError> {
        if self.progress.next_index() < self.log.next_index().await {
            return Ok(true);
        }
        Ok(self.heartbeat_due())
    }

    fn heartbeat_deadline(&self) -> Instant {
        self.progress.last_rpc_send() + self.config.heartbeat_interval()
    }

    fn heartbeat_due(&self) -> bool {
        Instant::now() >= self.heartbeat_deadline()
    }

    /// One pass of the send loop: stream a snapshot if the follower is
    /// behind the log start, otherwise build and deliver one AppendEntries
    /// request.
    async fn tick(&mut self) -> Result<(), ReplicationError> {
        if self.should_install_snapshot().await {
            let snapshot = self
                .log
                .latest_snapshot()
                .await
                .map_err(ReplicationError::Storage)?
                .ok_or_else(|| {
                    ReplicationError::Storage(anyhow!(
                        "log start passed the follower's next index but no snapshot exists"
                    ))
                })?;
            return self.install_snapshot(snapshot).await;
        }

        if let Some(req) = self.build_request().await? {
            let reply = self.send_with_retries(&req).await?;
            self.handle_reply(reply)?;
        }
        Ok(())
    }

    /// A follower which has dropped behind the retained log can only be
    /// repaired by a snapshot.
    ///
    /// This also covers a log whose entries have all been truncated into a
    /// snapshot: there `start_index() == next_index()`, so a follower still
    /// missing anything sits below the start boundary.
    async fn should_install_snapshot(&self) -> bool {
        let next = self.progress.next_index();
        if next >= self.log.next_index().await {
            return false;
        }
        next < self.log.start_index().await
    }

    /// The log position immediately preceding `next`.
    ///
    /// Read from the log when the entry is still retained, from the latest
    /// snapshot's tip when it has been truncated, and absent at leader
    /// genesis.
    async fn previous_log_id(&self, next: u64) -> Result<Option<LogId>, ReplicationError> {
        let prev_index = next - 1;
        if let Some(entry) = self.log.try_get_entry(prev_index).await.map_err(ReplicationError::Storage)? {
            return Ok(Some(entry.log_id));
        }
        match self.log.latest_snapshot().await.map_err(ReplicationError::Storage)? {
            Some(snapshot) => Ok(Some(snapshot.term_index)),
            None => Ok(None),
        }
    }

    /// Stage entries from the log and decide whether the batch goes out now.
    ///
    /// Returns `None` when batching is on and the buffer should keep filling.
    async fn build_request(&mut self) -> Result<Option<AppendEntriesRequest>, ReplicationError> {
        let next = self.progress.next_index();
        let prev_log_id = self.previous_log_id(next).await?;

        let mut logical_next = next + self.buffer.pending() as u64;
        let mut leader_next = self.log.next_index().await;
        while leader_next > logical_next && self.buffer.remaining() > 0 {
            let want = cmp::min(self.buffer.remaining() as u64, leader_next - logical_next);
            let entries = self
                .log
                .get_entries(logical_next, logical_next + want)
                .await
                .map_err(ReplicationError::Storage)?;
            if entries.len() as u64 != want {
                return Err(ReplicationError::Storage(anyhow!(
                    "log returned {} entries for range [{}, {})",
                    entries.len(),
                    logical_next,
                    logical_next + want
                )));
            }
            self.buffer.append(entries);
            logical_next += want;
            leader_next = self.log.next_index().await;
        }

        let flush = self.buffer.is_full()
            || (!self.config.batch_enabled && !self.buffer.is_empty())
            || (!self.buffer.is_empty() && leader_next <= logical_next)
            || self.heartbeat_due();
        if !flush {
            return Ok(None);
        }
        Ok(Some(self.buffer.drain_into(self.term, self.id, self.target, prev_log_id)))
    }

    /// Deliver one logical batch, retrying the *same* request through
    /// transient transport failures. The follower deduplicates redelivery by
    /// index and term, so the request must not be rebuilt between attempts.
    #[tracing::instrument(level = "debug", skip(self, req), fields(req = %req.summary()))]
    async fn send_with_retries(
        &mut self,
        req: &AppendEntriesRequest,
    ) -> Result<AppendEntriesResponse, ReplicationError> {
        loop {
            self.poll_events();
            if !self.is_running() {
                return Err(ReplicationError::Cancelled);
            }

            self.progress.record_send();
            match self.network.send_append_entries(self.target, req.clone()).await {
                Ok(reply) => {
                    self.progress.record_response();
                    tracing::debug!(reply=%reply.summary(), "append entries reply");
                    return Ok(reply);
                }
                Err(TransportError::Cancelled) => return Err(ReplicationError::Cancelled),
                Err(TransportError::Transient(err)) => {
                    tracing::warn!(error=%err, "error sending AppendEntries rpc to target");
                    self.retry_pause().await?;
                }
            }
        }
    }

    fn handle_reply(&mut self, reply: AppendEntriesResponse) -> Result<(), ReplicationError> {
        match reply.result {
            AppendResult::Success => self.handle_success(reply.next_index),
            AppendResult::NotLeader => {
                self.check_response_term(reply.term);
                Ok(())
            }
            AppendResult::Inconsistency => {
                tracing::debug!(next_index = reply.next_index, "follower log inconsistent, walking next index back");
                self.progress.fall_back(reply.next_index);
                Ok(())
            }
            AppendResult::Unrecognized => {
                tracing::warn!(reply=%reply.summary(), "ignoring unrecognized append reply");
                Ok(())
            }
        }
    }

    /// Apply a SUCCESS reply carrying the follower's new expected next index.
    fn handle_success(&mut self, acked: u64) -> Result<(), ReplicationError> {
        let next = self.progress.next_index();
        if acked < next {
            // The follower disowned entries it already acknowledged; no
            // further progress can be trusted.
            return Err(ReplicationError::RegressedAck {
                target: self.target,
                next_index: next,
                acked,
            });
        }
        if acked == next {
            return Ok(());
        }
        self.progress.advance(acked);
        self.publish_progress(acked - 1);
        Ok(())
    }

    /// A follower answered with a term at or above the leader's.
    ///
    /// A higher term stops this task; the step-down event is emitted only for
    /// a vote-bearing follower, since only those terms carry authority over
    /// leadership.
    fn check_response_term(&mut self, term: u64) {
        if term <= self.term {
            tracing::warn!(term, "follower rejected leadership without a higher term, ignoring");
            return;
        }
        if self.progress.attending_vote() {
            let event = ReplicaEvent::StepDown {
                target: self.target,
                term,
            };
            let _ = self.event_tx.send((event, tracing::debug_span!("CH")));
        }
        tracing::debug!(term, "observed higher term, stopping replication");
        self.state = ReplicatorState::Stopping;
    }

    fn publish_progress(&mut self, match_index: u64) {
        let _ = self.tx_metrics.send(ReplicationMetrics { matched: match_index });
        let event = if self.progress.attending_vote() {
            ReplicaEvent::UpdateCommit {
                target: self.target,
                match_index,
            }
        } else {
            ReplicaEvent::StagingProgress {
                target: self.target,
                match_index,
            }
        };
        let _ = self.event_tx.send((event, tracing::debug_span!("CH")));
    }

    /// Stream one full snapshot to the follower.
    ///
    /// Any abort (rejection, transport failure, read failure) abandons the
    /// pass; the next tick re-reads the latest manifest and starts over with
    /// a fresh request id.
    #[tracing::instrument(level = "debug", skip(self, snapshot), fields(snapshot = %snapshot.term_index))]
    async fn install_snapshot(&mut self, snapshot: Snapshot) -> Result<(), ReplicationError> {
        let mut streamer = SnapshotStreamer::new(
            &snapshot,
            self.term,
            self.id,
            self.target,
            self.config.snapshot_chunk_max_size,
        );

        loop {
            self.poll_events();
            if !self.is_running() {
                return Err(ReplicationError::Cancelled);
            }

            let req = match streamer.next_request().await {
                Ok(Some(req)) => req,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(error=%err, "error reading snapshot chunk, aborting stream");
                    self.retry_pause().await?;
                    return Ok(());
                }
            };

            tracing::debug!(req=%req.summary(), "sending snapshot chunk");
            self.progress.record_send();
            let reply = match self.network.send_install_snapshot(self.target, req).await {
                Ok(reply) => {
                    self.progress.record_response();
                    reply
                }
                Err(TransportError::Cancelled) => return Err(ReplicationError::Cancelled),
                Err(TransportError::Transient(err)) => {
                    tracing::warn!(error=%err, "error sending InstallSnapshot rpc to target");
                    self.retry_pause().await?;
                    return Ok(());
                }
            };

            if reply.term > self.term {
                self.check_response_term(reply.term);
                return Ok(());
            }
            match reply.result {
                // The follower already holds this snapshot; skip the rest of
                // the stream.
                InstallSnapshotResult::AlreadyInstalled => break,
                _ if reply.is_success() => {}
                _ => {
                    tracing::warn!(reply=%reply.summary(), "snapshot chunk rejected, aborting stream");
                    return Ok(());
                }
            }
        }

        let snapshot_id = streamer.snapshot_id();
        self.progress.advance(snapshot_id.index + 1);
        self.publish_progress(snapshot_id.index);
        tracing::debug!(snapshot=%snapshot_id, "snapshot fully streamed");
        Ok(())
    }

    /// Drain the owner channel without blocking.
    fn poll_events(&mut self) {
        while let Some(event) = self.repl_rx.recv().now_or_never() {
            match event {
                Some((event, span)) => {
                    let _ent = span.enter();
                    self.apply_event(event);
                }
                None => {
                    // All handles dropped; treat as termination.
                    self.state = ReplicatorState::Stopping;
                    return;
                }
            }
            if !self.is_running() {
                return;
            }
        }
    }

    fn apply_event(&mut self, event: ReplicatorEvent) {
        match event {
            // Nothing to record: the loop re-reads the log tip on every pass.
            ReplicatorEvent::Appended => {}
            ReplicatorEvent::Terminate => self.state = ReplicatorState::Stopping,
        }
    }

    fn on_event(&mut self, event: Option<(ReplicatorEvent, Span)>) {
        match event {
            Some((event, span)) => {
                let _ent = span.enter();
                self.apply_event(event);
            }
            None => self.state = ReplicatorState::Stopping,
        }
    }

    /// Sleep until the next heartbeat deadline, or until woken by the owner.
    ///
    /// Spurious wakeups are harmless; the main loop re-evaluates what to
    /// send, so a wakeup racing a heartbeat simply carries entries instead.
    async fn wait_for_work(&mut self) {
        let deadline = self.heartbeat_deadline();
        tokio::select! {
            _ = sleep_until(deadline) => {}
            event = self.repl_rx.recv() => self.on_event(event),
        }
    }

    /// Pause for the sync interval before a retry, remaining responsive to
    /// termination.
    async fn retry_pause(&mut self) -> Result<(), ReplicationError> {
        let pause = sleep(self.config.sync_interval());
        tokio::pin!(pause);
        loop {
            tokio::select! {
                _ = &mut pause => return Ok(()),
                event = self.repl_rx.recv() => {
                    self.on_event(event);
                    if !self.is_running() {
                        return Err(ReplicationError::Cancelled);
                    }
                }
            }
        }
    }
}
