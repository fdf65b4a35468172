//! Shared per-follower replication progress.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use tokio::time::Instant;

/// A follower's progress in the view of the leader.
///
/// `match_index` is the highest log index known replicated on the follower;
/// `next_index` is the first index the leader believes the follower still
/// needs. `match_index + 1 <= next_index` holds at every observable point.
///
/// The replication task owning the follower is the only writer; the leader's
/// commit calculator reads the counters as eventually consistent snapshots.
pub struct FollowerProgress {
    next_index: AtomicU64,
    match_index: AtomicU64,
    /// Whether this follower currently counts toward quorum.
    attending_vote: AtomicBool,
    times: Mutex<RpcTimes>,
}

struct RpcTimes {
    last_send: Instant,
    last_response: Instant,
}

impl FollowerProgress {
    /// Create progress for a follower expected to need `next_index` first.
    ///
    /// A leader initializes this to its own `last_log_index + 1`; the value
    /// is walked back through the consistency check as needed.
    pub fn new(next_index: u64, attending_vote: bool) -> Self {
        assert!(next_index >= 1, "next_index must be at least 1");
        let now = Instant::now();
        Self {
            next_index: AtomicU64::new(next_index),
            match_index: AtomicU64::new(0),
            attending_vote: AtomicBool::new(attending_vote),
            times: Mutex::new(RpcTimes {
                last_send: now,
                last_response: now,
            }),
        }
    }

    pub fn next_index(&self) -> u64 {
        self.next_index.load(Ordering::Acquire)
    }

    pub fn match_index(&self) -> u64 {
        self.match_index.load(Ordering::Acquire)
    }

    pub fn attending_vote(&self) -> bool {
        self.attending_vote.load(Ordering::Acquire)
    }

    /// Flip the follower's quorum participation, e.g. after a staging
    /// follower has caught up and been promoted.
    pub fn set_attending_vote(&self, val: bool) {
        self.attending_vote.store(val, Ordering::Release);
    }

    /// Record that the follower acknowledged everything below `next`.
    ///
    /// Called on the replication task only, with `next` greater than the
    /// current next index. Both counters move forward together so a reader
    /// never observes `match_index >= next_index`.
    pub(crate) fn advance(&self, next: u64) {
        debug_assert!(next > self.next_index.load(Ordering::Acquire));
        self.match_index.store(next - 1, Ordering::Release);
        self.next_index.store(next, Ordering::Release);
    }

    /// Walk `next_index` back to the follower-supplied backoff point.
    ///
    /// This is the only path on which `next_index` decreases. The value is
    /// clamped so it never drops at or below an index the follower has
    /// already acknowledged.
    pub(crate) fn fall_back(&self, next: u64) {
        let floor = self.match_index.load(Ordering::Acquire) + 1;
        self.next_index.store(next.max(floor), Ordering::Release);
    }

    /// The instant the most recent RPC was sent to this follower.
    pub fn last_rpc_send(&self) -> Instant {
        self.times.lock().unwrap().last_send
    }

    /// The instant the most recent RPC reply arrived from this follower.
    pub fn last_rpc_response(&self) -> Instant {
        self.times.lock().unwrap().last_response
    }

    pub(crate) fn record_send(&self) {
        self.times.lock().unwrap().last_send = Instant::now();
    }

    pub(crate) fn record_response(&self) {
        self.times.lock().unwrap().last_response = Instant::now();
    }
}
