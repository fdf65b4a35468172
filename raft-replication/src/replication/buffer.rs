//! Bounded staging buffer for outbound log entries.

use crate::protocol::AppendEntriesRequest;
use crate::protocol::Entry;
use crate::LogId;
use crate::NodeId;

/// A bounded, ordered staging area for entries pending in the next
/// AppendEntries request.
///
/// Entries are contiguous, starting at the follower's next index. The buffer
/// is cleared atomically with request construction, so no entry is ever sent
/// twice from here.
pub(crate) struct BatchBuffer {
    entries: Vec<Entry>,
    capacity: usize,
}

impl BatchBuffer {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Add entries to the tail. Callers ensure the total never exceeds the
    /// capacity.
    pub(crate) fn append(&mut self, entries: impl IntoIterator<Item = Entry>) {
        self.entries.extend(entries);
        debug_assert!(self.entries.len() <= self.capacity);
    }

    /// The number of entries currently staged.
    pub(crate) fn pending(&self) -> usize {
        self.entries.len()
    }

    /// How many more entries fit.
    pub(crate) fn remaining(&self) -> usize {
        self.capacity - self.entries.len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.entries.len() == self.capacity
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Construct an AppendEntries request from the current contents and clear
    /// the buffer in the same step.
    pub(crate) fn drain_into(
        &mut self,
        term: u64,
        leader_id: NodeId,
        target: NodeId,
        prev_log_id: Option<LogId>,
    ) -> AppendEntriesRequest {
        let entries = std::mem::take(&mut self.entries);
        let is_heartbeat = entries.is_empty();
        AppendEntriesRequest {
            term,
            leader_id,
            target,
            prev_log_id,
            entries,
            is_heartbeat,
        }
    }
}
