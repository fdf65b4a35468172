//! Replication runtime configuration.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::ConfigError;

/// Default maximum number of entries per AppendEntries payload.
pub const DEFAULT_BUFFER_CAPACITY: u64 = 300;
/// Default maximum size of a snapshot chunk payload, in bytes.
pub const DEFAULT_SNAPSHOT_CHUNK_MAX_SIZE: u64 = 3 * 1024 * 1024;
/// Default minimum election timeout in milliseconds.
pub const DEFAULT_MIN_ELECTION_TIMEOUT: u64 = 150;
/// Default retry backoff after a transient transport failure, in milliseconds.
pub const DEFAULT_SYNC_INTERVAL: u64 = 50;

/// The runtime configuration of the replication engine.
///
/// All values are read once, when a replicator is constructed. The heartbeat
/// cadence is derived from the minimum election timeout: a leader must make
/// itself heard well within one election timeout, so heartbeats go out every
/// `min_election_timeout / 2` milliseconds of RPC silence.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// The application specific name of this Raft cluster.
    pub cluster_name: String,
    /// The maximum number of entries staged into one AppendEntries request.
    pub buffer_capacity: u64,
    /// Whether entries are batched up to `buffer_capacity` before sending.
    ///
    /// When `false`, any non-empty batch buffer is flushed immediately.
    pub batch_enabled: bool,
    /// The upper bound on a snapshot chunk payload, in bytes.
    pub snapshot_chunk_max_size: u64,
    /// The minimum election timeout in milliseconds.
    pub min_election_timeout: u64,
    /// The pause before retrying a failed RPC, in milliseconds.
    pub sync_interval: u64,
}

impl Config {
    /// Start the builder process for a new `Config` instance.
    pub fn build(cluster_name: String) -> ConfigBuilder {
        ConfigBuilder {
            cluster_name,
            buffer_capacity: None,
            batch_enabled: None,
            snapshot_chunk_max_size: None,
            min_election_timeout: None,
            sync_interval: None,
        }
    }

    /// The heartbeat cadence derived from the minimum election timeout.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.min_election_timeout / 2)
    }

    /// The retry backoff as a `Duration`.
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval)
    }
}

/// A configuration builder.
pub struct ConfigBuilder {
    cluster_name: String,
    buffer_capacity: Option<u64>,
    batch_enabled: Option<bool>,
    snapshot_chunk_max_size: Option<u64>,
    min_election_timeout: Option<u64>,
    sync_interval: Option<u64>,
}

impl ConfigBuilder {
    /// Set the maximum number of entries per AppendEntries batch.
    pub fn buffer_capacity(mut self, val: u64) -> Self {
        self.buffer_capacity = Some(val);
        self
    }

    /// Enable or disable entry batching.
    pub fn batch_enabled(mut self, val: bool) -> Self {
        self.batch_enabled = Some(val);
        self
    }

    /// Set the maximum snapshot chunk payload size in bytes.
    pub fn snapshot_chunk_max_size(mut self, val: u64) -> Self {
        self.snapshot_chunk_max_size = Some(val);
        self
    }

    /// Set the minimum election timeout in milliseconds.
    pub fn min_election_timeout(mut self, val: u64) -> Self {
        self.min_election_timeout = Some(val);
        self
    }

    /// Set the RPC retry backoff in milliseconds.
    pub fn sync_interval(mut self, val: u64) -> Self {
        self.sync_interval = Some(val);
        self
    }

    /// Validate the state of this builder and produce a new `Config` instance
    /// if valid.
    pub fn validate(self) -> Result<Config, ConfigError> {
        let buffer_capacity = self.buffer_capacity.unwrap_or(DEFAULT_BUFFER_CAPACITY);
        let batch_enabled = self.batch_enabled.unwrap_or(true);
        let snapshot_chunk_max_size = self.snapshot_chunk_max_size.unwrap_or(DEFAULT_SNAPSHOT_CHUNK_MAX_SIZE);
        let min_election_timeout = self.min_election_timeout.unwrap_or(DEFAULT_MIN_ELECTION_TIMEOUT);
        let sync_interval = self.sync_interval.unwrap_or(DEFAULT_SYNC_INTERVAL);

        if buffer_capacity == 0 {
            return Err(ConfigError::InvalidBufferCapacity);
        }
        if snapshot_chunk_max_size == 0 {
            return Err(ConfigError::InvalidSnapshotChunkSize);
        }
        // Heartbeats are sent every `min_election_timeout / 2` ms, so anything
        // below 2ms leaves no usable cadence.
        if min_election_timeout < 2 {
            return Err(ConfigError::InvalidElectionTimeout);
        }
        if sync_interval == 0 || sync_interval > min_election_timeout / 2 {
            return Err(ConfigError::InvalidSyncInterval);
        }

        Ok(Config {
            cluster_name: self.cluster_name,
            buffer_capacity,
            batch_enabled,
            snapshot_chunk_max_size,
            min_election_timeout,
            sync_interval,
        })
    }
}
