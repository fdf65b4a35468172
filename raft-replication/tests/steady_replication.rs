use std::sync::Arc;

use anyhow::Result;
use maplit::btreemap;
use memlog::MemLog;
use pretty_assertions::assert_eq;
use raft_replication::replication::ReplicaEvent;
use raft_replication::Config;
use raft_replication::LogId;
use raft_replication::MessageSummary;

mod fixtures;

/// Steady replication of a populated log.
///
/// What does this test do?
///
/// - seeds the leader log with entries 1..=10, all in term 2.
/// - spawns a replicator for a voting follower starting at next_index=1, with
///   a batch capacity of 4.
/// - asserts that exactly three AppendEntries requests go out, carrying
///   [1..=4], [5..=8] and [9..=10], each starting at the follower's next
///   index, and that an UpdateCommit event follows each acknowledgement.
#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn steady_replication() -> Result<()> {
    fixtures::init_tracing();

    let config = Arc::new(
        Config::build("test".into())
            .buffer_capacity(4)
            .min_election_timeout(500)
            .sync_interval(50)
            .validate()?,
    );
    let log = Arc::new(MemLog::new());
    log.append_payloads(2, (1..=10).map(|i| format!("payload-{}", i).into_bytes())).await;

    let mut harness = fixtures::Harness::spawn(2, config, log, 1, true);

    let expected = btreemap! {
        0usize => (None, 1u64, 4usize, 5u64),
        1usize => (Some(LogId::new(2, 4)), 5, 4, 9),
        2usize => (Some(LogId::new(2, 8)), 9, 2, 11),
    };
    for (_, (prev, first, len, acked_next)) in expected {
        let (_, req) = harness.next_seen().await.append();
        assert_eq!(req.prev_log_id, prev);
        assert_eq!(req.entries.len(), len);
        assert_eq!(req.entries[0].log_id.index, first);
        assert!(!req.is_heartbeat);

        match harness.next_event().await {
            ReplicaEvent::UpdateCommit { target, match_index } => {
                assert_eq!(target, fixtures::TARGET_ID);
                assert_eq!(match_index, acked_next - 1);
            }
            event => panic!("expected UpdateCommit, got {}", event.summary()),
        }

        // The progress pair stays well formed at every observable point.
        assert!(harness.progress.match_index() < harness.progress.next_index());
    }

    assert_eq!(harness.progress.match_index(), 10);
    assert_eq!(harness.progress.next_index(), 11);

    let metrics = harness.replicator.metrics();
    assert_eq!(metrics.borrow().matched, 10);

    harness.replicator.shutdown().await?;
    Ok(())
}

/// A non-voting follower reports staging progress; once promoted to
/// vote-bearing, its acknowledgements feed the commit path instead.
#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn staging_follower_promotion_switches_event_kind() -> Result<()> {
    fixtures::init_tracing();

    let config = Arc::new(Config::build("test".into()).min_election_timeout(500).sync_interval(50).validate()?);
    let log = Arc::new(MemLog::new());
    log.append_payloads(2, (1..=3).map(|i| vec![i as u8])).await;

    let mut harness = fixtures::Harness::spawn(2, config, log.clone(), 1, false);

    let (_, req) = harness.next_seen().await.append();
    assert_eq!(req.entries.len(), 3);

    match harness.next_event().await {
        ReplicaEvent::StagingProgress { target, match_index } => {
            assert_eq!(target, fixtures::TARGET_ID);
            assert_eq!(match_index, 3);
        }
        event => panic!("expected StagingProgress for a non-voting follower, got {}", event.summary()),
    }

    // The follower has caught up; the leader promotes it into the quorum.
    harness.progress.set_attending_vote(true);
    log.append_payloads(2, (4..=5).map(|i| vec![i as u8])).await;
    harness.replicator.notify_append();

    // A heartbeat may slip in between the ack and the wakeup.
    let req = loop {
        let (_, req) = harness.next_seen().await.append();
        if !req.is_heartbeat {
            break req;
        }
    };
    assert_eq!(req.entries[0].log_id.index, 4);
    assert_eq!(req.entries.len(), 2);

    match harness.next_event().await {
        ReplicaEvent::UpdateCommit { target, match_index } => {
            assert_eq!(target, fixtures::TARGET_ID);
            assert_eq!(match_index, 5);
        }
        event => panic!("expected UpdateCommit after promotion, got {}", event.summary()),
    }

    harness.replicator.shutdown().await?;
    Ok(())
}
