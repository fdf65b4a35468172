use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use memlog::MemLog;
use pretty_assertions::assert_eq;
use raft_replication::protocol::AppendEntriesResponse;
use raft_replication::protocol::AppendResult;
use raft_replication::replication::ReplicaEvent;
use raft_replication::Config;
use raft_replication::MessageSummary;

mod fixtures;

/// Higher-term step-down.
///
/// What does this test do?
///
/// - runs a leader at term 4 against a voting follower.
/// - answers the first request with NOT_LEADER carrying term 5.
/// - asserts that exactly one StepDown(5) event is emitted, that the
///   replicator stops sending, and that no progress was recorded.
#[tokio::test(flavor = "multi_thread", worker_threads = 3)]
async fn higher_term_step_down() -> Result<()> {
    fixtures::init_tracing();

    let config = Arc::new(Config::build("test".into()).min_election_timeout(100).sync_interval(50).validate()?);
    let log = Arc::new(MemLog::new());
    log.append_payloads(4, (1..=3).map(|i| vec![i as u8])).await;

    let mut harness = fixtures::Harness::spawn(4, config, log, 1, true);
    harness.transport.push_append_reply(Ok(AppendEntriesResponse {
        result: AppendResult::NotLeader,
        term: 5,
        next_index: 0,
    }));

    let (_, req) = harness.next_seen().await.append();
    assert_eq!(req.term, 4);

    match harness.next_event().await {
        ReplicaEvent::StepDown { target, term } => {
            assert_eq!(target, fixtures::TARGET_ID);
            assert_eq!(term, 5);
        }
        event => panic!("expected StepDown, got {}", event.summary()),
    }

    // The task exits on its own; the event channel closing proves no second
    // StepDown was emitted.
    assert!(harness.event_rx.recv().await.is_none());
    harness.replicator.shutdown().await?;

    // No further requests go out, heartbeat deadlines included.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(harness.seen_rx.try_recv().is_err());

    assert_eq!(harness.progress.match_index(), 0);
    assert_eq!(harness.progress.next_index(), 1);
    Ok(())
}
