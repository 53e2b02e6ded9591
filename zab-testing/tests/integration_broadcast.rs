//! End-to-end broadcast over a healthy simulated cluster.

use bytes::Bytes;
use std::time::Duration;

use zab_core::{NodeId, ZxId};
use zab_engine::{Phase, ZabConfig};
use zab_testing::{check_safety, establish, write_and_wait, ClusterHarness};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}

fn config() -> ZabConfig {
    ZabConfig::default()
        .with_heartbeat_interval(Duration::from_millis(20))
        .with_heartbeat_timeout(Duration::from_millis(200))
        .with_phase_timeout(Duration::from_millis(500))
        .with_follower_info_retry(Duration::from_millis(50))
        .with_tick_interval(Duration::from_millis(5))
}

#[tokio::test(start_paused = true)]
async fn test_three_node_write_reaches_every_learner() {
    init_logging();
    let mut harness = ClusterHarness::new(3, config()).unwrap();

    let leader = establish(&mut harness, 300).await.unwrap();
    assert_eq!(leader, NodeId::new(0));
    assert!(harness.node(0).is_leader());

    write_and_wait(&mut harness, 0, &["x=1"], 200).await.unwrap();

    for id in 0..3 {
        let applied = harness.learner(id).applied();
        assert_eq!(applied, vec![(ZxId::new(1, 0), Bytes::from_static(b"x=1"))]);
        assert_eq!(harness.node(id).commit_cursor(), ZxId::new(1, 0));
        assert_eq!(harness.node(id).phase(), Phase::Broadcast);
    }
    assert_eq!(
        harness.node(0).leader_state().unwrap().outstanding_proposals(),
        0
    );
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_writers_agree_on_one_order() {
    init_logging();
    let mut harness = ClusterHarness::new(5, config()).unwrap();
    establish(&mut harness, 300).await.unwrap();

    for writer in 0..5u32 {
        for seq in 0..3 {
            harness
                .learner(writer)
                .submit(format!("node{}-op{}", writer, seq));
        }
    }

    let delivered = harness
        .run_until(1000, |h| {
            h.live_nodes().all(|node| node.learner().applied().len() == 15)
        })
        .await;
    assert!(delivered, "not every write was delivered");
    check_safety(&harness).unwrap();

    let reference = harness.learner(0).applied();
    for id in 1..5 {
        assert_eq!(harness.learner(id).applied(), reference);
    }
    let zxids: Vec<_> = reference.iter().map(|(zxid, _)| *zxid).collect();
    let expected: Vec<_> = (0..15).map(|counter| ZxId::new(1, counter)).collect();
    assert_eq!(zxids, expected);
}

#[tokio::test(start_paused = true)]
async fn test_quiet_cluster_stays_in_first_epoch() {
    init_logging();
    let mut harness = ClusterHarness::new(3, config()).unwrap();
    establish(&mut harness, 300).await.unwrap();

    // Heartbeats alone must keep everyone settled well past the timeout.
    harness.run_for(Duration::from_secs(2)).await;

    assert_eq!(harness.established_leader(), Some(NodeId::new(0)));
    for node in harness.nodes() {
        assert_eq!(node.view().current_epoch(), 1);
        assert_eq!(node.statistics().elections, 0);
    }
    assert_eq!(harness.fatal_errors(), 0);
}
