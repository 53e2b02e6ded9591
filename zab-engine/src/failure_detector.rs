//! Heartbeat exchange and liveness judgment.
//!
//! The detector runs as its own tokio task while the node is in BROADCAST.
//! The only state it shares with the protocol tick is [`Liveness`]: the
//! heartbeat table (written by the tick when a HEARTBEAT is drained, read by
//! the detector) and the one-shot reset flag (written by the detector,
//! consumed by the tick).

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use zab_core::{messages::ProtocolMessage, network::Transport, NodeId};

#[derive(Debug, Default)]
pub struct Liveness {
    heartbeats: Mutex<HashMap<NodeId, Instant>>,
    reset_requested: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_heartbeat(&self, node: NodeId) {
        self.heartbeats.lock().insert(node, Instant::now());
    }

    pub fn last_seen(&self, node: NodeId) -> Option<Instant> {
        self.heartbeats.lock().get(&node).copied()
    }

    /// Clears the table and marks `nodes` as just seen, giving every watched
    /// peer a full timeout before it can be judged dead.
    pub fn reseed(&self, nodes: impl IntoIterator<Item = NodeId>) {
        let now = Instant::now();
        let mut heartbeats = self.heartbeats.lock();
        heartbeats.clear();
        heartbeats.extend(nodes.into_iter().map(|node| (node, now)));
    }

    pub fn is_fresh(&self, node: NodeId, timeout: Duration) -> bool {
        self.last_seen(node)
            .map(|seen| seen.elapsed() < timeout)
            .unwrap_or(false)
    }

    /// Number of nodes other than `me` heard from within `timeout`.
    pub fn fresh_count(&self, me: NodeId, timeout: Duration) -> usize {
        self.heartbeats
            .lock()
            .iter()
            .filter(|(node, seen)| **node != me && seen.elapsed() < timeout)
            .count()
    }

    pub fn request_reset(&self) {
        self.reset_requested.store(true, Ordering::SeqCst);
    }

    /// Returns the reset flag and clears it; each request is observed once.
    pub fn take_reset(&self) -> bool {
        self.reset_requested.swap(false, Ordering::SeqCst)
    }

    pub fn is_reset_requested(&self) -> bool {
        self.reset_requested.load(Ordering::SeqCst)
    }
}

/// Who the detector watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorRole {
    /// Heartbeat the leader and give up once it goes quiet.
    Follower { leader: NodeId },
    /// Heartbeat everyone and give up once no more than `threshold` peers
    /// are still fresh.
    Leader { threshold: usize },
}

pub struct FailureDetector<T: Transport + 'static> {
    me: NodeId,
    role: DetectorRole,
    transport: Arc<T>,
    liveness: Arc<Liveness>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
}

impl<T: Transport + 'static> FailureDetector<T> {
    pub fn new(
        me: NodeId,
        role: DetectorRole,
        transport: Arc<T>,
        liveness: Arc<Liveness>,
        heartbeat_interval: Duration,
        heartbeat_timeout: Duration,
    ) -> Self {
        Self {
            me,
            role,
            transport,
            liveness,
            heartbeat_interval,
            heartbeat_timeout,
        }
    }

    pub fn spawn(self) -> DetectorHandle {
        let role = self.role;
        let task = tokio::spawn(self.run());
        DetectorHandle { role, task }
    }

    async fn run(self) {
        let mut ticker = interval(self.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Failure detector started as {:?}", self.role);

        loop {
            ticker.tick().await;
            let heartbeat = ProtocolMessage::heartbeat(self.me);

            match self.role {
                DetectorRole::Follower { leader } => {
                    if let Err(e) = self.transport.send_to(leader, heartbeat).await {
                        debug!("Heartbeat to leader {} failed: {}", leader, e);
                    }
                    if !self.liveness.is_fresh(leader, self.heartbeat_timeout) {
                        warn!(
                            "No heartbeat from leader {} within {:?}, requesting re-election",
                            leader, self.heartbeat_timeout
                        );
                        self.liveness.request_reset();
                        return;
                    }
                }
                DetectorRole::Leader { threshold } => {
                    if let Err(e) = self.transport.broadcast_excluding_self(heartbeat).await {
                        debug!("Heartbeat broadcast failed: {}", e);
                    }
                    let fresh = self.liveness.fresh_count(self.me, self.heartbeat_timeout);
                    if fresh <= threshold {
                        warn!(
                            "Only {} followers alive (need more than {}), requesting re-election",
                            fresh, threshold
                        );
                        self.liveness.request_reset();
                        return;
                    }
                }
            }
        }
    }
}

/// Owner of a running detector task. Dropping it stops the task.
#[derive(Debug)]
pub struct DetectorHandle {
    role: DetectorRole,
    task: JoinHandle<()>,
}

impl DetectorHandle {
    pub fn role(&self) -> DetectorRole {
        self.role
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn stop(self) {
        self.task.abort();
    }
}

impl Drop for DetectorHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use zab_core::messages::MessageType;

    #[tokio::test(start_paused = true)]
    async fn test_follower_detector_resets_when_leader_goes_quiet() {
        let transport = Arc::new(RecordingTransport::new(NodeId::new(1)));
        let liveness = Arc::new(Liveness::new());
        liveness.reseed([NodeId::new(0)]);

        let handle = FailureDetector::new(
            NodeId::new(1),
            DetectorRole::Follower {
                leader: NodeId::new(0),
            },
            transport.clone(),
            liveness.clone(),
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
        .spawn();

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!liveness.is_reset_requested());
        liveness.record_heartbeat(NodeId::new(0));

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!liveness.is_reset_requested());

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(liveness.take_reset());
        assert!(!liveness.take_reset());
        assert!(handle.is_finished());

        let sent = transport.sent();
        assert!(!sent.is_empty());
        assert!(sent.iter().all(|(target, message)| {
            *target == Some(NodeId::new(0))
                && matches!(message.message_type, MessageType::HeartBeat(_))
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_leader_detector_needs_more_than_threshold_fresh_peers() {
        let transport = Arc::new(RecordingTransport::new(NodeId::new(0)));
        let liveness = Arc::new(Liveness::new());
        liveness.reseed((1..5).map(NodeId::new));

        let _handle = FailureDetector::new(
            NodeId::new(0),
            DetectorRole::Leader { threshold: 2 },
            transport.clone(),
            liveness.clone(),
            Duration::from_millis(100),
            Duration::from_millis(500),
        )
        .spawn();

        // Three followers keep answering: still above the threshold.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            for node in 1..4 {
                liveness.record_heartbeat(NodeId::new(node));
            }
        }
        assert!(!liveness.is_reset_requested());

        // Only two remain reachable.
        for _ in 0..8 {
            tokio::time::sleep(Duration::from_millis(100)).await;
            for node in 1..3 {
                liveness.record_heartbeat(NodeId::new(node));
            }
        }
        assert!(liveness.is_reset_requested());
        assert!(transport.broadcasts() > 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_detector_never_resets() {
        let transport = Arc::new(RecordingTransport::new(NodeId::new(1)));
        let liveness = Arc::new(Liveness::new());

        let handle = FailureDetector::new(
            NodeId::new(1),
            DetectorRole::Follower {
                leader: NodeId::new(0),
            },
            transport,
            liveness.clone(),
            Duration::from_millis(100),
            Duration::from_millis(300),
        )
        .spawn();
        handle.stop();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!liveness.is_reset_requested());
    }
}
