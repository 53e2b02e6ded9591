use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::{Result, ZabError, ZxId};

/// The process whose updates are being ordered.
///
/// The protocol polls it for new work and hands back committed records in
/// zxid order. Payloads are opaque to the protocol.
#[async_trait]
pub trait Learner: Send + Sync {
    /// Next locally produced update, if one is ready.
    ///
    /// Only called while the node is in BROADCAST, so an update is never
    /// taken from the learner and then dropped because the cluster was
    /// between leaders.
    async fn pending_update(&mut self) -> Option<Bytes>;

    /// Applies a committed update. Called at most once per zxid, in strictly
    /// increasing zxid order.
    ///
    /// On error the record stays buffered and is offered again on the next
    /// tick.
    async fn apply(&mut self, zxid: ZxId, payload: &Bytes) -> Result<()>;
}

#[derive(Debug, Default)]
struct LearnerState {
    outbox: VecDeque<Bytes>,
    applied: Vec<(ZxId, Bytes)>,
    failures_remaining: usize,
}

/// Learner that hands out queued updates and keeps every applied record.
///
/// Clones share state, so a handle kept after giving the learner to a node
/// still sees what the node applied.
#[derive(Debug, Clone, Default)]
pub struct InMemoryLearner {
    state: Arc<Mutex<LearnerState>>,
}

impl InMemoryLearner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues an update for the node to pick up while in BROADCAST.
    pub fn submit(&self, payload: impl Into<Bytes>) {
        self.state.lock().outbox.push_back(payload.into());
    }

    pub fn queued(&self) -> usize {
        self.state.lock().outbox.len()
    }

    /// Makes the next `count` applies fail.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().failures_remaining = count;
    }

    pub fn applied(&self) -> Vec<(ZxId, Bytes)> {
        self.state.lock().applied.clone()
    }

    pub fn applied_zxids(&self) -> Vec<ZxId> {
        self.state
            .lock()
            .applied
            .iter()
            .map(|(zxid, _)| *zxid)
            .collect()
    }

    pub fn applied_payloads(&self) -> Vec<Bytes> {
        self.state
            .lock()
            .applied
            .iter()
            .map(|(_, payload)| payload.clone())
            .collect()
    }
}

#[async_trait]
impl Learner for InMemoryLearner {
    async fn pending_update(&mut self) -> Option<Bytes> {
        self.state.lock().outbox.pop_front()
    }

    async fn apply(&mut self, zxid: ZxId, payload: &Bytes) -> Result<()> {
        let mut state = self.state.lock();
        if state.failures_remaining > 0 {
            state.failures_remaining -= 1;
            return Err(ZabError::learner(format!("refused {}", zxid)));
        }
        state.applied.push((zxid, payload.clone()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_failed_apply_is_not_recorded() {
        let mut learner = InMemoryLearner::new();
        let handle = learner.clone();
        handle.submit("u0");
        assert_eq!(learner.pending_update().await, Some(Bytes::from("u0")));
        assert_eq!(learner.pending_update().await, None);

        handle.fail_next(1);
        assert!(learner.apply(ZxId::new(1, 0), &Bytes::from("u0")).await.is_err());
        learner.apply(ZxId::new(1, 0), &Bytes::from("u0")).await.unwrap();
        assert_eq!(handle.applied_zxids(), vec![ZxId::new(1, 0)]);
    }
}
