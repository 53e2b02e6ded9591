use serde::Serialize;
use std::fmt;
use tokio::sync::{mpsc, oneshot};
use zab_core::{Epoch, NodeId, ZxId};

/// Protocol phase of a node.
///
/// The cycle ELECTION → DISCOVERY → SYNCHRONIZATION → BROADCAST → ELECTION
/// repeats forever; there is no terminal state. Learner updates are only
/// served in BROADCAST.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Phase {
    Election,
    Discovery,
    Synchronization,
    Broadcast,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Election => write!(f, "ELECTION"),
            Phase::Discovery => write!(f, "DISCOVERY"),
            Phase::Synchronization => write!(f, "SYNCHRONIZATION"),
            Phase::Broadcast => write!(f, "BROADCAST"),
        }
    }
}

/// What every node believes about the current leadership.
///
/// Both epochs only move forward; the setters ignore attempts to lower them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderView {
    pub leader_id: NodeId,
    accepted_epoch: Epoch,
    current_epoch: Epoch,
    pub phase: Phase,
}

impl LeaderView {
    pub fn new(initial_leader: NodeId) -> Self {
        Self {
            leader_id: initial_leader,
            accepted_epoch: 0,
            current_epoch: 0,
            phase: Phase::Election,
        }
    }

    pub fn accepted_epoch(&self) -> Epoch {
        self.accepted_epoch
    }

    pub fn current_epoch(&self) -> Epoch {
        self.current_epoch
    }

    /// Returns `false` (and changes nothing) if `epoch` would move backwards.
    pub fn accept_epoch(&mut self, epoch: Epoch) -> bool {
        if epoch < self.accepted_epoch {
            return false;
        }
        self.accepted_epoch = epoch;
        true
    }

    pub fn set_current_epoch(&mut self, epoch: Epoch) -> bool {
        if epoch < self.current_epoch {
            return false;
        }
        self.current_epoch = epoch;
        true
    }
}

/// Point-in-time snapshot of a node, for tests and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeStatistics {
    pub node_id: NodeId,
    pub phase: Phase,
    pub leader_id: NodeId,
    pub is_leader: bool,
    pub accepted_epoch: Epoch,
    pub current_epoch: Epoch,
    pub commit_cursor: ZxId,
    pub last_zxid: ZxId,
    pub log_len: usize,
    pub pending_commits: usize,
    pub applied_count: u64,
    pub elections: u64,
}

#[derive(Debug)]
pub enum NodeCommand {
    Shutdown,
    GetStatistics(oneshot::Sender<NodeStatistics>),
}

pub type NodeCommandSender = mpsc::UnboundedSender<NodeCommand>;
pub type NodeCommandReceiver = mpsc::UnboundedReceiver<NodeCommand>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epochs_never_decrease() {
        let mut view = LeaderView::new(NodeId::new(0));
        assert!(view.accept_epoch(3));
        assert!(!view.accept_epoch(2));
        assert!(view.accept_epoch(3));
        assert_eq!(view.accepted_epoch(), 3);

        assert!(view.set_current_epoch(3));
        assert!(!view.set_current_epoch(1));
        assert_eq!(view.current_epoch(), 3);
    }
}
