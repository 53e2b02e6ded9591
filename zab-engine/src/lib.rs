//! # ZAB Engine
//!
//! Protocol engine for ZAB-style atomic broadcast.
//!
//! A [`ZabNode`] composes the pieces of the protocol into one per-replica
//! state machine:
//!
//! - **Epoch coordination** (ELECTION, DISCOVERY, SYNCHRONIZATION): a
//!   candidate collects FOLLOWERINFO from a quorum, fixes a new epoch, adopts
//!   the most advanced history among the quorum and pushes it back out before
//!   any new write is accepted.
//! - **Broadcast**: the leader assigns zxids, followers acknowledge, and a
//!   record commits once more than ⌊n/2⌋ followers have acknowledged it.
//!   Commits are delivered to the learner strictly in zxid order.
//! - **Failure detection**: a separate task exchanges heartbeats and asks the
//!   node to re-elect when the leader, or a majority of followers, goes
//!   quiet.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::{mpsc, oneshot};
//! use zab_core::{learner::Learner, network::Transport, NodeId, NodeIdentity, Result};
//! use zab_engine::{NodeCommand, ZabConfig, ZabNode};
//!
//! async fn start<T, L>(transport: Arc<T>, learner: L) -> Result<()>
//! where
//!     T: Transport + 'static,
//!     L: Learner + 'static,
//! {
//!     let identity = NodeIdentity::new(NodeId::new(0), 3)?;
//!     let node = ZabNode::new(identity, ZabConfig::default(), transport, learner)?;
//!
//!     let (command_tx, command_rx) = mpsc::unbounded_channel();
//!     let handle = tokio::spawn(node.run(command_rx));
//!
//!     let (reply_tx, reply_rx) = oneshot::channel();
//!     let _ = command_tx.send(NodeCommand::GetStatistics(reply_tx));
//!     if let Ok(stats) = reply_rx.await {
//!         println!("node {} is in {}", stats.node_id, stats.phase);
//!     }
//!
//!     let _ = command_tx.send(NodeCommand::Shutdown);
//!     let _ = handle.await;
//!     Ok(())
//! }
//! ```

mod broadcast;
pub mod config;
mod discovery;
pub mod failure_detector;
pub mod leader;
pub mod node;
pub mod state;

#[cfg(test)]
pub(crate) mod test_support;

pub use config::*;
pub use failure_detector::{DetectorHandle, DetectorRole, FailureDetector, Liveness};
pub use leader::{AckOutcome, EpochReport, LeaderState};
pub use node::ZabNode;
pub use state::*;
