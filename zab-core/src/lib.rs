//! # ZAB Core
//!
//! Core components of a ZAB-style atomic broadcast: a leader-based protocol
//! that delivers a stream of opaque updates in the same total order on every
//! replica of a fixed cluster, despite crashes, leader turnover and message
//! loss.
//!
//! ## Components
//!
//! - **Types**: [`NodeId`], [`ZxId`] (the `(epoch, counter)` total-order key),
//!   [`LogRecord`], [`NodeIdentity`]
//! - **Log**: the ordered record sequence each node keeps
//! - **PendingCommitTable**: commits that arrived ahead of the commit cursor
//! - **Messages**: the protocol's tagged message union
//! - **Collaborators**: the [`network::Transport`] and [`learner::Learner`]
//!   traits the protocol engine drives
//! - **Error Handling**: [`ZabError`] and its fatal/retryable classification
//! - **Serialization**: wire codecs transports can use
//! - **Validation**: structural checks on inbound messages
//!
//! ## Implementing a Learner
//!
//! ```rust
//! use async_trait::async_trait;
//! use bytes::Bytes;
//! use zab_core::{learner::Learner, Result, ZxId};
//!
//! pub struct GradientSink {
//!     outbox: Vec<Bytes>,
//!     applied: Vec<(ZxId, Bytes)>,
//! }
//!
//! #[async_trait]
//! impl Learner for GradientSink {
//!     async fn pending_update(&mut self) -> Option<Bytes> {
//!         self.outbox.pop()
//!     }
//!
//!     async fn apply(&mut self, zxid: ZxId, payload: &Bytes) -> Result<()> {
//!         self.applied.push((zxid, payload.clone()));
//!         Ok(())
//!     }
//! }
//!
//! # tokio_test::block_on(async {
//! let mut sink = GradientSink { outbox: vec![Bytes::from("g0")], applied: Vec::new() };
//! assert_eq!(sink.pending_update().await, Some(Bytes::from("g0")));
//! sink.apply(ZxId::new(1, 0), &Bytes::from("g0")).await.unwrap();
//! assert_eq!(sink.applied.len(), 1);
//! # });
//! ```

pub mod error;
pub mod learner;
pub mod log;
pub mod messages;
pub mod network;
pub mod pending;
pub mod serialization;
pub mod types;
pub mod validation;

pub use error::*;
pub use log::Log;
pub use pending::PendingCommitTable;
pub use types::*;
pub use validation::*;
