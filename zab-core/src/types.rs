//! # Core Types
//!
//! Fundamental types used throughout the ZAB atomic broadcast protocol.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, ZabError};

/// A leadership term. Epoch `0` is the state of a node that has never
/// completed synchronization with any leader.
pub type Epoch = i64;

/// Identifier of a node in the fixed cluster.
///
/// Node ids are dense: a cluster of `n` nodes uses ids `0..n`. The round-robin
/// candidate rotation relies on that.
///
/// # Examples
///
/// ```rust
/// use zab_core::NodeId;
///
/// let node = NodeId::new(2);
/// assert_eq!(node.value(), 2);
/// assert_eq!(node.to_string(), "2");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for NodeId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Total-order key of a proposal: `(epoch, counter)`.
///
/// Ordering compares the epoch first and the counter second, which is exactly
/// the derived lexicographic ordering of the two fields. The first proposal of
/// an epoch has counter `0`; [`ZxId::NONE`] (`(-1, -1)`) sorts below every
/// real zxid and stands for "no record".
///
/// # Examples
///
/// ```rust
/// use zab_core::ZxId;
///
/// let a = ZxId::new(1, 7);
/// let b = ZxId::new(2, 0);
/// assert!(a < b);
/// assert!(ZxId::NONE < ZxId::new(0, 0));
/// assert_eq!(a.next(), ZxId::new(1, 8));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ZxId {
    pub epoch: Epoch,
    pub counter: i64,
}

impl ZxId {
    /// Sentinel for an empty log.
    pub const NONE: ZxId = ZxId {
        epoch: -1,
        counter: -1,
    };

    pub fn new(epoch: Epoch, counter: i64) -> Self {
        Self { epoch, counter }
    }

    /// Cursor position of a node that entered `epoch` and has not yet
    /// committed anything in it. The next expected commit is `(epoch, 0)`.
    pub fn epoch_start(epoch: Epoch) -> Self {
        Self { epoch, counter: -1 }
    }

    /// The zxid that directly follows this one within the same epoch.
    pub fn next(&self) -> Self {
        Self {
            epoch: self.epoch,
            counter: self.counter + 1,
        }
    }

    pub fn is_none(&self) -> bool {
        *self == Self::NONE
    }
}

impl Default for ZxId {
    fn default() -> Self {
        Self::NONE
    }
}

impl fmt::Display for ZxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.epoch, self.counter)
    }
}

/// A proposed or committed update, addressed by its zxid.
///
/// The payload is opaque: the protocol orders and delivers it but never looks
/// inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub zxid: ZxId,
    pub payload: Bytes,
}

impl LogRecord {
    pub fn new(zxid: ZxId, payload: impl Into<Bytes>) -> Self {
        Self {
            zxid,
            payload: payload.into(),
        }
    }
}

/// Identity of the local node inside a fixed cluster of `peer_count` nodes.
///
/// Immutable after construction. Also answers the cluster-shape questions the
/// protocol keeps asking: quorum size, majority threshold and the round-robin
/// successor of a candidate.
///
/// # Examples
///
/// ```rust
/// use zab_core::{NodeId, NodeIdentity};
///
/// let identity = NodeIdentity::new(NodeId::new(0), 5).unwrap();
/// assert_eq!(identity.quorum_size(), 3);
/// assert_eq!(identity.majority_threshold(), 2);
/// assert_eq!(identity.next_candidate(NodeId::new(4)), NodeId::new(0));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeIdentity {
    id: NodeId,
    peer_count: u32,
}

impl NodeIdentity {
    pub fn new(id: NodeId, peer_count: u32) -> Result<Self> {
        if peer_count == 0 {
            return Err(ZabError::InvalidConfig {
                message: "cluster must contain at least one node".to_string(),
            });
        }
        if id.value() >= peer_count {
            return Err(ZabError::UnknownNode {
                node_id: id,
                peer_count,
            });
        }
        Ok(Self { id, peer_count })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn peer_count(&self) -> u32 {
        self.peer_count
    }

    /// ⌊n/2⌋ + 1
    pub fn quorum_size(&self) -> usize {
        (self.peer_count as usize / 2) + 1
    }

    /// ⌊n/2⌋. Follower acknowledgements and fresh heartbeats must exceed
    /// this value.
    pub fn majority_threshold(&self) -> usize {
        self.peer_count as usize / 2
    }

    pub fn contains(&self, node: NodeId) -> bool {
        node.value() < self.peer_count
    }

    /// Round-robin successor of `current` over `0..n`.
    pub fn next_candidate(&self, current: NodeId) -> NodeId {
        NodeId::new((current.value() + 1) % self.peer_count)
    }

    /// Every node in the cluster, in id order.
    pub fn all_nodes(&self) -> impl Iterator<Item = NodeId> {
        (0..self.peer_count).map(NodeId::new)
    }

    /// Every node except the local one, in id order.
    pub fn peers(&self) -> impl Iterator<Item = NodeId> {
        let me = self.id;
        self.all_nodes().filter(move |node| *node != me)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node {} of {}", self.id, self.peer_count)
    }
}
