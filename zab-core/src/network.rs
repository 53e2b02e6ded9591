use async_trait::async_trait;

use crate::messages::ProtocolMessage;
use crate::{NodeId, Result};

/// Message delivery between nodes of the fixed cluster.
///
/// Implementations own addressing, wire encoding, connection management and
/// any retry policy. The protocol treats every send as fire-and-forget: a
/// returned error is logged and the message abandoned.
///
/// `receive` must never wait for traffic. It returns `Ok(None)` as soon as the
/// inbound queue is empty so the protocol tick can drain it and return.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_to(&self, target: NodeId, message: ProtocolMessage) -> Result<()>;

    /// Delivers to every node, the sender included.
    async fn broadcast(&self, message: ProtocolMessage) -> Result<()>;

    async fn broadcast_excluding_self(&self, message: ProtocolMessage) -> Result<()>;

    /// Delivers to each listed node. Every target is attempted; the first
    /// failure is returned.
    async fn multicast(&self, targets: &[NodeId], message: ProtocolMessage) -> Result<()> {
        let mut first_error = None;
        for &target in targets {
            if let Err(e) = self.send_to(target, message.clone()).await {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Non-blocking receive of the next inbound message.
    async fn receive(&self) -> Result<Option<ProtocolMessage>>;
}
