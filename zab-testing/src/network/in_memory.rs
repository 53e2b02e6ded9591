use async_trait::async_trait;
use std::sync::Arc;

use zab_core::{messages::ProtocolMessage, network::Transport, NodeId, Result};

use crate::network_sim::NetworkSimulator;

/// One node's handle onto a shared [`NetworkSimulator`].
#[derive(Debug, Clone)]
pub struct InMemoryTransport {
    node_id: NodeId,
    simulator: Arc<NetworkSimulator>,
}

impl InMemoryTransport {
    pub fn new(node_id: NodeId, simulator: Arc<NetworkSimulator>) -> Self {
        Self { node_id, simulator }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn simulator(&self) -> &Arc<NetworkSimulator> {
        &self.simulator
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn send_to(&self, target: NodeId, message: ProtocolMessage) -> Result<()> {
        self.simulator.send_message(self.node_id, target, &message)
    }

    async fn broadcast(&self, message: ProtocolMessage) -> Result<()> {
        for node_id in self.simulator.nodes() {
            self.simulator.send_message(self.node_id, node_id, &message)?;
        }
        Ok(())
    }

    async fn broadcast_excluding_self(&self, message: ProtocolMessage) -> Result<()> {
        for node_id in self.simulator.nodes() {
            if node_id != self.node_id {
                self.simulator.send_message(self.node_id, node_id, &message)?;
            }
        }
        Ok(())
    }

    async fn receive(&self) -> Result<Option<ProtocolMessage>> {
        self.simulator.receive(self.node_id)
    }
}
