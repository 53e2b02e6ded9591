use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, info, warn};

use zab_core::{
    messages::ProtocolMessage, serialization::MessageCodec, NodeId, Result, ZabError,
};

#[derive(Debug, Clone)]
pub struct NetworkConditions {
    /// Probability that any single message is silently dropped.
    pub packet_loss_rate: f64,
    /// Seed for the loss decisions, so a failing run can be replayed.
    pub seed: u64,
}

impl Default for NetworkConditions {
    fn default() -> Self {
        Self {
            packet_loss_rate: 0.0,
            seed: 7,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NetworkStats {
    pub messages_sent: u64,
    pub messages_delivered: u64,
    pub messages_dropped: u64,
    pub total_bytes: usize,
}

#[derive(Debug)]
struct SimState {
    inboxes: HashMap<NodeId, VecDeque<Vec<u8>>>,
    /// Nodes cut off from everyone, themselves included.
    isolated: HashSet<NodeId>,
    /// When non-empty, messages only flow within a group.
    partitions: Vec<HashSet<NodeId>>,
    conditions: NetworkConditions,
    rng: StdRng,
    stats: NetworkStats,
}

/// In-process message fabric for a fixed cluster.
///
/// Every message is pushed through the wire codec on its way in and decoded
/// on its way out, so the protocol is exercised against what a real transport
/// would deliver. Delivery is FIFO per receiving node; nothing is delayed,
/// only dropped.
#[derive(Debug)]
pub struct NetworkSimulator {
    codec: MessageCodec,
    state: Mutex<SimState>,
}

impl NetworkSimulator {
    pub fn new(peer_count: u32) -> Self {
        Self::with_codec(peer_count, MessageCodec::default())
    }

    pub fn with_codec(peer_count: u32, codec: MessageCodec) -> Self {
        let conditions = NetworkConditions::default();
        let inboxes = (0..peer_count)
            .map(|id| (NodeId::new(id), VecDeque::new()))
            .collect();
        Self {
            codec,
            state: Mutex::new(SimState {
                inboxes,
                isolated: HashSet::new(),
                partitions: Vec::new(),
                rng: StdRng::seed_from_u64(conditions.seed),
                conditions,
                stats: NetworkStats::default(),
            }),
        }
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<_> = self.state.lock().inboxes.keys().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn update_conditions(&self, conditions: NetworkConditions) {
        debug!("Updated network conditions: {:?}", conditions);
        let mut state = self.state.lock();
        state.rng = StdRng::seed_from_u64(conditions.seed);
        state.conditions = conditions;
    }

    /// Cuts `node` off. Anything already queued for it is lost.
    pub fn isolate(&self, node: NodeId) {
        let mut state = self.state.lock();
        state.isolated.insert(node);
        if let Some(inbox) = state.inboxes.get_mut(&node) {
            let lost = inbox.len() as u64;
            inbox.clear();
            state.stats.messages_dropped += lost;
        }
        warn!("Isolated node {}", node);
    }

    pub fn reconnect(&self, node: NodeId) {
        self.state.lock().isolated.remove(&node);
        info!("Reconnected node {}", node);
    }

    /// Splits the cluster; nodes missing from every group can talk to no one.
    pub fn partition(&self, groups: Vec<HashSet<NodeId>>) {
        warn!("Partitioned network into {:?}", groups);
        self.state.lock().partitions = groups;
    }

    pub fn heal_partitions(&self) {
        self.state.lock().partitions.clear();
        info!("Healed all network partitions");
    }

    pub fn stats(&self) -> NetworkStats {
        self.state.lock().stats.clone()
    }

    pub fn queued_for(&self, node: NodeId) -> usize {
        self.state
            .lock()
            .inboxes
            .get(&node)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    pub fn send_message(&self, from: NodeId, to: NodeId, message: &ProtocolMessage) -> Result<()> {
        let bytes = self.codec.encode(message)?;
        let mut state = self.state.lock();
        state.stats.messages_sent += 1;

        if !state.inboxes.contains_key(&to) {
            return Err(ZabError::transport(format!("no such node {}", to)));
        }
        if !state.can_reach(from, to) {
            debug!("Message from {} to {} dropped by partition", from, to);
            state.stats.messages_dropped += 1;
            return Ok(());
        }
        let loss_rate = state.conditions.packet_loss_rate;
        if loss_rate > 0.0 && state.rng.gen::<f64>() < loss_rate {
            debug!("Message from {} to {} dropped by packet loss", from, to);
            state.stats.messages_dropped += 1;
            return Ok(());
        }

        state.stats.total_bytes += bytes.len();
        if let Some(inbox) = state.inboxes.get_mut(&to) {
            inbox.push_back(bytes);
        }
        Ok(())
    }

    pub fn receive(&self, node: NodeId) -> Result<Option<ProtocolMessage>> {
        let bytes = {
            let mut state = self.state.lock();
            if state.isolated.contains(&node) {
                return Ok(None);
            }
            let Some(bytes) = state.inboxes.get_mut(&node).and_then(VecDeque::pop_front) else {
                return Ok(None);
            };
            state.stats.messages_delivered += 1;
            bytes
        };
        self.codec.decode(&bytes).map(Some)
    }
}

impl SimState {
    fn can_reach(&self, from: NodeId, to: NodeId) -> bool {
        if self.isolated.contains(&from) || self.isolated.contains(&to) {
            return false;
        }
        if self.partitions.is_empty() {
            return true;
        }
        self.partitions
            .iter()
            .any(|group| group.contains(&from) && group.contains(&to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_message_delivery() {
        let simulator = NetworkSimulator::new(2);
        let (node0, node1) = (NodeId::new(0), NodeId::new(1));

        simulator
            .send_message(node1, node0, &ProtocolMessage::heartbeat(node1))
            .unwrap();
        let received = simulator.receive(node0).unwrap().unwrap();
        assert_eq!(received, ProtocolMessage::heartbeat(node1));
        assert!(simulator.receive(node0).unwrap().is_none());

        let stats = simulator.stats();
        assert_eq!(stats.messages_sent, 1);
        assert_eq!(stats.messages_delivered, 1);
        assert!(stats.total_bytes > 0);
    }

    #[test]
    fn test_network_partition() {
        let simulator = NetworkSimulator::with_codec(3, MessageCodec::json());
        let nodes: Vec<_> = (0..3).map(NodeId::new).collect();
        simulator.partition(vec![
            [nodes[0], nodes[1]].into_iter().collect(),
            [nodes[2]].into_iter().collect(),
        ]);

        simulator
            .send_message(nodes[0], nodes[2], &ProtocolMessage::heartbeat(nodes[0]))
            .unwrap();
        simulator
            .send_message(nodes[0], nodes[1], &ProtocolMessage::heartbeat(nodes[0]))
            .unwrap();
        assert!(simulator.receive(nodes[2]).unwrap().is_none());
        assert!(simulator.receive(nodes[1]).unwrap().is_some());
        assert_eq!(simulator.stats().messages_dropped, 1);

        simulator.heal_partitions();
        simulator
            .send_message(nodes[0], nodes[2], &ProtocolMessage::heartbeat(nodes[0]))
            .unwrap();
        assert!(simulator.receive(nodes[2]).unwrap().is_some());
    }

    #[test]
    fn test_isolated_node_loses_queued_messages() {
        let simulator = NetworkSimulator::new(2);
        let (node0, node1) = (NodeId::new(0), NodeId::new(1));

        simulator
            .send_message(node0, node1, &ProtocolMessage::heartbeat(node0))
            .unwrap();
        simulator.isolate(node1);
        simulator.reconnect(node1);
        assert!(simulator.receive(node1).unwrap().is_none());
        assert_eq!(simulator.stats().messages_dropped, 1);
    }

    #[test]
    fn test_full_packet_loss_drops_everything() {
        let simulator = NetworkSimulator::new(2);
        simulator.update_conditions(NetworkConditions {
            packet_loss_rate: 1.0,
            seed: 1,
        });
        for _ in 0..10 {
            simulator
                .send_message(NodeId::new(0), NodeId::new(1), &ProtocolMessage::heartbeat(NodeId::new(0)))
                .unwrap();
        }
        assert_eq!(simulator.queued_for(NodeId::new(1)), 0);
        assert_eq!(simulator.stats().messages_dropped, 10);
    }
}
