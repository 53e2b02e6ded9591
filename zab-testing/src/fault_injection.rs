use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, warn};

use zab_core::{learner::InMemoryLearner, Epoch, NodeId, NodeIdentity, Result};
use zab_engine::{Phase, ZabConfig, ZabNode};

use crate::network::InMemoryTransport;
use crate::network_sim::{NetworkConditions, NetworkSimulator};

pub type TestNode = ZabNode<InMemoryTransport, InMemoryLearner>;

#[derive(Debug, Clone)]
pub enum FaultType {
    /// Cut the node off and stop ticking it. Its log and epochs survive.
    Crash { node_id: NodeId },
    /// Reconnect a crashed node and resume ticking it.
    Recover { node_id: NodeId },
    Partition { groups: Vec<HashSet<NodeId>> },
    HealPartitions,
    PacketLoss { rate: f64, seed: u64 },
}

/// Drives a whole cluster of [`ZabNode`]s over one [`NetworkSimulator`].
///
/// Nodes are ticked round-robin in id order with a `tick_interval` sleep
/// between rounds, so under a paused tokio clock the failure detectors and
/// phase timeouts see time pass exactly as they would in a live cluster.
pub struct ClusterHarness {
    config: ZabConfig,
    simulator: Arc<NetworkSimulator>,
    nodes: Vec<TestNode>,
    crashed: HashSet<NodeId>,
    /// Highest (accepted, current) epoch pair observed per node.
    epoch_marks: BTreeMap<NodeId, (Epoch, Epoch)>,
    epoch_regressions: Vec<String>,
    fatal_errors: u64,
    rounds: u64,
}

impl ClusterHarness {
    pub fn new(peer_count: u32, config: ZabConfig) -> Result<Self> {
        let simulator = Arc::new(NetworkSimulator::new(peer_count));
        let mut nodes = Vec::with_capacity(peer_count as usize);

        for id in 0..peer_count {
            let node_id = NodeId::new(id);
            let identity = NodeIdentity::new(node_id, peer_count)?;
            let transport = Arc::new(InMemoryTransport::new(node_id, simulator.clone()));
            nodes.push(ZabNode::new(
                identity,
                config.clone(),
                transport,
                InMemoryLearner::new(),
            )?);
        }

        info!("Created test cluster of {} nodes", peer_count);
        Ok(Self {
            config,
            simulator,
            nodes,
            crashed: HashSet::new(),
            epoch_marks: BTreeMap::new(),
            epoch_regressions: Vec::new(),
            fatal_errors: 0,
            rounds: 0,
        })
    }

    pub fn config(&self) -> &ZabConfig {
        &self.config
    }

    pub fn simulator(&self) -> &Arc<NetworkSimulator> {
        &self.simulator
    }

    pub fn peer_count(&self) -> usize {
        self.nodes.len()
    }

    /// # Panics
    ///
    /// If `id` is not a member of the cluster.
    pub fn node(&self, id: u32) -> &TestNode {
        &self.nodes[id as usize]
    }

    pub fn node_mut(&mut self, id: u32) -> &mut TestNode {
        &mut self.nodes[id as usize]
    }

    pub fn learner(&self, id: u32) -> &InMemoryLearner {
        self.node(id).learner()
    }

    pub fn nodes(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes.iter()
    }

    pub fn live_nodes(&self) -> impl Iterator<Item = &TestNode> {
        self.nodes
            .iter()
            .filter(|node| !self.crashed.contains(&node.id()))
    }

    pub fn is_crashed(&self, id: u32) -> bool {
        self.crashed.contains(&NodeId::new(id))
    }

    pub fn rounds(&self) -> u64 {
        self.rounds
    }

    pub fn fatal_errors(&self) -> u64 {
        self.fatal_errors
    }

    /// Every time a node's accepted or current epoch went backwards.
    pub fn epoch_regressions(&self) -> &[String] {
        &self.epoch_regressions
    }

    pub fn crash(&mut self, id: u32) {
        self.inject_fault(FaultType::Crash {
            node_id: NodeId::new(id),
        });
    }

    pub fn recover(&mut self, id: u32) {
        self.inject_fault(FaultType::Recover {
            node_id: NodeId::new(id),
        });
    }

    pub fn inject_fault(&mut self, fault: FaultType) {
        info!("Injecting fault: {:?}", fault);
        match fault {
            FaultType::Crash { node_id } => {
                self.simulator.isolate(node_id);
                self.crashed.insert(node_id);
            }
            FaultType::Recover { node_id } => {
                self.simulator.reconnect(node_id);
                self.crashed.remove(&node_id);
            }
            FaultType::Partition { groups } => self.simulator.partition(groups),
            FaultType::HealPartitions => self.simulator.heal_partitions(),
            FaultType::PacketLoss { rate, seed } => {
                self.simulator.update_conditions(NetworkConditions {
                    packet_loss_rate: rate,
                    seed,
                })
            }
        }
    }

    /// Ticks every live node once, then lets one `tick_interval` pass.
    ///
    /// A node whose tick hits a protocol violation is restarted from
    /// ELECTION, the same recovery [`ZabNode::run`] applies.
    pub async fn tick_all(&mut self) {
        for node in self.nodes.iter_mut() {
            if self.crashed.contains(&node.id()) {
                continue;
            }
            if let Err(e) = node.tick().await {
                error!("Node {} failed its tick: {}", node.id(), e);
                self.fatal_errors += 1;
                node.restart();
            }
        }
        self.record_epochs();
        self.rounds += 1;
        sleep(self.config.tick_interval).await;
    }

    /// Ticks a single node without advancing the clock.
    pub async fn tick_node(&mut self, id: u32) -> Result<()> {
        self.nodes[id as usize].tick().await
    }

    /// Ticks the cluster until `condition` holds or `max_rounds` have run.
    pub async fn run_until<F>(&mut self, max_rounds: u64, mut condition: F) -> bool
    where
        F: FnMut(&Self) -> bool,
    {
        for _ in 0..max_rounds {
            if condition(self) {
                return true;
            }
            self.tick_all().await;
        }
        let reached = condition(self);
        if !reached {
            warn!("Condition not reached after {} rounds", max_rounds);
        }
        reached
    }

    pub async fn run_for(&mut self, duration: Duration) {
        let rounds = duration.as_nanos() / self.config.tick_interval.as_nanos().max(1);
        for _ in 0..rounds {
            self.tick_all().await;
        }
    }

    /// The node every live node agrees leads an established epoch.
    ///
    /// Established means all live nodes are in BROADCAST at the same current
    /// epoch under the same leader, and that leader has confirmed every live
    /// follower.
    pub fn established_leader(&self) -> Option<NodeId> {
        let mut live = self.live_nodes();
        let first = live.next()?;
        let leader_id = first.view().leader_id;
        let epoch = first.view().current_epoch();

        let agreed = self.live_nodes().all(|node| {
            node.phase() == Phase::Broadcast
                && node.view().leader_id == leader_id
                && node.view().current_epoch() == epoch
        });
        if !agreed || self.crashed.contains(&leader_id) {
            return None;
        }

        let leader = self.nodes.get(leader_id.value() as usize)?;
        let state = leader.leader_state()?;
        let all_confirmed = self
            .live_nodes()
            .filter(|node| node.id() != leader_id)
            .all(|node| state.is_confirmed(node.id()));
        all_confirmed.then_some(leader_id)
    }

    /// Total learner applies across the live nodes.
    pub fn applied_total(&self) -> usize {
        self.live_nodes()
            .map(|node| node.learner().applied().len())
            .sum()
    }

    fn record_epochs(&mut self) {
        for node in &self.nodes {
            let now = (node.view().accepted_epoch(), node.view().current_epoch());
            let mark = self.epoch_marks.entry(node.id()).or_insert(now);
            if now.0 < mark.0 || now.1 < mark.1 {
                self.epoch_regressions.push(format!(
                    "node {} went from {:?} to {:?}",
                    node.id(),
                    *mark,
                    now
                ));
            }
            *mark = (mark.0.max(now.0), mark.1.max(now.1));
        }
    }
}
