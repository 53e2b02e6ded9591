use std::collections::VecDeque;
use std::sync::Arc;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument, Span};

use zab_core::{
    learner::Learner,
    messages::{MessageType, ProtocolMessage},
    network::Transport,
    Log, LogRecord, NodeId, NodeIdentity, PendingCommitTable, Result, Validator, ZxId,
};

use crate::config::ZabConfig;
use crate::failure_detector::{DetectorHandle, DetectorRole, FailureDetector, Liveness};
use crate::leader::LeaderState;
use crate::state::{LeaderView, NodeCommand, NodeCommandReceiver, NodeStatistics, Phase};

/// One replica of the cluster.
///
/// The node is driven by [`ZabNode::tick`], either from an external driver
/// (a training loop, a test) or from [`ZabNode::run`]. Everything except the
/// heartbeat table and reset flag is owned by the tick and touched
/// sequentially; the failure detector task sees only [`Liveness`].
pub struct ZabNode<T, L>
where
    T: Transport + 'static,
    L: Learner,
{
    pub(crate) identity: NodeIdentity,
    pub(crate) config: ZabConfig,
    pub(crate) transport: Arc<T>,
    pub(crate) learner: L,
    pub(crate) view: LeaderView,
    pub(crate) log: Log,
    pub(crate) pending: PendingCommitTable,
    /// Last zxid applied to the learner.
    pub(crate) commit_cursor: ZxId,
    /// Present only while this node is bidding for or holding leadership.
    pub(crate) leader: Option<LeaderState>,
    /// Tail of the history adopted during the current synchronization.
    pub(crate) sync_point: Option<ZxId>,
    /// Records committed by synchronization that still have to reach the
    /// learner, applied ahead of anything in `pending`.
    pub(crate) sync_backlog: VecDeque<LogRecord>,
    /// Cursor to jump to once `sync_backlog` is drained.
    pub(crate) resume_cursor: Option<ZxId>,
    /// Everything up to here was committed when the current epoch was
    /// established, whether or not the learner has seen it yet.
    pub(crate) established_through: ZxId,
    pub(crate) liveness: Arc<Liveness>,
    pub(crate) detector: Option<DetectorHandle>,
    pub(crate) phase_started: Instant,
    pub(crate) last_follower_info: Option<Instant>,
    pub(crate) applied_count: u64,
    pub(crate) elections: u64,
    span: Span,
}

impl<T, L> ZabNode<T, L>
where
    T: Transport + 'static,
    L: Learner,
{
    pub fn new(identity: NodeIdentity, config: ZabConfig, transport: Arc<T>, learner: L) -> Result<Self> {
        config.validate()?;
        let span = info_span!("zab_node", node = %identity.id());

        Ok(Self {
            identity,
            config,
            transport,
            learner,
            view: LeaderView::new(NodeId::new(0)),
            log: Log::new(),
            pending: PendingCommitTable::new(),
            commit_cursor: ZxId::NONE,
            leader: None,
            sync_point: None,
            sync_backlog: VecDeque::new(),
            resume_cursor: None,
            established_through: ZxId::NONE,
            liveness: Arc::new(Liveness::new()),
            detector: None,
            phase_started: Instant::now(),
            last_follower_info: None,
            applied_count: 0,
            elections: 0,
            span,
        })
    }

    pub fn id(&self) -> NodeId {
        self.identity.id()
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn config(&self) -> &ZabConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.view.phase
    }

    pub fn view(&self) -> &LeaderView {
        &self.view
    }

    pub fn log(&self) -> &Log {
        &self.log
    }

    pub fn pending(&self) -> &PendingCommitTable {
        &self.pending
    }

    pub fn commit_cursor(&self) -> ZxId {
        self.commit_cursor
    }

    pub fn leader_state(&self) -> Option<&LeaderState> {
        self.leader.as_ref()
    }

    pub fn is_leader(&self) -> bool {
        self.leader.is_some() && self.view.leader_id == self.identity.id()
    }

    pub fn liveness(&self) -> &Arc<Liveness> {
        &self.liveness
    }

    pub fn learner(&self) -> &L {
        &self.learner
    }

    pub fn learner_mut(&mut self) -> &mut L {
        &mut self.learner
    }

    pub fn statistics(&self) -> NodeStatistics {
        NodeStatistics {
            node_id: self.identity.id(),
            phase: self.view.phase,
            leader_id: self.view.leader_id,
            is_leader: self.is_leader(),
            accepted_epoch: self.view.accepted_epoch(),
            current_epoch: self.view.current_epoch(),
            commit_cursor: self.commit_cursor,
            last_zxid: self.log.last_zxid(),
            log_len: self.log.len(),
            pending_commits: self.pending.len(),
            applied_count: self.applied_count,
            elections: self.elections,
        }
    }

    /// Runs one protocol step: honour a pending reset or phase timeout, run
    /// the election step if needed, drain every available message, deliver
    /// contiguous commits, then hand at most one learner update to the leader.
    ///
    /// Only fatal errors are returned; the caller decides whether to restart
    /// the node from ELECTION.
    pub async fn tick(&mut self) -> Result<()> {
        let span = self.span.clone();
        self.step().instrument(span).await
    }

    async fn step(&mut self) -> Result<()> {
        if self.liveness.take_reset() && self.view.phase == Phase::Broadcast {
            warn!("Failure detector requested re-election");
            self.enter_election(true);
        }

        if self.view.phase == Phase::Election {
            self.run_election().await?;
        }

        if self.view.phase != Phase::Broadcast
            && self.phase_started.elapsed() > self.config.phase_timeout
        {
            warn!(
                "Stuck in {} for more than {:?}, moving to the next candidate",
                self.view.phase, self.config.phase_timeout
            );
            self.enter_election(true);
            self.run_election().await?;
        }

        self.retry_follower_info().await;
        self.drain_messages().await?;

        if let Err(e) = self.process_pending_commits().await {
            warn!("Delivery stalled at {}: {}", self.commit_cursor, e);
        }

        if self.view.phase == Phase::Broadcast {
            if let Some(payload) = self.learner.pending_update().await {
                self.submit_update(payload).await?;
            }
        }
        Ok(())
    }

    async fn drain_messages(&mut self) -> Result<()> {
        loop {
            let message = match self.transport.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    return Ok(());
                }
            };

            if let Err(e) = self.handle_message(message).await {
                if e.is_fatal() {
                    error!("Protocol violation: {}", e);
                    return Err(e);
                }
                warn!("Message handling failed: {}", e);
            }
        }
    }

    pub(crate) async fn handle_message(&mut self, message: ProtocolMessage) -> Result<()> {
        let from = message.from;
        if let Err(e) = message.validate() {
            warn!(
                "Dropping invalid {} from {}: {}",
                message.message_type.name(),
                from,
                e
            );
            return Ok(());
        }
        if !self.identity.contains(from) || from == self.identity.id() {
            warn!(
                "Dropping {} from unexpected sender {}",
                message.message_type.name(),
                from
            );
            return Ok(());
        }

        match message.message_type {
            MessageType::FollowerInfo(info) => self.on_follower_info(from, info).await,
            MessageType::NewEpoch(new_epoch) => self.on_new_epoch(from, new_epoch).await,
            MessageType::AckEpoch(ack) => self.on_ack_epoch(from, ack).await,
            MessageType::NewLeader(new_leader) => self.on_new_leader(from, new_leader).await,
            MessageType::AckNewLeader(ack) => self.on_ack_new_leader(from, ack).await,
            MessageType::CommitNewLeader => self.on_commit_new_leader(from).await,
            MessageType::WriteRequest(request) => self.on_write_request(from, request).await,
            MessageType::Proposal(proposal) => self.on_proposal(from, proposal).await,
            MessageType::Ack(ack) => self.on_ack(from, ack).await,
            MessageType::Commit(commit) => self.on_commit(from, commit).await,
            MessageType::HeartBeat(_) => {
                self.liveness.record_heartbeat(from);
                Ok(())
            }
        }
    }

    /// Drives the node until shutdown, ticking every `tick_interval`.
    pub async fn run(self, commands: NodeCommandReceiver) -> Result<()> {
        let span = self.span.clone();
        self.run_loop(commands).instrument(span).await
    }

    async fn run_loop(mut self, mut commands: NodeCommandReceiver) -> Result<()> {
        info!(
            "Starting node in a cluster of {}",
            self.identity.peer_count()
        );
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(NodeCommand::GetStatistics(reply)) => {
                        let _ = reply.send(self.statistics());
                    }
                    Some(NodeCommand::Shutdown) | None => {
                        info!("Shutting down");
                        self.stop_failure_detector();
                        return Ok(());
                    }
                },
                _ = ticker.tick() => {
                    if let Err(e) = self.step().await {
                        error!("Restarting from ELECTION after: {}", e);
                        self.restart();
                    }
                }
            }
        }
    }

    /// Abandons the current round and starts over from ELECTION with the next
    /// candidate. This is what [`ZabNode::run`] does after a fatal error.
    pub fn restart(&mut self) {
        self.enter_election(true);
    }

    // --- phase plumbing shared by the coordinator and broadcast handlers ---

    pub(crate) fn set_phase(&mut self, phase: Phase) {
        if phase != self.view.phase {
            info!("{} -> {}", self.view.phase, phase);
        }
        self.view.phase = phase;
        self.phase_started = Instant::now();
    }

    /// Abandons whatever round is in progress. With `rotate`, the next
    /// candidate in id order is tried.
    pub(crate) fn enter_election(&mut self, rotate: bool) {
        self.stop_failure_detector();
        self.leader = None;
        self.sync_point = None;
        self.sync_backlog.clear();
        self.resume_cursor = None;
        if rotate {
            self.view.leader_id = self.identity.next_candidate(self.view.leader_id);
        }
        self.elections += 1;
        self.set_phase(Phase::Election);
    }

    /// Marks everything up to `through` as committed and starts serving
    /// epoch `epoch`.
    pub(crate) fn enter_broadcast(&mut self, epoch: i64, through: ZxId) {
        let resume = if through.epoch == epoch {
            through
        } else {
            ZxId::epoch_start(epoch)
        };
        self.sync_backlog = self
            .log
            .range(self.commit_cursor, through)
            .iter()
            .cloned()
            .collect();
        self.resume_cursor = Some(resume);
        self.established_through = through;
        let dropped = self.pending.prune_through(resume);
        if dropped > 0 {
            debug!("Dropped {} buffered commits covered by synchronization", dropped);
        }

        info!(
            "Epoch {} established through {} ({} records to deliver)",
            epoch,
            through,
            self.sync_backlog.len()
        );
        self.set_phase(Phase::Broadcast);
        self.start_failure_detector();
    }

    fn start_failure_detector(&mut self) {
        self.stop_failure_detector();
        self.liveness.take_reset();
        if self.identity.peer_count() == 1 {
            return;
        }

        let me = self.identity.id();
        let role = if self.is_leader() {
            self.liveness.reseed(self.identity.peers());
            DetectorRole::Leader {
                threshold: self.identity.majority_threshold(),
            }
        } else {
            self.liveness.reseed([self.view.leader_id]);
            DetectorRole::Follower {
                leader: self.view.leader_id,
            }
        };

        let detector = FailureDetector::new(
            me,
            role,
            self.transport.clone(),
            self.liveness.clone(),
            self.config.heartbeat_interval,
            self.config.heartbeat_timeout,
        );
        self.detector = Some(detector.spawn());
    }

    pub(crate) fn stop_failure_detector(&mut self) {
        if let Some(detector) = self.detector.take() {
            debug!("Stopping failure detector ({:?})", detector.role());
            detector.stop();
        }
    }

    pub(crate) async fn send(&self, target: NodeId, message: ProtocolMessage) {
        let name = message.message_type.name();
        if let Err(e) = self.transport.send_to(target, message).await {
            warn!("Failed to send {} to {}: {}", name, target, e);
        }
    }

    pub(crate) async fn multicast(&self, targets: &[NodeId], message: ProtocolMessage) {
        if targets.is_empty() {
            return;
        }
        let name = message.message_type.name();
        if let Err(e) = self.transport.multicast(targets, message).await {
            warn!("Failed to send {} to some of {:?}: {}", name, targets, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use zab_core::learner::InMemoryLearner;
    use bytes::Bytes;
    use std::time::Duration;

    type TestNode = ZabNode<RecordingTransport, InMemoryLearner>;

    fn node(id: u32, peers: u32) -> (TestNode, Arc<RecordingTransport>, InMemoryLearner) {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .try_init();

        let transport = Arc::new(RecordingTransport::new(NodeId::new(id)));
        let learner = InMemoryLearner::new();
        let identity = NodeIdentity::new(NodeId::new(id), peers).unwrap();
        let node = ZabNode::new(identity, ZabConfig::default(), transport.clone(), learner.clone())
            .unwrap();
        (node, transport, learner)
    }

    fn sent_types(transport: &RecordingTransport) -> Vec<(Option<NodeId>, &'static str)> {
        transport
            .take_sent()
            .into_iter()
            .filter(|(_, message)| !matches!(message.message_type, MessageType::HeartBeat(_)))
            .map(|(target, message)| (target, message.message_type.name()))
            .collect()
    }

    /// Walks follower `id` of a `peers`-node cluster led by node 0 into
    /// BROADCAST for epoch 1 with an empty history.
    async fn synced_follower(id: u32, peers: u32) -> (TestNode, Arc<RecordingTransport>, InMemoryLearner) {
        let (mut node, transport, learner) = node(id, peers);
        let leader = NodeId::new(0);

        node.tick().await.unwrap();
        assert_eq!(node.phase(), Phase::Discovery);

        transport.inject(ProtocolMessage::new_epoch(leader, 1));
        node.tick().await.unwrap();
        assert_eq!(node.phase(), Phase::Synchronization);
        assert_eq!(node.view().accepted_epoch(), 1);

        transport.inject(ProtocolMessage::new_leader(leader, 1, Vec::new()));
        transport.inject(ProtocolMessage::commit_new_leader(leader));
        node.tick().await.unwrap();
        assert_eq!(node.phase(), Phase::Broadcast);
        assert_eq!(node.commit_cursor(), ZxId::epoch_start(1));

        transport.take_sent();
        (node, transport, learner)
    }

    #[tokio::test]
    async fn test_election_sends_follower_info_to_candidate() {
        let (mut node, transport, _) = node(2, 3);
        node.tick().await.unwrap();

        assert_eq!(node.phase(), Phase::Discovery);
        assert_eq!(
            sent_types(&transport),
            vec![(Some(NodeId::new(0)), "FOLLOWERINFO")]
        );
        assert_eq!(node.statistics().elections, 0);
    }

    #[tokio::test]
    async fn test_single_node_cluster_establishes_epoch_alone() {
        let (mut node, transport, _) = node(0, 1);
        node.tick().await.unwrap();

        assert_eq!(node.phase(), Phase::Broadcast);
        assert!(node.is_leader());
        assert_eq!(node.view().current_epoch(), 1);
        assert!(sent_types(&transport).is_empty());
    }

    #[tokio::test]
    async fn test_leader_walks_quorum_through_discovery_and_sync() {
        let (mut leader, transport, _) = node(0, 3);
        let follower = NodeId::new(1);

        leader.tick().await.unwrap();
        assert_eq!(leader.phase(), Phase::Discovery);

        transport.inject(ProtocolMessage::follower_info(follower, 0));
        leader.tick().await.unwrap();
        assert_eq!(sent_types(&transport), vec![(Some(follower), "NEWEPOCH")]);
        assert_eq!(leader.view().accepted_epoch(), 1);

        transport.inject(ProtocolMessage::ack_epoch(follower, Vec::new(), 0, ZxId::NONE));
        leader.tick().await.unwrap();
        assert_eq!(leader.phase(), Phase::Synchronization);
        assert_eq!(sent_types(&transport), vec![(Some(follower), "NEWLEADER")]);

        transport.inject(ProtocolMessage::ack_new_leader(follower, 1));
        leader.tick().await.unwrap();
        assert_eq!(leader.phase(), Phase::Broadcast);
        assert_eq!(leader.view().current_epoch(), 1);
        assert_eq!(
            sent_types(&transport),
            vec![(Some(follower), "COMMITNEWLEADER")]
        );
    }

    #[tokio::test]
    async fn test_leader_adopts_most_advanced_history() {
        let (mut leader, transport, learner) = node(0, 3);
        let follower = NodeId::new(2);
        let history = vec![
            LogRecord::new(ZxId::new(1, 0), "a"),
            LogRecord::new(ZxId::new(1, 1), "b"),
        ];

        leader.tick().await.unwrap();
        transport.inject(ProtocolMessage::follower_info(follower, 1));
        leader.tick().await.unwrap();
        assert_eq!(leader.view().accepted_epoch(), 2);

        transport.inject(ProtocolMessage::ack_epoch(
            follower,
            history.clone(),
            1,
            ZxId::new(1, 1),
        ));
        leader.tick().await.unwrap();
        assert_eq!(leader.log().records(), history.as_slice());

        transport.inject(ProtocolMessage::ack_new_leader(follower, 2));
        leader.tick().await.unwrap();
        assert_eq!(leader.phase(), Phase::Broadcast);
        assert_eq!(learner.applied_zxids(), vec![ZxId::new(1, 0), ZxId::new(1, 1)]);
        assert_eq!(leader.commit_cursor(), ZxId::epoch_start(2));
    }

    #[tokio::test]
    async fn test_extra_ack_epoch_is_fatal() {
        let (mut leader, transport, _) = node(0, 5);
        leader.tick().await.unwrap();

        transport.inject(ProtocolMessage::follower_info(NodeId::new(1), 0));
        transport.inject(ProtocolMessage::follower_info(NodeId::new(2), 0));
        leader.tick().await.unwrap();
        assert_eq!(leader.view().accepted_epoch(), 1);

        transport.inject(ProtocolMessage::ack_epoch(NodeId::new(3), Vec::new(), 0, ZxId::NONE));
        let err = leader.tick().await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_stale_new_epoch_sends_follower_back_to_election() {
        let (mut node, transport, _) = node(1, 3);
        node.view.accept_epoch(4);
        node.tick().await.unwrap();

        transport.inject(ProtocolMessage::new_epoch(NodeId::new(0), 3));
        node.tick().await.unwrap();

        assert_eq!(node.phase(), Phase::Election);
        assert_eq!(node.view().accepted_epoch(), 4);
        assert_eq!(node.view().leader_id, NodeId::new(1));
    }

    #[tokio::test]
    async fn test_new_epoch_from_non_leader_is_ignored() {
        let (mut node, transport, _) = node(1, 3);
        node.tick().await.unwrap();

        transport.inject(ProtocolMessage::new_epoch(NodeId::new(2), 7));
        node.tick().await.unwrap();
        assert_eq!(node.phase(), Phase::Discovery);
        assert_eq!(node.view().accepted_epoch(), 0);
    }

    #[tokio::test]
    async fn test_follower_applies_reordered_commits_in_order() {
        let (mut node, transport, learner) = synced_follower(1, 3).await;
        let leader = NodeId::new(0);

        for counter in 0..4 {
            let payload = Bytes::from(format!("g{}", counter));
            transport.inject(ProtocolMessage::proposal(leader, ZxId::new(1, counter), payload));
        }
        node.tick().await.unwrap();
        let acks: Vec<_> = sent_types(&transport);
        assert_eq!(acks.len(), 4);
        assert!(acks.iter().all(|(target, name)| *target == Some(leader) && *name == "ACK"));

        for counter in 0..2 {
            let payload = Bytes::from(format!("g{}", counter));
            transport.inject(ProtocolMessage::commit(leader, ZxId::new(1, counter), payload));
        }
        transport.inject(ProtocolMessage::commit(leader, ZxId::new(1, 3), "g3".into()));
        node.tick().await.unwrap();
        assert_eq!(node.commit_cursor(), ZxId::new(1, 1));
        assert_eq!(node.pending().len(), 1);

        transport.inject(ProtocolMessage::commit(leader, ZxId::new(1, 2), "g2".into()));
        node.tick().await.unwrap();
        assert_eq!(
            learner.applied_zxids(),
            (0..4).map(|counter| ZxId::new(1, counter)).collect::<Vec<_>>()
        );
        assert!(node.pending().is_empty());

        // A second pass with nothing new applies nothing.
        assert_eq!(node.process_pending_commits().await.unwrap(), 0);
        node.tick().await.unwrap();
        assert_eq!(learner.applied().len(), 4);
    }

    #[tokio::test]
    async fn test_learner_failure_keeps_commit_buffered() {
        let (mut node, transport, learner) = synced_follower(1, 3).await;
        let leader = NodeId::new(0);

        learner.fail_next(1);
        transport.inject(ProtocolMessage::commit(leader, ZxId::new(1, 0), "x".into()));
        node.tick().await.unwrap();
        assert_eq!(node.commit_cursor(), ZxId::epoch_start(1));
        assert_eq!(node.pending().len(), 1);

        node.tick().await.unwrap();
        assert_eq!(node.commit_cursor(), ZxId::new(1, 0));
        assert_eq!(learner.applied_zxids(), vec![ZxId::new(1, 0)]);
    }

    #[tokio::test]
    async fn test_proposal_from_non_leader_is_ignored() {
        let (mut node, transport, _) = synced_follower(1, 3).await;
        transport.inject(ProtocolMessage::proposal(NodeId::new(2), ZxId::new(1, 0), "x".into()));
        node.tick().await.unwrap();
        assert!(node.log().is_empty());
        assert!(sent_types(&transport).is_empty());
    }

    #[tokio::test]
    async fn test_follower_forwards_learner_updates_to_leader() {
        let (mut node, transport, learner) = synced_follower(2, 3).await;
        learner.submit("gradient");
        node.tick().await.unwrap();

        let sent = transport.take_sent();
        let writes: Vec<_> = sent
            .iter()
            .filter(|(_, message)| matches!(message.message_type, MessageType::WriteRequest(_)))
            .collect();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, Some(NodeId::new(0)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_phase_timeout_rotates_candidate() {
        let (mut node, _, _) = node(1, 3);
        node.config.phase_timeout = Duration::from_millis(1);
        node.tick().await.unwrap();
        assert_eq!(node.view().leader_id, NodeId::new(0));

        tokio::time::sleep(Duration::from_millis(5)).await;
        node.tick().await.unwrap();
        // Node 1 is next in line and starts its own bid.
        assert_eq!(node.view().leader_id, NodeId::new(1));
        assert!(node.is_leader());
        assert_eq!(node.statistics().elections, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_leader_triggers_reset() {
        let (mut node, _, _) = synced_follower(1, 3).await;
        assert!(node.detector.is_some());

        tokio::time::sleep(node.config.heartbeat_timeout * 2).await;
        node.tick().await.unwrap();

        assert_eq!(node.view().leader_id, NodeId::new(1));
        assert_ne!(node.phase(), Phase::Broadcast);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_loop_can_be_spawned() {
        let (node, _, _) = node(0, 3);
        let (command_tx, command_rx) = tokio::sync::mpsc::unbounded_channel();
        let handle = tokio::spawn(node.run(command_rx));

        let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
        command_tx.send(NodeCommand::GetStatistics(reply_tx)).unwrap();
        assert_eq!(reply_rx.await.unwrap().node_id, NodeId::new(0));

        command_tx.send(NodeCommand::Shutdown).unwrap();
        handle.await.unwrap().unwrap();
    }
}
