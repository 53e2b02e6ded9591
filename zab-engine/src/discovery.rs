//! Epoch coordination: ELECTION, DISCOVERY and SYNCHRONIZATION.
//!
//! A round starts with every node sending FOLLOWERINFO to the candidate it
//! believes in. The candidate fixes a new epoch once a quorum has reported,
//! adopts the most advanced history among that quorum, pushes it back out in
//! NEWLEADER and releases everyone into BROADCAST with COMMITNEWLEADER once a
//! quorum has acknowledged it.

use tokio::time::Instant;
use tracing::{debug, info, warn};

use zab_core::{
    learner::Learner,
    messages::{
        AckEpochMessage, AckNewLeaderMessage, FollowerInfoMessage, NewEpochMessage,
        NewLeaderMessage, ProtocolMessage,
    },
    network::Transport,
    NodeId, Result, ZabError, ZxId,
};

use crate::leader::{EpochReport, LeaderState};
use crate::node::ZabNode;
use crate::state::Phase;

impl<T, L> ZabNode<T, L>
where
    T: Transport + 'static,
    L: Learner,
{
    /// Leaves ELECTION: bid for leadership if this node is the candidate,
    /// otherwise report to the candidate.
    pub(crate) async fn run_election(&mut self) -> Result<()> {
        self.leader = None;
        let candidate = self.view.leader_id;

        if candidate == self.identity.id() {
            self.start_bid();
            self.try_fix_epoch().await
        } else {
            self.set_phase(Phase::Discovery);
            self.send_follower_info().await;
            Ok(())
        }
    }

    fn start_bid(&mut self) {
        let me = self.identity.id();
        info!(
            "Bidding for leadership with accepted epoch {}",
            self.view.accepted_epoch()
        );
        self.view.leader_id = me;
        self.leader = Some(LeaderState::new(me, self.view.accepted_epoch()));
        self.set_phase(Phase::Discovery);
    }

    async fn send_follower_info(&mut self) {
        let message = ProtocolMessage::follower_info(self.identity.id(), self.view.accepted_epoch());
        self.send(self.view.leader_id, message).await;
        self.last_follower_info = Some(Instant::now());
    }

    pub(crate) async fn retry_follower_info(&mut self) {
        if self.view.phase != Phase::Discovery || self.leader.is_some() {
            return;
        }
        let due = self
            .last_follower_info
            .map(|sent| sent.elapsed() >= self.config.follower_info_retry)
            .unwrap_or(true);
        if due {
            debug!("Resending FOLLOWERINFO to {}", self.view.leader_id);
            self.send_follower_info().await;
        }
    }

    pub(crate) async fn on_follower_info(
        &mut self,
        from: NodeId,
        info: FollowerInfoMessage,
    ) -> Result<()> {
        if self.leader.is_none() && matches!(self.view.phase, Phase::Election | Phase::Discovery) {
            info!("Node {} reported to us as candidate", from);
            self.start_bid();
        }

        let phase = self.view.phase;
        let Some(leader) = self.leader.as_mut() else {
            debug!("Ignoring FOLLOWERINFO from {} while following", from);
            return Ok(());
        };

        match (phase, leader.proposed_epoch()) {
            (Phase::Discovery, None) => {
                leader.record_follower_info(from, info.accepted_epoch);
                self.try_fix_epoch().await
            }
            (Phase::Discovery, Some(epoch)) if leader.has_reported(from) => {
                debug!("Repeating NEWEPOCH {} to {}", epoch, from);
                self.send(from, ProtocolMessage::new_epoch(self.identity.id(), epoch))
                    .await;
                Ok(())
            }
            (Phase::Broadcast, _) => {
                if leader.is_confirmed(from) {
                    debug!("Ignoring repeated FOLLOWERINFO from confirmed follower {}", from);
                    return Ok(());
                }
                self.catch_up_joiner(from).await;
                Ok(())
            }
            _ => {
                debug!("Deferring FOLLOWERINFO from {} until broadcast starts", from);
                leader.defer_joiner(from);
                Ok(())
            }
        }
    }

    /// Fixes the epoch once a quorum (this node included) has reported.
    async fn try_fix_epoch(&mut self) -> Result<()> {
        let quorum = self.identity.quorum_size();
        let (epoch, reporters) = match self.leader.as_mut() {
            Some(leader) if leader.proposed_epoch().is_none() && leader.report_count() >= quorum => {
                (leader.fix_epoch(), leader.remote_reporters())
            }
            _ => return Ok(()),
        };

        self.view.accept_epoch(epoch);
        info!("Proposing epoch {} to {:?}", epoch, reporters);
        self.multicast(&reporters, ProtocolMessage::new_epoch(self.identity.id(), epoch))
            .await;

        let own = EpochReport {
            current_epoch: self.view.current_epoch(),
            last_zxid: self.log.last_zxid(),
            history: self.log.to_history(),
        };
        self.record_epoch_report(self.identity.id(), own).await
    }

    pub(crate) async fn on_ack_epoch(&mut self, from: NodeId, ack: AckEpochMessage) -> Result<()> {
        let collecting = self.view.phase == Phase::Discovery
            && self
                .leader
                .as_ref()
                .map(|leader| leader.proposed_epoch().is_some())
                .unwrap_or(false);
        if !collecting {
            debug!("Ignoring stale ACKEPOCH from {}", from);
            return Ok(());
        }

        let report = EpochReport {
            current_epoch: ack.current_epoch,
            last_zxid: ack.last_zxid,
            history: ack.history,
        };
        self.record_epoch_report(from, report).await
    }

    async fn record_epoch_report(&mut self, from: NodeId, report: EpochReport) -> Result<()> {
        let leader = self
            .leader
            .as_mut()
            .ok_or_else(|| ZabError::internal("epoch report without leader state"))?;
        if leader.record_ack_epoch(from, report)? {
            self.begin_synchronization().await
        } else {
            Ok(())
        }
    }

    /// Adopts the most advanced reported history and pushes it to the
    /// reporting quorum.
    async fn begin_synchronization(&mut self) -> Result<()> {
        let me = self.identity.id();
        let (epoch, source, history, reporters) = {
            let leader = self
                .leader
                .as_ref()
                .ok_or_else(|| ZabError::internal("synchronization without leader state"))?;
            let (source, best) = leader
                .most_advanced_report()
                .ok_or_else(|| ZabError::internal("no ACKEPOCH reports collected"))?;
            (
                leader.epoch()?,
                source,
                best.history.clone(),
                leader.remote_reporters(),
            )
        };

        if source != me && self.log.records() != history.as_slice() {
            info!(
                "Adopting history of node {} ({} records, last {})",
                source,
                history.len(),
                history.last().map(|record| record.zxid).unwrap_or(ZxId::NONE)
            );
        }
        self.log.replace(history.clone())?;
        let through = self.log.last_zxid();
        self.sync_point = Some(through);

        if let Some(leader) = self.leader.as_mut() {
            for reporter in &reporters {
                leader.record_sync_point(*reporter, through);
            }
        }
        self.set_phase(Phase::Synchronization);
        self.multicast(&reporters, ProtocolMessage::new_leader(me, epoch, history))
            .await;

        self.try_complete_synchronization().await
    }

    pub(crate) async fn on_ack_new_leader(
        &mut self,
        from: NodeId,
        ack: AckNewLeaderMessage,
    ) -> Result<()> {
        let phase = self.view.phase;
        let Some(leader) = self.leader.as_mut() else {
            debug!("Ignoring ACKNEWLEADER from {} while following", from);
            return Ok(());
        };
        if leader.proposed_epoch() != Some(ack.current_epoch) || !leader.was_sent_new_leader(from) {
            debug!(
                "Ignoring ACKNEWLEADER for epoch {} from {}",
                ack.current_epoch, from
            );
            return Ok(());
        }

        match phase {
            Phase::Synchronization => {
                leader.confirm(from);
                self.try_complete_synchronization().await
            }
            Phase::Broadcast => {
                if leader.confirm(from) {
                    self.release_joiner(from).await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn try_complete_synchronization(&mut self) -> Result<()> {
        let quorum = self.identity.quorum_size();
        if self.view.phase != Phase::Synchronization {
            return Ok(());
        }
        let (epoch, followers) = match self.leader.as_ref() {
            Some(leader) if leader.confirmed_count_with_self() >= quorum => {
                (leader.epoch()?, leader.confirmed_followers())
            }
            _ => return Ok(()),
        };

        self.multicast(&followers, ProtocolMessage::commit_new_leader(self.identity.id()))
            .await;
        self.view.set_current_epoch(epoch);

        let through = self.sync_point.take().unwrap_or_else(|| self.log.last_zxid());
        self.enter_broadcast(epoch, through);

        let joiners = self
            .leader
            .as_mut()
            .map(LeaderState::take_deferred_joiners)
            .unwrap_or_default();
        for joiner in joiners {
            let confirmed = self
                .leader
                .as_ref()
                .map(|leader| leader.is_confirmed(joiner))
                .unwrap_or(true);
            if !confirmed {
                self.catch_up_joiner(joiner).await;
            }
        }
        Ok(())
    }

    /// Brings a node that reported after the quorum was fixed into the
    /// current epoch: NEWEPOCH for the current epoch followed by the
    /// committed prefix of the log.
    ///
    /// The prefix reaches at least the point the epoch was established at,
    /// so records committed by synchronization travel inside NEWLEADER even
    /// if this node has not applied them yet.
    async fn catch_up_joiner(&mut self, joiner: NodeId) {
        let me = self.identity.id();
        let epoch = self.view.current_epoch();
        let history = self
            .log
            .history_through(self.established_through.max(self.commit_cursor));
        let through = history.last().map(|record| record.zxid).unwrap_or(ZxId::NONE);

        match self.leader.as_mut() {
            Some(leader) => leader.record_sync_point(joiner, through),
            None => return,
        }
        info!(
            "Catching up node {} in epoch {} through {}",
            joiner, epoch, through
        );
        self.send(joiner, ProtocolMessage::new_epoch(me, epoch)).await;
        self.send(joiner, ProtocolMessage::new_leader(me, epoch, history))
            .await;
    }

    /// Lets a follower confirmed during BROADCAST in, replaying what it
    /// missed since its sync point in zxid order: decided records as COMMIT,
    /// open ones as PROPOSAL so the joiner's ACK counts toward their quorum.
    async fn release_joiner(&mut self, joiner: NodeId) {
        let me = self.identity.id();
        let through = self
            .leader
            .as_ref()
            .and_then(|leader| leader.sync_point(joiner))
            .unwrap_or(ZxId::NONE);
        let missed = self.log.entries_after(through).to_vec();
        let decided = missed
            .iter()
            .filter(|record| self.is_decided(record.zxid))
            .count();

        info!(
            "Node {} joined epoch {}: replaying {} commits and {} proposals",
            joiner,
            self.view.current_epoch(),
            decided,
            missed.len() - decided
        );
        self.send(joiner, ProtocolMessage::commit_new_leader(me)).await;
        for record in missed {
            let message = if self.is_decided(record.zxid) {
                ProtocolMessage::commit(me, record.zxid, record.payload)
            } else {
                ProtocolMessage::proposal(me, record.zxid, record.payload)
            };
            self.send(joiner, message).await;
        }
    }

    /// Whether the leader has committed `zxid`, applied or not.
    fn is_decided(&self, zxid: ZxId) -> bool {
        if zxid <= self.established_through.max(self.commit_cursor) {
            return true;
        }
        zxid.epoch == self.view.current_epoch()
            && self
                .leader
                .as_ref()
                .map(|leader| leader.is_decided(zxid.counter))
                .unwrap_or(false)
    }

    pub(crate) async fn on_new_epoch(&mut self, from: NodeId, new_epoch: NewEpochMessage) -> Result<()> {
        let phase = self.view.phase;
        if from != self.view.leader_id || self.leader.is_some() || phase == Phase::Election {
            debug!("Ignoring NEWEPOCH {} from {}", new_epoch.epoch, from);
            return Ok(());
        }

        let accepted = self.view.accepted_epoch();
        if new_epoch.epoch < accepted {
            warn!(
                "Leader {} proposed epoch {} behind accepted epoch {}, re-electing",
                from, new_epoch.epoch, accepted
            );
            self.enter_election(true);
            return Ok(());
        }
        if new_epoch.epoch == accepted && phase != Phase::Discovery {
            debug!("Ignoring repeated NEWEPOCH {} in {}", new_epoch.epoch, phase);
            return Ok(());
        }

        self.view.accept_epoch(new_epoch.epoch);
        self.stop_failure_detector();
        self.sync_point = None;
        info!("Accepted epoch {} from leader {}", new_epoch.epoch, from);

        let ack = ProtocolMessage::ack_epoch(
            self.identity.id(),
            self.log.to_history(),
            self.view.current_epoch(),
            self.log.last_zxid(),
        );
        self.send(from, ack).await;
        self.set_phase(Phase::Synchronization);
        Ok(())
    }

    pub(crate) async fn on_new_leader(
        &mut self,
        from: NodeId,
        new_leader: NewLeaderMessage,
    ) -> Result<()> {
        if self.view.phase != Phase::Synchronization
            || from != self.view.leader_id
            || self.leader.is_some()
            || new_leader.epoch != self.view.accepted_epoch()
        {
            debug!("Ignoring NEWLEADER {} from {}", new_leader.epoch, from);
            return Ok(());
        }

        self.log.replace(new_leader.history)?;
        let through = self.log.last_zxid();
        self.sync_point = Some(through);
        self.view.set_current_epoch(new_leader.epoch);
        debug!("Adopted leader history through {}", through);

        self.send(
            from,
            ProtocolMessage::ack_new_leader(self.identity.id(), new_leader.epoch),
        )
        .await;
        Ok(())
    }

    pub(crate) async fn on_commit_new_leader(&mut self, from: NodeId) -> Result<()> {
        if self.view.phase != Phase::Synchronization || from != self.view.leader_id || self.leader.is_some() {
            debug!("Ignoring COMMITNEWLEADER from {}", from);
            return Ok(());
        }
        let Some(through) = self.sync_point.take() else {
            debug!("COMMITNEWLEADER from {} before NEWLEADER", from);
            return Ok(());
        };

        let epoch = self.view.current_epoch();
        self.enter_broadcast(epoch, through);
        Ok(())
    }
}
