//! Steady-state replication: WRITE_REQUEST, PROPOSAL, ACK, COMMIT.

use bytes::Bytes;
use tracing::{debug, trace};

use zab_core::{
    learner::Learner,
    messages::{AckMessage, CommitMessage, ProposalMessage, ProtocolMessage, WriteRequestMessage},
    network::Transport,
    LogRecord, NodeId, Result, ZabError, ZxId,
};

use crate::leader::AckOutcome;
use crate::node::ZabNode;
use crate::state::Phase;

impl<T, L> ZabNode<T, L>
where
    T: Transport + 'static,
    L: Learner,
{
    /// Orders a locally produced update. The leader proposes it directly;
    /// anyone else forwards it.
    pub(crate) async fn submit_update(&mut self, payload: Bytes) -> Result<()> {
        if self.is_leader() {
            self.propose(payload).await.map(|_| ())
        } else {
            let request = ProtocolMessage::write_request(self.identity.id(), payload);
            self.send(self.view.leader_id, request).await;
            Ok(())
        }
    }

    pub(crate) async fn on_write_request(
        &mut self,
        from: NodeId,
        request: WriteRequestMessage,
    ) -> Result<()> {
        if !self.is_leader() || self.view.phase != Phase::Broadcast {
            debug!("Ignoring WRITE_REQUEST from {}: not serving as leader", from);
            return Ok(());
        }
        self.propose(request.payload).await.map(|_| ())
    }

    async fn propose(&mut self, payload: Bytes) -> Result<ZxId> {
        let epoch = self.view.current_epoch();
        let leader = self
            .leader
            .as_mut()
            .ok_or_else(|| ZabError::internal("proposal without leader state"))?;
        let zxid = leader.next_zxid(epoch);
        let followers = leader.confirmed_followers();

        self.log.append(LogRecord::new(zxid, payload.clone()))?;
        debug!("Proposing {} to {} followers", zxid, followers.len());
        self.multicast(&followers, ProtocolMessage::proposal(self.identity.id(), zxid, payload))
            .await;
        Ok(zxid)
    }

    pub(crate) async fn on_proposal(&mut self, from: NodeId, proposal: ProposalMessage) -> Result<()> {
        if !self.follows(from) || self.view.phase != Phase::Broadcast {
            debug!("Ignoring PROPOSAL {} from {}", proposal.zxid, from);
            return Ok(());
        }
        if proposal.zxid.epoch != self.view.current_epoch() {
            debug!(
                "Ignoring PROPOSAL {} outside epoch {}",
                proposal.zxid,
                self.view.current_epoch()
            );
            return Ok(());
        }

        if !self.log.insert(LogRecord::new(proposal.zxid, proposal.payload)) {
            trace!("PROPOSAL {} already logged", proposal.zxid);
        }
        self.send(from, ProtocolMessage::ack(self.identity.id(), proposal.zxid))
            .await;
        Ok(())
    }

    pub(crate) async fn on_ack(&mut self, from: NodeId, ack: AckMessage) -> Result<()> {
        let epoch = self.view.current_epoch();
        if self.view.phase != Phase::Broadcast || ack.zxid.epoch != epoch {
            debug!("Ignoring stale ACK {} from {}", ack.zxid, from);
            return Ok(());
        }
        let threshold = self.identity.majority_threshold();
        let Some(leader) = self.leader.as_mut() else {
            debug!("Ignoring ACK {} from {} while following", ack.zxid, from);
            return Ok(());
        };
        if !leader.is_confirmed(from) {
            debug!("Ignoring ACK {} from unconfirmed node {}", ack.zxid, from);
            return Ok(());
        }

        match leader.record_ack(from, ack.zxid.counter)? {
            AckOutcome::Counted(count) if count > threshold => {
                leader.close_tally(ack.zxid.counter);
                self.commit(ack.zxid).await
            }
            AckOutcome::Counted(count) => {
                trace!("{} has {} of more than {} acks", ack.zxid, count, threshold);
                Ok(())
            }
            AckOutcome::Duplicate | AckOutcome::AlreadyCommitted => Ok(()),
        }
    }

    async fn commit(&mut self, zxid: ZxId) -> Result<()> {
        let record = self
            .log
            .get(zxid)
            .cloned()
            .ok_or_else(|| ZabError::internal(format!("quorum reached for {} which is not logged", zxid)))?;
        let followers = self
            .leader
            .as_ref()
            .map(|leader| leader.confirmed_followers())
            .unwrap_or_default();

        debug!("Committing {}", zxid);
        self.multicast(
            &followers,
            ProtocolMessage::commit(self.identity.id(), zxid, record.payload.clone()),
        )
        .await;
        self.deliver_commit(record);
        Ok(())
    }

    pub(crate) async fn on_commit(&mut self, from: NodeId, commit: CommitMessage) -> Result<()> {
        if !self.follows(from) || commit.zxid.epoch != self.view.current_epoch() {
            debug!("Ignoring COMMIT {} from {}", commit.zxid, from);
            return Ok(());
        }
        match self.view.phase {
            Phase::Broadcast => self.deliver_commit(commit.into_record()),
            Phase::Synchronization => {
                let record = commit.into_record();
                debug!("Buffering COMMIT {} until synchronization completes", record.zxid);
                self.pending.insert(record, self.commit_cursor);
            }
            _ => debug!("Ignoring COMMIT {} in {}", commit.zxid, self.view.phase),
        }
        Ok(())
    }

    /// Records a commit decision. Delivery to the learner happens in
    /// [`ZabNode::process_pending_commits`], strictly in zxid order.
    fn deliver_commit(&mut self, record: LogRecord) {
        self.log.insert(record.clone());
        if !self.pending.insert(record, self.commit_cursor) {
            trace!("Commit already delivered or buffered");
        }
    }

    /// Applies every record that is now contiguous with the commit cursor:
    /// first whatever synchronization committed, then buffered commits in
    /// zxid order, stopping at the first gap. Returns the number applied.
    ///
    /// If the learner fails, the record is kept and the error returned; the
    /// cursor stays where it was so the next call retries the same record.
    pub(crate) async fn process_pending_commits(&mut self) -> Result<usize> {
        if self.view.phase != Phase::Broadcast {
            return Ok(0);
        }
        let mut applied = 0;

        while let Some(record) = self.sync_backlog.pop_front() {
            if let Err(e) = self.learner.apply(record.zxid, &record.payload).await {
                self.sync_backlog.push_front(record);
                return Err(e);
            }
            self.advance_cursor(record.zxid);
            applied += 1;
        }
        if let Some(resume) = self.resume_cursor.take() {
            if resume > self.commit_cursor {
                self.commit_cursor = resume;
            }
        }

        while let Some(record) = self.pending.take_next(self.commit_cursor) {
            if let Err(e) = self.learner.apply(record.zxid, &record.payload).await {
                self.pending.insert(record, self.commit_cursor);
                return Err(e);
            }
            self.advance_cursor(record.zxid);
            applied += 1;
        }
        Ok(applied)
    }

    fn advance_cursor(&mut self, zxid: ZxId) {
        trace!("Applied {}", zxid);
        self.commit_cursor = zxid;
        self.applied_count += 1;
    }

    /// Whether `from` is the leader this node currently follows.
    fn follows(&self, from: NodeId) -> bool {
        self.leader.is_none() && from == self.view.leader_id
    }
}
