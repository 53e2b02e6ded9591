//! Leader-side bookkeeping.
//!
//! A [`LeaderState`] exists only while the local node is bidding for, or
//! holding, leadership. It is created fresh on every bid and dropped when the
//! node steps down, so nothing from an abandoned round can leak into the next
//! one.
//!
//! The local node counts as one of its own reporters: its FOLLOWERINFO and
//! ACKEPOCH are recorded when the bid starts, so quorum checks here compare
//! against ⌊n/2⌋+1 directly. Follower ACKs for proposals never include the
//! leader.

use std::collections::{BTreeMap, BTreeSet};
use zab_core::{Epoch, LogRecord, NodeId, Result, ZabError, ZxId};

/// What a node reported in its ACKEPOCH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EpochReport {
    pub current_epoch: Epoch,
    pub last_zxid: ZxId,
    pub history: Vec<LogRecord>,
}

impl EpochReport {
    /// Ranking key: the most up-to-date report wins.
    pub fn rank(&self) -> (Epoch, ZxId) {
        (self.current_epoch, self.last_zxid)
    }
}

/// Result of counting one follower ACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Distinct followers that have now acknowledged the counter.
    Counted(usize),
    /// The same follower acknowledged twice.
    Duplicate,
    /// The counter was already committed; late ACKs are ignored.
    AlreadyCommitted,
}

#[derive(Debug, Clone)]
pub struct LeaderState {
    me: NodeId,
    /// Epoch chosen once FOLLOWERINFO reached a quorum.
    proposed_epoch: Option<Epoch>,
    follower_epoch_reports: BTreeMap<NodeId, Epoch>,
    follower_histories: BTreeMap<NodeId, EpochReport>,
    ack_counters: BTreeMap<i64, BTreeSet<NodeId>>,
    leader_counter: i64,
    confirmed_followers: BTreeSet<NodeId>,
    /// Last zxid of the history each follower was sent in NEWLEADER.
    sync_points: BTreeMap<NodeId, ZxId>,
    /// FOLLOWERINFO senders that arrived after the quorum was fixed; served
    /// once broadcast begins.
    deferred_joiners: BTreeSet<NodeId>,
}

impl LeaderState {
    pub fn new(me: NodeId, accepted_epoch: Epoch) -> Self {
        let mut follower_epoch_reports = BTreeMap::new();
        follower_epoch_reports.insert(me, accepted_epoch);
        Self {
            me,
            proposed_epoch: None,
            follower_epoch_reports,
            follower_histories: BTreeMap::new(),
            ack_counters: BTreeMap::new(),
            leader_counter: 0,
            confirmed_followers: BTreeSet::new(),
            sync_points: BTreeMap::new(),
            deferred_joiners: BTreeSet::new(),
        }
    }

    pub fn proposed_epoch(&self) -> Option<Epoch> {
        self.proposed_epoch
    }

    pub fn epoch(&self) -> Result<Epoch> {
        self.proposed_epoch
            .ok_or_else(|| ZabError::internal("leader has not fixed an epoch yet"))
    }

    // --- discovery ---

    /// Records a FOLLOWERINFO. Returns `false` if the node had already
    /// reported.
    pub fn record_follower_info(&mut self, node: NodeId, accepted_epoch: Epoch) -> bool {
        self.follower_epoch_reports
            .insert(node, accepted_epoch)
            .is_none()
    }

    pub fn report_count(&self) -> usize {
        self.follower_epoch_reports.len()
    }

    pub fn has_reported(&self, node: NodeId) -> bool {
        self.follower_epoch_reports.contains_key(&node)
    }

    /// Fixes the new epoch as `max(reported) + 1`.
    pub fn fix_epoch(&mut self) -> Epoch {
        let max_reported = self
            .follower_epoch_reports
            .values()
            .copied()
            .max()
            .unwrap_or(0);
        let epoch = max_reported + 1;
        self.proposed_epoch = Some(epoch);
        epoch
    }

    /// Reporters other than the local node, in id order.
    pub fn remote_reporters(&self) -> Vec<NodeId> {
        self.follower_epoch_reports
            .keys()
            .copied()
            .filter(|node| *node != self.me)
            .collect()
    }

    /// Records an ACKEPOCH and returns whether every reporter has now replied.
    ///
    /// An ACKEPOCH from a node that never sent FOLLOWERINFO would make the
    /// replies outnumber the reports, which no correct run can produce.
    pub fn record_ack_epoch(&mut self, node: NodeId, report: EpochReport) -> Result<bool> {
        if !self.follower_epoch_reports.contains_key(&node) {
            return Err(ZabError::protocol_violation(format!(
                "ACKEPOCH from {} would exceed the {} FOLLOWERINFO reports collected",
                node,
                self.follower_epoch_reports.len()
            )));
        }
        self.follower_histories.insert(node, report);
        if self.follower_histories.len() > self.follower_epoch_reports.len() {
            return Err(ZabError::protocol_violation(format!(
                "{} ACKEPOCH replies for {} FOLLOWERINFO reports",
                self.follower_histories.len(),
                self.follower_epoch_reports.len()
            )));
        }
        Ok(self.follower_histories.len() == self.follower_epoch_reports.len())
    }

    /// The report with the greatest `(current_epoch, last_zxid)`. Ties go to
    /// the lowest node id.
    pub fn most_advanced_report(&self) -> Option<(NodeId, &EpochReport)> {
        self.follower_histories
            .iter()
            .fold(None, |best: Option<(NodeId, &EpochReport)>, (node, report)| {
                match best {
                    Some((_, current)) if current.rank() >= report.rank() => best,
                    _ => Some((*node, report)),
                }
            })
    }

    // --- synchronization ---

    pub fn record_sync_point(&mut self, node: NodeId, through: ZxId) {
        self.sync_points.insert(node, through);
    }

    pub fn sync_point(&self, node: NodeId) -> Option<ZxId> {
        self.sync_points.get(&node).copied()
    }

    pub fn was_sent_new_leader(&self, node: NodeId) -> bool {
        self.sync_points.contains_key(&node)
    }

    /// Returns `false` if the follower was already confirmed.
    pub fn confirm(&mut self, node: NodeId) -> bool {
        self.confirmed_followers.insert(node)
    }

    pub fn is_confirmed(&self, node: NodeId) -> bool {
        self.confirmed_followers.contains(&node)
    }

    pub fn confirmed_followers(&self) -> Vec<NodeId> {
        self.confirmed_followers.iter().copied().collect()
    }

    /// Confirmed followers plus the leader itself.
    pub fn confirmed_count_with_self(&self) -> usize {
        self.confirmed_followers.len() + 1
    }

    pub fn defer_joiner(&mut self, node: NodeId) {
        self.deferred_joiners.insert(node);
    }

    pub fn take_deferred_joiners(&mut self) -> Vec<NodeId> {
        std::mem::take(&mut self.deferred_joiners)
            .into_iter()
            .collect()
    }

    // --- broadcast ---

    /// Assigns the next zxid of `epoch` and opens its ACK tally.
    pub fn next_zxid(&mut self, epoch: Epoch) -> ZxId {
        let zxid = ZxId::new(epoch, self.leader_counter);
        self.ack_counters.insert(self.leader_counter, BTreeSet::new());
        self.leader_counter += 1;
        zxid
    }

    pub fn leader_counter(&self) -> i64 {
        self.leader_counter
    }

    /// Counts an ACK from `follower`.
    ///
    /// A counter that was never assigned is a protocol violation. A counter
    /// that was assigned but no longer has a tally has already committed.
    pub fn record_ack(&mut self, follower: NodeId, counter: i64) -> Result<AckOutcome> {
        if counter < 0 || counter >= self.leader_counter {
            return Err(ZabError::protocol_violation(format!(
                "ACK from {} for counter {} but only {} proposals were made",
                follower, counter, self.leader_counter
            )));
        }
        match self.ack_counters.get_mut(&counter) {
            None => Ok(AckOutcome::AlreadyCommitted),
            Some(voters) => {
                if voters.insert(follower) {
                    Ok(AckOutcome::Counted(voters.len()))
                } else {
                    Ok(AckOutcome::Duplicate)
                }
            }
        }
    }

    /// Closes the tally for `counter`; later ACKs for it are ignored.
    pub fn close_tally(&mut self, counter: i64) {
        self.ack_counters.remove(&counter);
    }

    /// Whether the proposal at `counter` has reached its quorum.
    pub fn is_decided(&self, counter: i64) -> bool {
        (0..self.leader_counter).contains(&counter) && !self.ack_counters.contains_key(&counter)
    }

    pub fn outstanding_proposals(&self) -> usize {
        self.ack_counters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(current_epoch: Epoch, last: ZxId) -> EpochReport {
        let history = if last.is_none() {
            Vec::new()
        } else {
            vec![LogRecord::new(last, "x")]
        };
        EpochReport {
            current_epoch,
            last_zxid: last,
            history,
        }
    }

    #[test]
    fn test_new_epoch_is_one_past_highest_report() {
        let mut leader = LeaderState::new(NodeId::new(0), 1);
        leader.record_follower_info(NodeId::new(1), 4);
        leader.record_follower_info(NodeId::new(2), 2);
        assert_eq!(leader.report_count(), 3);
        assert_eq!(leader.fix_epoch(), 5);
        assert_eq!(
            leader.remote_reporters(),
            vec![NodeId::new(1), NodeId::new(2)]
        );
    }

    #[test]
    fn test_ack_epoch_from_unreported_node_is_violation() {
        let mut leader = LeaderState::new(NodeId::new(0), 0);
        leader.record_follower_info(NodeId::new(1), 0);
        leader.fix_epoch();

        assert!(!leader
            .record_ack_epoch(NodeId::new(0), report(0, ZxId::NONE))
            .unwrap());
        let err = leader
            .record_ack_epoch(NodeId::new(2), report(0, ZxId::NONE))
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(leader
            .record_ack_epoch(NodeId::new(1), report(0, ZxId::NONE))
            .unwrap());
    }

    #[test]
    fn test_most_advanced_report_ranks_epoch_then_zxid() {
        let mut leader = LeaderState::new(NodeId::new(0), 2);
        leader.record_follower_info(NodeId::new(1), 2);
        leader.record_follower_info(NodeId::new(2), 2);

        leader
            .record_ack_epoch(NodeId::new(0), report(1, ZxId::new(1, 9)))
            .unwrap();
        leader
            .record_ack_epoch(NodeId::new(1), report(2, ZxId::new(2, 0)))
            .unwrap();
        leader
            .record_ack_epoch(NodeId::new(2), report(2, ZxId::new(1, 12)))
            .unwrap();

        let (winner, best) = leader.most_advanced_report().unwrap();
        assert_eq!(winner, NodeId::new(1));
        assert_eq!(best.last_zxid, ZxId::new(2, 0));
    }

    #[test]
    fn test_ack_tally_counts_distinct_followers_once() {
        let mut leader = LeaderState::new(NodeId::new(0), 0);
        let zxid = leader.next_zxid(1);
        assert_eq!(zxid, ZxId::new(1, 0));

        assert_eq!(
            leader.record_ack(NodeId::new(1), 0).unwrap(),
            AckOutcome::Counted(1)
        );
        assert_eq!(
            leader.record_ack(NodeId::new(1), 0).unwrap(),
            AckOutcome::Duplicate
        );
        assert_eq!(
            leader.record_ack(NodeId::new(2), 0).unwrap(),
            AckOutcome::Counted(2)
        );

        leader.close_tally(0);
        assert_eq!(
            leader.record_ack(NodeId::new(3), 0).unwrap(),
            AckOutcome::AlreadyCommitted
        );
        assert!(leader.record_ack(NodeId::new(1), 1).is_err());
    }
}
