use crate::log::check_ordered;
use crate::messages::{MessageType, ProtocolMessage};
use crate::{LogRecord, Result, ZabError, ZxId};

/// Structural checks applied to inbound messages before dispatch.
///
/// These are not protocol decisions (stale epochs, wrong senders); they only
/// reject messages no correct peer could have produced.
pub trait Validator {
    fn validate(&self) -> Result<()>;
}

impl Validator for ProtocolMessage {
    fn validate(&self) -> Result<()> {
        match &self.message_type {
            MessageType::FollowerInfo(info) => validate_epoch(info.accepted_epoch),
            MessageType::NewEpoch(new_epoch) => {
                validate_epoch(new_epoch.epoch)?;
                if new_epoch.epoch == 0 {
                    return Err(ZabError::invalid_message("NEWEPOCH must propose epoch >= 1"));
                }
                Ok(())
            }
            MessageType::AckEpoch(ack) => {
                validate_epoch(ack.current_epoch)?;
                validate_history(&ack.history)?;
                let last = ack
                    .history
                    .last()
                    .map(|record| record.zxid)
                    .unwrap_or(ZxId::NONE);
                if last != ack.last_zxid {
                    return Err(ZabError::invalid_message(format!(
                        "ACKEPOCH last_zxid {} does not match history tail {}",
                        ack.last_zxid, last
                    )));
                }
                Ok(())
            }
            MessageType::NewLeader(new_leader) => {
                validate_epoch(new_leader.epoch)?;
                validate_history(&new_leader.history)?;
                if let Some(record) = new_leader
                    .history
                    .iter()
                    .find(|record| record.zxid.epoch > new_leader.epoch)
                {
                    return Err(ZabError::invalid_message(format!(
                        "NEWLEADER for epoch {} carries record {} from a later epoch",
                        new_leader.epoch, record.zxid
                    )));
                }
                Ok(())
            }
            MessageType::AckNewLeader(ack) => validate_epoch(ack.current_epoch),
            MessageType::Proposal(proposal) => validate_zxid(proposal.zxid),
            MessageType::Ack(ack) => validate_zxid(ack.zxid),
            MessageType::Commit(commit) => validate_zxid(commit.zxid),
            MessageType::HeartBeat(heartbeat) => {
                if heartbeat.sender_id != self.from {
                    return Err(ZabError::invalid_message(format!(
                        "HEARTBEAT from {} claims sender {}",
                        self.from, heartbeat.sender_id
                    )));
                }
                Ok(())
            }
            MessageType::CommitNewLeader | MessageType::WriteRequest(_) => Ok(()),
        }
    }
}

fn validate_epoch(epoch: i64) -> Result<()> {
    if epoch < 0 {
        return Err(ZabError::invalid_message(format!(
            "Negative epoch {}",
            epoch
        )));
    }
    Ok(())
}

fn validate_zxid(zxid: ZxId) -> Result<()> {
    if zxid.epoch < 1 || zxid.counter < 0 {
        return Err(ZabError::invalid_message(format!(
            "Zxid {} is not a proposable position",
            zxid
        )));
    }
    Ok(())
}

fn validate_history(history: &[LogRecord]) -> Result<()> {
    for record in history {
        validate_zxid(record.zxid)?;
    }
    check_ordered(history)
        .map_err(|e| ZabError::invalid_message(format!("History out of order: {}", e)))
}
