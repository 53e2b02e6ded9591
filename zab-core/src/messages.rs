use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::{Epoch, LogRecord, NodeId, ZxId};

/// Envelope for every message exchanged over the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolMessage {
    pub from: NodeId,
    pub message_type: MessageType,
}

impl ProtocolMessage {
    pub fn new(from: NodeId, message_type: MessageType) -> Self {
        Self { from, message_type }
    }

    pub fn follower_info(from: NodeId, accepted_epoch: Epoch) -> Self {
        Self::new(
            from,
            MessageType::FollowerInfo(FollowerInfoMessage { accepted_epoch }),
        )
    }

    pub fn new_epoch(from: NodeId, epoch: Epoch) -> Self {
        Self::new(from, MessageType::NewEpoch(NewEpochMessage { epoch }))
    }

    pub fn ack_epoch(
        from: NodeId,
        history: Vec<LogRecord>,
        current_epoch: Epoch,
        last_zxid: ZxId,
    ) -> Self {
        Self::new(
            from,
            MessageType::AckEpoch(AckEpochMessage {
                history,
                current_epoch,
                last_zxid,
            }),
        )
    }

    pub fn new_leader(from: NodeId, epoch: Epoch, history: Vec<LogRecord>) -> Self {
        Self::new(
            from,
            MessageType::NewLeader(NewLeaderMessage { epoch, history }),
        )
    }

    pub fn ack_new_leader(from: NodeId, current_epoch: Epoch) -> Self {
        Self::new(
            from,
            MessageType::AckNewLeader(AckNewLeaderMessage { current_epoch }),
        )
    }

    pub fn commit_new_leader(from: NodeId) -> Self {
        Self::new(from, MessageType::CommitNewLeader)
    }

    pub fn write_request(from: NodeId, payload: Bytes) -> Self {
        Self::new(
            from,
            MessageType::WriteRequest(WriteRequestMessage { payload }),
        )
    }

    pub fn proposal(from: NodeId, zxid: ZxId, payload: Bytes) -> Self {
        Self::new(from, MessageType::Proposal(ProposalMessage { zxid, payload }))
    }

    pub fn ack(from: NodeId, zxid: ZxId) -> Self {
        Self::new(from, MessageType::Ack(AckMessage { zxid }))
    }

    pub fn commit(from: NodeId, zxid: ZxId, payload: Bytes) -> Self {
        Self::new(from, MessageType::Commit(CommitMessage { zxid, payload }))
    }

    pub fn heartbeat(from: NodeId) -> Self {
        Self::new(
            from,
            MessageType::HeartBeat(HeartBeatMessage { sender_id: from }),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageType {
    FollowerInfo(FollowerInfoMessage),
    NewEpoch(NewEpochMessage),
    AckEpoch(AckEpochMessage),
    NewLeader(NewLeaderMessage),
    AckNewLeader(AckNewLeaderMessage),
    CommitNewLeader,
    WriteRequest(WriteRequestMessage),
    Proposal(ProposalMessage),
    Ack(AckMessage),
    Commit(CommitMessage),
    HeartBeat(HeartBeatMessage),
}

impl MessageType {
    /// Wire-level name, used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            MessageType::FollowerInfo(_) => "FOLLOWERINFO",
            MessageType::NewEpoch(_) => "NEWEPOCH",
            MessageType::AckEpoch(_) => "ACKEPOCH",
            MessageType::NewLeader(_) => "NEWLEADER",
            MessageType::AckNewLeader(_) => "ACKNEWLEADER",
            MessageType::CommitNewLeader => "COMMITNEWLEADER",
            MessageType::WriteRequest(_) => "WRITE_REQUEST",
            MessageType::Proposal(_) => "PROPOSAL",
            MessageType::Ack(_) => "ACK",
            MessageType::Commit(_) => "COMMIT",
            MessageType::HeartBeat(_) => "HEARTBEAT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowerInfoMessage {
    pub accepted_epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEpochMessage {
    pub epoch: Epoch,
}

/// A follower's report for epoch negotiation: its whole log plus the
/// `(current_epoch, last_zxid)` pair the leader ranks reports by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckEpochMessage {
    pub history: Vec<LogRecord>,
    pub current_epoch: Epoch,
    pub last_zxid: ZxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewLeaderMessage {
    pub epoch: Epoch,
    pub history: Vec<LogRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckNewLeaderMessage {
    pub current_epoch: Epoch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteRequestMessage {
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalMessage {
    pub zxid: ZxId,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckMessage {
    pub zxid: ZxId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMessage {
    pub zxid: ZxId,
    pub payload: Bytes,
}

impl CommitMessage {
    pub fn into_record(self) -> LogRecord {
        LogRecord::new(self.zxid, self.payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeatMessage {
    pub sender_id: NodeId,
}
