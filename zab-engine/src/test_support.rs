//! Single-node fixtures: a transport that records what the node sends and
//! lets tests inject what it receives.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;

use zab_core::{messages::ProtocolMessage, network::Transport, NodeId, Result, ZabError};

#[derive(Debug)]
pub struct RecordingTransport {
    me: NodeId,
    inbox: Mutex<VecDeque<ProtocolMessage>>,
    /// `None` target means broadcast.
    sent: Mutex<Vec<(Option<NodeId>, ProtocolMessage)>>,
}

impl RecordingTransport {
    pub fn new(me: NodeId) -> Self {
        Self {
            me,
            inbox: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    pub fn inject(&self, message: ProtocolMessage) {
        self.inbox.lock().push_back(message);
    }

    pub fn sent(&self) -> Vec<(Option<NodeId>, ProtocolMessage)> {
        self.sent.lock().clone()
    }

    pub fn take_sent(&self) -> Vec<(Option<NodeId>, ProtocolMessage)> {
        std::mem::take(&mut *self.sent.lock())
    }

    pub fn broadcasts(&self) -> usize {
        self.sent
            .lock()
            .iter()
            .filter(|(target, _)| target.is_none())
            .count()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_to(&self, target: NodeId, message: ProtocolMessage) -> Result<()> {
        if target == self.me {
            return Err(ZabError::transport("send to self"));
        }
        self.sent.lock().push((Some(target), message));
        Ok(())
    }

    async fn broadcast(&self, message: ProtocolMessage) -> Result<()> {
        self.sent.lock().push((None, message));
        Ok(())
    }

    async fn broadcast_excluding_self(&self, message: ProtocolMessage) -> Result<()> {
        self.sent.lock().push((None, message));
        Ok(())
    }

    async fn receive(&self) -> Result<Option<ProtocolMessage>> {
        Ok(self.inbox.lock().pop_front())
    }
}
