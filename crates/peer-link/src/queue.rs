use std::collections::{HashMap, VecDeque};

use bytes::Bytes;

use crate::negotiator::MediaStream;

#[derive(Debug, Clone)]
pub enum PendingMessage {
    Stream(MediaStream),
    Data(Bytes),
}

impl PendingMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            PendingMessage::Stream(_) => "stream",
            PendingMessage::Data(_) => "data",
        }
    }
}

/// Per-peer FIFO of payloads waiting for an open data path.
#[derive(Debug, Default)]
pub struct OutboundMessageQueue {
    queues: HashMap<String, VecDeque<PendingMessage>>,
}

impl OutboundMessageQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ensure(&mut self, peer_id: &str) {
        if !self.queues.contains_key(peer_id) {
            self.queues.insert(peer_id.to_string(), VecDeque::new());
        }
    }

    pub fn push(&mut self, peer_id: &str, message: PendingMessage) {
        self.ensure(peer_id);
        if let Some(queue) = self.queues.get_mut(peer_id) {
            queue.push_back(message);
        }
    }

    pub fn pop(&mut self, peer_id: &str) -> Option<PendingMessage> {
        self.queues.get_mut(peer_id)?.pop_front()
    }

    pub fn len(&self, peer_id: &str) -> usize {
        self.queues.get(peer_id).map(VecDeque::len).unwrap_or(0)
    }

    pub fn is_empty(&self, peer_id: &str) -> bool {
        self.len(peer_id) == 0
    }

    /// Drops the peer's queue, returning how many messages were discarded.
    pub fn remove(&mut self, peer_id: &str) -> usize {
        self.queues
            .remove(peer_id)
            .map(|queue| queue.len())
            .unwrap_or(0)
    }
}
