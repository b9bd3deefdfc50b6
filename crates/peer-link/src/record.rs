use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;

use crate::history::{HistoryBuffer, ReceiveHandlers};
use crate::negotiator::{DataPath, RemoteStream};
use crate::wire::IceCandidate;
use crate::worker::LinkHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NegotiationState {
    /// Stub record: holds queued messages or handlers, no negotiation yet.
    Uninitialized,
    /// Connection created; remote description not applied yet.
    Negotiating,
    DescriptionSet,
    /// Data path open.
    Connected,
    Failed,
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NegotiationState::Uninitialized => "uninitialized",
            NegotiationState::Negotiating => "negotiating",
            NegotiationState::DescriptionSet => "description_set",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Negotiation and queuing state for one remote peer.
pub(crate) struct ConnectionRecord {
    pub(crate) peer_id: String,
    pub(crate) state: NegotiationState,
    pub(crate) epoch: u64,
    pub(crate) initiator: bool,
    pub(crate) link: Option<LinkHandle>,
    pub(crate) data_channel: Option<Arc<dyn DataPath>>,
    pub(crate) signaling_channel: String,
    pub(crate) pending_candidates: Vec<IceCandidate>,
    pub(crate) handlers: ReceiveHandlers,
    pub(crate) history: HistoryBuffer,
}

/// Where an inbound payload ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routed {
    Handler,
    History,
    Dropped,
}

impl ConnectionRecord {
    pub(crate) fn stub(peer_id: &str, signaling_channel: String) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            state: NegotiationState::Uninitialized,
            epoch: 0,
            initiator: false,
            link: None,
            data_channel: None,
            signaling_channel,
            pending_candidates: Vec::new(),
            handlers: ReceiveHandlers::default(),
            history: HistoryBuffer::default(),
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.state != NegotiationState::Uninitialized
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.state == NegotiationState::Connected
    }

    pub(crate) fn route_data(&mut self, payload: Bytes) -> Routed {
        match &self.handlers.on_data {
            Some(handler) => {
                handler(payload);
                Routed::Handler
            }
            None => {
                self.history.push(payload);
                Routed::History
            }
        }
    }

    pub(crate) fn route_stream(&self, stream: RemoteStream) -> Routed {
        match &self.handlers.on_stream {
            Some(handler) => {
                handler(stream);
                Routed::Handler
            }
            None => Routed::Dropped,
        }
    }

    pub(crate) fn snapshot(&self, queued_messages: usize) -> PeerSnapshot {
        PeerSnapshot {
            peer_id: self.peer_id.clone(),
            state: self.state,
            initiator: self.initiator,
            pending_candidates: self.pending_candidates.len(),
            queued_messages,
            history_len: self.history.len(),
            has_data_channel: self.data_channel.is_some(),
        }
    }
}

/// Read-only view of a record for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub peer_id: String,
    pub state: NegotiationState,
    pub initiator: bool,
    pub pending_candidates: usize,
    pub queued_messages: usize,
    pub history_len: usize,
    pub has_data_channel: bool,
}

impl PeerSnapshot {
    pub fn initialized(&self) -> bool {
        self.state != NegotiationState::Uninitialized
    }

    pub fn connected(&self) -> bool {
        self.state == NegotiationState::Connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn stub_buffers_data_until_handler_registered() {
        let mut record = ConnectionRecord::stub("bob", "p2p_bob".into());
        assert!(!record.is_initialized());
        assert_eq!(record.route_data(Bytes::from_static(b"early")), Routed::History);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let handlers =
            ReceiveHandlers::new().on_data(move |payload| sink.lock().unwrap().push(payload));
        record.handlers.merge(&handlers);
        assert_eq!(record.route_data(Bytes::from_static(b"late")), Routed::Handler);

        assert_eq!(record.history.entries(), &[Bytes::from_static(b"early")]);
        assert_eq!(*seen.lock().unwrap(), vec![Bytes::from_static(b"late")]);
    }

    #[test]
    fn streams_without_handler_are_dropped() {
        let record = ConnectionRecord::stub("bob", "p2p_bob".into());
        let stream = RemoteStream {
            stream_id: "cam".into(),
            track_id: "video0".into(),
            track: None,
        };
        assert_eq!(record.route_stream(stream), Routed::Dropped);
    }

    #[test]
    fn snapshot_serializes_for_status_output() {
        let mut record = ConnectionRecord::stub("bob", "p2p_bob".into());
        record.route_data(Bytes::from_static(b"early"));
        let value = serde_json::to_value(record.snapshot(2)).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "peer_id": "bob",
                "state": "uninitialized",
                "initiator": false,
                "pending_candidates": 0,
                "queued_messages": 2,
                "history_len": 1,
                "has_data_channel": false,
            })
        );
    }
}
