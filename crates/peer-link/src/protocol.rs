//! Inbound signaling and link events. Both arrive on the manager task and are
//! applied to the connection records in arrival order.

use bytes::Bytes;
use tracing::{debug, info, trace, warn};

use crate::manager::{set_state, DiagnosticKind, Engine};
use crate::negotiator::LinkEvent;
use crate::record::{NegotiationState, Routed};
use crate::wire::{IceCandidate, InboundSignal, SessionDescription, SignalMessage, SignalPayload};
use crate::worker::LinkOp;

impl Engine {
    pub(crate) fn handle_inbound(&mut self, raw: Bytes) {
        let signal = match SignalMessage::decode(&raw) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(bytes = raw.len(), error = %err, "ignoring unrecognized signaling message");
                self.diagnose(None, DiagnosticKind::UnrecognizedMessage(err.to_string()));
                return;
            }
        };
        let InboundSignal { sender_id, payload } = signal;
        let initialized = self
            .records
            .get(&sender_id)
            .is_some_and(|record| record.is_initialized());
        if !initialized {
            debug!(peer_id = %sender_id, "signal from unknown peer; answering");
            self.initialize(&sender_id, false);
        }
        match payload {
            SignalPayload::Description(description) => {
                self.remote_description(&sender_id, description)
            }
            SignalPayload::Candidate(candidate) => self.remote_candidate(&sender_id, candidate),
        }
    }

    fn remote_description(&mut self, peer_id: &str, description: SessionDescription) {
        let Some(record) = self.records.get(peer_id) else {
            return;
        };
        debug!(peer_id, kind = %description.kind, "remote description received");
        if let Some(link) = &record.link {
            link.submit(LinkOp::ApplyRemote(description));
        }
    }

    fn remote_candidate(&mut self, peer_id: &str, candidate: IceCandidate) {
        let Some(record) = self.records.get_mut(peer_id) else {
            return;
        };
        match record.state {
            NegotiationState::DescriptionSet => {
                if let Some(link) = &record.link {
                    link.submit(LinkOp::AddCandidates(vec![candidate]));
                }
            }
            NegotiationState::Connected => {
                trace!(peer_id, "candidate after connect discarded");
                self.diagnose(Some(peer_id), DiagnosticKind::CandidateDiscarded);
            }
            NegotiationState::Uninitialized
            | NegotiationState::Negotiating
            | NegotiationState::Failed => {
                record.pending_candidates.push(candidate);
                trace!(
                    peer_id,
                    pending = record.pending_candidates.len(),
                    "buffering remote candidate"
                );
            }
        }
    }

    pub(crate) fn handle_link_event(&mut self, peer_id: &str, epoch: u64, event: LinkEvent) {
        let current = self.records.get(peer_id).map(|record| record.epoch);
        if current != Some(epoch) {
            trace!(peer_id, epoch, ?current, ?event, "stale link event ignored");
            return;
        }
        match event {
            LinkEvent::LocalDescription(description) => {
                let Some(record) = self.records.get(peer_id) else {
                    return;
                };
                let channel = record.signaling_channel.clone();
                debug!(
                    peer_id,
                    kind = %description.kind,
                    channel = %channel,
                    "publishing description"
                );
                let message = SignalMessage::description(self.config.local_id.clone(), description);
                self.publish(&channel, message);
            }
            LinkEvent::LocalCandidate(candidate) => {
                let Some(record) = self.records.get(peer_id) else {
                    return;
                };
                let channel = record.signaling_channel.clone();
                let message = SignalMessage::candidate(self.config.local_id.clone(), candidate);
                self.publish(&channel, message);
            }
            LinkEvent::RemoteDescriptionApplied => self.remote_description_applied(peer_id),
            LinkEvent::Failed(err) => self.fail(peer_id, err),
            LinkEvent::DataPathOpened(path) => {
                let Some(record) = self.records.get_mut(peer_id) else {
                    return;
                };
                info!(peer_id, label = %path.label(), "data path open");
                record.data_channel = Some(path);
                set_state(&self.diagnostics, record, NegotiationState::Connected);
                self.drain(peer_id);
            }
            LinkEvent::Data(payload) => {
                let Some(record) = self.records.get_mut(peer_id) else {
                    return;
                };
                let bytes = payload.len();
                match record.route_data(payload) {
                    Routed::History => {
                        let history = record.history.len();
                        trace!(peer_id, bytes, history, "buffered inbound data")
                    }
                    _ => trace!(peer_id, bytes, "delivered inbound data"),
                }
            }
            LinkEvent::Stream(stream) => {
                let Some(record) = self.records.get(peer_id) else {
                    return;
                };
                let stream_id = stream.stream_id.clone();
                if record.route_stream(stream) == Routed::Dropped {
                    warn!(
                        peer_id,
                        stream_id = %stream_id,
                        "remote stream dropped; no stream handler"
                    );
                    self.diagnose(Some(peer_id), DiagnosticKind::StreamDropped);
                }
            }
        }
    }

    fn remote_description_applied(&mut self, peer_id: &str) {
        let Some(record) = self.records.get_mut(peer_id) else {
            return;
        };
        if record.state == NegotiationState::Negotiating {
            set_state(&self.diagnostics, record, NegotiationState::DescriptionSet);
        }
        let pending = std::mem::take(&mut record.pending_candidates);
        let Some(link) = &record.link else {
            return;
        };
        if !pending.is_empty() {
            debug!(peer_id, flushed = pending.len(), "flushing buffered candidates");
            link.submit(LinkOp::AddCandidates(pending));
        }
        if !record.initiator {
            link.submit(LinkOp::Answer);
        }
    }
}
