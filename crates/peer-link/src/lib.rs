//! Peer connection negotiation and message queuing over a pub/sub signaling bus.
//!
//! A [`PeerManager`] subscribes to its own signaling channel, negotiates one
//! connection per remote peer through a [`Negotiator`], queues outbound
//! payloads until the data path opens, and buffers inbound data until a
//! consumer registers with [`PeerManager::on_receive`].

mod config;
mod error;
mod history;
mod manager;
mod negotiator;
mod protocol;
mod queue;
mod record;
pub mod sdp;
mod webrtc_link;
pub mod wire;
mod worker;

pub use config::{BandwidthHint, ManagerConfig};
pub use error::PeerError;
pub use history::{DataHandler, HistoryBuffer, ReceiveHandlers, StreamHandler};
pub use manager::{ConnectOutcome, Diagnostic, DiagnosticKind, Outbound, PeerManager};
pub use negotiator::{DataPath, LinkEvents, MediaStream, Negotiator, PeerLink, RemoteStream};
pub use queue::{OutboundMessageQueue, PendingMessage};
pub use record::{NegotiationState, PeerSnapshot};
pub use webrtc_link::WebRtcNegotiator;
pub use wire::{DescriptionKind, IceCandidate, SessionDescription, SignalMessage};
