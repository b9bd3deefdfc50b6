//! Seam between the connection state machine and the platform that actually
//! gathers candidates, produces descriptions and opens data paths.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::trace;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::error::PeerError;
use crate::manager::Command;
use crate::wire::{DescriptionKind, IceCandidate, SessionDescription};

/// Creates one platform connection per remote peer.
#[async_trait]
pub trait Negotiator: Send + Sync {
    async fn create_link(
        &self,
        peer_id: &str,
        events: LinkEvents,
    ) -> Result<Arc<dyn PeerLink>, PeerError>;
}

/// The negotiated connection object for a single peer.
#[async_trait]
pub trait PeerLink: Send + Sync {
    async fn create_local_description(
        &self,
        kind: DescriptionKind,
    ) -> Result<SessionDescription, PeerError>;
    async fn apply_local_description(&self, description: SessionDescription)
        -> Result<(), PeerError>;
    async fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError>;
    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError>;
    /// Opens the local end of the application data path. The link reports it
    /// through [`LinkEvents::data_path_opened`] once it is usable.
    async fn open_data_channel(&self, label: &str) -> Result<Arc<dyn DataPath>, PeerError>;
    async fn add_stream(&self, stream: MediaStream) -> Result<(), PeerError>;
    async fn close(&self);
}

/// Established application-data route to a peer.
#[async_trait]
pub trait DataPath: Send + Sync {
    fn label(&self) -> String;
    async fn send(&self, payload: Bytes) -> Result<(), PeerError>;
}

/// Outbound media attached to a connection.
#[derive(Clone)]
pub struct MediaStream {
    id: String,
    tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

impl MediaStream {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(mut self, track: Arc<dyn TrackLocal + Send + Sync>) -> Self {
        self.tracks.push(track);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn tracks(&self) -> &[Arc<dyn TrackLocal + Send + Sync>] {
        &self.tracks
    }
}

impl fmt::Debug for MediaStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaStream")
            .field("id", &self.id)
            .field("tracks", &self.tracks.len())
            .finish()
    }
}

/// Inbound media announced by the remote peer.
#[derive(Clone)]
pub struct RemoteStream {
    pub stream_id: String,
    pub track_id: String,
    /// Present when the link is backed by webrtc-rs.
    pub track: Option<Arc<TrackRemote>>,
}

impl fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteStream")
            .field("stream_id", &self.stream_id)
            .field("track_id", &self.track_id)
            .finish()
    }
}

pub(crate) enum LinkEvent {
    LocalDescription(SessionDescription),
    RemoteDescriptionApplied,
    Failed(PeerError),
    LocalCandidate(IceCandidate),
    DataPathOpened(Arc<dyn DataPath>),
    Data(Bytes),
    Stream(RemoteStream),
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::LocalDescription(description) => {
                write!(f, "LocalDescription({})", description.kind)
            }
            LinkEvent::RemoteDescriptionApplied => f.write_str("RemoteDescriptionApplied"),
            LinkEvent::Failed(err) => write!(f, "Failed({err})"),
            LinkEvent::LocalCandidate(_) => f.write_str("LocalCandidate"),
            LinkEvent::DataPathOpened(path) => write!(f, "DataPathOpened({})", path.label()),
            LinkEvent::Data(bytes) => write!(f, "Data({} bytes)", bytes.len()),
            LinkEvent::Stream(stream) => write!(f, "Stream({})", stream.stream_id),
        }
    }
}

/// Event sink handed to a [`PeerLink`]. Tagged with the owning record's epoch
/// so events from a purged connection never touch its replacement.
#[derive(Clone)]
pub struct LinkEvents {
    peer_id: Arc<str>,
    epoch: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
}

impl LinkEvents {
    pub(crate) fn new(
        peer_id: &str,
        epoch: u64,
        commands: mpsc::WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            peer_id: Arc::from(peer_id),
            epoch,
            commands,
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn local_candidate(&self, candidate: IceCandidate) {
        self.emit(LinkEvent::LocalCandidate(candidate));
    }

    pub fn data_path_opened(&self, path: Arc<dyn DataPath>) {
        self.emit(LinkEvent::DataPathOpened(path));
    }

    pub fn data_received(&self, payload: Bytes) {
        self.emit(LinkEvent::Data(payload));
    }

    pub fn remote_stream(&self, stream: RemoteStream) {
        self.emit(LinkEvent::Stream(stream));
    }

    pub(crate) fn emit(&self, event: LinkEvent) {
        let Some(commands) = self.commands.upgrade() else {
            trace!(peer_id = %self.peer_id, ?event, "manager gone; dropping link event");
            return;
        };
        let _ = commands.send(Command::Link {
            peer_id: self.peer_id.to_string(),
            epoch: self.epoch,
            event,
        });
    }
}

impl fmt::Debug for LinkEvents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LinkEvents")
            .field("peer_id", &self.peer_id)
            .field("epoch", &self.epoch)
            .finish()
    }
}
