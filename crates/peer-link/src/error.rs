use signal_bus::BusError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PeerError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("negotiation failed: {0}")]
    Negotiation(String),
    #[error("signaling transport error: {0}")]
    Transport(#[from] BusError),
    #[error("unrecognized signaling message: {0}")]
    UnrecognizedMessage(String),
    #[error("peer manager closed")]
    Closed,
}

impl PeerError {
    pub fn negotiation(err: impl std::fmt::Display) -> Self {
        PeerError::Negotiation(err.to_string())
    }
}

impl From<webrtc::Error> for PeerError {
    fn from(err: webrtc::Error) -> Self {
        PeerError::Negotiation(err.to_string())
    }
}
