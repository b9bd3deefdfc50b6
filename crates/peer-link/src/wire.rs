//! Signaling messages exchanged over the per-peer bus channels.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::PeerError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DescriptionKind {
    Offer,
    Answer,
}

impl std::fmt::Display for DescriptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DescriptionKind::Offer => f.write_str("offer"),
            DescriptionKind::Answer => f.write_str("answer"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        default,
        rename = "sdpMLineIndex",
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_mline_index: None,
            username_fragment: None,
        }
    }
}

/// Raw wire shape. Exactly one of `session_description` / `candidate` is set
/// on a well-formed message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SignalMessage {
    pub sender_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_description: Option<SessionDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate: Option<IceCandidate>,
}

/// Decoded signal with its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundSignal {
    pub sender_id: String,
    pub payload: SignalPayload,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignalPayload {
    Description(SessionDescription),
    Candidate(IceCandidate),
}

impl SignalMessage {
    pub fn description(sender_id: impl Into<String>, description: SessionDescription) -> Self {
        Self {
            sender_id: sender_id.into(),
            session_description: Some(description),
            candidate: None,
        }
    }

    pub fn candidate(sender_id: impl Into<String>, candidate: IceCandidate) -> Self {
        Self {
            sender_id: sender_id.into(),
            session_description: None,
            candidate: Some(candidate),
        }
    }

    pub fn encode(&self) -> Result<Bytes, PeerError> {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .map_err(|err| PeerError::InvalidArgument(format!("encode signal failed: {err}")))
    }

    pub fn decode(raw: &[u8]) -> Result<InboundSignal, PeerError> {
        let message: SignalMessage = serde_json::from_slice(raw)
            .map_err(|err| PeerError::UnrecognizedMessage(format!("malformed json: {err}")))?;
        message.into_inbound()
    }

    /// Sender ids are trimmed the same way caller-supplied peer ids are.
    pub fn into_inbound(self) -> Result<InboundSignal, PeerError> {
        let sender_id = self.sender_id.trim();
        if sender_id.is_empty() {
            return Err(PeerError::UnrecognizedMessage("missing sender id".into()));
        }
        let sender_id = sender_id.to_string();
        let payload = match (self.session_description, self.candidate) {
            (Some(description), None) => SignalPayload::Description(description),
            (None, Some(candidate)) => SignalPayload::Candidate(candidate),
            (Some(_), Some(_)) => {
                return Err(PeerError::UnrecognizedMessage(
                    "both session description and candidate present".into(),
                ));
            }
            (None, None) => {
                return Err(PeerError::UnrecognizedMessage(
                    "neither session description nor candidate present".into(),
                ));
            }
        };
        Ok(InboundSignal { sender_id, payload })
    }
}
