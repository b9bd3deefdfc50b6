//! [`Negotiator`] backed by webrtc-rs.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, trace, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::data_channel::data_channel_init::RTCDataChannelInit;
use webrtc::data_channel::data_channel_message::DataChannelMessage;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_remote::TrackRemote;

use crate::config::ManagerConfig;
use crate::error::PeerError;
use crate::negotiator::{DataPath, LinkEvents, MediaStream, Negotiator, PeerLink, RemoteStream};
use crate::wire::{DescriptionKind, IceCandidate, SessionDescription};

pub struct WebRtcNegotiator {
    api: API,
    rtc_config: RTCConfiguration,
    data_channel: RTCDataChannelInit,
    data_channel_label: String,
}

impl WebRtcNegotiator {
    pub fn new(config: &ManagerConfig) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = if config.ice_servers.is_empty() {
            Vec::new()
        } else {
            vec![RTCIceServer {
                urls: config.ice_servers.clone(),
                ..Default::default()
            }]
        };
        Ok(Self {
            api,
            rtc_config: RTCConfiguration {
                ice_servers,
                ..Default::default()
            },
            data_channel: RTCDataChannelInit {
                ordered: Some(config.ordered),
                max_retransmits: config.max_retransmits,
                ..Default::default()
            },
            data_channel_label: config.data_channel_label.clone(),
        })
    }
}

#[async_trait]
impl Negotiator for WebRtcNegotiator {
    async fn create_link(
        &self,
        peer_id: &str,
        events: LinkEvents,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        let pc = Arc::new(self.api.new_peer_connection(self.rtc_config.clone()).await?);

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => events.local_candidate(IceCandidate {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }),
                    Err(err) => warn!(
                        peer_id = %events.peer_id(),
                        error = %err,
                        "failed to serialize local candidate"
                    ),
                }
            })
        }));

        let channel_events = events.clone();
        let label = self.data_channel_label.clone();
        pc.on_data_channel(Box::new(move |dc: Arc<RTCDataChannel>| {
            let events = channel_events.clone();
            let label = label.clone();
            Box::pin(async move {
                if dc.label() != label {
                    debug!(
                        peer_id = %events.peer_id(),
                        label = %dc.label(),
                        "ignoring unexpected data channel"
                    );
                    return;
                }
                wire_data_channel(dc, events);
            })
        }));

        let track_events = events.clone();
        pc.on_track(Box::new(
            move |track: Arc<TrackRemote>,
                  _receiver: Arc<RTCRtpReceiver>,
                  _transceiver: Arc<RTCRtpTransceiver>| {
                let events = track_events.clone();
                Box::pin(async move {
                    events.remote_stream(RemoteStream {
                        stream_id: track.stream_id(),
                        track_id: track.id(),
                        track: Some(track),
                    });
                })
            },
        ));

        debug!(peer_id, "peer connection created");
        Ok(Arc::new(WebRtcLink {
            pc,
            data_channel: self.data_channel.clone(),
            events,
        }))
    }
}

struct WebRtcLink {
    pc: Arc<RTCPeerConnection>,
    data_channel: RTCDataChannelInit,
    events: LinkEvents,
}

fn to_rtc(description: SessionDescription) -> Result<RTCSessionDescription, PeerError> {
    let rtc = match description.kind {
        DescriptionKind::Offer => RTCSessionDescription::offer(description.sdp)?,
        DescriptionKind::Answer => RTCSessionDescription::answer(description.sdp)?,
    };
    Ok(rtc)
}

#[async_trait]
impl PeerLink for WebRtcLink {
    async fn create_local_description(
        &self,
        kind: DescriptionKind,
    ) -> Result<SessionDescription, PeerError> {
        let rtc = match kind {
            DescriptionKind::Offer => self.pc.create_offer(None).await?,
            DescriptionKind::Answer => self.pc.create_answer(None).await?,
        };
        Ok(SessionDescription { kind, sdp: rtc.sdp })
    }

    async fn apply_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.pc.set_local_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.pc.set_remote_description(to_rtc(description)?).await?;
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: candidate.username_fragment,
            })
            .await?;
        Ok(())
    }

    async fn open_data_channel(&self, label: &str) -> Result<Arc<dyn DataPath>, PeerError> {
        let dc = self
            .pc
            .create_data_channel(label, Some(self.data_channel.clone()))
            .await?;
        wire_data_channel(Arc::clone(&dc), self.events.clone());
        Ok(Arc::new(WebRtcDataPath { dc }))
    }

    async fn add_stream(&self, stream: MediaStream) -> Result<(), PeerError> {
        for track in stream.tracks() {
            self.pc.add_track(Arc::clone(track)).await?;
        }
        debug!(stream_id = %stream.id(), tracks = stream.tracks().len(), "stream attached");
        Ok(())
    }

    async fn close(&self) {
        if let Err(err) = self.pc.close().await {
            warn!(error = %err, "failed to close peer connection");
        }
    }
}

// Both ends report the channel through `on_open`, which also fires when the
// channel was already open at registration.
fn wire_data_channel(dc: Arc<RTCDataChannel>, events: LinkEvents) {
    let open_events = events.clone();
    let open_dc = Arc::clone(&dc);
    dc.on_open(Box::new(move || {
        let path: Arc<dyn DataPath> = Arc::new(WebRtcDataPath {
            dc: Arc::clone(&open_dc),
        });
        open_events.data_path_opened(path);
        Box::pin(async {})
    }));
    dc.on_message(Box::new(move |msg: DataChannelMessage| {
        trace!(peer_id = %events.peer_id(), bytes = msg.data.len(), "data channel message");
        events.data_received(msg.data);
        Box::pin(async {})
    }));
}

struct WebRtcDataPath {
    dc: Arc<RTCDataChannel>,
}

#[async_trait]
impl DataPath for WebRtcDataPath {
    fn label(&self) -> String {
        self.dc.label().to_string()
    }

    async fn send(&self, payload: Bytes) -> Result<(), PeerError> {
        self.dc.send(&payload).await?;
        Ok(())
    }
}

