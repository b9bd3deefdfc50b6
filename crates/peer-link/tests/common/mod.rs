#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use peer_link::{
    DataPath, DescriptionKind, IceCandidate, LinkEvents, ManagerConfig, MediaStream, Negotiator,
    PeerError, PeerLink, PeerManager, SessionDescription, SignalMessage,
};
use signal_bus::{LocalBus, SignalingTransport, Subscription};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if check().await {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub fn fake_sdp(owner: &str, kind: DescriptionKind) -> String {
    format!("v=0\r\no=- {owner} {kind}\r\nm=application 9 UDP/DTLS/SCTP\r\nb=AS:30\r\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkCall {
    CreateLocal(DescriptionKind),
    ApplyLocal(DescriptionKind, String),
    ApplyRemote(DescriptionKind),
    AddCandidate(String),
    OpenDataChannel(String),
    AddStream(String),
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    CreateLink,
    CreateLocal,
    ApplyRemote,
}

/// Links of every fake endpoint, keyed by `(owner, remote)`, so one side's
/// data path can reach the other.
#[derive(Default)]
pub struct FakeNetwork {
    links: Mutex<HashMap<(String, String), Arc<FakeLink>>>,
}

impl FakeNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn register(&self, link: Arc<FakeLink>) {
        self.links
            .lock()
            .insert((link.owner.clone(), link.remote.clone()), link);
    }

    fn counterpart(&self, owner: &str, remote: &str) -> Option<Arc<FakeLink>> {
        self.links
            .lock()
            .get(&(remote.to_string(), owner.to_string()))
            .cloned()
    }
}

pub struct FakeNegotiator {
    owner: String,
    network: Arc<FakeNetwork>,
    gather_candidates: bool,
    failures: Mutex<HashSet<(String, FailPoint)>>,
    links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeNegotiator {
    pub fn new(owner: &str) -> Arc<Self> {
        Self::build(owner, FakeNetwork::new(), false)
    }

    /// Links on a shared network also report one host candidate per local
    /// description.
    pub fn on_network(owner: &str, network: Arc<FakeNetwork>) -> Arc<Self> {
        Self::build(owner, network, true)
    }

    fn build(owner: &str, network: Arc<FakeNetwork>, gather_candidates: bool) -> Arc<Self> {
        Arc::new(Self {
            owner: owner.to_string(),
            network,
            gather_candidates,
            failures: Mutex::new(HashSet::new()),
            links: Mutex::new(Vec::new()),
        })
    }

    pub fn fail(&self, peer_id: &str, point: FailPoint) {
        self.failures.lock().insert((peer_id.to_string(), point));
    }

    pub fn clear_failures(&self) {
        self.failures.lock().clear();
    }

    /// Most recent link created for `peer_id`.
    pub fn link(&self, peer_id: &str) -> Option<Arc<FakeLink>> {
        self.links
            .lock()
            .iter()
            .rev()
            .find(|link| link.remote == peer_id)
            .cloned()
    }

    pub fn links_created(&self, peer_id: &str) -> usize {
        self.links
            .lock()
            .iter()
            .filter(|link| link.remote == peer_id)
            .count()
    }

    fn fails(&self, peer_id: &str, point: FailPoint) -> bool {
        self.failures.lock().contains(&(peer_id.to_string(), point))
    }
}

#[async_trait]
impl Negotiator for FakeNegotiator {
    async fn create_link(
        &self,
        peer_id: &str,
        events: LinkEvents,
    ) -> Result<Arc<dyn PeerLink>, PeerError> {
        if self.fails(peer_id, FailPoint::CreateLink) {
            return Err(PeerError::negotiation("create link refused"));
        }
        let link = Arc::new(FakeLink {
            owner: self.owner.clone(),
            remote: peer_id.to_string(),
            events,
            network: Arc::clone(&self.network),
            gather_candidates: self.gather_candidates,
            fail_create_local: self.fails(peer_id, FailPoint::CreateLocal),
            fail_apply_remote: self.fails(peer_id, FailPoint::ApplyRemote),
            calls: Mutex::new(Vec::new()),
            path: Mutex::new(None),
        });
        self.network.register(Arc::clone(&link));
        self.links.lock().push(Arc::clone(&link));
        Ok(link)
    }
}

pub struct FakeLink {
    owner: String,
    remote: String,
    events: LinkEvents,
    network: Arc<FakeNetwork>,
    gather_candidates: bool,
    fail_create_local: bool,
    fail_apply_remote: bool,
    calls: Mutex<Vec<LinkCall>>,
    path: Mutex<Option<Arc<FakeDataPath>>>,
}

impl FakeLink {
    pub fn calls(&self) -> Vec<LinkCall> {
        self.calls.lock().clone()
    }

    pub fn candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                LinkCall::AddCandidate(candidate) => Some(candidate),
                _ => None,
            })
            .collect()
    }

    pub fn closed(&self) -> bool {
        self.calls().contains(&LinkCall::Close)
    }

    /// Payloads written to this side's data path.
    pub fn sent(&self) -> Vec<Bytes> {
        self.path
            .lock()
            .as_ref()
            .map(|path| path.sent())
            .unwrap_or_default()
    }

    /// Reports the data path as open on this side.
    pub fn open_data_path(&self) -> Arc<FakeDataPath> {
        let path = self.ensure_path();
        self.events.data_path_opened(path.clone());
        path
    }

    /// Simulates a payload arriving from the remote side.
    pub fn deliver(&self, payload: impl Into<Bytes>) {
        self.events.data_received(payload.into());
    }

    pub fn events(&self) -> &LinkEvents {
        &self.events
    }

    fn ensure_path(&self) -> Arc<FakeDataPath> {
        let mut slot = self.path.lock();
        slot.get_or_insert_with(|| {
            Arc::new(FakeDataPath {
                label: "peer-link".into(),
                owner: self.owner.clone(),
                remote: self.remote.clone(),
                network: Arc::clone(&self.network),
                sent: Mutex::new(Vec::new()),
            })
        })
        .clone()
    }

    /// Reports the data path as open after the current collaborator call has
    /// returned.
    fn open_later(&self) {
        let path = self.ensure_path();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::task::yield_now().await;
            events.data_path_opened(path);
        });
    }

    fn record(&self, call: LinkCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn create_local_description(
        &self,
        kind: DescriptionKind,
    ) -> Result<SessionDescription, PeerError> {
        self.record(LinkCall::CreateLocal(kind));
        if self.fail_create_local {
            return Err(PeerError::negotiation("create description refused"));
        }
        Ok(SessionDescription {
            kind,
            sdp: fake_sdp(&self.owner, kind),
        })
    }

    async fn apply_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(LinkCall::ApplyLocal(description.kind, description.sdp));
        if self.gather_candidates {
            let events = self.events.clone();
            let candidate = IceCandidate {
                candidate: format!(
                    "candidate:{} 1 udp 2130706431 127.0.0.1 5000 typ host",
                    self.owner
                ),
                sdp_mid: Some("0".into()),
                sdp_mline_index: Some(0),
                username_fragment: None,
            };
            tokio::spawn(async move {
                tokio::task::yield_now().await;
                events.local_candidate(candidate);
            });
        }
        Ok(())
    }

    async fn apply_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), PeerError> {
        self.record(LinkCall::ApplyRemote(description.kind));
        if self.fail_apply_remote {
            return Err(PeerError::negotiation("remote description rejected"));
        }
        // Alone, the offerer sees the channel open once the answer lands. On a
        // shared network each side opens after its peer's candidate arrives.
        if description.kind == DescriptionKind::Answer && !self.gather_candidates {
            self.open_later();
        }
        Ok(())
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        self.record(LinkCall::AddCandidate(candidate.candidate));
        if self.gather_candidates {
            self.open_later();
        }
        Ok(())
    }

    async fn open_data_channel(&self, label: &str) -> Result<Arc<dyn DataPath>, PeerError> {
        self.record(LinkCall::OpenDataChannel(label.to_string()));
        Ok(self.ensure_path())
    }

    async fn add_stream(&self, stream: MediaStream) -> Result<(), PeerError> {
        self.record(LinkCall::AddStream(stream.id().to_string()));
        Ok(())
    }

    async fn close(&self) {
        self.record(LinkCall::Close);
    }
}

pub struct FakeDataPath {
    label: String,
    owner: String,
    remote: String,
    network: Arc<FakeNetwork>,
    sent: Mutex<Vec<Bytes>>,
}

impl FakeDataPath {
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl DataPath for FakeDataPath {
    fn label(&self) -> String {
        self.label.clone()
    }

    async fn send(&self, payload: Bytes) -> Result<(), PeerError> {
        self.sent.lock().push(payload.clone());
        let counterpart = self.network.counterpart(&self.owner, &self.remote);
        if let Some(counterpart) = counterpart {
            counterpart.deliver(payload);
        }
        Ok(())
    }
}

/// A manager for `local_id` on `bus`, plus a subscription on the channel of
/// `remote` so tests can see what the manager publishes to it.
pub struct Harness {
    pub manager: PeerManager,
    pub negotiator: Arc<FakeNegotiator>,
    pub bus: Arc<LocalBus>,
    pub config: ManagerConfig,
}

impl Harness {
    pub fn start(local_id: &str) -> Self {
        Self::start_on(local_id, Arc::new(LocalBus::new()))
    }

    pub fn start_on(local_id: &str, bus: Arc<LocalBus>) -> Self {
        let negotiator = FakeNegotiator::new(local_id);
        Self::start_with(local_id, bus, negotiator)
    }

    pub fn start_with(
        local_id: &str,
        bus: Arc<LocalBus>,
        negotiator: Arc<FakeNegotiator>,
    ) -> Self {
        init_tracing();
        let config = ManagerConfig::new(local_id).localhost();
        let transport: Arc<dyn SignalingTransport> = bus.clone();
        let manager = PeerManager::start(config.clone(), transport, negotiator.clone())
            .expect("start manager");
        Self {
            manager,
            negotiator,
            bus,
            config,
        }
    }

    /// Subscribes to the signaling channel `peer_id` listens on.
    pub fn watch(&self, peer_id: &str) -> Subscription {
        self.bus
            .subscribe(&self.config.channel_for(peer_id))
            .expect("subscribe")
    }

    pub fn inject(&self, message: SignalMessage) {
        let raw = message.encode().expect("encode");
        self.manager
            .dispatch_inbound_signal(raw)
            .expect("dispatch");
    }

    pub async fn wait_link(&self, peer_id: &str) -> Arc<FakeLink> {
        let negotiator = Arc::clone(&self.negotiator);
        let peer = peer_id.to_string();
        eventually("link creation", || {
            let negotiator = Arc::clone(&negotiator);
            let peer = peer.clone();
            async move { negotiator.link(&peer).is_some() }
        })
        .await;
        self.negotiator.link(peer_id).expect("link")
    }
}

/// Next signal published on `subscription`, decoded.
pub async fn next_signal(subscription: &mut Subscription) -> SignalMessage {
    let message = tokio::time::timeout(Duration::from_secs(2), subscription.next_message())
        .await
        .expect("signal in time")
        .expect("subscription open");
    serde_json::from_slice(&message.payload).expect("signal json")
}
