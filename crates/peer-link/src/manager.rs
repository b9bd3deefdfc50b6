use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use signal_bus::{SignalingTransport, Subscription, SubscriptionEvent};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::ManagerConfig;
use crate::error::PeerError;
use crate::history::ReceiveHandlers;
use crate::negotiator::{LinkEvent, LinkEvents, MediaStream, Negotiator};
use crate::queue::{OutboundMessageQueue, PendingMessage};
use crate::record::{ConnectionRecord, NegotiationState, PeerSnapshot};
use crate::wire::SignalMessage;
use crate::worker::{spawn_link_worker, LinkOp, WorkerContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The signaling subscription is not confirmed yet; the call replays once it is.
    Queued,
    Started,
    /// A negotiation for this peer already exists; nothing changed.
    AlreadyInitialized,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticKind {
    StateChanged {
        from: NegotiationState,
        to: NegotiationState,
    },
    AlreadyInitialized,
    NegotiationFailed(String),
    UnrecognizedMessage(String),
    CandidateDiscarded,
    StreamDropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub peer_id: Option<String>,
    pub kind: DiagnosticKind,
}

/// Payload for [`PeerManager::send`]. A stream takes precedence over a message.
#[derive(Debug, Clone, Default)]
pub struct Outbound {
    pub stream: Option<MediaStream>,
    pub message: Option<Bytes>,
}

impl Outbound {
    pub fn message(payload: impl Into<Bytes>) -> Self {
        Self {
            stream: None,
            message: Some(payload.into()),
        }
    }

    pub fn stream(stream: MediaStream) -> Self {
        Self {
            stream: Some(stream),
            message: None,
        }
    }

    fn into_pending(self) -> Result<PendingMessage, PeerError> {
        match (self.stream, self.message) {
            (Some(stream), _) => Ok(PendingMessage::Stream(stream)),
            (None, Some(message)) => Ok(PendingMessage::Data(message)),
            (None, None) => Err(PeerError::InvalidArgument(
                "either a stream or a message must be provided".into(),
            )),
        }
    }
}

pub(crate) enum Command {
    Connect {
        peer_id: String,
        initiator: bool,
        reply: oneshot::Sender<ConnectOutcome>,
    },
    Send {
        peer_id: String,
        message: PendingMessage,
        reply: oneshot::Sender<()>,
    },
    Receive {
        peer_id: String,
        handlers: ReceiveHandlers,
        reply: oneshot::Sender<usize>,
    },
    History {
        peer_id: String,
        reply: oneshot::Sender<Vec<Bytes>>,
    },
    Snapshot {
        peer_id: String,
        reply: oneshot::Sender<Option<PeerSnapshot>>,
    },
    Peers {
        reply: oneshot::Sender<Vec<String>>,
    },
    Inbound(Bytes),
    SubscriptionReady,
    Link {
        peer_id: String,
        epoch: u64,
        event: LinkEvent,
    },
}

/// Handle to a running peer connection manager.
///
/// All state lives in a single task; the handle only sends it commands. The
/// task stops once every handle is dropped.
#[derive(Clone)]
pub struct PeerManager {
    local_id: Arc<str>,
    commands: mpsc::UnboundedSender<Command>,
    diagnostics: broadcast::Sender<Diagnostic>,
}

impl PeerManager {
    /// Subscribes to this endpoint's signaling channel and spawns the manager
    /// task. Must be called within a Tokio runtime.
    pub fn start(
        config: ManagerConfig,
        transport: Arc<dyn SignalingTransport>,
        negotiator: Arc<dyn Negotiator>,
    ) -> Result<Self, PeerError> {
        let local_channel = config.local_channel();
        let subscription = transport.subscribe(&local_channel)?;
        let (commands, receiver) = mpsc::unbounded_channel();
        let (diagnostics, _) = broadcast::channel(config.diagnostics_capacity.max(1));
        let pump = spawn_subscription_pump(subscription, commands.downgrade());
        let local_id: Arc<str> = Arc::from(config.local_id.as_str());

        info!(local_id = %local_id, channel = %local_channel, "starting peer manager");
        let engine = Engine {
            config,
            transport,
            negotiator,
            records: HashMap::new(),
            queues: OutboundMessageQueue::new(),
            pending_calls: Vec::new(),
            ready: false,
            next_epoch: 1,
            commands: commands.downgrade(),
            diagnostics: diagnostics.clone(),
            pump: Some(pump),
        };
        tokio::spawn(engine.run(receiver));

        Ok(Self {
            local_id,
            commands,
            diagnostics,
        })
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn diagnostics(&self) -> broadcast::Receiver<Diagnostic> {
        self.diagnostics.subscribe()
    }

    /// Starts negotiating with `peer_id`. Idempotent once a negotiation exists.
    pub async fn connect(
        &self,
        peer_id: &str,
        initiator: bool,
    ) -> Result<ConnectOutcome, PeerError> {
        let peer_id = require_peer_id(peer_id)?;
        self.request(|reply| Command::Connect {
            peer_id,
            initiator,
            reply,
        })
        .await
    }

    /// Queues a payload for `peer_id`; it goes out once the data path is open.
    pub async fn send(&self, peer_id: &str, outbound: Outbound) -> Result<(), PeerError> {
        let peer_id = require_peer_id(peer_id)?;
        let message = outbound.into_pending()?;
        self.request(|reply| Command::Send {
            peer_id,
            message,
            reply,
        })
        .await
    }

    /// Registers consumer handlers and replays the buffered history through
    /// the data handler before returning. Returns the number of replayed payloads.
    pub async fn on_receive(
        &self,
        peer_id: &str,
        handlers: ReceiveHandlers,
    ) -> Result<usize, PeerError> {
        let peer_id = require_peer_id(peer_id)?;
        self.request(|reply| Command::Receive {
            peer_id,
            handlers,
            reply,
        })
        .await
    }

    pub async fn history(&self, peer_id: &str) -> Result<Vec<Bytes>, PeerError> {
        let peer_id = require_peer_id(peer_id)?;
        self.request(|reply| Command::History { peer_id, reply })
            .await
    }

    pub async fn snapshot(&self, peer_id: &str) -> Result<Option<PeerSnapshot>, PeerError> {
        let peer_id = require_peer_id(peer_id)?;
        self.request(|reply| Command::Snapshot { peer_id, reply })
            .await
    }

    pub async fn peers(&self) -> Result<Vec<String>, PeerError> {
        self.request(|reply| Command::Peers { reply }).await
    }

    /// Feeds a raw signaling message into the manager, as if it arrived on the
    /// local channel.
    pub fn dispatch_inbound_signal(&self, raw: Bytes) -> Result<(), PeerError> {
        self.commands
            .send(Command::Inbound(raw))
            .map_err(|_| PeerError::Closed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, PeerError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(build(reply))
            .map_err(|_| PeerError::Closed)?;
        response.await.map_err(|_| PeerError::Closed)
    }
}

fn require_peer_id(peer_id: &str) -> Result<String, PeerError> {
    let trimmed = peer_id.trim();
    if trimmed.is_empty() {
        return Err(PeerError::InvalidArgument("peer id is required".into()));
    }
    Ok(trimmed.to_string())
}

fn spawn_subscription_pump(
    mut subscription: Subscription,
    commands: mpsc::WeakUnboundedSender<Command>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = subscription.next().await {
            let command = match event {
                SubscriptionEvent::Ready => Command::SubscriptionReady,
                SubscriptionEvent::Message(message) => Command::Inbound(message.payload),
            };
            let Some(commands) = commands.upgrade() else {
                break;
            };
            if commands.send(command).is_err() {
                break;
            }
        }
        debug!(channel = %subscription.channel(), "signaling subscription ended");
    })
}

struct PendingCall {
    peer_id: String,
    initiator: bool,
}

/// State owned by the manager task. Every mutation happens inside one
/// `handle` call, so no locking is needed.
pub(crate) struct Engine {
    pub(crate) config: ManagerConfig,
    transport: Arc<dyn SignalingTransport>,
    negotiator: Arc<dyn Negotiator>,
    pub(crate) records: HashMap<String, ConnectionRecord>,
    queues: OutboundMessageQueue,
    pending_calls: Vec<PendingCall>,
    ready: bool,
    next_epoch: u64,
    commands: mpsc::WeakUnboundedSender<Command>,
    pub(crate) diagnostics: broadcast::Sender<Diagnostic>,
    pump: Option<JoinHandle<()>>,
}

impl Engine {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = receiver.recv().await {
            self.handle(command);
        }
        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        debug!(local_id = %self.config.local_id, "peer manager stopped");
    }

    fn handle(&mut self, command: Command) {
        match command {
            Command::Connect {
                peer_id,
                initiator,
                reply,
            } => {
                let outcome = self.connect(peer_id, initiator);
                let _ = reply.send(outcome);
            }
            Command::Send {
                peer_id,
                message,
                reply,
            } => {
                self.send(&peer_id, message);
                let _ = reply.send(());
            }
            Command::Receive {
                peer_id,
                handlers,
                reply,
            } => {
                let replayed = self.register_handlers(&peer_id, handlers);
                let _ = reply.send(replayed);
            }
            Command::History { peer_id, reply } => {
                let history = self
                    .records
                    .get(&peer_id)
                    .map(|record| record.history.entries().to_vec())
                    .unwrap_or_default();
                let _ = reply.send(history);
            }
            Command::Snapshot { peer_id, reply } => {
                let snapshot = self
                    .records
                    .get(&peer_id)
                    .map(|record| record.snapshot(self.queues.len(&peer_id)));
                let _ = reply.send(snapshot);
            }
            Command::Peers { reply } => {
                let mut peers: Vec<String> = self.records.keys().cloned().collect();
                peers.sort();
                let _ = reply.send(peers);
            }
            Command::Inbound(raw) => self.handle_inbound(raw),
            Command::SubscriptionReady => self.subscription_ready(),
            Command::Link {
                peer_id,
                epoch,
                event,
            } => self.handle_link_event(&peer_id, epoch, event),
        }
    }

    fn subscription_ready(&mut self) {
        if self.ready {
            trace!("duplicate subscription ready ignored");
            return;
        }
        self.ready = true;
        let calls = std::mem::take(&mut self.pending_calls);
        info!(
            local_id = %self.config.local_id,
            replayed = calls.len(),
            "signaling subscription ready"
        );
        for call in calls {
            self.connect(call.peer_id, call.initiator);
        }
    }

    fn connect(&mut self, peer_id: String, initiator: bool) -> ConnectOutcome {
        if !self.ready {
            debug!(peer_id = %peer_id, initiator, "subscription not ready; queueing connect");
            self.pending_calls.push(PendingCall { peer_id, initiator });
            return ConnectOutcome::Queued;
        }
        if self
            .records
            .get(&peer_id)
            .is_some_and(ConnectionRecord::is_initialized)
        {
            debug!(peer_id = %peer_id, "connect ignored; negotiation already initialized");
            self.diagnose(Some(&peer_id), DiagnosticKind::AlreadyInitialized);
            return ConnectOutcome::AlreadyInitialized;
        }
        self.initialize(&peer_id, initiator);
        ConnectOutcome::Started
    }

    /// Turns a missing or stub record into a negotiating one.
    pub(crate) fn initialize(&mut self, peer_id: &str, initiator: bool) {
        let epoch = self.next_epoch;
        self.next_epoch += 1;

        let link = spawn_link_worker(WorkerContext {
            negotiator: Arc::clone(&self.negotiator),
            events: LinkEvents::new(peer_id, epoch, self.commands.clone()),
            data_channel_label: self.config.data_channel_label.clone(),
            bandwidth: self.config.bandwidth.clone(),
        });
        link.submit(LinkOp::Open { initiator });

        self.queues.ensure(peer_id);
        let channel = self.config.channel_for(peer_id);
        let record = self
            .records
            .entry(peer_id.to_string())
            .or_insert_with(|| ConnectionRecord::stub(peer_id, channel));
        record.epoch = epoch;
        record.initiator = initiator;
        record.link = Some(link);
        record.data_channel = None;
        record.pending_candidates.clear();
        debug!(peer_id, epoch, initiator, "negotiation started");
        set_state(&self.diagnostics, record, NegotiationState::Negotiating);
    }

    fn ensure_record(&mut self, peer_id: &str) -> &mut ConnectionRecord {
        self.queues.ensure(peer_id);
        let channel = self.config.channel_for(peer_id);
        self.records.entry(peer_id.to_string()).or_insert_with(|| {
            debug!(peer_id, "creating stub connection record");
            ConnectionRecord::stub(peer_id, channel)
        })
    }

    fn send(&mut self, peer_id: &str, message: PendingMessage) {
        self.ensure_record(peer_id);
        trace!(peer_id, kind = message.kind(), "queueing outbound message");
        self.queues.push(peer_id, message);
        self.drain(peer_id);
    }

    /// Hands queued messages to the link worker, oldest first, while the data
    /// path is open. A closed path leaves the queue untouched.
    pub(crate) fn drain(&mut self, peer_id: &str) {
        let Some(record) = self.records.get(peer_id) else {
            return;
        };
        if !record.is_connected() {
            if !self.queues.is_empty(peer_id) {
                trace!(
                    peer_id,
                    queued = self.queues.len(peer_id),
                    state = %record.state,
                    "data path not open; holding queue"
                );
            }
            return;
        }
        let Some(link) = record.link.as_ref() else {
            return;
        };
        let mut drained = 0usize;
        while let Some(message) = self.queues.pop(peer_id) {
            link.submit(LinkOp::Dispatch {
                message,
                data_path: record.data_channel.clone(),
            });
            drained += 1;
        }
        if drained > 0 {
            debug!(peer_id, drained, "drained outbound queue");
        }
    }

    fn register_handlers(&mut self, peer_id: &str, handlers: ReceiveHandlers) -> usize {
        let record = self.ensure_record(peer_id);
        record.handlers.merge(&handlers);
        let replayed = match &handlers.on_data {
            Some(handler) => record.history.replay(handler),
            None => 0,
        };
        debug!(peer_id, replayed, "receive handlers registered");
        replayed
    }

    /// Removes a record after a negotiation-level failure.
    pub(crate) fn fail(&mut self, peer_id: &str, err: PeerError) {
        let Some(mut record) = self.records.remove(peer_id) else {
            return;
        };
        set_state(&self.diagnostics, &mut record, NegotiationState::Failed);
        let discarded = self.queues.remove(peer_id);
        warn!(
            peer_id,
            epoch = record.epoch,
            discarded,
            error = %err,
            "negotiation failed; connection record removed"
        );
        self.diagnose(
            Some(peer_id),
            DiagnosticKind::NegotiationFailed(err.to_string()),
        );
    }

    pub(crate) fn publish(&self, channel: &str, message: SignalMessage) {
        let payload = match message.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!(channel, error = %err, "failed to encode signaling message");
                return;
            }
        };
        if let Err(err) = self.transport.publish(channel, payload) {
            warn!(channel, error = %err, "signaling publish failed");
        }
    }

    pub(crate) fn diagnose(&self, peer_id: Option<&str>, kind: DiagnosticKind) {
        diagnose(&self.diagnostics, peer_id, kind);
    }
}

pub(crate) fn diagnose(
    diagnostics: &broadcast::Sender<Diagnostic>,
    peer_id: Option<&str>,
    kind: DiagnosticKind,
) {
    let _ = diagnostics.send(Diagnostic {
        peer_id: peer_id.map(str::to_string),
        kind,
    });
}

pub(crate) fn set_state(
    diagnostics: &broadcast::Sender<Diagnostic>,
    record: &mut ConnectionRecord,
    to: NegotiationState,
) {
    let from = record.state;
    if from == to {
        return;
    }
    record.state = to;
    trace!(peer_id = %record.peer_id, %from, %to, "state changed");
    diagnose(
        diagnostics,
        Some(&record.peer_id),
        DiagnosticKind::StateChanged { from, to },
    );
}
