//! Per-peer task that owns the platform connection and runs its operations
//! one at a time, in the order the manager issued them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::BandwidthHint;
use crate::error::PeerError;
use crate::negotiator::{DataPath, LinkEvent, LinkEvents, Negotiator, PeerLink};
use crate::queue::PendingMessage;
use crate::sdp;
use crate::wire::{DescriptionKind, IceCandidate, SessionDescription};

pub(crate) enum LinkOp {
    /// Create the connection; the initiator also opens the data channel and offers.
    Open { initiator: bool },
    ApplyRemote(SessionDescription),
    AddCandidates(Vec<IceCandidate>),
    Answer,
    Dispatch {
        message: PendingMessage,
        data_path: Option<Arc<dyn DataPath>>,
    },
}

impl LinkOp {
    fn name(&self) -> &'static str {
        match self {
            LinkOp::Open { .. } => "open",
            LinkOp::ApplyRemote(_) => "apply_remote",
            LinkOp::AddCandidates(_) => "add_candidates",
            LinkOp::Answer => "answer",
            LinkOp::Dispatch { .. } => "dispatch",
        }
    }
}

/// Sending half of a worker's op queue. Dropping it stops the worker.
pub(crate) struct LinkHandle {
    ops: mpsc::UnboundedSender<LinkOp>,
}

impl LinkHandle {
    pub(crate) fn submit(&self, op: LinkOp) {
        let name = op.name();
        if self.ops.send(op).is_err() {
            trace!(op = name, "link worker stopped; dropping op");
        }
    }
}

pub(crate) struct WorkerContext {
    pub(crate) negotiator: Arc<dyn Negotiator>,
    pub(crate) events: LinkEvents,
    pub(crate) data_channel_label: String,
    pub(crate) bandwidth: Option<BandwidthHint>,
}

pub(crate) fn spawn_link_worker(context: WorkerContext) -> LinkHandle {
    let (ops, receiver) = mpsc::unbounded_channel();
    tokio::spawn(run(context, receiver));
    LinkHandle { ops }
}

struct LinkWorker {
    context: WorkerContext,
    link: Option<Arc<dyn PeerLink>>,
    // Keeps the locally opened channel alive for the initiator.
    local_channel: Option<Arc<dyn DataPath>>,
}

async fn run(context: WorkerContext, mut ops: mpsc::UnboundedReceiver<LinkOp>) {
    let mut worker = LinkWorker {
        context,
        link: None,
        local_channel: None,
    };
    while let Some(op) = ops.recv().await {
        let name = op.name();
        if let Err(err) = worker.execute(op).await {
            warn!(
                peer_id = %worker.context.events.peer_id(),
                op = name,
                error = %err,
                "link operation failed"
            );
            worker.context.events.emit(LinkEvent::Failed(err));
            break;
        }
    }
    worker.local_channel = None;
    if let Some(link) = worker.link.take() {
        link.close().await;
    }
    debug!(peer_id = %worker.context.events.peer_id(), "link worker stopped");
}

impl LinkWorker {
    fn link(&self) -> Result<&Arc<dyn PeerLink>, PeerError> {
        self.link
            .as_ref()
            .ok_or_else(|| PeerError::Negotiation("connection not created".into()))
    }

    async fn execute(&mut self, op: LinkOp) -> Result<(), PeerError> {
        match op {
            LinkOp::Open { initiator } => {
                let events = self.context.events.clone();
                let peer_id = events.peer_id().to_string();
                let link = self.context.negotiator.create_link(&peer_id, events).await?;
                self.link = Some(Arc::clone(&link));
                if initiator {
                    let channel = link
                        .open_data_channel(&self.context.data_channel_label)
                        .await?;
                    self.local_channel = Some(channel);
                    self.publish_local(DescriptionKind::Offer).await?;
                }
                Ok(())
            }
            LinkOp::ApplyRemote(description) => {
                self.link()?.apply_remote_description(description).await?;
                self.context.events.emit(LinkEvent::RemoteDescriptionApplied);
                Ok(())
            }
            LinkOp::AddCandidates(candidates) => {
                let link = self.link()?;
                for candidate in candidates {
                    if let Err(err) = link.add_remote_candidate(candidate).await {
                        warn!(
                            peer_id = %self.context.events.peer_id(),
                            error = %err,
                            "failed to add remote candidate"
                        );
                    }
                }
                Ok(())
            }
            LinkOp::Answer => self.publish_local(DescriptionKind::Answer).await,
            LinkOp::Dispatch { message, data_path } => {
                self.dispatch(message, data_path).await;
                Ok(())
            }
        }
    }

    async fn publish_local(&self, kind: DescriptionKind) -> Result<(), PeerError> {
        let link = self.link()?;
        let description = link.create_local_description(kind).await?;
        let description = sdp::transform_outgoing(description, self.context.bandwidth.as_ref());
        link.apply_local_description(description.clone()).await?;
        debug!(
            peer_id = %self.context.events.peer_id(),
            kind = %kind,
            "local description ready"
        );
        self.context
            .events
            .emit(LinkEvent::LocalDescription(description));
        Ok(())
    }

    async fn dispatch(&self, message: PendingMessage, data_path: Option<Arc<dyn DataPath>>) {
        let peer_id = self.context.events.peer_id();
        let kind = message.kind();
        let result = match message {
            PendingMessage::Data(payload) => match data_path {
                Some(path) => path.send(payload).await,
                None => Err(PeerError::Negotiation("data channel not open".into())),
            },
            PendingMessage::Stream(stream) => match self.link() {
                Ok(link) => link.add_stream(stream).await,
                Err(err) => Err(err),
            },
        };
        if let Err(err) = result {
            warn!(peer_id = %peer_id, kind, error = %err, "failed to deliver queued message");
        }
    }
}
