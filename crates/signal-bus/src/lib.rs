use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub channel: String,
    pub payload: Bytes,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("bus channel closed")]
    Closed,
    #[error("bus transport error: {0}")]
    Transport(String),
}

pub type BusResult<T> = Result<T, BusError>;

/// Events delivered to a single subscription, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionEvent {
    /// The transport confirmed the subscription. Delivered once.
    Ready,
    Message(BusMessage),
}

/// Receiving half of a channel subscription.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    events: mpsc::UnboundedReceiver<SubscriptionEvent>,
}

impl Subscription {
    pub fn new(
        channel: impl Into<String>,
        events: mpsc::UnboundedReceiver<SubscriptionEvent>,
    ) -> Self {
        Self {
            channel: channel.into(),
            events,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Next event, or `None` once the transport dropped the subscription.
    pub async fn next(&mut self) -> Option<SubscriptionEvent> {
        self.events.recv().await
    }

    /// Waits for the next data message, skipping readiness notifications.
    pub async fn next_message(&mut self) -> Option<BusMessage> {
        loop {
            match self.events.recv().await? {
                SubscriptionEvent::Ready => continue,
                SubscriptionEvent::Message(message) => return Some(message),
            }
        }
    }
}

/// Publish/subscribe channel used to carry signaling between endpoints.
///
/// Implementations must preserve per-channel delivery order.
pub trait SignalingTransport: Send + Sync {
    fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()>;
    fn subscribe(&self, channel: &str) -> BusResult<Subscription>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReadyMode {
    /// Subscriptions are confirmed as soon as they are created.
    #[default]
    Immediate,
    /// Subscriptions wait for [`LocalBus::confirm`].
    Manual,
}

#[derive(Debug)]
struct Subscriber {
    sender: mpsc::UnboundedSender<SubscriptionEvent>,
    confirmed: bool,
}

/// Simple in-memory bus for tests and single-process setups.
#[derive(Debug, Default)]
pub struct LocalBus {
    channels: RwLock<HashMap<String, Vec<Subscriber>>>,
    ready_mode: ReadyMode,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_manual_ready() -> Self {
        Self {
            ready_mode: ReadyMode::Manual,
            ..Self::default()
        }
    }

    /// Delivers `Ready` to every unconfirmed subscriber of `channel`.
    /// Returns how many subscribers were confirmed.
    pub fn confirm(&self, channel: &str) -> usize {
        let mut guard = self.channels.write();
        let Some(subscribers) = guard.get_mut(channel) else {
            return 0;
        };
        let mut confirmed = 0;
        subscribers.retain_mut(|subscriber| {
            if subscriber.confirmed {
                return !subscriber.sender.is_closed();
            }
            subscriber.confirmed = true;
            confirmed += 1;
            subscriber.sender.send(SubscriptionEvent::Ready).is_ok()
        });
        confirmed
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.channels
            .read()
            .get(channel)
            .map(|subscribers| subscribers.iter().filter(|s| !s.sender.is_closed()).count())
            .unwrap_or(0)
    }
}

impl SignalingTransport for LocalBus {
    fn publish(&self, channel: &str, payload: Bytes) -> BusResult<()> {
        let mut guard = self.channels.write();
        let Some(subscribers) = guard.get_mut(channel) else {
            trace!(channel, len = payload.len(), "no subscribers; dropping message");
            return Ok(());
        };
        let message = BusMessage {
            channel: channel.to_string(),
            payload,
        };
        subscribers.retain(|subscriber| {
            subscriber
                .sender
                .send(SubscriptionEvent::Message(message.clone()))
                .is_ok()
        });
        Ok(())
    }

    fn subscribe(&self, channel: &str) -> BusResult<Subscription> {
        let (sender, receiver) = mpsc::unbounded_channel();
        let confirmed = self.ready_mode == ReadyMode::Immediate;
        if confirmed {
            sender
                .send(SubscriptionEvent::Ready)
                .map_err(|_| BusError::Closed)?;
        }
        self.channels
            .write()
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { sender, confirmed });
        Ok(Subscription::new(channel, receiver))
    }
}
