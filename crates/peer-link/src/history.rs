use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::negotiator::RemoteStream;

pub type DataHandler = Arc<dyn Fn(Bytes) + Send + Sync>;
pub type StreamHandler = Arc<dyn Fn(RemoteStream) + Send + Sync>;

/// Consumer callbacks registered through `PeerManager::on_receive`.
#[derive(Clone, Default)]
pub struct ReceiveHandlers {
    pub(crate) on_data: Option<DataHandler>,
    pub(crate) on_stream: Option<StreamHandler>,
}

impl ReceiveHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_data(mut self, handler: impl Fn(Bytes) + Send + Sync + 'static) -> Self {
        self.on_data = Some(Arc::new(handler));
        self
    }

    pub fn on_stream(mut self, handler: impl Fn(RemoteStream) + Send + Sync + 'static) -> Self {
        self.on_stream = Some(Arc::new(handler));
        self
    }

    /// Installs the handlers present in `other`, keeping the rest.
    pub(crate) fn merge(&mut self, other: &ReceiveHandlers) {
        if let Some(handler) = &other.on_data {
            self.on_data = Some(Arc::clone(handler));
        }
        if let Some(handler) = &other.on_stream {
            self.on_stream = Some(Arc::clone(handler));
        }
    }
}

impl fmt::Debug for ReceiveHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReceiveHandlers")
            .field("on_data", &self.on_data.is_some())
            .field("on_stream", &self.on_stream.is_some())
            .finish()
    }
}

/// Payloads that arrived before any data handler was registered.
///
/// Never cleared: every registration replays the full backlog.
#[derive(Debug, Default, Clone)]
pub struct HistoryBuffer {
    entries: Vec<Bytes>,
}

impl HistoryBuffer {
    pub fn push(&mut self, payload: Bytes) {
        self.entries.push(payload);
    }

    pub fn entries(&self) -> &[Bytes] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn replay(&self, handler: &DataHandler) -> usize {
        for payload in &self.entries {
            handler(payload.clone());
        }
        self.entries.len()
    }
}
