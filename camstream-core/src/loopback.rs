//! In-process connector backed by channels
//!
//! Every `open` is recorded; the outbound queue of each connection can be
//! drained and events can be injected on its behalf. Used for offline runs
//! and tests.

use crate::transport::{
    ConnectRequest, ConnectionHandle, Connector, Outbound, TransportEvent, TransportEventKind,
    TransportEventSender,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug)]
struct LoopbackConnection {
    request: ConnectRequest,
    events: TransportEventSender,
    outbound: mpsc::UnboundedReceiver<Outbound>,
}

/// Connector whose connections are channel pairs
#[derive(Debug, Clone, Default)]
pub struct LoopbackConnector {
    connections: Arc<Mutex<Vec<LoopbackConnection>>>,
}

impl LoopbackConnector {
    /// Create a connector with no connections
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of connections opened so far
    pub fn opened(&self) -> usize {
        self.connections.lock().len()
    }

    /// Request used for the connection at `index`
    pub fn request(&self, index: usize) -> Option<ConnectRequest> {
        self.connections
            .lock()
            .get(index)
            .map(|c| c.request.clone())
    }

    /// Request used for the most recent connection
    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.connections.lock().last().map(|c| c.request.clone())
    }

    /// Build an event as the connection at `index` would report it
    pub fn event(&self, index: usize, kind: TransportEventKind) -> Option<TransportEvent> {
        self.connections
            .lock()
            .get(index)
            .map(|c| TransportEvent {
                connection_id: c.request.connection_id,
                kind,
            })
    }

    /// Report an event through the connection's event channel
    pub fn inject(&self, index: usize, kind: TransportEventKind) -> bool {
        let connections = self.connections.lock();
        match connections.get(index) {
            Some(c) => c
                .events
                .send(TransportEvent {
                    connection_id: c.request.connection_id,
                    kind,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Take everything written to the connection at `index`
    pub fn drain_outbound(&self, index: usize) -> Vec<Outbound> {
        let mut connections = self.connections.lock();
        let mut drained = Vec::new();
        if let Some(c) = connections.get_mut(index) {
            while let Ok(payload) = c.outbound.try_recv() {
                drained.push(payload);
            }
        }
        drained
    }

    /// Control frames written to the connection at `index`
    pub fn drain_commands(&self, index: usize) -> Vec<String> {
        self.drain_outbound(index)
            .into_iter()
            .filter_map(|payload| match payload {
                Outbound::Text(text) => Some(text),
                _ => None,
            })
            .collect()
    }
}

impl Connector for LoopbackConnector {
    fn open(&self, request: ConnectRequest, events: TransportEventSender) -> ConnectionHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let id = request.connection_id;
        self.connections.lock().push(LoopbackConnection {
            request,
            events,
            outbound: outbound_rx,
        });
        ConnectionHandle::new(id, outbound_tx)
    }
}
