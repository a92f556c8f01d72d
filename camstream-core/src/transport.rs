//! Persistent, reconnecting transport shared by control commands and media buffers
//!
//! A [`Transport`] owns at most one live connection at a time. Connections are
//! produced by a [`Connector`] and report back through a single event channel,
//! tagged with the [`ConnectionId`] they were opened under. Events carrying an
//! id other than the current one are discarded, and writes only ever go to the
//! current handle, so a connection replaced by a reconnect never sees traffic.

use crate::error::RecorderError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};
use url::Url;

/// Identifier assigned to every opened connection, increasing per transport
pub type ConnectionId = u64;

/// Sender half used by connections to report events
pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiver half consumed by the recorder driver
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    /// No connection has been opened, or it was released
    Disconnected,
    /// A connection was opened and is not usable yet
    Connecting,
    /// The connection is readable and writable
    Connected,
    /// The remote side closed the connection
    Ended,
}

/// Payload queued for a connection
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    /// Control frame (JSON text)
    Text(String),
    /// Media buffer, sent without an envelope
    Binary(Bytes),
    /// Close the connection from this side
    Close,
}

/// Event reported by a connection
#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    /// Connection the event belongs to
    pub connection_id: ConnectionId,
    /// What happened
    pub kind: TransportEventKind,
}

/// Kinds of connection events
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    /// The stream became readable
    Opened,
    /// A text frame arrived
    Text(String),
    /// A binary frame arrived
    Binary(Bytes),
    /// The remote side closed the stream
    Ended,
    /// The stream failed
    Error {
        /// Failure description
        reason: String,
        /// Whether the stream is beyond recovery
        destroyed: bool,
    },
}

/// Parameters for opening one connection
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectRequest {
    /// Id the connection must tag its events with
    pub connection_id: ConnectionId,
    /// Full URL including the site query
    pub url: String,
    /// Handshake timeout
    pub timeout: Duration,
}

/// Produces connections for a [`Transport`]
///
/// `open` must not block: the connection reports `Opened` (or an error)
/// asynchronously through `events`.
pub trait Connector: Send {
    /// Open a connection for `request`
    fn open(&self, request: ConnectRequest, events: TransportEventSender) -> ConnectionHandle;
}

/// Write side of one connection
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl ConnectionHandle {
    /// Wrap the outbound queue of a connection
    pub fn new(id: ConnectionId, outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { id, outbound }
    }

    /// Connection id
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a payload, returns false if the connection is gone
    pub fn send(&self, payload: Outbound) -> bool {
        self.outbound.send(payload).is_ok()
    }

    /// Ask the connection to close
    pub fn close(self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// Outcome of handling a connection event, in the order it must be surfaced
#[derive(Debug, Clone, PartialEq)]
pub enum TransportSignal {
    /// First readable signal of a connection
    Connected,
    /// A scheduled reconnect succeeded
    Reconnected,
    /// The remote side closed the connection
    Ended,
    /// Control payload received
    Data(String),
    /// Non-fatal transport or framing error
    Error(RecorderError),
    /// The stream was destroyed; the session cannot continue
    Fatal(RecorderError),
}

/// Transport configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Base socket URL
    pub socket_url: String,
    /// Query parameter name carrying the site identifier
    pub site_name_label: String,
    /// Site identifier
    pub site_name: String,
    /// Handshake timeout
    pub connect_timeout: Duration,
    /// Reconnect after the remote side ends the connection
    pub reconnect: bool,
    /// Delay before reconnecting
    pub reconnect_delay: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            socket_url: String::new(),
            site_name_label: "site-name".to_string(),
            site_name: String::new(),
            connect_timeout: Duration::from_secs(10),
            reconnect: true,
            reconnect_delay: Duration::from_millis(2000),
        }
    }
}

impl TransportConfig {
    /// URL with the site identifier encoded as query, since custom headers
    /// cannot be set on this channel
    ///
    /// A base URL without a path gets `/`, and an existing query is kept.
    pub fn connection_url(&self) -> Result<String, RecorderError> {
        let mut url =
            Url::parse(self.socket_url.trim()).map_err(|e| RecorderError::InvalidConfiguration {
                message: format!("invalid socket URL '{}': {}", self.socket_url, e),
            })?;
        if url.cannot_be_a_base() {
            return Err(RecorderError::InvalidConfiguration {
                message: format!("socket URL '{}' has no host", self.socket_url),
            });
        }

        url.query_pairs_mut()
            .append_pair(&self.site_name_label, &self.site_name);
        Ok(url.into())
    }
}

/// Counters kept across connections
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransportStats {
    /// Connections opened so far
    pub connections_opened: u64,
    /// Control commands written
    pub commands_sent: u64,
    /// Binary bytes written
    pub bytes_sent: u64,
    /// Binary buffers dropped while disconnected
    pub buffers_dropped: u64,
}

#[derive(Debug, Clone)]
struct PendingCommand {
    name: String,
    payload: String,
}

/// Reconnecting transport
pub struct Transport {
    config: TransportConfig,
    connector: Box<dyn Connector>,
    events: TransportEventSender,
    current: Option<ConnectionHandle>,
    status: ConnectionStatus,
    connected: bool,
    next_id: ConnectionId,
    pending: Option<PendingCommand>,
    reconnect_at: Option<f64>,
    announce_reconnect: bool,
    closed: bool,
    stats: TransportStats,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("status", &self.status)
            .field("connected", &self.connected)
            .field("current", &self.current.as_ref().map(|c| c.id()))
            .field("pending", &self.pending.as_ref().map(|p| p.name.as_str()))
            .field("reconnect_at", &self.reconnect_at)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Transport {
    /// Create a transport; nothing is opened until [`Transport::connect`]
    pub fn new(
        config: TransportConfig,
        connector: Box<dyn Connector>,
        events: TransportEventSender,
    ) -> Self {
        Self {
            config,
            connector,
            events,
            current: None,
            status: ConnectionStatus::Disconnected,
            connected: false,
            next_id: 1,
            pending: None,
            reconnect_at: None,
            announce_reconnect: false,
            closed: false,
            stats: TransportStats::default(),
        }
    }

    /// Open a new connection unless one is connected or connecting
    pub fn connect(&mut self) -> bool {
        if self.closed || self.connected || self.status == ConnectionStatus::Connecting {
            debug!(status = ?self.status, closed = self.closed, "Not going to open a connection");
            return false;
        }

        let url = match self.config.connection_url() {
            Ok(url) => url,
            Err(e) => {
                warn!(error = %e, "Cannot open a connection");
                return false;
            }
        };

        // The previous handle (if any) is dropped here, closing its stream.
        if let Some(previous) = self.current.take() {
            previous.close();
        }

        let connection_id = self.next_id;
        self.next_id += 1;

        let request = ConnectRequest {
            connection_id,
            url,
            timeout: self.config.connect_timeout,
        };

        info!(connection_id, url = %request.url, "Opening connection");

        let handle = self.connector.open(request, self.events.clone());
        self.current = Some(handle);
        self.status = ConnectionStatus::Connecting;
        self.stats.connections_opened += 1;
        true
    }

    /// Send a control frame, queueing it behind a reconnect when disconnected
    ///
    /// Only one command can wait for a connection; a second one is rejected
    /// instead of replacing the first.
    pub fn send_command(&mut self, name: &str, payload: String) -> Result<(), RecorderError> {
        if self.closed {
            return Err(RecorderError::Unloaded);
        }

        if self.connected {
            if let Some(handle) = &self.current {
                if handle.send(Outbound::Text(payload.clone())) {
                    debug!(command = name, "$ command sent");
                    self.stats.commands_sent += 1;
                    return Ok(());
                }
                warn!(command = name, "Connection went away while sending");
                self.connected = false;
                self.status = ConnectionStatus::Disconnected;
                self.current = None;
            }
        }

        if let Some(pending) = &self.pending {
            return Err(RecorderError::PendingCommandRejected {
                command: name.to_string(),
                pending: pending.name.clone(),
            });
        }

        debug!(command = name, "Trying to reconnect for the command");
        self.pending = Some(PendingCommand {
            name: name.to_string(),
            payload,
        });
        self.connect();
        Ok(())
    }

    /// Write a media buffer, dropped silently while disconnected
    pub fn write_binary(&mut self, data: Bytes) -> bool {
        let len = data.len() as u64;
        match &self.current {
            Some(handle) if self.connected && handle.send(Outbound::Binary(data)) => {
                self.stats.bytes_sent += len;
                true
            }
            _ => {
                self.stats.buffers_dropped += 1;
                false
            }
        }
    }

    /// Apply a connection event
    ///
    /// `suppress_reconnect` keeps an `Ended` from scheduling a reconnect (the
    /// replay is being shown).
    pub fn handle_event(
        &mut self,
        event: TransportEvent,
        now_ms: f64,
        suppress_reconnect: bool,
    ) -> Vec<TransportSignal> {
        let current_id = self.current.as_ref().map(ConnectionHandle::id);
        if current_id != Some(event.connection_id) {
            // Covers the close/error race: an error arriving after the stream
            // reference is gone is swallowed.
            trace!(
                connection_id = event.connection_id,
                ?current_id,
                "Ignoring event from stale connection"
            );
            return Vec::new();
        }

        let mut signals = Vec::new();

        match event.kind {
            TransportEventKind::Opened => {
                if !self.connected {
                    self.connected = true;
                    self.status = ConnectionStatus::Connected;
                    // A write may have reconnected before the timer fired.
                    self.reconnect_at = None;
                    info!(connection_id = event.connection_id, "Connected");
                    signals.push(TransportSignal::Connected);

                    if self.announce_reconnect {
                        self.announce_reconnect = false;
                        signals.push(TransportSignal::Reconnected);
                    }

                    self.flush_pending();
                }
            }
            TransportEventKind::Text(text) => signals.push(TransportSignal::Data(text)),
            TransportEventKind::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => signals.push(TransportSignal::Data(text)),
                Err(e) => signals.push(TransportSignal::Error(RecorderError::Protocol {
                    message: format!("binary control frame is not UTF-8: {}", e),
                })),
            },
            TransportEventKind::Ended => {
                self.connected = false;
                self.status = ConnectionStatus::Ended;
                self.current = None;
                info!(connection_id = event.connection_id, "Connection ended");
                signals.push(TransportSignal::Ended);

                if !self.closed && self.config.reconnect && !suppress_reconnect {
                    self.schedule_reconnect(now_ms);
                }
            }
            TransportEventKind::Error { reason, destroyed } => {
                if destroyed {
                    warn!(connection_id = event.connection_id, %reason, "Stream destroyed");
                    signals.push(TransportSignal::Fatal(RecorderError::UnableToConnect {
                        explanation: format!(
                            "A connection has been refused. Either the server is in trouble \
                             or you are already connected in another instance? ({})",
                            reason
                        ),
                    }));
                } else {
                    warn!(connection_id = event.connection_id, %reason, "Transport error");
                    signals.push(TransportSignal::Error(RecorderError::Transport { reason }));
                }
            }
        }

        signals
    }

    fn schedule_reconnect(&mut self, now_ms: f64) {
        if self.reconnect_at.is_some() {
            return;
        }
        let at = now_ms + self.config.reconnect_delay.as_secs_f64() * 1000.0;
        debug!(at_ms = at, "Reconnect scheduled");
        self.reconnect_at = Some(at);
        self.announce_reconnect = true;
    }

    fn flush_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            debug!(command = %pending.name, "Flushing pending command after connect");
            if let Some(handle) = &self.current {
                if handle.send(Outbound::Text(pending.payload)) {
                    self.stats.commands_sent += 1;
                }
            }
        }
    }

    /// Fire the reconnect timer if it is due, returns true if it fired
    pub fn poll(&mut self, now_ms: f64) -> bool {
        match self.reconnect_at {
            Some(at) if at <= now_ms => {
                self.reconnect_at = None;
                self.connect();
                true
            }
            _ => false,
        }
    }

    /// Earliest pending timer
    pub fn next_deadline(&self) -> Option<f64> {
        self.reconnect_at
    }

    /// Close the current connection right away and stop reconnecting
    pub fn end(&mut self) {
        self.closed = true;
        self.reconnect_at = None;
        self.announce_reconnect = false;
        self.pending = None;
        self.connected = false;
        self.status = ConnectionStatus::Disconnected;
        if let Some(handle) = self.current.take() {
            info!(connection_id = handle.id(), "Ending connection");
            handle.close();
        }
    }

    /// Stop using the connection but leave it open for the server to close
    pub fn release_to_server(&mut self) {
        self.closed = true;
        self.reconnect_at = None;
        self.announce_reconnect = false;
        self.connected = false;
        self.status = ConnectionStatus::Disconnected;
        debug!("Connection left for the server to close");
    }

    /// Whether the current connection is usable
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Connection lifecycle
    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    /// Id of the current connection
    pub fn current_connection_id(&self) -> Option<ConnectionId> {
        self.current.as_ref().map(ConnectionHandle::id)
    }

    /// Whether a command waits for a connection
    pub fn has_pending_command(&self) -> bool {
        self.pending.is_some()
    }

    /// Whether the transport was ended or released
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Transport counters
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    /// Transport configuration
    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}
