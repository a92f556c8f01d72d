//! # camstream core
//!
//! Transport and shared primitives for the camstream recording agent.
//! This crate provides the reconnecting transport that carries both JSON
//! control commands and binary media buffers over one connection, the
//! clock used for frame pacing, and the error taxonomy shared by all crates.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod loopback;
pub mod transport;
pub mod websocket;

// Re-export main types
pub use clock::{Clock, ManualClock, MonotonicClock};
pub use error::{RecorderError, RecorderResult};
pub use loopback::LoopbackConnector;
pub use transport::{
    ConnectRequest, ConnectionHandle, ConnectionId, ConnectionStatus, Connector, Outbound,
    Transport, TransportConfig, TransportEvent, TransportEventKind, TransportEventReceiver,
    TransportEventSender, TransportSignal, TransportStats,
};
pub use websocket::WebSocketConnector;
