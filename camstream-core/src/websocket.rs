//! WebSocket connector
//!
//! Each connection runs in its own tokio task: it performs the handshake,
//! reports `Opened`, then pumps the outbound queue and the inbound stream
//! until either side closes. Text frames carry control commands, binary
//! frames carry media buffers.

use crate::transport::{
    ConnectRequest, ConnectionHandle, ConnectionId, Connector, Outbound, TransportEvent,
    TransportEventKind, TransportEventSender,
};
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tracing::{debug, warn};
use tungstenite::Message;

/// Connector opening `ws://` / `wss://` connections with tokio-tungstenite
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a connector
    pub fn new() -> Self {
        Self
    }
}

impl Connector for WebSocketConnector {
    fn open(&self, request: ConnectRequest, events: TransportEventSender) -> ConnectionHandle {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let connection_id = request.connection_id;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(run_connection(request, outbound_rx, events));
            }
            Err(e) => {
                report(
                    &events,
                    connection_id,
                    TransportEventKind::Error {
                        reason: format!("no async runtime available: {}", e),
                        destroyed: true,
                    },
                );
            }
        }

        ConnectionHandle::new(connection_id, outbound_tx)
    }
}

fn report(events: &TransportEventSender, connection_id: ConnectionId, kind: TransportEventKind) {
    let _ = events.send(TransportEvent {
        connection_id,
        kind,
    });
}

/// Whether a tungstenite error leaves the socket unusable
fn is_destroyed(error: &tungstenite::Error) -> bool {
    matches!(
        error,
        tungstenite::Error::Io(_)
            | tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
    )
}

async fn run_connection(
    request: ConnectRequest,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    events: TransportEventSender,
) {
    let id = request.connection_id;

    let ws_stream = match tokio::time::timeout(request.timeout, connect_async(request.url.as_str()))
        .await
    {
        Ok(Ok((ws_stream, _response))) => ws_stream,
        Ok(Err(e)) => {
            warn!(connection_id = id, error = %e, "WebSocket handshake failed");
            report(
                &events,
                id,
                TransportEventKind::Error {
                    reason: format!("WebSocket connection failed: {}", e),
                    destroyed: true,
                },
            );
            return;
        }
        Err(_) => {
            report(
                &events,
                id,
                TransportEventKind::Error {
                    reason: "WebSocket connection timeout".to_string(),
                    destroyed: true,
                },
            );
            return;
        }
    };

    debug!(connection_id = id, "WebSocket connection established");
    report(&events, id, TransportEventKind::Opened);

    let (mut sink, mut stream) = ws_stream.split();

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let message = match payload {
                    Some(Outbound::Text(text)) => Message::Text(text),
                    Some(Outbound::Binary(data)) => Message::Binary(data.to_vec()),
                    Some(Outbound::Close) | None => {
                        debug!(connection_id = id, "Closing WebSocket from client side");
                        let _ = sink.close().await;
                        break;
                    }
                };

                if let Err(e) = sink.send(message).await {
                    let destroyed = is_destroyed(&e);
                    report(&events, id, TransportEventKind::Error {
                        reason: format!("WebSocket send failed: {}", e),
                        destroyed,
                    });
                    if destroyed {
                        break;
                    }
                }
            }
            inbound = stream.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        report(&events, id, TransportEventKind::Text(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        report(&events, id, TransportEventKind::Binary(Bytes::from(data)));
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        report(&events, id, TransportEventKind::Ended);
                        break;
                    }
                    Some(Ok(_)) => {
                        // ping/pong are answered by tungstenite
                    }
                    Some(Err(e)) => {
                        let destroyed = is_destroyed(&e);
                        report(&events, id, TransportEventKind::Error {
                            reason: format!("WebSocket receive failed: {}", e),
                            destroyed,
                        });
                        if destroyed {
                            break;
                        }
                    }
                }
            }
        }
    }
}
