//! Event system for recorder lifecycle events

use crate::progress::ProgressState;
use crate::session::ReplaySources;
use camstream_core::RecorderError;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Events emitted by the recorder
#[derive(Debug, Clone, PartialEq)]
pub enum RecorderEvent {
    /// Device access granted, recording can start
    Ready,
    /// Recording started
    Recording,
    /// Recording paused
    Paused,
    /// Recording resumes
    Resuming,
    /// Recording is being stopped
    Stopping {
        /// Whether a length limit forced the stop
        limit_reached: bool,
    },
    /// Capture resources are being released
    Resetting,
    /// Connection is usable
    Connected,
    /// Connection came back after the server ended it
    Reconnected,
    /// The server ended the connection
    Ended,
    /// Server confirmed frames or samples
    Progress(ProgressState),
    /// Recording encoded, playback available
    Preview {
        /// Recording key
        key: String,
        /// Playback locators
        sources: ReplaySources,
    },
    /// Something went wrong
    Error {
        /// What went wrong
        error: RecorderError,
    },
    /// Server started encoding audio
    BeginAudioEncoding,
    /// Server started encoding video
    BeginVideoEncoding,
}

impl RecorderEvent {
    /// Get the event type as a string
    pub fn event_type(&self) -> &'static str {
        match self {
            RecorderEvent::Ready => "ready",
            RecorderEvent::Recording => "recording",
            RecorderEvent::Paused => "paused",
            RecorderEvent::Resuming => "resuming",
            RecorderEvent::Stopping { .. } => "stopping",
            RecorderEvent::Resetting => "resetting",
            RecorderEvent::Connected => "connected",
            RecorderEvent::Reconnected => "reconnected",
            RecorderEvent::Ended => "ended",
            RecorderEvent::Progress(_) => "progress",
            RecorderEvent::Preview { .. } => "preview",
            RecorderEvent::Error { .. } => "error",
            RecorderEvent::BeginAudioEncoding => "beginAudioEncoding",
            RecorderEvent::BeginVideoEncoding => "beginVideoEncoding",
        }
    }

    /// Check if this is a connection-related event
    pub fn is_connection_event(&self) -> bool {
        matches!(
            self,
            RecorderEvent::Connected | RecorderEvent::Reconnected | RecorderEvent::Ended
        )
    }

    /// Check if this comes from the server's encoding pipeline
    pub fn is_server_event(&self) -> bool {
        matches!(
            self,
            RecorderEvent::Progress(_)
                | RecorderEvent::Preview { .. }
                | RecorderEvent::BeginAudioEncoding
                | RecorderEvent::BeginVideoEncoding
        )
    }

    /// Check if this is an error event
    pub fn is_error_event(&self) -> bool {
        matches!(self, RecorderEvent::Error { .. })
    }
}

#[derive(Debug)]
struct Listener {
    sender: mpsc::UnboundedSender<RecorderEvent>,
    errors: bool,
}

/// Fan-out of recorder events to registered listeners
///
/// Listeners either take every event or only non-error events. Whether a
/// live error listener exists decides how device denials are handled.
#[derive(Debug, Default)]
pub struct EventBus {
    listeners: Vec<Listener>,
}

impl EventBus {
    /// Create a bus without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen to every event, errors included
    pub fn subscribe(&mut self) -> EventStream {
        self.add(true)
    }

    /// Listen to every event except errors
    pub fn subscribe_lifecycle(&mut self) -> EventStream {
        self.add(false)
    }

    fn add(&mut self, errors: bool) -> EventStream {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.listeners.push(Listener { sender, errors });
        debug!(errors, listeners = self.listeners.len(), "Listener attached");
        EventStream::new(receiver)
    }

    /// Whether a live listener takes errors
    pub fn has_error_listener(&mut self) -> bool {
        self.prune();
        self.listeners.iter().any(|l| l.errors)
    }

    /// Number of live listeners
    pub fn listener_count(&mut self) -> usize {
        self.prune();
        self.listeners.len()
    }

    /// Deliver `event` to every interested listener
    pub fn emit(&mut self, event: RecorderEvent) {
        trace!(event = event.event_type(), "Emitting");
        let is_error = event.is_error_event();
        self.listeners.retain(|listener| {
            if is_error && !listener.errors {
                return !listener.sender.is_closed();
            }
            listener.sender.send(event.clone()).is_ok()
        });
    }

    /// Detach every listener
    pub fn clear(&mut self) {
        self.listeners.clear();
    }

    fn prune(&mut self) {
        self.listeners.retain(|l| !l.sender.is_closed());
    }
}

/// Stream of recorder events for async iteration
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<RecorderEvent>,
}

impl EventStream {
    /// Create a new event stream with a receiver
    pub fn new(receiver: mpsc::UnboundedReceiver<RecorderEvent>) -> Self {
        Self { receiver }
    }

    /// Get the next event from the stream
    pub async fn next(&mut self) -> Option<RecorderEvent> {
        self.receiver.recv().await
    }

    /// Try to get the next event without blocking
    pub fn try_next(&mut self) -> Result<Option<RecorderEvent>, mpsc::error::TryRecvError> {
        match self.receiver.try_recv() {
            Ok(event) => Ok(Some(event)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => {
                Err(mpsc::error::TryRecvError::Disconnected)
            }
        }
    }

    /// Take every event already delivered
    pub fn drain(&mut self) -> Vec<RecorderEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }

    /// Close the event stream
    pub fn close(&mut self) {
        self.receiver.close();
    }

    /// Check if the event stream is closed
    pub fn is_closed(&self) -> bool {
        self.receiver.is_closed()
    }
}
