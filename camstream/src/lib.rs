//! # camstream
//!
//! Client-side recording agent. camstream captures frames from a local
//! device at a target frame rate, streams them together with audio samples
//! to a recording server over one reconnecting WebSocket, and runs the JSON
//! command protocol that coordinates the recording with that server.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use camstream::{Recorder, RecorderConfig, RecorderEvent, SyntheticSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), camstream::RecorderError> {
//!     let config = RecorderConfig::default();
//!     let source = SyntheticSource::new(config.video.width, config.video.height);
//!
//!     let (recorder, _driver) = Recorder::builder(config).media_source(source).spawn()?;
//!     let mut events = recorder.subscribe().await?;
//!     recorder.build().await?;
//!
//!     while let Some(event) = events.next().await {
//!         match event {
//!             RecorderEvent::Ready => recorder.record().await?,
//!             RecorderEvent::Preview { key, .. } => {
//!                 println!("Recording available as {}", key);
//!                 break;
//!             }
//!             other => println!("Recorder event: {:?}", other),
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

// Re-export core types for easy access
pub use camstream_core::{
    Clock, ConnectionStatus, Connector, LoopbackConnector, ManualClock, MonotonicClock, Outbound,
    RecorderError, RecorderResult, Transport, TransportConfig, TransportEvent, TransportEventKind,
    TransportStats, WebSocketConnector,
};
pub use camstream_media::{
    AcquireRequest, AudioSample, CapabilityChecker, CaptureStats, CaptureSurface, FrameEncoder,
    MediaError, MediaEvent, MediaSource, RawFrameEncoder, StaticCapabilities, SyntheticSource,
    TickOutcome,
};
pub use camstream_protocol::{ClientCommand, PreviewArgs, ServerCommand, StopArgs, VideoType};

// Public API modules
pub mod config;
pub mod driver;
pub mod event;
pub mod logging;
pub mod progress;
pub mod recorder;
pub mod session;

// Re-export main API types
pub use config::{AudioSettings, RecorderConfig, Timeouts, VideoSettings};
pub use driver::{RecorderDriver, RecorderHandle, RecorderSnapshot};
pub use event::{EventBus, EventStream, RecorderEvent};
pub use logging::init_logging;
pub use progress::{Percentage, ProgressAggregator, ProgressState};
pub use recorder::{Recorder, RecorderBuilder, RecorderInputs};
pub use session::{RecorderState, ReplaySources, Session};
