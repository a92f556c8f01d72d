//! # camstream media
//!
//! Capture pacing and media collaborators for camstream.
//! This crate holds the frame sampling loop with its drift correction and
//! timing statistics, the seams a capture device, frame encoder and
//! capability checker plug into, and a synthetic test-pattern source.

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod capture_loop;
pub mod error;
pub mod source;
pub mod synthetic;

// Re-export main types
pub use capture_loop::{CaptureLoop, CaptureStats, FrameSink, FrameTiming, TickOutcome};
pub use error::{ErrorCategory, MediaError, MediaResult};
pub use source::{
    AcquireRequest, AudioSample, CapabilityChecker, CaptureSurface, FrameEncoder, MediaEvent,
    MediaEventReceiver, MediaEventSender, MediaSource,
};
pub use synthetic::{RawFrameEncoder, StaticCapabilities, SyntheticSource};
