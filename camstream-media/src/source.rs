//! Capture collaborator seams
//!
//! The recorder never talks to a device directly. It drives a [`MediaSource`]
//! (frames on demand, audio pushed through [`MediaEvent`]s), turns rendered
//! surfaces into buffers with a [`FrameEncoder`], and asks a
//! [`CapabilityChecker`] whether recording is possible at all.

use crate::error::MediaResult;
use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

/// Sender used by media sources to report asynchronously
pub type MediaEventSender = mpsc::UnboundedSender<MediaEvent>;

/// Receiver consumed by the recorder driver
pub type MediaEventReceiver = mpsc::UnboundedReceiver<MediaEvent>;

/// Events pushed by a media source
#[derive(Debug)]
pub enum MediaEvent {
    /// Device access granted and the source is producing frames
    Ready,
    /// One audio sample buffer
    AudioSample(AudioSample),
    /// Device access was refused or no device exists
    Denied(crate::error::MediaError),
    /// The source failed after becoming ready
    Error(crate::error::MediaError),
}

/// What to ask the device for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AcquireRequest {
    /// Capture audio as well as video
    pub audio: bool,
    /// Width of the live view
    pub width: u32,
    /// Height of the live view
    pub height: u32,
    /// Audio sample rate to capture at, in Hz
    pub sample_rate: u32,
}

/// Audio buffer as produced by the device
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSample {
    /// Encoded sample bytes, written to the transport as-is
    pub data: Bytes,
    /// Number of PCM frames in the buffer
    pub frames: usize,
}

impl AudioSample {
    /// Encode f32 PCM as little-endian bytes
    pub fn from_pcm_f32(samples: &[f32]) -> Self {
        let mut data = BytesMut::with_capacity(samples.len() * 4);
        for sample in samples {
            data.put_f32_le(*sample);
        }
        Self {
            data: data.freeze(),
            frames: samples.len(),
        }
    }

    /// Buffer to write
    pub fn to_buffer(&self) -> Bytes {
        self.data.clone()
    }
}

/// Offscreen RGBA surface frames are rendered into before encoding
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSurface {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl CaptureSurface {
    /// Bytes per RGBA pixel
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Allocate a black surface
    pub fn new(width: u32, height: u32) -> Self {
        let len = width as usize * height as usize * Self::BYTES_PER_PIXEL;
        Self {
            width,
            height,
            pixels: vec![0; len],
        }
    }

    /// Surface width
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Surface height
    pub fn height(&self) -> u32 {
        self.height
    }

    /// RGBA pixels, row major
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Mutable RGBA pixels
    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }
}

/// Local capture device
pub trait MediaSource: Send {
    /// Request device access; the outcome (`Ready` or `Denied`) and later
    /// audio samples are reported through `events`
    fn start(&mut self, request: AcquireRequest, events: MediaEventSender) -> MediaResult<()>;

    /// Begin pushing audio samples
    fn record_audio(&mut self) -> MediaResult<()>;

    /// Pause frame and sample production
    fn pause(&mut self);

    /// Resume after [`MediaSource::pause`]
    fn resume(&mut self);

    /// Release the device
    fn stop(&mut self);

    /// Whether access was granted and frames are available
    fn is_ready(&self) -> bool;

    /// Whether the source is paused
    fn is_paused(&self) -> bool;

    /// Sample rate of pushed audio, if audio is captured
    fn audio_sample_rate(&self) -> Option<u32>;

    /// Allocate a surface matching the video dimensions
    fn create_capture_surface(&self) -> CaptureSurface;

    /// Draw the current raw frame into `surface`
    fn render_frame(&mut self, surface: &mut CaptureSurface) -> MediaResult<()>;
}

/// Converts one rendered frame into a binary buffer
pub trait FrameEncoder: Send {
    /// Encode the surface contents
    fn encode(&mut self, surface: &CaptureSurface) -> MediaResult<Bytes>;
}

/// Checks whether the environment can record
pub trait CapabilityChecker: Send {
    /// Device capture is supported
    fn check_recording_capabilities(&self) -> MediaResult<()>;

    /// Binary buffers can be produced and sent
    fn check_buffer_types(&self) -> MediaResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audio_sample_from_pcm() {
        let sample = AudioSample::from_pcm_f32(&[0.0, 1.0, -1.0]);
        assert_eq!(sample.frames, 3);
        assert_eq!(sample.data.len(), 12);
        assert_eq!(&sample.data[4..8], &1.0f32.to_le_bytes());
        assert_eq!(sample.to_buffer(), sample.data);
    }

    #[test]
    fn test_surface_allocation() {
        let surface = CaptureSurface::new(4, 2);
        assert_eq!(surface.width(), 4);
        assert_eq!(surface.height(), 2);
        assert_eq!(surface.pixels().len(), 32);
        assert!(surface.pixels().iter().all(|p| *p == 0));
    }
}
