//! Synthetic capture collaborators
//!
//! A test-pattern [`MediaSource`], a raw RGBA [`FrameEncoder`] and a fixed
//! [`CapabilityChecker`]. They stand in for a real device in tests and demos.
//! [`SyntheticSource`] is cheaply clonable; clones share state, so a test can
//! keep one to steer the source after handing another to the recorder.

use crate::error::{MediaError, MediaResult};
use crate::source::{
    AcquireRequest, AudioSample, CapabilityChecker, CaptureSurface, FrameEncoder, MediaEvent,
    MediaEventSender, MediaSource,
};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

#[derive(Debug)]
struct SyntheticState {
    width: u32,
    height: u32,
    sample_rate: u32,
    audio: bool,
    denials_remaining: u32,
    never_respond: bool,
    start_failure: Option<String>,
    events: Option<MediaEventSender>,
    ready: bool,
    paused: bool,
    recording_audio: bool,
    start_attempts: u32,
    stop_calls: u32,
    frames_rendered: u64,
}

/// Test-pattern capture device
#[derive(Debug, Clone)]
pub struct SyntheticSource {
    state: Arc<Mutex<SyntheticState>>,
}

impl SyntheticSource {
    /// Create a source producing `width` x `height` frames
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            state: Arc::new(Mutex::new(SyntheticState {
                width,
                height,
                sample_rate: 0,
                audio: false,
                denials_remaining: 0,
                never_respond: false,
                start_failure: None,
                events: None,
                ready: false,
                paused: false,
                recording_audio: false,
                start_attempts: 0,
                stop_calls: 0,
                frames_rendered: 0,
            })),
        }
    }

    /// Deny the next `count` access requests
    pub fn deny_next(&self, count: u32) {
        self.state.lock().denials_remaining = count;
    }

    /// Never answer access requests
    pub fn never_respond(&self, enabled: bool) {
        self.state.lock().never_respond = enabled;
    }

    /// Fail `start` synchronously with `reason`
    pub fn fail_start(&self, reason: Option<String>) {
        self.state.lock().start_failure = reason;
    }

    /// Grant a request that is still waiting (see [`SyntheticSource::never_respond`])
    pub fn grant(&self) -> bool {
        let mut state = self.state.lock();
        state.never_respond = false;
        state.ready = true;
        match &state.events {
            Some(events) => events.send(MediaEvent::Ready).is_ok(),
            None => false,
        }
    }

    /// Report a failure after becoming ready
    pub fn fail(&self, message: &str) -> bool {
        let state = self.state.lock();
        match &state.events {
            Some(events) => events
                .send(MediaEvent::Error(MediaError::Video {
                    message: message.to_string(),
                }))
                .is_ok(),
            None => false,
        }
    }

    /// Push one audio buffer, ignored unless audio is being recorded
    pub fn push_audio(&self, samples: &[f32]) -> bool {
        let state = self.state.lock();
        if !state.ready || !state.recording_audio || state.paused {
            return false;
        }
        match &state.events {
            Some(events) => events
                .send(MediaEvent::AudioSample(AudioSample::from_pcm_f32(samples)))
                .is_ok(),
            None => false,
        }
    }

    /// Push silent buffers of `frames` PCM frames every `period`
    pub fn spawn_audio_feed(&self, period: Duration, frames: usize) -> JoinHandle<()> {
        let source = self.clone();
        tokio::spawn(async move {
            let silence = vec![0.0f32; frames];
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                if source.is_closed() {
                    break;
                }
                source.push_audio(&silence);
            }
        })
    }

    fn is_closed(&self) -> bool {
        let state = self.state.lock();
        state.events.as_ref().map_or(false, |e| e.is_closed())
    }

    /// Number of `start` calls
    pub fn start_attempts(&self) -> u32 {
        self.state.lock().start_attempts
    }

    /// Number of `stop` calls
    pub fn stop_calls(&self) -> u32 {
        self.state.lock().stop_calls
    }

    /// Frames rendered so far
    pub fn frames_rendered(&self) -> u64 {
        self.state.lock().frames_rendered
    }

    /// Whether audio samples are being pushed
    pub fn is_recording_audio(&self) -> bool {
        self.state.lock().recording_audio
    }
}

impl MediaSource for SyntheticSource {
    fn start(&mut self, request: AcquireRequest, events: MediaEventSender) -> MediaResult<()> {
        let mut state = self.state.lock();
        state.start_attempts += 1;
        state.audio = request.audio;
        state.width = request.width;
        state.height = request.height;
        state.sample_rate = request.sample_rate;

        if let Some(reason) = &state.start_failure {
            return Err(MediaError::ResourceNotAvailable {
                resource: reason.clone(),
            });
        }

        state.events = Some(events.clone());

        if state.never_respond {
            debug!("Synthetic source holding the access request");
            return Ok(());
        }

        if state.denials_remaining > 0 {
            state.denials_remaining -= 1;
            let _ = events.send(MediaEvent::Denied(MediaError::PermissionDenied {
                operation: "camera".to_string(),
            }));
            return Ok(());
        }

        state.ready = true;
        let _ = events.send(MediaEvent::Ready);
        Ok(())
    }

    fn record_audio(&mut self) -> MediaResult<()> {
        let mut state = self.state.lock();
        if !state.ready {
            return Err(MediaError::CaptureNotActive);
        }
        state.recording_audio = state.audio;
        Ok(())
    }

    fn pause(&mut self) {
        self.state.lock().paused = true;
    }

    fn resume(&mut self) {
        self.state.lock().paused = false;
    }

    fn stop(&mut self) {
        let mut state = self.state.lock();
        state.stop_calls += 1;
        state.ready = false;
        state.paused = false;
        state.recording_audio = false;
    }

    fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    fn is_paused(&self) -> bool {
        self.state.lock().paused
    }

    fn audio_sample_rate(&self) -> Option<u32> {
        let state = self.state.lock();
        state.audio.then_some(state.sample_rate)
    }

    fn create_capture_surface(&self) -> CaptureSurface {
        let state = self.state.lock();
        CaptureSurface::new(state.width, state.height)
    }

    fn render_frame(&mut self, surface: &mut CaptureSurface) -> MediaResult<()> {
        let mut state = self.state.lock();
        if !state.ready {
            return Err(MediaError::CaptureNotActive);
        }

        // Diagonal gradient scrolling by one pixel per frame
        let shift = state.frames_rendered as u32;
        let width = surface.width() as usize;
        for (i, pixel) in surface
            .pixels_mut()
            .chunks_exact_mut(CaptureSurface::BYTES_PER_PIXEL)
            .enumerate()
        {
            let x = (i % width.max(1)) as u32;
            let y = (i / width.max(1)) as u32;
            pixel[0] = (x.wrapping_add(shift) & 0xff) as u8;
            pixel[1] = (y.wrapping_add(shift) & 0xff) as u8;
            pixel[2] = ((x ^ y) & 0xff) as u8;
            pixel[3] = 0xff;
        }

        state.frames_rendered += 1;
        trace!(frame = state.frames_rendered, "Synthetic frame rendered");
        Ok(())
    }
}

/// Encoder emitting the surface pixels unchanged
#[derive(Debug, Clone, Default)]
pub struct RawFrameEncoder {
    frames_encoded: u64,
}

impl RawFrameEncoder {
    /// Create an encoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames encoded so far
    pub fn frames_encoded(&self) -> u64 {
        self.frames_encoded
    }
}

impl FrameEncoder for RawFrameEncoder {
    fn encode(&mut self, surface: &CaptureSurface) -> MediaResult<Bytes> {
        let expected =
            surface.width() as usize * surface.height() as usize * CaptureSurface::BYTES_PER_PIXEL;
        let actual = surface.pixels().len();
        if expected != actual || actual == 0 {
            return Err(MediaError::InvalidFrameData { expected, actual });
        }

        self.frames_encoded += 1;
        Ok(Bytes::copy_from_slice(surface.pixels()))
    }
}

/// Capability checker with fixed answers
#[derive(Debug, Clone, Default)]
pub struct StaticCapabilities {
    recording: Option<String>,
    buffers: Option<String>,
}

impl StaticCapabilities {
    /// Everything supported
    pub fn supported() -> Self {
        Self::default()
    }

    /// Device capture unsupported
    pub fn without_recording(reason: &str) -> Self {
        Self {
            recording: Some(reason.to_string()),
            buffers: None,
        }
    }

    /// Binary buffers unsupported
    pub fn without_buffers(reason: &str) -> Self {
        Self {
            recording: None,
            buffers: Some(reason.to_string()),
        }
    }
}

impl CapabilityChecker for StaticCapabilities {
    fn check_recording_capabilities(&self) -> MediaResult<()> {
        match &self.recording {
            Some(reason) => Err(MediaError::UnsupportedPlatform {
                platform: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    fn check_buffer_types(&self) -> MediaResult<()> {
        match &self.buffers {
            Some(reason) => Err(MediaError::UnsupportedFormat {
                format: reason.clone(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn request() -> AcquireRequest {
        AcquireRequest {
            audio: true,
            width: 8,
            height: 4,
            sample_rate: 48_000,
        }
    }

    #[test]
    fn test_start_grants_access() {
        let mut source = SyntheticSource::new(8, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();

        source.start(request(), tx).unwrap();

        assert!(matches!(rx.try_recv(), Ok(MediaEvent::Ready)));
        assert!(source.is_ready());
        assert_eq!(
            source.audio_sample_rate(),
            Some(48_000)
        );
    }

    #[test]
    fn test_denials_then_grant() {
        let mut source = SyntheticSource::new(8, 4);
        source.deny_next(1);
        let (tx, mut rx) = mpsc::unbounded_channel();

        source.start(request(), tx.clone()).unwrap();
        assert!(matches!(rx.try_recv(), Ok(MediaEvent::Denied(_))));
        assert!(!source.is_ready());

        source.start(request(), tx).unwrap();
        assert!(matches!(rx.try_recv(), Ok(MediaEvent::Ready)));
        assert_eq!(source.start_attempts(), 2);
    }

    #[test]
    fn test_audio_only_while_recording() {
        let mut source = SyntheticSource::new(8, 4);
        let (tx, mut rx) = mpsc::unbounded_channel();
        source.start(request(), tx).unwrap();
        let _ = rx.try_recv();

        assert!(!source.push_audio(&[0.0; 4]));

        source.record_audio().unwrap();
        assert!(source.push_audio(&[0.0; 4]));

        source.pause();
        assert!(!source.push_audio(&[0.0; 4]));

        match rx.try_recv() {
            Ok(MediaEvent::AudioSample(sample)) => assert_eq!(sample.frames, 4),
            other => panic!("expected audio sample, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_render_and_encode() {
        let mut source = SyntheticSource::new(8, 4);
        let (tx, _rx) = mpsc::unbounded_channel();
        source.start(request(), tx).unwrap();

        let mut surface = source.create_capture_surface();
        source.render_frame(&mut surface).unwrap();

        let mut encoder = RawFrameEncoder::new();
        let buffer = encoder.encode(&surface).unwrap();
        assert_eq!(buffer.len(), 8 * 4 * 4);
        assert_eq!(buffer[3], 0xff);
        assert_eq!(encoder.frames_encoded(), 1);
    }

    #[test]
    fn test_render_requires_access() {
        let mut source = SyntheticSource::new(8, 4);
        let mut surface = source.create_capture_surface();
        assert!(matches!(
            source.render_frame(&mut surface),
            Err(MediaError::CaptureNotActive)
        ));
    }

    #[test]
    fn test_static_capabilities() {
        assert!(StaticCapabilities::supported()
            .check_recording_capabilities()
            .is_ok());
        assert!(StaticCapabilities::without_recording("no camera api")
            .check_recording_capabilities()
            .is_err());
        assert!(StaticCapabilities::without_buffers("no typed arrays")
            .check_buffer_types()
            .is_err());
    }
}
