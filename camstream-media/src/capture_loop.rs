//! Fixed-rate frame sampling with drift correction
//!
//! The host scheduler ticks much faster than the target frame rate, so most
//! ticks do nothing. A frame is taken once the time since the last frame
//! exceeds 85% of the wanted interval. The last timestamp is then moved to
//! `now - (interval % threshold)` instead of `now`, carrying the remainder
//! into the next frame so the long-run rate does not drift.
//!
//! The carried remainder only decides when the next frame is due. The
//! interval accumulated for the average frame rate is the time elapsed since
//! the previous captured frame, so the reported rate is the rate achieved.

use crate::error::{MediaError, MediaResult};
use crate::source::{CaptureSurface, FrameEncoder, MediaSource};
use bytes::Bytes;
use camstream_core::Transport;
use tracing::trace;

/// Receives encoded frames
pub trait FrameSink {
    /// Write one frame, returns false if it was dropped
    fn write_frame(&mut self, frame: Bytes) -> bool;
}

impl FrameSink for Transport {
    fn write_frame(&mut self, frame: Bytes) -> bool {
        self.write_binary(frame)
    }
}

impl FrameSink for Vec<Bytes> {
    fn write_frame(&mut self, frame: Bytes) -> bool {
        self.push(frame);
        true
    }
}

/// Pacing state for one recording
#[derive(Debug, Clone, PartialEq)]
pub struct FrameTiming {
    wanted_interval: f64,
    interval_threshold: f64,
    last_timestamp: Option<f64>,
    last_frame_at: Option<f64>,
}

impl FrameTiming {
    /// Share of the wanted interval a tick must exceed to take a frame
    pub const THRESHOLD_RATIO: f64 = 0.85;

    /// Timing for `fps` frames per second
    pub fn new(fps: f64) -> MediaResult<Self> {
        if !fps.is_finite() || fps <= 0.0 {
            return Err(MediaError::InvalidConfiguration {
                message: "FPS must be defined".to_string(),
            });
        }

        let wanted_interval = 1000.0 / fps;
        Ok(Self {
            wanted_interval,
            interval_threshold: wanted_interval * Self::THRESHOLD_RATIO,
            last_timestamp: None,
            last_frame_at: None,
        })
    }

    /// Wanted milliseconds between frames
    pub fn wanted_interval(&self) -> f64 {
        self.wanted_interval
    }

    /// Minimum milliseconds (exclusive) between frames
    pub fn interval_threshold(&self) -> f64 {
        self.interval_threshold
    }

    /// Timestamp the next interval is measured from
    pub fn last_timestamp(&self) -> Option<f64> {
        self.last_timestamp
    }

    /// Measure the next interval from `now`
    pub fn restart(&mut self, now: f64) {
        self.last_timestamp = Some(now);
        self.last_frame_at = Some(now);
    }

    /// Forget the last timestamp
    pub fn clear(&mut self) {
        self.last_timestamp = None;
        self.last_frame_at = None;
    }

    /// Measured interval when a frame is due at `now`, `None` when the tick
    /// must be skipped
    pub fn due(&self, now: f64) -> Option<f64> {
        let interval = now - self.last_timestamp?;
        (interval > self.interval_threshold).then_some(interval)
    }

    /// Record a frame taken at `now` for a due `interval`
    ///
    /// Applies the drift correction and returns the time elapsed since the
    /// previous frame (or since the loop started).
    pub fn commit(&mut self, now: f64, interval: f64) -> f64 {
        let elapsed = now - self.last_frame_at.unwrap_or(now - interval);
        self.last_timestamp = Some(now - (interval % self.interval_threshold));
        self.last_frame_at = Some(now);
        elapsed
    }
}

/// Accumulators for one recording
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    /// Frames captured
    pub frames_count: u64,
    /// Audio samples written
    pub samples_count: u64,
    /// Encoded frame bytes produced
    pub bytes_sum: u64,
    /// Milliseconds elapsed over the captured frames
    pub interval_sum: f64,
}

impl CaptureStats {
    /// Average frame rate over the recording, 0 when nothing was captured
    pub fn average_fps(&self) -> f64 {
        if self.frames_count == 0 || self.interval_sum <= 0.0 {
            return 0.0;
        }
        1000.0 / (self.interval_sum / self.frames_count as f64)
    }

    /// Zero everything
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What a tick did
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// The loop is not running
    Inactive,
    /// The loop or the source is paused
    Paused,
    /// Too early for a frame
    Skipped {
        /// Milliseconds since the last frame
        interval: f64,
    },
    /// A frame was encoded and handed to the sink
    Captured {
        /// Milliseconds since the last frame
        interval: f64,
        /// Encoded size
        bytes: usize,
        /// Whether the sink accepted it
        delivered: bool,
    },
}

/// The frame sampling loop
#[derive(Debug, Clone)]
pub struct CaptureLoop {
    timing: FrameTiming,
    active: bool,
    paused: bool,
}

impl CaptureLoop {
    /// Create an inactive loop for `fps`
    pub fn new(fps: f64) -> MediaResult<Self> {
        Ok(Self {
            timing: FrameTiming::new(fps)?,
            active: false,
            paused: false,
        })
    }

    /// Start ticking, measuring the first interval from `now`
    pub fn start(&mut self, now: f64) {
        self.active = true;
        self.paused = false;
        self.timing.restart(now);
    }

    /// Stop ticking and forget the timestamp
    pub fn stop(&mut self) {
        self.active = false;
        self.paused = false;
        self.timing.clear();
    }

    /// Skip ticks until resumed
    pub fn pause(&mut self) {
        self.paused = true;
    }

    /// Resume, measuring from `now` so paused time is not counted
    pub fn resume(&mut self, now: f64) {
        self.paused = false;
        self.timing.restart(now);
    }

    /// Whether ticks are scheduled
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Whether the loop itself is paused
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Pacing state
    pub fn timing(&self) -> &FrameTiming {
        &self.timing
    }

    /// Run one scheduler tick
    #[allow(clippy::too_many_arguments)]
    pub fn tick(
        &mut self,
        now: f64,
        source: &mut dyn MediaSource,
        encoder: &mut dyn FrameEncoder,
        surface: &mut CaptureSurface,
        stats: &mut CaptureStats,
        sink: &mut dyn FrameSink,
    ) -> MediaResult<TickOutcome> {
        if !self.active {
            return Ok(TickOutcome::Inactive);
        }
        if self.paused || source.is_paused() {
            return Ok(TickOutcome::Paused);
        }

        let interval = match self.timing.due(now) {
            Some(interval) => interval,
            None => {
                let last = self.timing.last_timestamp().unwrap_or(now);
                return Ok(TickOutcome::Skipped {
                    interval: now - last,
                });
            }
        };

        // A failed frame leaves the timing untouched.
        source.render_frame(surface)?;
        let buffer = encoder.encode(surface)?;
        let bytes = buffer.len();

        stats.interval_sum += self.timing.commit(now, interval);
        stats.frames_count += 1;
        stats.bytes_sum += bytes as u64;

        let delivered = sink.write_frame(buffer);

        trace!(
            frame = stats.frames_count,
            bytes,
            interval,
            threshold = self.timing.interval_threshold(),
            wanted = self.timing.wanted_interval(),
            "Frame captured"
        );

        Ok(TickOutcome::Captured {
            interval,
            bytes,
            delivered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timing_thresholds() {
        let timing = FrameTiming::new(25.0).unwrap();
        assert_eq!(timing.wanted_interval(), 40.0);
        assert!((timing.interval_threshold() - 34.0).abs() < 1e-9);
        assert_eq!(timing.last_timestamp(), None);
    }

    #[test]
    fn test_invalid_fps_rejected() {
        assert!(FrameTiming::new(0.0).is_err());
        assert!(FrameTiming::new(-5.0).is_err());
        assert!(FrameTiming::new(f64::NAN).is_err());
    }

    #[test]
    fn test_due_skips_until_threshold_exceeded() {
        let mut timing = FrameTiming::new(25.0).unwrap();
        timing.restart(0.0);

        assert_eq!(timing.due(16.0), None);
        // Exactly at the threshold is still too early.
        assert_eq!(timing.due(34.0), None);
        assert_eq!(timing.due(48.0), Some(48.0));
        assert_eq!(timing.last_timestamp(), Some(0.0));
    }

    #[test]
    fn test_commit_carries_remainder() {
        let mut timing = FrameTiming::new(25.0).unwrap();
        timing.restart(0.0);

        let interval = timing.due(48.0).unwrap();
        assert_eq!(timing.commit(48.0, interval), 48.0);
        // 48 % 34 = 14, so the next interval is measured from 34.
        assert_eq!(timing.last_timestamp(), Some(34.0));

        // The carried remainder is not counted twice as elapsed time.
        let interval = timing.due(88.0).unwrap();
        assert_eq!(interval, 54.0);
        assert_eq!(timing.commit(88.0, interval), 40.0);
    }

    #[test]
    fn test_wall_clock_ticks_keep_target_rate() {
        let mut timing = FrameTiming::new(30.0).unwrap();
        let wanted = timing.wanted_interval();
        timing.restart(0.0);

        let mut stats = CaptureStats::default();
        for k in 1..=150 {
            let now = k as f64 * wanted;
            let interval = timing.due(now).unwrap();
            stats.interval_sum += timing.commit(now, interval);
            stats.frames_count += 1;
        }

        assert!((stats.interval_sum - 5000.0).abs() < 1e-6);
        assert!((stats.average_fps() - 30.0).abs() < 1e-6);
    }

    #[test]
    fn test_average_fps_guards_empty_recording() {
        let stats = CaptureStats::default();
        assert_eq!(stats.average_fps(), 0.0);
        assert!(!stats.average_fps().is_nan());

        let stats = CaptureStats {
            frames_count: 10,
            interval_sum: 400.0,
            ..CaptureStats::default()
        };
        assert_eq!(stats.average_fps(), 25.0);
    }
}
