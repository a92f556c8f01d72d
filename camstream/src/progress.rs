//! Server-confirmed upload progress

use serde::{Deserialize, Serialize};
use std::fmt;

/// Percentage with two decimals of display precision
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Percentage(f64);

impl Percentage {
    /// `part` of `total`, 0% when `total` is zero
    pub fn of(part: u64, total: u64) -> Self {
        if total == 0 {
            return Percentage(0.0);
        }
        Percentage(part as f64 / total as f64 * 100.0)
    }

    /// Raw value, 100.0 meaning complete
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl fmt::Display for Percentage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}%", self.0)
    }
}

/// Frame and sample progress, `None` until the first confirmation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ProgressState {
    /// Share of captured frames the server confirmed
    pub frame: Option<Percentage>,
    /// Share of captured samples the server confirmed
    pub sample: Option<Percentage>,
}

/// Combines frame and sample confirmations
#[derive(Debug, Clone, Default)]
pub struct ProgressAggregator {
    state: ProgressState,
}

impl ProgressAggregator {
    /// Create an empty aggregator
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame confirmation against `frames_count` captured frames
    pub fn confirm_frame(&mut self, frame: u64, frames_count: u64) -> ProgressState {
        self.state.frame = Some(Percentage::of(frame, frames_count));
        self.state
    }

    /// Record a sample confirmation against `samples_count` captured samples
    pub fn confirm_sample(&mut self, sample: u64, samples_count: u64) -> ProgressState {
        self.state.sample = Some(Percentage::of(sample, samples_count));
        self.state
    }

    /// Current progress
    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Whether any confirmation was recorded
    pub fn is_empty(&self) -> bool {
        self.state == ProgressState::default()
    }

    /// Forget all confirmations
    pub fn reset(&mut self) {
        self.state = ProgressState::default();
    }
}
