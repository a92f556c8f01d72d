//! Configuration types and defaults

use camstream_core::{RecorderError, RecorderResult, TransportConfig};
use camstream_protocol::VideoType;
use std::time::Duration;

/// Video capture settings
#[derive(Debug, Clone, PartialEq)]
pub struct VideoSettings {
    /// Target frames per second
    pub fps: f64,
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Container the server should produce
    pub video_type: VideoType,
}

impl Default for VideoSettings {
    fn default() -> Self {
        Self {
            fps: 15.0,
            width: 320,
            height: 240,
            video_type: VideoType::Webm,
        }
    }
}

/// Audio capture settings
#[derive(Debug, Clone, PartialEq)]
pub struct AudioSettings {
    /// Capture and stream audio samples
    pub enabled: bool,
    /// Preferred sample rate
    pub sample_rate: u32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            sample_rate: 44_100,
        }
    }
}

/// Timeouts
#[derive(Debug, Clone, PartialEq)]
pub struct Timeouts {
    /// How long to wait for device access, also the retry delay after a denial
    pub user_media: Duration,
    /// WebSocket handshake timeout
    pub connection: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            user_media: Duration::from_secs(20),
            connection: Duration::from_secs(10),
        }
    }
}

/// Recorder configuration
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    /// Recording server socket URL
    pub socket_url: String,
    /// Site identifier sent with the connection
    pub site_name: String,
    /// Query parameter carrying the site identifier
    pub site_name_label: String,
    /// Video settings
    pub video: VideoSettings,
    /// Audio settings
    pub audio: AudioSettings,
    /// Timeouts
    pub timeouts: Timeouts,
    /// Reconnect after the server ends the connection
    pub reconnect: bool,
    /// Delay before reconnecting
    pub reconnect_delay: Duration,
    /// Scheduler tick period of the capture loop
    pub tick_interval: Duration,
    /// Log at `debug` when `RUST_LOG` is unset, see [`crate::init_logging`]
    pub debug_logging: bool,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            socket_url: "ws://localhost:8890".to_string(),
            site_name: "camstream".to_string(),
            site_name_label: "x-camstream-site-name".to_string(),
            video: VideoSettings::default(),
            audio: AudioSettings::default(),
            timeouts: Timeouts::default(),
            reconnect: true,
            reconnect_delay: Duration::from_millis(2000),
            tick_interval: Duration::from_millis(16),
            debug_logging: false,
        }
    }
}

impl RecorderConfig {
    /// Check the settings the recorder depends on
    pub fn validate(&self) -> RecorderResult<()> {
        if !self.video.fps.is_finite() || self.video.fps <= 0.0 {
            return Err(invalid("FPS must be defined"));
        }
        if self.video.width == 0 {
            return Err(invalid("Video width is too small"));
        }
        if self.video.height == 0 {
            return Err(invalid("Video height is too small"));
        }
        if self.socket_url.trim().is_empty() {
            return Err(invalid("Socket URL must be defined"));
        }
        self.transport_config().connection_url()?;
        if self.tick_interval.is_zero() {
            return Err(invalid("Tick interval must be positive"));
        }
        Ok(())
    }

    /// Transport settings derived from this configuration
    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            socket_url: self.socket_url.clone(),
            site_name_label: self.site_name_label.clone(),
            site_name: self.site_name.clone(),
            connect_timeout: self.timeouts.connection,
            reconnect: self.reconnect,
            reconnect_delay: self.reconnect_delay,
        }
    }

    /// Suffix appended to playback locators
    pub fn locator_suffix(&self) -> String {
        format!("{}/{}", self.site_name_label, self.site_name)
    }
}

fn invalid(message: &str) -> RecorderError {
    RecorderError::InvalidConfiguration {
        message: message.to_string(),
    }
}
