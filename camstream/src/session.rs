//! Recording session state

use camstream_media::CaptureStats;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Recorder lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecorderState {
    /// Built, waiting for the server to ask for media
    Idle,
    /// Device access requested
    AwaitingMedia,
    /// Device ready, not recording
    Ready,
    /// Frames are captured and streamed
    Recording,
    /// Capture paused
    Paused,
    /// Summary sent, waiting for the preview
    Stopping,
    /// Playback locators shown instead of the live view
    Previewing,
    /// Torn down, absorbing
    Unloaded,
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RecorderState::Idle => "idle",
            RecorderState::AwaitingMedia => "awaitingMedia",
            RecorderState::Ready => "ready",
            RecorderState::Recording => "recording",
            RecorderState::Paused => "paused",
            RecorderState::Stopping => "stopping",
            RecorderState::Previewing => "previewing",
            RecorderState::Unloaded => "unloaded",
        };
        f.write_str(name)
    }
}

/// Playback locators of a finished recording
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplaySources {
    /// MP4 locator
    pub mp4: Option<String>,
    /// WebM locator
    pub webm: Option<String>,
}

impl ReplaySources {
    /// Whether no locator is set
    pub fn is_empty(&self) -> bool {
        self.mp4.is_none() && self.webm.is_none()
    }

    /// Drop both locators
    pub fn clear(&mut self) {
        self.mp4 = None;
        self.webm = None;
    }
}

/// One recording session, owned by the recorder
#[derive(Debug, Clone)]
pub struct Session {
    id: Uuid,
    created_at: DateTime<Utc>,
    pub(crate) state: RecorderState,
    pub(crate) key: Option<String>,
    pub(crate) avg_fps: Option<f64>,
    pub(crate) stats: CaptureStats,
    pub(crate) stop_time: Option<f64>,
    pub(crate) submitting: bool,
    pub(crate) notifying: bool,
}

impl Session {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            state: RecorderState::Idle,
            key: None,
            avg_fps: None,
            stats: CaptureStats::default(),
            stop_time: None,
            submitting: false,
            notifying: false,
        }
    }

    /// Session identifier, local to this client
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// When the recorder was constructed
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Lifecycle state
    pub fn state(&self) -> RecorderState {
        self.state
    }

    /// Key assigned by the server at preview
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Average frame rate computed at stop
    pub fn avg_fps(&self) -> Option<f64> {
        self.avg_fps
    }

    /// Capture accumulators
    pub fn stats(&self) -> &CaptureStats {
        &self.stats
    }

    /// Clock time of the last stop
    pub fn stop_time(&self) -> Option<f64> {
        self.stop_time
    }

    /// Whether the surrounding form is submitting
    pub fn is_submitting(&self) -> bool {
        self.submitting
    }

    /// Whether a blocking overlay is shown
    pub fn is_notifying(&self) -> bool {
        self.notifying
    }

    /// Keep the first key, returns false if one was already set
    pub(crate) fn assign_key(&mut self, key: String) -> bool {
        if self.key.is_some() {
            return false;
        }
        self.key = Some(key);
        true
    }

    pub(crate) fn clear_results(&mut self) {
        self.key = None;
        self.avg_fps = None;
    }

    pub(crate) fn begin_recording(&mut self) {
        self.stats.reset();
        self.state = RecorderState::Recording;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_session() {
        let session = Session::new();
        assert_eq!(session.state(), RecorderState::Idle);
        assert!(session.key().is_none());
        assert!(session.avg_fps().is_none());
        assert_eq!(session.stats().frames_count, 0);
        assert_ne!(session.id(), Session::new().id());
    }

    #[test]
    fn test_key_is_set_once() {
        let mut session = Session::new();
        assert!(session.assign_key("first".to_string()));
        assert!(!session.assign_key("second".to_string()));
        assert_eq!(session.key(), Some("first"));

        session.clear_results();
        assert!(session.key().is_none());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(RecorderState::AwaitingMedia.to_string(), "awaitingMedia");
        assert_eq!(
            serde_json::to_string(&RecorderState::Previewing).unwrap(),
            "\"previewing\""
        );
    }
}
