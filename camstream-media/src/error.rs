//! Media error types
//!
//! Errors raised by capture devices, frame encoders and the capture loop.

use camstream_core::RecorderError;
use thiserror::Error;

/// Failure of a media collaborator
#[derive(Error, Debug)]
pub enum MediaError {
    /// Capture settings cannot be used
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// What is wrong
        message: String,
    },

    /// The user or the platform refused device access
    #[error("Permission denied: {operation}")]
    PermissionDenied {
        /// Device that was refused
        operation: String,
    },

    /// The environment has no capture API
    #[error("Unsupported platform: {platform}")]
    UnsupportedPlatform {
        /// What is missing
        platform: String,
    },

    /// The environment cannot hold binary media buffers
    #[error("Unsupported format: {format}")]
    UnsupportedFormat {
        /// Missing buffer type
        format: String,
    },

    /// A surface did not match its declared dimensions
    #[error("Invalid frame data: expected {expected} bytes, got {actual}")]
    InvalidFrameData {
        /// Bytes the dimensions call for
        expected: usize,
        /// Bytes present
        actual: usize,
    },

    /// The device is not acquired
    #[error("Capture not active")]
    CaptureNotActive,

    /// The device exists but cannot be opened right now
    #[error("Resource not available: {resource}")]
    ResourceNotAvailable {
        /// Device or resource name
        resource: String,
    },

    /// The video device failed after acquisition
    #[error("Video error: {message}")]
    Video {
        /// Device message
        message: String,
    },
}

/// Result type alias for media operations
pub type MediaResult<T> = Result<T, MediaError>;

impl MediaError {
    /// Classify for the recorder's error taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            MediaError::InvalidConfiguration { .. } => ErrorCategory::Configuration,
            MediaError::PermissionDenied { .. } => ErrorCategory::Access,
            MediaError::UnsupportedPlatform { .. } | MediaError::UnsupportedFormat { .. } => {
                ErrorCategory::Capability
            }
            MediaError::InvalidFrameData { .. } => ErrorCategory::Data,
            MediaError::CaptureNotActive => ErrorCategory::State,
            MediaError::ResourceNotAvailable { .. } => ErrorCategory::Device,
            MediaError::Video { .. } => ErrorCategory::Device,
        }
    }
}

/// Error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad capture settings
    Configuration,
    /// Device access was refused
    Access,
    /// The environment cannot record or buffer media
    Capability,
    /// Frame validation
    Data,
    /// Operation invalid in the current device state
    State,
    /// Device failure
    Device,
}

impl From<MediaError> for RecorderError {
    fn from(error: MediaError) -> Self {
        match error.category() {
            ErrorCategory::Access => RecorderError::DeviceAccess {
                reason: error.to_string(),
                handled: true,
            },
            ErrorCategory::Capability => RecorderError::Capability {
                reason: error.to_string(),
            },
            ErrorCategory::Configuration => RecorderError::InvalidConfiguration {
                message: error.to_string(),
            },
            _ => RecorderError::Media {
                reason: error.to_string(),
            },
        }
    }
}
