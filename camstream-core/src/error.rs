//! Error types for the recording agent

use thiserror::Error;

/// Main error type for recorder operations
///
/// Payloads are plain strings so the error can be cloned into every
/// registered event listener.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RecorderError {
    /// Device or buffer capability is missing
    #[error("Recording not supported: {reason}")]
    Capability {
        /// Reason the environment cannot record
        reason: String,
    },

    /// User denied access or no capture device exists
    #[error("Device access failed: {reason}")]
    DeviceAccess {
        /// Reason reported by the media source
        reason: String,
        /// Whether an error listener was attached when this happened
        handled: bool,
    },

    /// Media source never became ready within the acquisition timeout
    #[error("No access to the capture device after {timeout_ms} ms")]
    NoDeviceAccess {
        /// Timeout that elapsed
        timeout_ms: u64,
    },

    /// The underlying stream was destroyed
    #[error("Unable to connect: {explanation}")]
    UnableToConnect {
        /// Human readable explanation
        explanation: String,
    },

    /// Transient transport failure
    #[error("Transport error: {reason}")]
    Transport {
        /// Reason for transport error
        reason: String,
    },

    /// Inbound control payload could not be parsed
    #[error("Protocol error: {message}")]
    Protocol {
        /// Parser message
        message: String,
    },

    /// Server sent a command this client does not know
    #[error("Unknown server command: {command}")]
    UnknownCommand {
        /// Command name as received
        command: String,
    },

    /// Server reported an error
    #[error("Server error: {explanation}")]
    Server {
        /// Explanation text sent by the server
        explanation: String,
    },

    /// A command is already waiting for the reconnect
    #[error("Command {command} rejected: {pending} is still waiting for a connection")]
    PendingCommandRejected {
        /// Command that was rejected
        command: String,
        /// Command occupying the pending slot
        pending: String,
    },

    /// Invalid configuration
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration {
        /// Error message
        message: String,
    },

    /// Operation attempted after unload
    #[error("Recorder has been unloaded")]
    Unloaded,

    /// Media processing failure
    #[error("Media error: {reason}")]
    Media {
        /// Reason for media error
        reason: String,
    },

    /// The driver task is gone
    #[error("Recorder driver stopped")]
    DriverStopped,
}

impl RecorderError {
    /// Get error code for programmatic handling
    pub fn error_code(&self) -> &'static str {
        match self {
            RecorderError::Capability { .. } => "CAPABILITY_UNSUPPORTED",
            RecorderError::DeviceAccess { .. } => "DEVICE_ACCESS_FAILED",
            RecorderError::NoDeviceAccess { .. } => "NO_DEVICE_ACCESS",
            RecorderError::UnableToConnect { .. } => "UNABLE_TO_CONNECT",
            RecorderError::Transport { .. } => "TRANSPORT_ERROR",
            RecorderError::Protocol { .. } => "PROTOCOL_ERROR",
            RecorderError::UnknownCommand { .. } => "UNKNOWN_COMMAND",
            RecorderError::Server { .. } => "SERVER_ERROR",
            RecorderError::PendingCommandRejected { .. } => "PENDING_COMMAND_REJECTED",
            RecorderError::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            RecorderError::Unloaded => "UNLOADED",
            RecorderError::Media { .. } => "MEDIA_ERROR",
            RecorderError::DriverStopped => "DRIVER_STOPPED",
        }
    }

    /// Whether the error ends the session
    pub fn is_fatal(&self) -> bool {
        match self {
            RecorderError::UnableToConnect { .. } => true,
            RecorderError::DeviceAccess { handled, .. } => !handled,
            _ => false,
        }
    }
}

/// Result type alias for recorder operations
pub type RecorderResult<T> = Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = RecorderError::Server {
            explanation: "disk full".to_string(),
        };
        assert_eq!(error.to_string(), "Server error: disk full");

        let error = RecorderError::UnknownCommand {
            command: "dance".to_string(),
        };
        assert_eq!(error.to_string(), "Unknown server command: dance");
    }

    #[test]
    fn test_fatal_classification() {
        assert!(RecorderError::UnableToConnect {
            explanation: "refused".to_string()
        }
        .is_fatal());
        assert!(RecorderError::DeviceAccess {
            reason: "denied".to_string(),
            handled: false
        }
        .is_fatal());
        assert!(!RecorderError::DeviceAccess {
            reason: "denied".to_string(),
            handled: true
        }
        .is_fatal());
        assert!(!RecorderError::Transport {
            reason: "reset".to_string()
        }
        .is_fatal());
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(RecorderError::Unloaded.error_code(), "UNLOADED");
        assert_eq!(
            RecorderError::NoDeviceAccess { timeout_ms: 20_000 }.error_code(),
            "NO_DEVICE_ACCESS"
        );
    }
}
