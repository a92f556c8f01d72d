//! Control-frame messages
//!
//! Every control frame is one JSON object `{"command": <name>, "args": {..}}`
//! carried in a text frame. Media buffers never go through this module.

use camstream_core::RecorderError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Raw control frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Command name
    pub command: String,
    /// Command arguments, `{}` when absent
    #[serde(default = "empty_args")]
    pub args: Value,
}

fn empty_args() -> Value {
    Value::Object(Default::default())
}

/// Container format of the recorded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VideoType {
    /// WebM container
    #[default]
    Webm,
    /// MP4 container
    Mp4,
}

impl VideoType {
    /// Name as it appears on the wire
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoType::Webm => "webm",
            VideoType::Mp4 => "mp4",
        }
    }
}

impl std::fmt::Display for VideoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final recording summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopArgs {
    /// Frames captured
    pub frames_count: u64,
    /// Container the server should produce
    pub video_type: VideoType,
    /// Average frame rate, 0 when no frame was captured
    pub avg_fps: f64,
    /// Audio samples written, only with audio enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub samples_count: Option<u64>,
    /// Audio sample rate, only with audio enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

/// Commands sent by the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "command", content = "args", rename_all = "camelCase")]
pub enum ClientCommand {
    /// Recording finished
    Stop(StopArgs),
    /// Discard the recording and return to the live view
    Back {},
}

impl ClientCommand {
    /// Command name
    pub fn name(&self) -> &'static str {
        match self {
            ClientCommand::Stop(_) => "stop",
            ClientCommand::Back {} => "back",
        }
    }

    /// Serialize to a control frame
    pub fn to_frame(&self) -> Result<String, RecorderError> {
        serde_json::to_string(self).map_err(|e| RecorderError::Protocol {
            message: format!("failed to serialize {}: {}", self.name(), e),
        })
    }

    /// Parse a control frame sent by a client
    pub fn from_frame(text: &str) -> Result<Self, RecorderError> {
        serde_json::from_str(text).map_err(|e| RecorderError::Protocol {
            message: e.to_string(),
        })
    }
}

/// Playback locators sent once the server has encoded the recording
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewArgs {
    /// Recording identifier
    pub key: String,
    /// MP4 locator prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mp4: Option<String>,
    /// WebM locator prefix
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webm: Option<String>,
}

#[derive(Deserialize)]
struct ConfirmFrameArgs {
    frame: u64,
}

#[derive(Deserialize)]
struct ConfirmSampleArgs {
    sample: u64,
}

/// Commands sent by the server
#[derive(Debug, Clone, PartialEq)]
pub enum ServerCommand {
    /// Server is ready for media
    Ready,
    /// Recording encoded, playback available
    Preview(PreviewArgs),
    /// Server failure with an optional explanation
    Error {
        /// Explanation text
        err: Option<String>,
    },
    /// Frame with this index was stored
    ConfirmFrame {
        /// Frame index
        frame: u64,
    },
    /// Sample with this index was stored
    ConfirmSample {
        /// Sample index
        sample: u64,
    },
    /// Audio encoding started
    BeginAudioEncoding,
    /// Video encoding started
    BeginVideoEncoding,
    /// Command this client does not know
    Unknown(String),
}

impl ServerCommand {
    /// Command name as on the wire
    pub fn name(&self) -> &str {
        match self {
            ServerCommand::Ready => "ready",
            ServerCommand::Preview(_) => "preview",
            ServerCommand::Error { .. } => "error",
            ServerCommand::ConfirmFrame { .. } => "confirmFrame",
            ServerCommand::ConfirmSample { .. } => "confirmSample",
            ServerCommand::BeginAudioEncoding => "beginAudioEncoding",
            ServerCommand::BeginVideoEncoding => "beginVideoEncoding",
            ServerCommand::Unknown(name) => name,
        }
    }

    /// Parse one inbound control frame
    pub fn from_frame(text: &str) -> Result<Self, RecorderError> {
        let envelope: Envelope = serde_json::from_str(text).map_err(|e| RecorderError::Protocol {
            message: e.to_string(),
        })?;
        Self::from_envelope(envelope)
    }

    /// Interpret a parsed envelope
    pub fn from_envelope(envelope: Envelope) -> Result<Self, RecorderError> {
        let Envelope { command, args } = envelope;

        let parsed = match command.as_str() {
            "ready" => ServerCommand::Ready,
            "preview" => ServerCommand::Preview(parse_args(&command, args)?),
            "error" => ServerCommand::Error {
                err: match args.get("err") {
                    None | Some(Value::Null) => None,
                    Some(Value::String(text)) if text.is_empty() => None,
                    Some(Value::String(text)) => Some(text.clone()),
                    Some(other) => Some(other.to_string()),
                },
            },
            "confirmFrame" => {
                let args: ConfirmFrameArgs = parse_args(&command, args)?;
                ServerCommand::ConfirmFrame { frame: args.frame }
            }
            "confirmSample" => {
                let args: ConfirmSampleArgs = parse_args(&command, args)?;
                ServerCommand::ConfirmSample {
                    sample: args.sample,
                }
            }
            "beginAudioEncoding" => ServerCommand::BeginAudioEncoding,
            "beginVideoEncoding" => ServerCommand::BeginVideoEncoding,
            _ => ServerCommand::Unknown(command),
        };

        Ok(parsed)
    }

    /// Serialize to a control frame, as a server would send it
    pub fn to_frame(&self) -> String {
        let args = match self {
            ServerCommand::Preview(preview) => {
                serde_json::to_value(preview).unwrap_or_else(|_| empty_args())
            }
            ServerCommand::Error { err: Some(err) } => serde_json::json!({ "err": err }),
            ServerCommand::ConfirmFrame { frame } => serde_json::json!({ "frame": frame }),
            ServerCommand::ConfirmSample { sample } => serde_json::json!({ "sample": sample }),
            _ => empty_args(),
        };

        serde_json::json!({ "command": self.name(), "args": args }).to_string()
    }
}

fn parse_args<T: DeserializeOwned>(command: &str, args: Value) -> Result<T, RecorderError> {
    let args = if args.is_null() { empty_args() } else { args };
    serde_json::from_value(args).map_err(|e| RecorderError::Protocol {
        message: format!("invalid arguments for {}: {}", command, e),
    })
}
