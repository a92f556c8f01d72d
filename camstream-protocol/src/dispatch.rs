//! Sequential dispatch of inbound control frames
//!
//! [`dispatch`] takes `&mut` to the handler, so a handler runs to completion
//! before the next frame can be dispatched.

use crate::protocol::{PreviewArgs, ServerCommand};
use camstream_core::RecorderError;
use tracing::debug;

/// Explanation used when the server sends an error without text
pub const NO_EXPLANATION: &str = "(No explanation given)";

/// Receives parsed server commands
pub trait CommandHandler {
    /// `ready`: the server accepts media, acquire the device
    fn on_ready(&mut self);

    /// `preview`: playback locators for the finished recording
    fn on_preview(&mut self, preview: PreviewArgs);

    /// `error`: the server reported a failure
    fn on_server_error(&mut self, error: RecorderError);

    /// `confirmFrame`: frame `frame` was stored
    fn on_confirm_frame(&mut self, frame: u64);

    /// `confirmSample`: sample `sample` was stored
    fn on_confirm_sample(&mut self, sample: u64);

    /// `beginAudioEncoding`
    fn on_begin_audio_encoding(&mut self) {}

    /// `beginVideoEncoding`
    fn on_begin_video_encoding(&mut self) {}

    /// A command this client does not know
    fn on_unknown_command(&mut self, error: RecorderError);
}

/// Parse one control frame and hand it to `handler`
///
/// A malformed frame is returned as an error and nothing is dispatched.
pub fn dispatch<H>(text: &str, handler: &mut H) -> Result<(), RecorderError>
where
    H: CommandHandler + ?Sized,
{
    let command = ServerCommand::from_frame(text)?;
    debug!(command = command.name(), "Server says");
    dispatch_command(command, handler);
    Ok(())
}

/// Hand an already parsed command to `handler`
pub fn dispatch_command<H>(command: ServerCommand, handler: &mut H)
where
    H: CommandHandler + ?Sized,
{
    match command {
        ServerCommand::Ready => handler.on_ready(),
        ServerCommand::Preview(preview) => handler.on_preview(preview),
        ServerCommand::Error { err } => handler.on_server_error(RecorderError::Server {
            explanation: err.unwrap_or_else(|| NO_EXPLANATION.to_string()),
        }),
        ServerCommand::ConfirmFrame { frame } => handler.on_confirm_frame(frame),
        ServerCommand::ConfirmSample { sample } => handler.on_confirm_sample(sample),
        ServerCommand::BeginAudioEncoding => handler.on_begin_audio_encoding(),
        ServerCommand::BeginVideoEncoding => handler.on_begin_video_encoding(),
        ServerCommand::Unknown(command) => {
            handler.on_unknown_command(RecorderError::UnknownCommand { command })
        }
    }
}
