//! # camstream protocol
//!
//! JSON command protocol spoken with the recording server.
//! Handles serialization of client commands, parsing of server commands and
//! their sequential dispatch to a [`CommandHandler`].

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod protocol;

// Re-export main types
pub use dispatch::{dispatch, dispatch_command, CommandHandler, NO_EXPLANATION};
pub use protocol::{ClientCommand, Envelope, PreviewArgs, ServerCommand, StopArgs, VideoType};
