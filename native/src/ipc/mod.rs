// Cross-process command channel between the unprivileged UI process and
// the elevated worker: line-oriented text over a local named pipe.

pub mod client;
pub mod handlers;
pub mod protocol;
pub mod server;

pub use handlers::{CpuHandler, MonitorHandler};
pub use protocol::{CommandMessage, HandlerChain, MessageHandler, FAILED_RESPONSE};

#[cfg(windows)]
pub use client::{CoreServiceClient, PipeClient};
#[cfg(windows)]
pub use server::PipeServer;

use thiserror::Error;

/// Default pipe path for the elevated command channel.
pub const PIPE_NAME: &str = r"\\.\pipe\energy-performance";

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Server already started")]
    AlreadyStarted,
    #[error("Timed out connecting to the elevated service")]
    ConnectTimeout,
    #[error("Command rejected by the elevated service")]
    CommandFailed,
    #[error("Malformed response: {0:?}")]
    MalformedResponse(String),
}
