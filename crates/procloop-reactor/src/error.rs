//! Error types for the process reactor

use std::fmt;
use std::io;

use thiserror::Error;

/// Reactor errors
#[derive(Debug, Error)]
pub enum ReactorError {
    /// Invalid argument vector passed to `spawn`
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// The OS refused to launch the child process
    #[error("Failed to spawn process: {0}")]
    Spawn(#[source] io::Error),

    /// The OS refused to queue a write to the child's stdin
    #[error("Write failed: {0}")]
    Write(String),

    /// Reading the child's stdout failed
    #[error("Stream error: {0}")]
    Stream(String),

    /// The child's stdout ended (the child exited or closed it)
    #[error("End of stream")]
    EndOfStream,

    /// Operation not permitted in the current reactor state
    #[error("Invalid state: {0}")]
    State(String),

    /// Invalid reactor configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error outside the stream channel (readiness wait, fd setup)
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Result type for reactor operations
pub type Result<T> = std::result::Result<T, ReactorError>;

/// Sticky asynchronous failure recorded on a reactor.
///
/// Once set it is never cleared; `run` refuses to start while one is
/// present and reports it as the equivalent [`ReactorError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamFault {
    /// The child exited or closed its stdout
    EndOfStream,
    /// Reading stdout failed with the given OS message
    Stream(String),
    /// A write to stdin failed with the given OS message
    Write(String),
}

impl fmt::Display for StreamFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamFault::EndOfStream => f.write_str("end of stream"),
            StreamFault::Stream(msg) => write!(f, "stream error: {msg}"),
            StreamFault::Write(msg) => write!(f, "write error: {msg}"),
        }
    }
}

impl From<&StreamFault> for ReactorError {
    fn from(fault: &StreamFault) -> Self {
        match fault {
            StreamFault::EndOfStream => ReactorError::EndOfStream,
            StreamFault::Stream(msg) => ReactorError::Stream(msg.clone()),
            StreamFault::Write(msg) => ReactorError::Write(msg.clone()),
        }
    }
}

impl ReactorError {
    /// Check if this error came from the sticky stream channel
    pub fn is_stream_fault(&self) -> bool {
        matches!(
            self,
            ReactorError::EndOfStream | ReactorError::Stream(_) | ReactorError::Write(_)
        )
    }
}
