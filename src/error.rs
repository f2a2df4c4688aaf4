//! Error types and response codes for tpush

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for tpush operations
#[derive(Error, Debug)]
pub enum PushError {
    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("IO error at {path}: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to encode batch: {0}")]
    Encode(#[source] serde_json::Error),
}

/// Result type alias for tpush operations
pub type Result<T> = std::result::Result<T, PushError>;

/// A frame that could not be decoded into a batch.
///
/// The whole batch is rejected; none of its commands run.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Frame must be a JSON array of commands, got {found}")]
    NotAnArray { found: &'static str },

    #[error("Invalid command at index {index}: {source}")]
    InvalidCommand {
        index: usize,
        #[source]
        source: serde_json::Error,
    },
}

/// Per-command failure. Reported in the response's `code`/`msg` and never
/// aborts the rest of the batch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("client has not logged in")]
    NotLoggedIn,

    #[error("client has already logged in")]
    AlreadyLoggedIn,

    #[error("session is closing")]
    SessionClosed,

    #[error("unsupported command: {0}")]
    UnsupportedCommand(String),

    #[error("wrong command: {0}")]
    WrongCommand(String),

    #[error("invalid {cmd} payload: {message}")]
    InvalidPayload { cmd: &'static str, message: String },
}

impl CommandError {
    /// Wire code for the error:
    /// - -11: Not logged in
    /// - -12: Login failed
    /// - -21: Unsupported command
    /// - -22: Wrong command (server-only command sent by a client)
    /// - -23: Invalid payload
    pub fn code(&self) -> i32 {
        match self {
            Self::NotLoggedIn => -11,
            Self::AlreadyLoggedIn | Self::SessionClosed => -12,
            Self::UnsupportedCommand(_) => -21,
            Self::WrongCommand(_) => -22,
            Self::InvalidPayload { .. } => -23,
        }
    }
}
