//! Error types for the WebSocket engine.
//!
//! Every failure the engine reports is an [`Error`]. Facades that need the
//! DOM-style classification (`SyntaxError`, `InvalidStateError`, ...) use
//! [`Error::kind`].

use std::time::Duration;

use thiserror::Error;

use crate::connection::ConnectionState;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`], matching the exception names a
/// browser-style WebSocket API reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed input: URL, subprotocol, header, close reason, payload size.
    Syntax,
    /// Close code outside the range an application may send.
    InvalidAccess,
    /// Operation not permitted in the current connection state.
    InvalidState,
    /// Failure reported by (or about) the transport provider.
    Network,
    /// Cancellation through the abort signal.
    Abort,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Syntax => write!(f, "SyntaxError"),
            ErrorKind::InvalidAccess => write!(f, "InvalidAccessError"),
            ErrorKind::InvalidState => write!(f, "InvalidStateError"),
            ErrorKind::Network => write!(f, "NetworkError"),
            ErrorKind::Abort => write!(f, "AbortError"),
        }
    }
}

/// Errors that can occur while constructing or driving a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL scheme is not `ws` or `wss`.
    #[error("Invalid URL scheme: {0} (expected ws or wss)")]
    InvalidScheme(String),

    /// The URL carries a fragment.
    #[error("URL must not contain a fragment: {0}")]
    UrlFragment(String),

    /// A subprotocol is not a valid HTTP token.
    #[error("Invalid subprotocol: {0:?}")]
    InvalidSubprotocol(String),

    /// The same subprotocol was requested twice (case-insensitive).
    #[error("Duplicate subprotocol: {0:?}")]
    DuplicateSubprotocol(String),

    /// A request header has an invalid name or value.
    #[error("Invalid header {header}: {reason}")]
    InvalidHeader {
        /// Header name as supplied.
        header: String,
        /// What was wrong with it.
        reason: String,
    },

    /// Close code is neither 1000 nor in 3000..=4999.
    #[error("Invalid close code: {0}")]
    InvalidCloseCode(u16),

    /// Close reason exceeds the 123-byte limit once UTF-8 encoded.
    #[error("Close reason too long: {size} bytes (max: {max})")]
    CloseReasonTooLong {
        /// Encoded reason length.
        size: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Outbound message exceeds the configured maximum.
    #[error("Message too large: {size} bytes (max: {max})")]
    MessageTooLarge {
        /// Payload length.
        size: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Operation is not allowed in the connection's current state.
    #[error("Invalid state: connection is {0}")]
    InvalidState(ConnectionState),

    /// The transport provider failed to open the connection.
    #[error("Failed to open connection: {0}")]
    OpenFailed(String),

    /// The transport reported an error on an open connection.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The connection was cancelled through its abort signal.
    #[error("Aborted: {0}")]
    Aborted(String),

    /// The peer stopped answering keepalive pings.
    #[error("No response from ping")]
    KeepaliveTimeout,

    /// The peer did not acknowledge a local close in time.
    #[error("Close handshake timed out after {0:?}")]
    CloseTimeout(Duration),

    /// The open outcome of a stream connection was already taken.
    #[error("Connection outcome already taken")]
    AlreadyOpened,
}

impl Error {
    /// Classify this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidUrl(_)
            | Error::InvalidScheme(_)
            | Error::UrlFragment(_)
            | Error::InvalidSubprotocol(_)
            | Error::DuplicateSubprotocol(_)
            | Error::InvalidHeader { .. }
            | Error::CloseReasonTooLong { .. }
            | Error::MessageTooLarge { .. } => ErrorKind::Syntax,
            Error::InvalidCloseCode(_) => ErrorKind::InvalidAccess,
            Error::InvalidState(_) | Error::AlreadyOpened => ErrorKind::InvalidState,
            Error::Aborted(_) => ErrorKind::Abort,
            Error::OpenFailed(_)
            | Error::Transport(_)
            | Error::KeepaliveTimeout
            | Error::CloseTimeout(_) => ErrorKind::Network,
        }
    }
}

impl From<url::ParseError> for Error {
    fn from(err: url::ParseError) -> Self {
        Error::InvalidUrl(err.to_string())
    }
}
