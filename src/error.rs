//! Error types for the WebSocket server implementation.
//!
//! Every error is terminal for the connection it occurred on. The session
//! loop never retries; its only recovery is closing the transport.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for WebSocket operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while negotiating or serving a WebSocket connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// The upgrade request could not be turned into a WebSocket connection.
    #[error("Handshake failure: {0}")]
    HandshakeFailure(String),

    /// Handshake request exceeds the configured maximum.
    #[error("Handshake too large: {size} bytes (max: {max})")]
    HandshakeTooLarge {
        /// Bytes received so far.
        size: usize,
        /// Maximum allowed size.
        max: usize,
    },

    /// A response header value would have broken the HTTP framing.
    #[error("Invalid header value for {header}: {reason}")]
    InvalidHeaderValue {
        /// Header name.
        header: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The upgrade handshake did not complete in time.
    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// The Origin header is not in the configured allow-list.
    #[error("Origin not allowed: {origin}")]
    OriginNotAllowed {
        /// The rejected origin.
        origin: String,
    },

    /// Inbound bytes do not form valid frames.
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// A frame declares a payload larger than the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared payload length.
        size: u64,
        /// Maximum allowed size.
        max: usize,
    },

    /// The peer closed the transport.
    #[error("Transport closed")]
    TransportClosed,

    /// I/O error on the transport.
    #[error("I/O error: {0}")]
    Io(String),

    /// A partial frame was not completed in time.
    #[error("Reassembly timed out after {0:?}")]
    ReassemblyTimeout(Duration),
}

/// The four terminal failure classes of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Missing or invalid key headers, bad hixie key reduction, stalled peer.
    Handshake,
    /// Malformed frame header, truncated hixie frame.
    Decode,
    /// Peer closed or transport-level error.
    TransportClosed,
    /// No further bytes arrived within the reassembly bound.
    ReassemblyTimeout,
}

impl Error {
    /// Classify this error into one of the terminal kinds.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Error::HandshakeFailure(_)
            | Error::HandshakeTooLarge { .. }
            | Error::InvalidHeaderValue { .. }
            | Error::HandshakeTimeout(_)
            | Error::OriginNotAllowed { .. } => ErrorKind::Handshake,
            Error::DecodeFailure(_) | Error::FrameTooLarge { .. } => ErrorKind::Decode,
            Error::TransportClosed | Error::Io(_) => ErrorKind::TransportClosed,
            Error::ReassemblyTimeout(_) => ErrorKind::ReassemblyTimeout,
        }
    }

    pub(crate) fn handshake(msg: impl Into<String>) -> Self {
        Error::HandshakeFailure(msg.into())
    }

    pub(crate) fn decode(msg: impl Into<String>) -> Self {
        Error::DecodeFailure(msg.into())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Error::TransportClosed,
            _ => Error::Io(err.to_string()),
        }
    }
}
