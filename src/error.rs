//! Error types for sysexwire.

use std::time::Duration;

use thiserror::Error;

use crate::protocol::{MessageType, Version};
use crate::value::Fault;

/// Main error type for all sysexwire operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error on a byte-stream port.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Payload armour could not be decoded.
    #[error("Payload decode error: {0}")]
    Base64(#[from] base64::DecodeError),

    /// Text payload was not valid UTF-8.
    #[error("Payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// No matching message arrived within the timeout window.
    #[error("No message received within {0:?}. Is the host running?")]
    Timeout(Duration),

    /// Marker mismatch, malformed header, or a broken fragment sequence.
    #[error("Invalid frame: {0}")]
    InvalidFrame(String),

    /// The response did not have the message type of the request.
    #[error("Expected message type {expected:?}, received {received:?}")]
    ProtocolMismatch {
        /// Type of the request that was sent.
        expected: MessageType,
        /// Type of the frame that arrived.
        received: MessageType,
    },

    /// Client and server protocol versions differ.
    #[error(
        "Version mismatch: client is {client}, server is {server}. \
         Reinstall the server-side script or upgrade the client package so both match."
    )]
    VersionMismatch {
        /// Version compiled into this client.
        client: Version,
        /// Version reported by the server.
        server: Version,
    },

    /// The remote execution raised a fault (ERR status).
    #[error("Remote fault: {0}")]
    Application(Fault),

    /// The server could not process the message (FAIL status).
    #[error("Server failure: {0}. Check that client and server versions match.")]
    ServerFailure(String),

    /// The server told this client to exit.
    #[error("Client exit requested with code {0}")]
    ClientExit(i32),

    /// The server is shutting down.
    #[error("Server disconnected")]
    ServerExit,

    /// Session negotiation could not claim a client id.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Operation requires a negotiated session.
    #[error("Not connected to a server")]
    NotConnected,

    /// The underlying channel was closed.
    #[error("Connection closed")]
    ConnectionClosed,
}

impl Error {
    /// Whether the caller may retry the operation with a fresh deadline.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Timeout(_) | Error::Connection(_))
    }

    /// Whether this error is an orderly goodbye from either peer.
    pub fn is_peer_exit(&self) -> bool {
        matches!(self, Error::ClientExit(_) | Error::ServerExit)
    }
}

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;
