//! Wire format constants and header encoding.
//!
//! Every transport unit is one complete sysex message:
//! ```text
//! ┌──────┬─────────────┬────────┬───────────┬──────┬──────────┬────────┬─────────┬──────┐
//! │ 0xF0 │ marker      │ origin │ client id │ cont │ msg type │ status │ payload │ 0xF7 │
//! │ 1    │ 4 bytes     │ 1 byte │ 1 byte    │ 1    │ 1 byte   │ 1 byte │ ≤ 1000  │ 1    │
//! └──────┴─────────────┴────────┴───────────┴──────┴──────────┴────────┴─────────┴──────┘
//! ```
//!
//! Sysex data bytes are 7-bit, so every header field and every payload byte
//! must be below `0x80`.

use std::fmt;

use crate::error::{Error, Result};

/// Sysex start byte.
pub const SYSEX_START: u8 = 0xF0;

/// Sysex end byte.
pub const SYSEX_END: u8 = 0xF7;

/// Protocol marker following `0xF0`: non-commercial manufacturer id, then `SXW`.
pub const MARKER: [u8; 4] = [0x7D, 0x53, 0x58, 0x57];

/// Header size in bytes after the marker (origin, client id, continuation, type, status).
pub const HEADER_SIZE: usize = 5;

/// Bytes of framing around the payload in one transport unit.
pub const FRAME_OVERHEAD: usize = 1 + MARKER.len() + HEADER_SIZE + 1;

/// Maximum payload bytes carried by one transport unit.
pub const MAX_DATA_LEN: usize = 1000;

/// Client id addressing every client. Never claimed by a session.
pub const BROADCAST_CLIENT_ID: u8 = 0;

/// Highest client id a session may claim.
pub const MAX_CLIENT_ID: u8 = 0x7F;

/// First message type tag handed out to runtime extensions.
pub const EXTENSION_TYPE_BASE: u8 = 0x10;

/// Sender of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Origin {
    /// Sent by a client process.
    Client = 0x00,
    /// Sent by the server to clients.
    Server = 0x01,
    /// Relay traffic between the server's receiving and responding devices.
    Internal = 0x02,
}

impl Origin {
    /// Parse an origin byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Origin::Client),
            0x01 => Some(Origin::Server),
            0x02 => Some(Origin::Internal),
            _ => None,
        }
    }
}

/// Protocol operation carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Claim a client id.
    ClientHello,
    /// Release a client id, or force a client to exit.
    ClientGoodbye,
    /// Server is shutting down.
    ServerGoodbye,
    /// Ask for the server's protocol version.
    VersionQuery,
    /// Run statements in the client's scope.
    Exec,
    /// Evaluate an expression in the client's scope.
    Eval,
    /// Captured console text.
    Stdout,
    /// Bind a host capability to a new extension type tag.
    RegisterExtension,
    /// Runtime-assigned or unknown type tag.
    Extension(u8),
}

impl MessageType {
    /// Parse a message type byte. Unrecognised values become [`MessageType::Extension`].
    pub fn from_u8(v: u8) -> Self {
        match v {
            0x00 => MessageType::ClientHello,
            0x01 => MessageType::ClientGoodbye,
            0x02 => MessageType::ServerGoodbye,
            0x03 => MessageType::VersionQuery,
            0x04 => MessageType::Exec,
            0x05 => MessageType::Eval,
            0x06 => MessageType::Stdout,
            0x07 => MessageType::RegisterExtension,
            other => MessageType::Extension(other),
        }
    }

    /// Wire byte for this type.
    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::ClientHello => 0x00,
            MessageType::ClientGoodbye => 0x01,
            MessageType::ServerGoodbye => 0x02,
            MessageType::VersionQuery => 0x03,
            MessageType::Exec => 0x04,
            MessageType::Eval => 0x05,
            MessageType::Stdout => 0x06,
            MessageType::RegisterExtension => 0x07,
            MessageType::Extension(tag) => tag,
        }
    }
}

/// Result status of a response frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Status {
    /// Processed successfully.
    Ok = 0x00,
    /// Remote execution raised a fault; payload is the serialized fault.
    Err = 0x01,
    /// Message could not be processed; payload is diagnostic text.
    Fail = 0x02,
}

impl Status {
    /// Parse a status byte.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(Status::Ok),
            0x01 => Some(Status::Err),
            0x02 => Some(Status::Fail),
            _ => None,
        }
    }
}

/// Protocol version, compared lexicographically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Version {
    /// Major version.
    pub major: u8,
    /// Minor version.
    pub minor: u8,
    /// Patch version.
    pub patch: u8,
}

impl Version {
    /// Version spoken by this crate.
    pub const CURRENT: Version = Version::new(1, 0, 0);

    /// Create a version.
    pub const fn new(major: u8, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Encode as the 3-byte version payload.
    pub fn to_bytes(self) -> [u8; 3] {
        [self.major, self.minor, self.patch]
    }

    /// Decode a version payload. Requires exactly 3 bytes.
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        match buf {
            [major, minor, patch] => Ok(Self::new(*major, *minor, *patch)),
            _ => Err(Error::InvalidFrame(format!(
                "Version payload must be 3 bytes, got {}",
                buf.len()
            ))),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Decoded header of one transport unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Sender.
    pub origin: Origin,
    /// Addressed client (0 = broadcast).
    pub client_id: u8,
    /// More fragments of this message follow.
    pub continuation: bool,
    /// Operation.
    pub msg_type: MessageType,
    /// Result status (placeholder `Ok` on requests).
    pub status: Status,
}

impl Header {
    /// Create a new header.
    pub fn new(
        origin: Origin,
        client_id: u8,
        continuation: bool,
        msg_type: MessageType,
        status: Status,
    ) -> Self {
        Self {
            origin,
            client_id,
            continuation,
            msg_type,
            status,
        }
    }

    /// Encode header to bytes.
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        [
            self.origin as u8,
            self.client_id,
            u8::from(self.continuation),
            self.msg_type.as_u8(),
            self.status as u8,
        ]
    }

    /// Decode header from the bytes following the marker.
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::InvalidFrame(format!(
                "Header needs {} bytes, got {}",
                HEADER_SIZE,
                buf.len()
            )));
        }

        let origin = Origin::from_u8(buf[0])
            .ok_or_else(|| Error::InvalidFrame(format!("Unknown origin 0x{:02X}", buf[0])))?;
        let continuation = match buf[2] {
            0 => false,
            1 => true,
            other => {
                return Err(Error::InvalidFrame(format!(
                    "Continuation byte must be 0 or 1, got 0x{:02X}",
                    other
                )))
            }
        };
        let status = Status::from_u8(buf[4])
            .ok_or_else(|| Error::InvalidFrame(format!("Unknown status 0x{:02X}", buf[4])))?;

        let header = Self {
            origin,
            client_id: buf[1],
            continuation,
            msg_type: MessageType::from_u8(buf[3]),
            status,
        };
        header.validate()?;
        Ok(header)
    }

    /// Check that every field fits in a 7-bit sysex data byte.
    pub fn validate(&self) -> Result<()> {
        if self.client_id > MAX_CLIENT_ID {
            return Err(Error::InvalidFrame(format!(
                "Client id {} exceeds {}",
                self.client_id, MAX_CLIENT_ID
            )));
        }
        if self.msg_type.as_u8() > 0x7F {
            return Err(Error::InvalidFrame(format!(
                "Message type 0x{:02X} is not a 7-bit value",
                self.msg_type.as_u8()
            )));
        }
        Ok(())
    }
}
