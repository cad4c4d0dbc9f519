//! Inbound message router.
//!
//! Turns each received sysex message into an [`Inbound`] event:
//!
//! 1. Messages without the protocol marker are foreign traffic. A device
//!    identity enquiry is reported separately so the caller can answer it.
//! 2. Fragments from an origin this role never accepts are discarded. This
//!    suppresses loopback of the receiver's own traffic on a shared wire.
//! 3. On the client, fragments addressed to a client id other than broadcast
//!    or the bound id are discarded.
//! 4. Fragments are reassembled. STDOUT and goodbye frames become control
//!    events, everything else is returned as an application frame.

use bytes::Bytes;
use tracing::trace;

use crate::codec::Armour;
use crate::error::Result;
use crate::protocol::{
    is_identity_enquiry, is_protocol_message, Frame, FrameCodec, MessageType, Origin, Reassembler,
    BROADCAST_CLIENT_ID,
};

/// Which end of the link the router serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Accepts SERVER-origin frames addressed to broadcast or the bound id.
    Client,
    /// Accepts CLIENT-origin frames for any client id.
    Server,
}

impl Role {
    /// The only origin this role accepts.
    pub fn accepted_origin(self) -> Origin {
        match self {
            Role::Client => Origin::Server,
            Role::Server => Origin::Client,
        }
    }
}

/// A routed inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Application frame for the caller.
    Frame(Frame),
    /// Console text.
    Stdout {
        /// Client the text belongs to.
        client_id: u8,
        /// Decoded text.
        text: String,
    },
    /// CLIENT_GOODBYE: forced exit on the client, release request on the server.
    ClientGoodbye {
        /// Client the goodbye addresses.
        client_id: u8,
        /// Exit code.
        code: i32,
    },
    /// SERVER_GOODBYE: the server is shutting down.
    ServerGoodbye,
    /// A device identity enquiry to be answered.
    IdentityEnquiry,
    /// Non-protocol MIDI traffic.
    Foreign(Bytes),
}

/// Decoding front end shared by clients and servers.
#[derive(Debug)]
pub struct Router {
    role: Role,
    client_id: Option<u8>,
    codec: FrameCodec,
    reassembler: Reassembler,
}

impl Router {
    /// Create a router. Clients reassemble strictly, servers per client.
    pub fn new(role: Role) -> Self {
        let reassembler = match role {
            Role::Client => Reassembler::strict(),
            Role::Server => Reassembler::keyed(),
        };
        Self {
            role,
            client_id: None,
            codec: FrameCodec::new(),
            reassembler,
        }
    }

    /// Role of this router.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Set the client id this router answers to, dropping partial messages.
    pub fn bind(&mut self, client_id: Option<u8>) {
        self.client_id = client_id;
        self.reassembler.clear();
    }

    /// Currently bound client id.
    pub fn bound_id(&self) -> Option<u8> {
        self.client_id
    }

    /// Drop partial messages from one client.
    pub fn forget(&mut self, client_id: u8) {
        self.reassembler.clear_client(client_id);
    }

    /// Route one received message.
    ///
    /// Returns `None` for discarded fragments and for fragments that do not
    /// yet complete a frame.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` for marked messages that fail to decode or
    /// reassemble, and payload errors for undecodable control events. The
    /// caller logs and drops these.
    pub fn route(&mut self, buf: &[u8]) -> Result<Option<Inbound>> {
        if !is_protocol_message(buf) {
            if is_identity_enquiry(buf) {
                return Ok(Some(Inbound::IdentityEnquiry));
            }
            return Ok(Some(Inbound::Foreign(Bytes::copy_from_slice(buf))));
        }

        let fragment = self.codec.decode_fragment(buf)?;
        let header = fragment.header;

        if header.origin != self.role.accepted_origin() {
            trace!(origin = ?header.origin, "Ignoring frame from own side");
            return Ok(None);
        }

        if self.role == Role::Client
            && header.client_id != BROADCAST_CLIENT_ID
            && Some(header.client_id) != self.client_id
        {
            trace!(client_id = header.client_id, "Ignoring frame for another client");
            return Ok(None);
        }

        let Some(frame) = self.reassembler.push(fragment)? else {
            return Ok(None);
        };

        let inbound = match frame.msg_type {
            MessageType::Stdout => Inbound::Stdout {
                client_id: frame.client_id,
                text: Armour::decode_text(&frame.payload)?,
            },
            MessageType::ClientGoodbye => Inbound::ClientGoodbye {
                client_id: frame.client_id,
                code: decode_exit_code(&frame.payload)?,
            },
            MessageType::ServerGoodbye if self.role == Role::Client => Inbound::ServerGoodbye,
            _ => Inbound::Frame(frame),
        };
        Ok(Some(inbound))
    }
}

/// Decode a goodbye exit code. An empty payload means 0.
pub fn decode_exit_code(payload: &[u8]) -> Result<i32> {
    if payload.is_empty() {
        return Ok(0);
    }
    Armour::decode_value(payload)
}

/// Encode a goodbye exit code.
pub fn encode_exit_code(code: i32) -> Result<Bytes> {
    Armour::encode_value(&code)
}
