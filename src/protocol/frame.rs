//! Frame and fragment types, and the codec that splits frames into transport units.
//!
//! A [`Frame`] is one logical protocol message. On the wire it travels as one or
//! more [`Fragment`]s, each a complete sysex message whose payload holds at most
//! `max_data_len` bytes. All fragments share the same header except for the
//! continuation flag, which is set on every fragment but the last.
//!
//! # Example
//!
//! ```
//! use sysexwire::protocol::{Frame, FrameCodec, MessageType, Origin, Status};
//! use bytes::Bytes;
//!
//! let codec = FrameCodec::new();
//! let frame = Frame::new(Origin::Client, 5, MessageType::Eval, Status::Ok, Bytes::from_static(b"MisyIA=="));
//! let units = codec.encode(&frame).unwrap();
//! assert_eq!(units.len(), 1);
//!
//! let fragment = codec.decode_fragment(&units[0]).unwrap();
//! assert!(!fragment.header.continuation);
//! assert_eq!(fragment.payload(), b"MisyIA==");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{
    Header, MessageType, Origin, Status, FRAME_OVERHEAD, HEADER_SIZE, MARKER, MAX_DATA_LEN,
    SYSEX_END, SYSEX_START,
};
use crate::error::{Error, Result};

/// Addressing triple shared by every fragment of one logical message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameKey {
    /// Sender.
    pub origin: Origin,
    /// Addressed client.
    pub client_id: u8,
    /// Operation.
    pub msg_type: MessageType,
}

/// A complete logical protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender.
    pub origin: Origin,
    /// Addressed client (0 = broadcast).
    pub client_id: u8,
    /// Operation.
    pub msg_type: MessageType,
    /// Result status (`Ok` placeholder on requests).
    pub status: Status,
    /// Payload bytes, all 7-bit.
    pub payload: Bytes,
}

impl Frame {
    /// Create a new frame.
    pub fn new(
        origin: Origin,
        client_id: u8,
        msg_type: MessageType,
        status: Status,
        payload: Bytes,
    ) -> Self {
        Self {
            origin,
            client_id,
            msg_type,
            status,
            payload,
        }
    }

    /// Create a request frame (status placeholder `Ok`).
    pub fn request(client_id: u8, msg_type: MessageType, payload: Bytes) -> Self {
        Self::new(Origin::Client, client_id, msg_type, Status::Ok, payload)
    }

    /// Addressing triple of this frame.
    #[inline]
    pub fn key(&self) -> FrameKey {
        FrameKey {
            origin: self.origin,
            client_id: self.client_id,
            msg_type: self.msg_type,
        }
    }

    /// Get a reference to the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Check if this frame reports success.
    #[inline]
    pub fn is_ok(&self) -> bool {
        self.status == Status::Ok
    }
}

/// One physical transport unit of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    /// Decoded header.
    pub header: Header,
    /// Payload chunk carried by this unit.
    pub payload: Bytes,
}

impl Fragment {
    /// Addressing triple of the frame this fragment belongs to.
    #[inline]
    pub fn key(&self) -> FrameKey {
        FrameKey {
            origin: self.header.origin,
            client_id: self.header.client_id,
            msg_type: self.header.msg_type,
        }
    }

    /// Get a reference to the payload chunk.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Promote a single, final fragment to a frame.
    pub fn into_frame(self) -> Frame {
        Frame::new(
            self.header.origin,
            self.header.client_id,
            self.header.msg_type,
            self.header.status,
            self.payload,
        )
    }
}

/// Check whether a transport unit starts with the protocol marker.
///
/// Anything else is foreign MIDI traffic, not a protocol error.
pub fn is_protocol_message(buf: &[u8]) -> bool {
    buf.len() > MARKER.len() && buf[0] == SYSEX_START && buf[1..=MARKER.len()] == MARKER
}

/// Copy a transport unit, replacing only its origin byte.
pub fn rewrite_origin(buf: &[u8], origin: Origin) -> Result<Bytes> {
    if !is_protocol_message(buf) || buf.len() < FRAME_OVERHEAD {
        return Err(Error::InvalidFrame(
            "Cannot rewrite origin of a non-protocol message".to_string(),
        ));
    }
    let mut out = BytesMut::from(buf);
    out[1 + MARKER.len()] = origin as u8;
    Ok(out.freeze())
}

/// Encoder/decoder for transport units.
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_data_len: usize,
}

impl FrameCodec {
    /// Create a codec using [`MAX_DATA_LEN`].
    pub fn new() -> Self {
        Self {
            max_data_len: MAX_DATA_LEN,
        }
    }

    /// Create a codec with a smaller per-unit payload limit (minimum 1).
    pub fn with_max_data_len(max_data_len: usize) -> Self {
        Self {
            max_data_len: max_data_len.clamp(1, MAX_DATA_LEN),
        }
    }

    /// Per-unit payload limit.
    #[inline]
    pub fn max_data_len(&self) -> usize {
        self.max_data_len
    }

    /// Split a frame into transport units.
    ///
    /// An empty payload still produces one unit. Every unit but the last has
    /// the continuation flag set.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` if a header field or payload byte is not 7-bit.
    pub fn encode(&self, frame: &Frame) -> Result<Vec<Bytes>> {
        if let Some(pos) = frame.payload.iter().position(|&b| b > 0x7F) {
            return Err(Error::InvalidFrame(format!(
                "Payload byte 0x{:02X} at offset {} is not 7-bit",
                frame.payload[pos], pos
            )));
        }

        let total = frame.payload.len();
        let count = if total == 0 {
            1
        } else {
            total.div_ceil(self.max_data_len)
        };

        let mut units = Vec::with_capacity(count);
        for index in 0..count {
            let start = index * self.max_data_len;
            let end = (start + self.max_data_len).min(total);
            let header = Header::new(
                frame.origin,
                frame.client_id,
                index + 1 < count,
                frame.msg_type,
                frame.status,
            );
            header.validate()?;
            units.push(build_unit(&header, &frame.payload[start..end]));
        }

        Ok(units)
    }

    /// Decode one transport unit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` if the marker is missing, the sysex is not
    /// terminated, the header is malformed, or a payload byte is not 7-bit.
    pub fn decode_fragment(&self, buf: &[u8]) -> Result<Fragment> {
        if !is_protocol_message(buf) {
            return Err(Error::InvalidFrame("Missing protocol marker".to_string()));
        }
        if buf.len() < FRAME_OVERHEAD {
            return Err(Error::InvalidFrame(format!(
                "Unit of {} bytes is shorter than the {} byte frame overhead",
                buf.len(),
                FRAME_OVERHEAD
            )));
        }
        if buf[buf.len() - 1] != SYSEX_END {
            return Err(Error::InvalidFrame("Sysex is not terminated".to_string()));
        }

        let header_start = 1 + MARKER.len();
        let header = Header::decode(&buf[header_start..header_start + HEADER_SIZE])?;
        let payload = &buf[header_start + HEADER_SIZE..buf.len() - 1];

        if payload.iter().any(|&b| b > 0x7F) {
            return Err(Error::InvalidFrame(
                "Payload contains a status byte".to_string(),
            ));
        }

        Ok(Fragment {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

fn build_unit(header: &Header, chunk: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + chunk.len());
    buf.put_u8(SYSEX_START);
    buf.put_slice(&MARKER);
    buf.put_slice(&header.encode());
    buf.put_slice(chunk);
    buf.put_u8(SYSEX_END);
    buf.freeze()
}
