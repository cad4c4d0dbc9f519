//! Protocol module - wire format, framing, and reassembly.
//!
//! This module implements the sysex framing shared by clients and servers:
//! - Marker and 5-byte header encoding/decoding
//! - Splitting frames into bounded transport units
//! - Reassembling continuation fragments into frames
//! - Device identity enquiry handling

mod frame;
mod identity;
mod reassembly;
mod wire_format;

pub use frame::{is_protocol_message, rewrite_origin, Fragment, Frame, FrameCodec, FrameKey};
pub use identity::{identity_reply, is_identity_enquiry};
pub use reassembly::{Reassembler, MAX_MESSAGE_LEN};
pub use wire_format::{
    Header, MessageType, Origin, Status, Version, BROADCAST_CLIENT_ID, EXTENSION_TYPE_BASE,
    FRAME_OVERHEAD, HEADER_SIZE, MARKER, MAX_CLIENT_ID, MAX_DATA_LEN, SYSEX_END, SYSEX_START,
};
