//! Universal device identity enquiry.
//!
//! Generic MIDI hosts query every attached device with a non-realtime identity
//! request. It is answered with a canned reply naming the protocol marker and
//! version, and never reaches the protocol layer.

use bytes::{BufMut, Bytes, BytesMut};

use super::wire_format::{Version, MARKER, SYSEX_END, SYSEX_START};

const NON_REALTIME: u8 = 0x7E;
const GENERAL_INFORMATION: u8 = 0x06;
const IDENTITY_REQUEST: u8 = 0x01;
const IDENTITY_REPLY: u8 = 0x02;

/// Check for `F0 7E <device> 06 01 F7`, for any device byte.
pub fn is_identity_enquiry(buf: &[u8]) -> bool {
    matches!(
        buf,
        [SYSEX_START, NON_REALTIME, _, GENERAL_INFORMATION, IDENTITY_REQUEST, SYSEX_END]
    )
}

/// Build the identity reply for `version`.
pub fn identity_reply(version: Version) -> Bytes {
    let mut buf = BytesMut::with_capacity(6 + MARKER.len() + 3);
    buf.put_u8(SYSEX_START);
    buf.put_u8(NON_REALTIME);
    buf.put_u8(0x00);
    buf.put_u8(GENERAL_INFORMATION);
    buf.put_u8(IDENTITY_REPLY);
    buf.put_slice(&MARKER);
    buf.put_slice(&version.to_bytes());
    buf.put_u8(SYSEX_END);
    buf.freeze()
}
