//! Reassembly of fragments into complete frames.
//!
//! Two modes are available:
//! - `Strict`: one pending message per receive loop. A fragment whose
//!   (origin, client id, type) differs from the message in progress is a
//!   protocol violation.
//! - `Keyed`: one pending message per (origin, client id, type), so fragmented
//!   messages from different clients may interleave on the same wire.
//!
//! # Example
//!
//! ```
//! use sysexwire::protocol::{Frame, FrameCodec, MessageType, Reassembler};
//! use bytes::Bytes;
//!
//! let codec = FrameCodec::with_max_data_len(2);
//! let frame = Frame::request(4, MessageType::Exec, Bytes::from_static(b"abcde"));
//!
//! let mut reassembler = Reassembler::strict();
//! let mut done = None;
//! for unit in codec.encode(&frame).unwrap() {
//!     done = reassembler.push(codec.decode_fragment(&unit).unwrap()).unwrap();
//! }
//! assert_eq!(done, Some(frame));
//! ```

use std::collections::HashMap;

use bytes::BytesMut;

use super::frame::{Fragment, Frame, FrameKey};
use super::wire_format::Status;
use crate::error::{Error, Result};

/// Largest logical payload accepted before the pending message is dropped.
pub const MAX_MESSAGE_LEN: usize = 16 * 1024 * 1024;

/// Partially assembled message.
#[derive(Debug)]
struct Pending {
    key: FrameKey,
    status: Status,
    payload: BytesMut,
}

impl Pending {
    fn start(fragment: &Fragment) -> Self {
        Self {
            key: fragment.key(),
            status: fragment.header.status,
            payload: BytesMut::with_capacity(fragment.payload.len() * 2),
        }
    }

    fn append(&mut self, fragment: &Fragment, limit: usize) -> Result<()> {
        if fragment.header.status != self.status {
            return Err(Error::InvalidFrame(format!(
                "Status changed from {:?} to {:?} mid-message",
                self.status, fragment.header.status
            )));
        }
        if self.payload.len() + fragment.payload.len() > limit {
            return Err(Error::InvalidFrame(format!(
                "Reassembled payload exceeds {} bytes",
                limit
            )));
        }
        self.payload.extend_from_slice(&fragment.payload);
        Ok(())
    }

    fn finish(self) -> Frame {
        Frame::new(
            self.key.origin,
            self.key.client_id,
            self.key.msg_type,
            self.status,
            self.payload.freeze(),
        )
    }
}

#[derive(Debug)]
enum Mode {
    Strict(Option<Pending>),
    Keyed(HashMap<FrameKey, Pending>),
}

/// Merges continuation fragments back into frames.
#[derive(Debug)]
pub struct Reassembler {
    mode: Mode,
    max_message_len: usize,
}

impl Reassembler {
    /// Single-buffer reassembler that rejects interleaved messages.
    pub fn strict() -> Self {
        Self {
            mode: Mode::Strict(None),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    /// Reassembler holding one buffer per (origin, client id, type).
    pub fn keyed() -> Self {
        Self {
            mode: Mode::Keyed(HashMap::new()),
            max_message_len: MAX_MESSAGE_LEN,
        }
    }

    /// Override the reassembled payload limit.
    pub fn with_max_message_len(mut self, max_message_len: usize) -> Self {
        self.max_message_len = max_message_len;
        self
    }

    /// Feed one fragment.
    ///
    /// Returns the complete frame when a fragment without the continuation
    /// flag is merged, `None` while more fragments are expected.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFrame` on an interleaved fragment (strict mode), a
    /// status change mid-message, or an oversized message. The offending
    /// message in progress is dropped.
    pub fn push(&mut self, fragment: Fragment) -> Result<Option<Frame>> {
        let limit = self.max_message_len;
        match &mut self.mode {
            Mode::Strict(slot) => {
                let mut pending = match slot.take() {
                    Some(pending) if pending.key != fragment.key() => {
                        return Err(Error::InvalidFrame(format!(
                            "Fragment for {:?} interleaved with message in progress for {:?}",
                            fragment.key(),
                            pending.key
                        )));
                    }
                    Some(pending) => pending,
                    None if !fragment.header.continuation => {
                        return Self::single(fragment, limit).map(Some);
                    }
                    None => Pending::start(&fragment),
                };
                pending.append(&fragment, limit)?;
                if fragment.header.continuation {
                    *slot = Some(pending);
                    Ok(None)
                } else {
                    Ok(Some(pending.finish()))
                }
            }
            Mode::Keyed(pending_by_key) => {
                let key = fragment.key();
                let mut pending = match pending_by_key.remove(&key) {
                    Some(pending) => pending,
                    None if !fragment.header.continuation => {
                        return Self::single(fragment, limit).map(Some);
                    }
                    None => Pending::start(&fragment),
                };
                pending.append(&fragment, limit)?;
                if fragment.header.continuation {
                    pending_by_key.insert(key, pending);
                    Ok(None)
                } else {
                    Ok(Some(pending.finish()))
                }
            }
        }
    }

    fn single(fragment: Fragment, limit: usize) -> Result<Frame> {
        if fragment.payload.len() > limit {
            return Err(Error::InvalidFrame(format!(
                "Reassembled payload exceeds {} bytes",
                limit
            )));
        }
        Ok(fragment.into_frame())
    }

    /// Number of messages currently in progress.
    pub fn pending(&self) -> usize {
        match &self.mode {
            Mode::Strict(slot) => usize::from(slot.is_some()),
            Mode::Keyed(pending_by_key) => pending_by_key.len(),
        }
    }

    /// Drop every message in progress.
    pub fn clear(&mut self) {
        match &mut self.mode {
            Mode::Strict(slot) => *slot = None,
            Mode::Keyed(pending_by_key) => pending_by_key.clear(),
        }
    }

    /// Drop messages in progress for one client id.
    pub fn clear_client(&mut self, client_id: u8) {
        match &mut self.mode {
            Mode::Strict(slot) => {
                if slot.as_ref().is_some_and(|p| p.key.client_id == client_id) {
                    *slot = None;
                }
            }
            Mode::Keyed(pending_by_key) => {
                pending_by_key.retain(|key, _| key.client_id != client_id);
            }
        }
    }
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::strict()
    }
}
