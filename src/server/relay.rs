//! INTERNAL → SERVER relay.
//!
//! Some hosts receive requests on one device and can only send on another.
//! The receiving side then emits its responses with origin INTERNAL on the
//! internal link; the [`Relay`] on the sending device re-emits them to
//! clients with origin SERVER. Only the origin byte changes, so
//! fragmentation passes through untouched.

use tracing::{debug, trace};

use crate::error::Result;
use crate::protocol::{is_protocol_message, rewrite_origin, FrameCodec, Origin};
use crate::transport::MessageSink;

/// Re-emits INTERNAL frames as SERVER frames.
pub struct Relay<K> {
    sink: K,
    codec: FrameCodec,
    forwarded: u64,
}

impl<K: MessageSink> Relay<K> {
    /// Relay into `sink` (the client-facing output).
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            codec: FrameCodec::new(),
            forwarded: 0,
        }
    }

    /// Handle one message from the internal link.
    ///
    /// Returns `true` if it was forwarded. Foreign traffic, malformed units
    /// and frames of any other origin are ignored.
    pub fn on_sysex(&mut self, message: &[u8]) -> Result<bool> {
        if !is_protocol_message(message) {
            return Ok(false);
        }
        let fragment = match self.codec.decode_fragment(message) {
            Ok(fragment) => fragment,
            Err(e) => {
                debug!(error = %e, "Relay ignoring malformed unit");
                return Ok(false);
            }
        };
        if fragment.header.origin != Origin::Internal {
            trace!(origin = ?fragment.header.origin, "Relay ignoring frame");
            return Ok(false);
        }

        let rewritten = rewrite_origin(message, Origin::Server)?;
        self.sink.send(&rewritten)?;
        self.forwarded += 1;
        Ok(true)
    }

    /// Number of units forwarded so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Unwrap the sink.
    pub fn into_inner(self) -> K {
        self.sink
    }
}
