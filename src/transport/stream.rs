//! Raw MIDI byte-stream port.
//!
//! Wraps anything that is `Read + Write` (a serial device, a pipe, a socket)
//! and cuts the incoming byte stream into complete sysex messages with
//! [`SysexBuffer`]. The stream should be non-blocking, or have a short read
//! timeout, so that `try_receive` returns promptly.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

use super::{MessageSink, MessageSource};
use crate::error::{Error, Result};
use crate::protocol::{SYSEX_END, SYSEX_START};

/// Largest sysex message kept; longer ones are discarded.
pub const MAX_SYSEX_LEN: usize = 64 * 1024;

const READ_CHUNK: usize = 1024;

/// Extracts sysex messages from a raw MIDI byte stream.
///
/// - System real-time bytes (`0xF8..=0xFF`) inside a sysex are dropped.
/// - Any other status byte aborts the sysex in progress.
/// - Bytes outside a sysex are returned as one foreign unit per push.
#[derive(Debug)]
pub struct SysexBuffer {
    sysex: BytesMut,
    in_sysex: bool,
    foreign: BytesMut,
    max_len: usize,
}

impl SysexBuffer {
    /// Create a buffer with [`MAX_SYSEX_LEN`].
    pub fn new() -> Self {
        Self::with_max_len(MAX_SYSEX_LEN)
    }

    /// Create a buffer with a custom maximum sysex length.
    pub fn with_max_len(max_len: usize) -> Self {
        Self {
            sysex: BytesMut::with_capacity(1024),
            in_sysex: false,
            foreign: BytesMut::new(),
            max_len,
        }
    }

    /// Feed bytes and return every unit completed by them, in stream order.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        let mut units = Vec::new();

        for &byte in data {
            match byte {
                SYSEX_START => {
                    self.flush_foreign(&mut units);
                    if self.in_sysex {
                        debug!(len = self.sysex.len(), "Sysex restarted before its end byte");
                    }
                    self.sysex.clear();
                    self.sysex.put_u8(SYSEX_START);
                    self.in_sysex = true;
                }
                SYSEX_END if self.in_sysex => {
                    self.sysex.put_u8(SYSEX_END);
                    self.in_sysex = false;
                    units.push(self.sysex.split().freeze());
                }
                0xF8..=0xFF if self.in_sysex => {}
                0x80..=0xFF if self.in_sysex => {
                    debug!(
                        status = byte,
                        len = self.sysex.len(),
                        "Sysex aborted by status byte"
                    );
                    self.abort();
                    self.foreign.put_u8(byte);
                }
                _ if self.in_sysex => {
                    if self.sysex.len() + 1 >= self.max_len {
                        debug!(max = self.max_len, "Sysex too long, discarded");
                        self.abort();
                    } else {
                        self.sysex.put_u8(byte);
                    }
                }
                _ => self.foreign.put_u8(byte),
            }
        }

        self.flush_foreign(&mut units);
        units
    }

    /// Whether a sysex is currently being collected.
    pub fn in_progress(&self) -> bool {
        self.in_sysex
    }

    fn abort(&mut self) {
        self.sysex.clear();
        self.in_sysex = false;
    }

    fn flush_foreign(&mut self, units: &mut Vec<Bytes>) {
        if !self.foreign.is_empty() {
            units.push(self.foreign.split().freeze());
        }
    }
}

impl Default for SysexBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Port over a raw MIDI byte stream.
pub struct StreamPort<S> {
    stream: S,
    buffer: SysexBuffer,
    ready: VecDeque<Bytes>,
}

impl<S: Read + Write> StreamPort<S> {
    /// Wrap a stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: SysexBuffer::new(),
            ready: VecDeque::new(),
        }
    }

    /// Get a reference to the underlying stream.
    pub fn inner(&self) -> &S {
        &self.stream
    }

    /// Get a mutable reference to the underlying stream.
    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Unwrap the stream, dropping any buffered input.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

impl<S: Read + Write> MessageSink for StreamPort<S> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.stream.write_all(message)?;
        self.stream.flush()?;
        Ok(())
    }
}

impl<S: Read + Write> MessageSource for StreamPort<S> {
    fn try_receive(&mut self) -> Result<Option<Bytes>> {
        if let Some(message) = self.ready.pop_front() {
            return Ok(Some(message));
        }

        let mut chunk = [0u8; READ_CHUNK];
        match self.stream.read(&mut chunk) {
            Ok(0) => Err(Error::ConnectionClosed),
            Ok(n) => {
                self.ready.extend(self.buffer.push(&chunk[..n]));
                Ok(self.ready.pop_front())
            }
            Err(e)
                if matches!(
                    e.kind(),
                    ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                ) =>
            {
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}
