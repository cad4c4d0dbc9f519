//! Transport module - unidirectional sysex message channels.
//!
//! A link is two channels: one carries client→server traffic, the other
//! server→client traffic. Each endpoint sees a [`MessageSink`] and a
//! [`MessageSource`] moving whole sysex messages.
//!
//! Provides:
//! - [`VirtualCable`] - in-process shared wire with virtual-port loopback
//! - [`StreamPort`] - raw MIDI byte stream (serial device, pipe, socket)

mod cable;
mod stream;

use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{Error, Result};

pub use cable::{CablePort, CableSender, VirtualCable};
pub use stream::{StreamPort, SysexBuffer, MAX_SYSEX_LEN};

/// Sleep between polls in [`MessageSource::receive`].
pub const POLL_QUANTUM: Duration = Duration::from_micros(200);

/// Outbound channel for complete sysex messages.
pub trait MessageSink {
    /// Send one message.
    fn send(&mut self, message: &[u8]) -> Result<()>;
}

/// Inbound channel for complete sysex messages.
pub trait MessageSource {
    /// Take the next message if one is ready. Never blocks.
    fn try_receive(&mut self) -> Result<Option<Bytes>>;

    /// Poll until a message arrives or `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the window closes with nothing received.
    fn receive(&mut self, timeout: Duration) -> Result<Bytes> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(message) = self.try_receive()? {
                return Ok(message);
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout(timeout));
            }
            std::thread::sleep(POLL_QUANTUM);
        }
    }
}

impl<T: MessageSink + ?Sized> MessageSink for Box<T> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }
}

impl<T: MessageSink + ?Sized> MessageSink for &mut T {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        (**self).send(message)
    }
}

impl<T: MessageSource + ?Sized> MessageSource for Box<T> {
    fn try_receive(&mut self) -> Result<Option<Bytes>> {
        (**self).try_receive()
    }
}

impl<T: MessageSource + ?Sized> MessageSource for &mut T {
    fn try_receive(&mut self) -> Result<Option<Bytes>> {
        (**self).try_receive()
    }
}

/// Sink that records every message, for tests and dry runs.
impl MessageSink for Vec<Bytes> {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.push(Bytes::copy_from_slice(message));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;

    struct Scripted(VecDeque<Option<Bytes>>);

    impl MessageSource for Scripted {
        fn try_receive(&mut self) -> Result<Option<Bytes>> {
            Ok(self.0.pop_front().flatten())
        }
    }

    #[test]
    fn test_receive_polls_until_message() {
        let mut source = Scripted(VecDeque::from(vec![
            None,
            None,
            Some(Bytes::from_static(b"\xF0\x01\xF7")),
        ]));
        let message = source.receive(Duration::from_secs(1)).unwrap();
        assert_eq!(&message[..], b"\xF0\x01\xF7");
    }

    #[test]
    fn test_receive_times_out() {
        let mut source = Scripted(VecDeque::new());
        let started = Instant::now();
        let err = source.receive(Duration::from_millis(20)).unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_zero_timeout_still_polls_once() {
        let mut source = Scripted(VecDeque::from(vec![Some(Bytes::from_static(b"x"))]));
        assert!(source.receive(Duration::ZERO).is_ok());
    }

    #[test]
    fn test_vec_sink_records() {
        let mut sink: Vec<Bytes> = Vec::new();
        sink.send(b"ab").unwrap();
        let mut boxed: Box<dyn MessageSink> = Box::new(Vec::<Bytes>::new());
        boxed.send(b"cd").unwrap();
        assert_eq!(sink, vec![Bytes::from_static(b"ab")]);
    }
}
