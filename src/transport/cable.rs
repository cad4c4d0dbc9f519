//! In-process virtual MIDI cable.
//!
//! Behaves like a virtual MIDI port: every attached port observes every
//! message on the cable, including the ones it sent itself. Backed by
//! `tokio::sync::broadcast`, used through its non-async `send`/`try_recv`.

use bytes::Bytes;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

use super::{MessageSink, MessageSource};
use crate::error::{Error, Result};

/// Default number of buffered messages per port.
pub const DEFAULT_CABLE_CAPACITY: usize = 1024;

/// A shared wire. Cloning yields another handle to the same wire.
#[derive(Debug, Clone)]
pub struct VirtualCable {
    tx: broadcast::Sender<Bytes>,
}

impl VirtualCable {
    /// Create a cable buffering up to `capacity` messages per port.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Attach a port that sends and receives.
    ///
    /// The port only observes messages sent after it was attached.
    pub fn port(&self) -> CablePort {
        CablePort {
            tx: self.tx.clone(),
            rx: self.tx.subscribe(),
        }
    }

    /// Attach a send-only endpoint.
    pub fn sender(&self) -> CableSender {
        CableSender {
            tx: self.tx.clone(),
        }
    }

    /// Number of attached receiving ports.
    pub fn port_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for VirtualCable {
    fn default() -> Self {
        Self::new(DEFAULT_CABLE_CAPACITY)
    }
}

fn broadcast_send(tx: &broadcast::Sender<Bytes>, message: &[u8]) -> Result<()> {
    // No receiving port attached: the message is lost, as on a real wire.
    let _ = tx.send(Bytes::copy_from_slice(message));
    Ok(())
}

/// Send-only endpoint of a [`VirtualCable`].
#[derive(Debug, Clone)]
pub struct CableSender {
    tx: broadcast::Sender<Bytes>,
}

impl MessageSink for CableSender {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        broadcast_send(&self.tx, message)
    }
}

/// Bidirectional endpoint of a [`VirtualCable`].
#[derive(Debug)]
pub struct CablePort {
    tx: broadcast::Sender<Bytes>,
    rx: broadcast::Receiver<Bytes>,
}

impl MessageSink for CablePort {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        broadcast_send(&self.tx, message)
    }
}

impl MessageSource for CablePort {
    fn try_receive(&mut self) -> Result<Option<Bytes>> {
        loop {
            match self.rx.try_recv() {
                Ok(message) => return Ok(Some(message)),
                Err(TryRecvError::Empty) => return Ok(None),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Cable port fell behind, messages dropped");
                }
                Err(TryRecvError::Closed) => return Err(Error::ConnectionClosed),
            }
        }
    }
}
