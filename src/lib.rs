//! # sysexwire
//!
//! Request/response RPC over MIDI System Exclusive messages.
//!
//! A client process drives a host application whose only scripting surface
//! is a MIDI port. Clients claim a session id, then send EXEC and EVAL
//! requests that the host runs against a per-session scope. Results, raised
//! faults and captured console output come back as sysex frames.
//!
//! ## Architecture
//!
//! - **Protocol**: 7-bit sysex framing, fragmentation and reassembly
//! - **Transport**: two one-way channels (client→server, server→client)
//! - **Router**: foreign traffic, loopback suppression, client id filtering
//! - **Client**: session negotiation, version gate, synchronous requests
//! - **Server**: session table, dispatch, console capture, extensions
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sysexwire::{Client, VirtualCable};
//!
//! let requests = VirtualCable::default();
//! let responses = VirtualCable::default();
//!
//! let mut client = Client::builder().build(requests.sender(), responses.port());
//! client.hello(Duration::from_secs(1))?;
//! client.exec("x = 40")?;
//! let value = client.eval("x + 2")?;
//! println!("{}", value);
//! client.goodbye(0)?;
//! # Ok::<(), sysexwire::Error>(())
//! ```

pub mod codec;
pub mod error;
pub mod protocol;
pub mod router;
pub mod server;
pub mod transport;
pub mod value;

mod client;

pub use client::{
    Client, ClientBuilder, ClientConfig, ExtensionType, ForeignCallback, SessionState,
    StdoutCallback, DEFAULT_RESPONSE_TIMEOUT,
};
pub use error::{Error, Result};
pub use server::{ExecutionHost, Server, ServerBuilder, ServerConfig};
pub use transport::{MessageSink, MessageSource, VirtualCable};
pub use value::{Fault, Outcome, Value};
