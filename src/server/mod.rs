//! Server module - session manager and dispatch.
//!
//! The host calls [`Server::on_sysex`] once per received sysex message. The
//! server routes it, manages the session table, runs EXEC/EVAL against the
//! client's scope through an [`ExecutionHost`], relays captured output as
//! STDOUT, and sends the response.
//!
//! Provides:
//! - [`Server`] / [`ServerBuilder`] - dispatch and configuration
//! - [`SessionTable`] - claimed client ids and their scopes
//! - [`Console`] - host console with per-request capture
//! - [`ExtensionRegistry`] - named capabilities bound to runtime type tags
//! - [`Relay`] - INTERNAL → SERVER re-emitter
//!
//! # Example
//!
//! ```no_run
//! use sysexwire::server::{Console, ExecutionHost, Server};
//! use sysexwire::value::{Fault, Value};
//! use sysexwire::VirtualCable;
//!
//! struct Echo;
//!
//! impl ExecutionHost for Echo {
//!     type Scope = ();
//!
//!     fn execute(&mut self, code: &str, _: &mut (), console: &mut Console) -> Result<(), Fault> {
//!         console.print(code);
//!         Ok(())
//!     }
//!
//!     fn evaluate(&mut self, expr: &str, _: &mut (), _: &mut Console) -> Result<Value, Fault> {
//!         Ok(Value::from(expr))
//!     }
//! }
//!
//! let requests = VirtualCable::default();
//! let responses = VirtualCable::default();
//! let mut inbound = requests.port();
//! let mut server = Server::builder(Echo).build(responses.sender());
//!
//! loop {
//!     server.pump(&mut inbound)?;
//!     # break;
//! }
//! # Ok::<(), sysexwire::Error>(())
//! ```

mod capture;
mod extension;
mod host;
mod relay;
mod session;

use std::io::Write;

use bytes::Bytes;
use tracing::{debug, error, info, trace, warn};

use crate::codec::Armour;
use crate::error::Result;
use crate::protocol::{
    identity_reply, Frame, FrameCodec, MessageType, Origin, Status, Version,
    BROADCAST_CLIENT_ID, MAX_DATA_LEN,
};
use crate::router::{encode_exit_code, Inbound, Role, Router};
use crate::transport::{MessageSink, MessageSource};
use crate::value::{Outcome, Value};

pub use capture::{CaptureGuard, Captured, Console};
pub use extension::{
    ExtensionHandler, ExtensionRegistry, Reply, SessionExtensions, MAX_EXTENSION_TAG,
};
pub use host::ExecutionHost;
pub use relay::Relay;
pub use session::{ClaimRefusal, ClientSession, SessionTable, DEFAULT_MAX_SESSIONS};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Protocol version reported to clients.
    pub version: Version,
    /// Maximum concurrent sessions. Further hellos are ignored.
    ///
    /// A claim whose OK reached no client (its wait had already expired)
    /// still holds a slot until [`Server::kick`] or [`Server::shutdown`].
    pub max_sessions: usize,
    /// Origin stamped on outgoing frames. `Internal` when a [`Relay`] forwards them.
    pub response_origin: Origin,
    /// Per-unit payload limit for outgoing frames.
    pub max_data_len: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            version: Version::CURRENT,
            max_sessions: DEFAULT_MAX_SESSIONS,
            response_origin: Origin::Server,
            max_data_len: MAX_DATA_LEN,
        }
    }
}

/// Builder for configuring and creating a [`Server`].
pub struct ServerBuilder<H: ExecutionHost> {
    host: H,
    config: ServerConfig,
    extensions: ExtensionRegistry<H::Scope>,
    console: Option<Console>,
}

impl<H: ExecutionHost> ServerBuilder<H> {
    /// Create a builder around an execution host.
    pub fn new(host: H) -> Self {
        Self {
            host,
            config: ServerConfig::default(),
            extensions: ExtensionRegistry::new(),
            console: None,
        }
    }

    /// Override the reported protocol version.
    pub fn version(mut self, version: Version) -> Self {
        self.config.version = version;
        self
    }

    /// Limit concurrent sessions.
    ///
    /// Abandoned claims count against the limit until kicked.
    ///
    /// Default: 127 (every claimable id)
    pub fn max_sessions(mut self, max_sessions: usize) -> Self {
        self.config.max_sessions = max_sessions;
        self
    }

    /// Set the origin of outgoing frames.
    ///
    /// Default: [`Origin::Server`]
    pub fn response_origin(mut self, origin: Origin) -> Self {
        self.config.response_origin = origin;
        self
    }

    /// Set the per-unit payload limit for outgoing frames.
    pub fn max_data_len(mut self, max_data_len: usize) -> Self {
        self.config.max_data_len = max_data_len;
        self
    }

    /// Offer a named capability to clients.
    pub fn extension<F>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(&[u8], &mut H::Scope, &mut Console) -> Reply + Send + Sync + 'static,
    {
        self.extensions.register(name, handler);
        self
    }

    /// Send local host output to `writer` instead of standard output.
    pub fn console_output<W: Write + Send + 'static>(mut self, writer: W) -> Self {
        self.console = Some(Console::new(writer));
        self
    }

    /// Build the server, sending responses into `sink`.
    pub fn build<K: MessageSink + Send + 'static>(self, sink: K) -> Server<H> {
        info!(
            version = %self.config.version,
            max_sessions = self.config.max_sessions,
            extensions = self.extensions.len(),
            "sysexwire server ready"
        );
        Server {
            codec: FrameCodec::with_max_data_len(self.config.max_data_len),
            sessions: SessionTable::new(self.config.max_sessions),
            config: self.config,
            host: self.host,
            extensions: self.extensions,
            console: self.console.unwrap_or_default(),
            router: Router::new(Role::Server),
            sink: Box::new(sink),
        }
    }
}

/// Session manager and request dispatcher.
pub struct Server<H: ExecutionHost> {
    config: ServerConfig,
    codec: FrameCodec,
    router: Router,
    host: H,
    sessions: SessionTable<H::Scope>,
    extensions: ExtensionRegistry<H::Scope>,
    console: Console,
    sink: Box<dyn MessageSink + Send>,
}

impl<H: ExecutionHost> Server<H> {
    /// Create a new server builder.
    pub fn builder(host: H) -> ServerBuilder<H> {
        ServerBuilder::new(host)
    }

    /// Active configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Check if `client_id` holds a session.
    pub fn has_session(&self, client_id: u8) -> bool {
        self.sessions.contains(client_id)
    }

    /// Client ids of live sessions, sorted.
    pub fn session_ids(&self) -> Vec<u8> {
        self.sessions.ids()
    }

    /// Host console, for output the host produces itself.
    pub fn console(&mut self) -> &mut Console {
        &mut self.console
    }

    /// Execution host.
    pub fn host(&mut self) -> &mut H {
        &mut self.host
    }

    /// Handle one received sysex message.
    ///
    /// Malformed and foreign messages are logged and dropped.
    ///
    /// # Errors
    ///
    /// Only failures of the response sink are returned.
    pub fn on_sysex(&mut self, message: &[u8]) -> Result<()> {
        match self.router.route(message) {
            Ok(Some(inbound)) => self.dispatch(inbound),
            Ok(None) => Ok(()),
            Err(e) => {
                warn!(error = %e, len = message.len(), "Discarding invalid message");
                Ok(())
            }
        }
    }

    /// Handle every message currently waiting in `source`.
    ///
    /// Returns the number of messages handled.
    pub fn pump<S: MessageSource + ?Sized>(&mut self, source: &mut S) -> Result<usize> {
        let mut handled = 0;
        while let Some(message) = source.try_receive()? {
            self.on_sysex(&message)?;
            handled += 1;
        }
        Ok(handled)
    }

    /// Force a client to exit with `code`, dropping its session.
    pub fn kick(&mut self, client_id: u8, code: i32) -> Result<()> {
        if self.release(client_id) {
            info!(client_id, code, "Session ended by host");
        }
        self.send_goodbye(client_id, code)
    }

    /// Tell every client the server is going away and drop all sessions.
    pub fn shutdown(&mut self) -> Result<()> {
        info!(sessions = self.sessions.len(), "Server shutting down");
        self.sessions.clear();
        self.router.bind(None);
        self.respond(
            BROADCAST_CLIENT_ID,
            MessageType::ServerGoodbye,
            Status::Ok,
            Bytes::new(),
        )
    }

    /// Send host output to every client as STDOUT.
    pub fn broadcast_stdout(&mut self, text: &str) -> Result<()> {
        self.respond(
            BROADCAST_CLIENT_ID,
            MessageType::Stdout,
            Status::Ok,
            Armour::encode_text(text),
        )
    }

    fn dispatch(&mut self, inbound: Inbound) -> Result<()> {
        match inbound {
            Inbound::Frame(frame) => self.handle_frame(frame),
            Inbound::Stdout { client_id, text } => {
                trace!(client_id, len = text.len(), "Client output");
                self.console.host_print(&text);
                Ok(())
            }
            Inbound::ClientGoodbye { client_id, code } => {
                if self.release(client_id) {
                    info!(client_id, code, "Session released");
                } else {
                    debug!(client_id, "Goodbye from client without session");
                }
                self.send_goodbye(client_id, code)
            }
            Inbound::IdentityEnquiry => {
                let reply = identity_reply(self.config.version);
                self.sink.send(&reply)
            }
            Inbound::ServerGoodbye => Ok(()),
            Inbound::Foreign(bytes) => {
                trace!(len = bytes.len(), "Ignoring foreign MIDI traffic");
                Ok(())
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        let client_id = frame.client_id;
        match frame.msg_type {
            MessageType::ClientHello => self.handle_hello(client_id, frame.payload),
            MessageType::VersionQuery => {
                let version = Bytes::copy_from_slice(&self.config.version.to_bytes());
                self.respond(client_id, MessageType::VersionQuery, Status::Ok, version)
            }
            _ if !self.sessions.contains(client_id) => {
                debug!(client_id, msg_type = ?frame.msg_type, "Request without session");
                self.fail(
                    client_id,
                    frame.msg_type,
                    &format!("Client {} has no session. Say hello first.", client_id),
                )
            }
            MessageType::Exec | MessageType::Eval => self.handle_code(frame),
            MessageType::RegisterExtension => self.handle_register(frame),
            MessageType::Extension(tag) => self.handle_extension(tag, frame),
            other => self.fail(
                client_id,
                other,
                &format!("Unknown message type 0x{:02X}", other.as_u8()),
            ),
        }
    }

    /// Claim `client_id`, echoing the claimant's nonce so only it accepts the reply.
    fn handle_hello(&mut self, client_id: u8, nonce: Bytes) -> Result<()> {
        match self.sessions.claim(client_id) {
            Ok(_) => {
                info!(client_id, "Session bound");
                self.respond(client_id, MessageType::ClientHello, Status::Ok, nonce)
            }
            Err(refusal) => {
                // no reply: the client times out and tries another id
                debug!(client_id, ?refusal, "Ignoring hello");
                Ok(())
            }
        }
    }

    fn handle_code(&mut self, frame: Frame) -> Result<()> {
        let client_id = frame.client_id;
        let source = match Armour::decode_text(&frame.payload) {
            Ok(source) => source,
            Err(e) => return self.fail(client_id, frame.msg_type, &e.to_string()),
        };

        let Some(session) = self.sessions.get_mut(client_id) else {
            return Ok(());
        };
        let mut guard = self.console.capture(client_id);
        let outcome = match frame.msg_type {
            MessageType::Eval => Outcome::from(self.host.evaluate(
                &source,
                &mut session.scope,
                guard.console(),
            )),
            _ => match self.host.execute(&source, &mut session.scope, guard.console()) {
                Ok(()) => Outcome::Ok(Value::Nil),
                Err(fault) => Outcome::AppFault(fault),
            },
        };
        let captured = guard.finish();

        if let Outcome::AppFault(fault) = &outcome {
            debug!(client_id, %fault, "Request raised a fault");
        }
        self.relay_captured(captured)?;

        match outcome.into_payload() {
            Ok((status, payload)) => self.respond(client_id, frame.msg_type, status, payload),
            Err(e) => {
                error!(client_id, error = %e, "Failed to encode result");
                self.fail(client_id, frame.msg_type, &format!("Result not serializable: {}", e))
            }
        }
    }

    fn handle_register(&mut self, frame: Frame) -> Result<()> {
        let client_id = frame.client_id;
        let name = match Armour::decode_text(&frame.payload) {
            Ok(name) => name,
            Err(e) => return self.fail(client_id, frame.msg_type, &e.to_string()),
        };
        let Some(handler) = self.extensions.get(&name) else {
            return self.fail(
                client_id,
                frame.msg_type,
                &format!("Unknown capability '{}'", name),
            );
        };
        let Some(session) = self.sessions.get_mut(client_id) else {
            return Ok(());
        };
        match session.extensions.bind(&name, handler) {
            Some(tag) => {
                info!(client_id, capability = %name, tag, "Extension bound");
                self.respond(
                    client_id,
                    frame.msg_type,
                    Status::Ok,
                    Bytes::copy_from_slice(&[tag]),
                )
            }
            None => self.fail(client_id, frame.msg_type, "No extension type tags left"),
        }
    }

    fn handle_extension(&mut self, tag: u8, frame: Frame) -> Result<()> {
        let client_id = frame.client_id;
        let Some(session) = self.sessions.get_mut(client_id) else {
            return Ok(());
        };
        let Some(handler) = session.extensions.get(tag) else {
            return self.fail(
                client_id,
                frame.msg_type,
                &format!("Unknown message type 0x{:02X}", tag),
            );
        };

        let mut guard = self.console.capture(client_id);
        let reply = handler(&frame.payload[..], &mut session.scope, guard.console());
        let captured = guard.finish();

        self.relay_captured(captured)?;
        self.respond(client_id, frame.msg_type, reply.status, reply.payload)
    }

    fn relay_captured(&mut self, captured: Option<Captured>) -> Result<()> {
        match captured {
            Some(captured) => self.respond(
                captured.client_id,
                MessageType::Stdout,
                Status::Ok,
                Armour::encode_text(&captured.text),
            ),
            None => Ok(()),
        }
    }

    fn release(&mut self, client_id: u8) -> bool {
        self.router.forget(client_id);
        self.sessions.release(client_id).is_some()
    }

    fn send_goodbye(&mut self, client_id: u8, code: i32) -> Result<()> {
        let payload = encode_exit_code(code)?;
        self.respond(client_id, MessageType::ClientGoodbye, Status::Ok, payload)
    }

    fn fail(&mut self, client_id: u8, msg_type: MessageType, message: &str) -> Result<()> {
        self.respond(client_id, msg_type, Status::Fail, Armour::encode_text(message))
    }

    fn respond(
        &mut self,
        client_id: u8,
        msg_type: MessageType,
        status: Status,
        payload: Bytes,
    ) -> Result<()> {
        let frame = Frame::new(self.config.response_origin, client_id, msg_type, status, payload);
        let units = match self.codec.encode(&frame) {
            Ok(units) => units,
            Err(e) if status != Status::Fail => {
                error!(client_id, error = %e, "Response could not be framed");
                return self.fail(client_id, msg_type, &e.to_string());
            }
            Err(e) => return Err(e),
        };
        for unit in units {
            self.sink.send(&unit)?;
        }
        Ok(())
    }
}
