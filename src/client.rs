//! Client builder and session.
//!
//! The [`ClientBuilder`] provides a fluent API for configuring the client.
//! The [`Client`] drives the session lifecycle:
//! 1. `hello` claims a random free client id
//! 2. The server version is checked before anything else is sent
//! 3. `exec` / `eval` / extension calls, one outstanding request at a time
//! 4. `goodbye` releases the id (also attempted on drop)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use sysexwire::{Client, VirtualCable};
//!
//! let requests = VirtualCable::default();
//! let responses = VirtualCable::default();
//!
//! let mut client = Client::builder()
//!     .response_timeout(Duration::from_millis(200))
//!     .stdout_callback(|text| eprint!("[host] {}", text))
//!     .build(requests.sender(), responses.port());
//!
//! client.hello(Duration::from_secs(2))?;
//! let four = client.eval("2+2")?;
//! client.goodbye(0)?;
//! # Ok::<(), sysexwire::Error>(())
//! ```

use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::seq::SliceRandom;
use tracing::{debug, info, trace, warn};

use crate::codec::Armour;
use crate::error::{Error, Result};
use crate::protocol::{
    identity_reply, Frame, FrameCodec, MessageType, Status, Version, BROADCAST_CLIENT_ID,
    MAX_CLIENT_ID, MAX_DATA_LEN,
};
use crate::router::{encode_exit_code, Inbound, Role, Router};
use crate::transport::{MessageSink, MessageSource};
use crate::value::{Outcome, Value};

/// Default wait for one response.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(100);

/// Callback receiving console text relayed by the server.
pub type StdoutCallback = Box<dyn FnMut(&str) + Send>;

/// Callback receiving non-protocol MIDI traffic.
pub type ForeignCallback = Box<dyn FnMut(&[u8]) + Send>;

/// Negotiation state of a [`Client`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No client id held.
    Disconnected,
    /// Claiming a client id.
    Negotiating,
    /// Holding a verified client id.
    Connected,
}

/// Message type tag bound to a capability for this session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExtensionType(u8);

impl ExtensionType {
    /// Wire tag.
    pub fn tag(self) -> u8 {
        self.0
    }

    /// Message type carrying this tag.
    pub fn message_type(self) -> MessageType {
        MessageType::Extension(self.0)
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Wait for one response, and for each hello attempt.
    pub response_timeout: Duration,
    /// Per-unit payload limit for outgoing frames.
    pub max_data_len: usize,
    /// Protocol version this client speaks.
    pub version: Version,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
            max_data_len: MAX_DATA_LEN,
            version: Version::CURRENT,
        }
    }
}

/// Builder for configuring and creating a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    stdout_callback: Option<StdoutCallback>,
    foreign_callback: Option<ForeignCallback>,
}

impl ClientBuilder {
    /// Create a new client builder.
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            stdout_callback: None,
            foreign_callback: None,
        }
    }

    /// Set the wait for one response.
    ///
    /// Default: 100 ms
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.config.response_timeout = timeout;
        self
    }

    /// Set the per-unit payload limit for outgoing frames.
    ///
    /// Default: [`MAX_DATA_LEN`]
    pub fn max_data_len(mut self, max_data_len: usize) -> Self {
        self.config.max_data_len = max_data_len;
        self
    }

    /// Override the protocol version this client reports and expects.
    pub fn version(mut self, version: Version) -> Self {
        self.config.version = version;
        self
    }

    /// Receive console text relayed by the server.
    ///
    /// Default: print to standard output.
    pub fn stdout_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.stdout_callback = Some(Box::new(callback));
        self
    }

    /// Receive non-protocol MIDI traffic seen while waiting for responses.
    ///
    /// Default: discard.
    pub fn foreign_callback<F>(mut self, callback: F) -> Self
    where
        F: FnMut(&[u8]) + Send + 'static,
    {
        self.foreign_callback = Some(Box::new(callback));
        self
    }

    /// Build a disconnected client over a request sink and a response source.
    pub fn build<K, S>(self, sink: K, source: S) -> Client
    where
        K: MessageSink + Send + 'static,
        S: MessageSource + Send + 'static,
    {
        Client {
            codec: FrameCodec::with_max_data_len(self.config.max_data_len),
            config: self.config,
            router: Router::new(Role::Client),
            sink: Box::new(sink),
            source: Box::new(source),
            state: SessionState::Disconnected,
            on_stdout: self
                .stdout_callback
                .unwrap_or_else(|| Box::new(|text| print!("{}", text))),
            on_foreign: self.foreign_callback,
        }
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A client session with one server.
pub struct Client {
    config: ClientConfig,
    codec: FrameCodec,
    router: Router,
    sink: Box<dyn MessageSink + Send>,
    source: Box<dyn MessageSource + Send>,
    state: SessionState,
    on_stdout: StdoutCallback,
    on_foreign: Option<ForeignCallback>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Current negotiation state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Client id held by this session, once connected.
    pub fn client_id(&self) -> Option<u8> {
        match self.state {
            SessionState::Connected => self.router.bound_id(),
            _ => None,
        }
    }

    /// Whether a verified session is held.
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Active configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Claim a client id and verify the server version.
    ///
    /// Candidate ids 1..=127 are tried in random order, each with its own
    /// response wait. The first pass always covers every id, so a zero
    /// `timeout` still tries each one once. Further passes, reshuffled,
    /// continue until `timeout` has elapsed. Returns the claimed id.
    ///
    /// # Errors
    ///
    /// - `Connection` if no candidate was accepted within `timeout`
    /// - `VersionMismatch` if the server speaks another version
    /// - `ServerExit` if the server shut down meanwhile
    pub fn hello(&mut self, timeout: Duration) -> Result<u8> {
        if let Some(id) = self.client_id() {
            return Ok(id);
        }

        self.state = SessionState::Negotiating;
        let started = Instant::now();
        let deadline = started + timeout;

        let mut candidates: Vec<u8> = (1..=MAX_CLIENT_ID).collect();
        let mut attempts = 0usize;
        let mut claimed = None;
        'search: loop {
            candidates.shuffle(&mut rand::rng());
            for &id in &candidates {
                self.router.bind(Some(id));
                attempts += 1;
                match self.claim(id) {
                    Ok(true) => {
                        claimed = Some(id);
                        break 'search;
                    }
                    Ok(false) => {
                        debug!(client_id = id, "Candidate id held or claimed by another peer");
                    }
                    Err(e) => {
                        self.reset();
                        return Err(e);
                    }
                }
                if attempts > candidates.len() && Instant::now() >= deadline {
                    break 'search;
                }
            }
            if Instant::now() >= deadline {
                break;
            }
        }

        let Some(id) = claimed else {
            self.reset();
            return Err(Error::Connection(format!(
                "No client id accepted after {:?} ({} attempts). Is the server running?",
                started.elapsed(),
                attempts
            )));
        };

        match self.version_query() {
            Ok(server) if server == self.config.version => {
                self.state = SessionState::Connected;
                info!(client_id = id, version = %server, "Session connected");
                Ok(id)
            }
            Ok(server) => {
                self.release_after_failed_check();
                Err(Error::VersionMismatch {
                    client: self.config.version,
                    server,
                })
            }
            Err(e) => {
                self.release_after_failed_check();
                Err(e)
            }
        }
    }

    /// Release the session, passing `code` to the server.
    ///
    /// The server echoes the goodbye back, which confirms the release. The
    /// client is disconnected afterwards even if no echo arrives.
    pub fn goodbye(&mut self, code: i32) -> Result<()> {
        let Some(id) = self.router.bound_id() else {
            self.reset();
            return Ok(());
        };

        let sent = encode_exit_code(code).and_then(|payload| {
            self.send_frame(&Frame::request(id, MessageType::ClientGoodbye, payload))
        });
        if let Err(e) = sent {
            self.reset();
            return Err(e);
        }

        let result = self.await_response(MessageType::ClientGoodbye, self.config.response_timeout);
        self.reset();
        match result {
            Err(Error::ClientExit(_)) | Err(Error::ServerExit) => Ok(()),
            Err(Error::Timeout(_)) | Err(Error::ConnectionClosed) => {
                debug!(client_id = id, "Goodbye not confirmed");
                Ok(())
            }
            Err(e) => Err(e),
            Ok(frame) => Err(Error::ProtocolMismatch {
                expected: MessageType::ClientGoodbye,
                received: frame.msg_type,
            }),
        }
    }

    /// Ask the server for its protocol version.
    pub fn version_query(&mut self) -> Result<Version> {
        let frame = self.request(MessageType::VersionQuery, Bytes::new())?;
        match frame.status {
            Status::Ok => Version::from_bytes(&frame.payload),
            status => Err(Self::failure(status, &frame.payload)),
        }
    }

    /// Run statements in this client's scope on the server.
    ///
    /// # Errors
    ///
    /// `Application` carries the fault raised by the statements.
    pub fn exec(&mut self, code: &str) -> Result<()> {
        self.require_connected()?;
        let frame = self.request(MessageType::Exec, Armour::encode_text(code))?;
        Outcome::from_payload(frame.status, &frame.payload)?
            .into_result()
            .map(|_| ())
    }

    /// Evaluate an expression in this client's scope on the server.
    pub fn eval(&mut self, expr: &str) -> Result<Value> {
        self.require_connected()?;
        let frame = self.request(MessageType::Eval, Armour::encode_text(expr))?;
        Outcome::from_payload(frame.status, &frame.payload)?.into_result()
    }

    /// Bind a server capability to a message type tag for this session.
    pub fn register_extension(&mut self, capability: &str) -> Result<ExtensionType> {
        self.require_connected()?;
        let frame = self.request(
            MessageType::RegisterExtension,
            Armour::encode_text(capability),
        )?;
        match (frame.status, frame.payload()) {
            (Status::Ok, [tag]) => Ok(ExtensionType(*tag)),
            (Status::Ok, other) => Err(Error::InvalidFrame(format!(
                "Extension tag payload must be 1 byte, got {}",
                other.len()
            ))),
            (status, payload) => Err(Self::failure(status, payload)),
        }
    }

    /// Send an extension message and return the server's OK reply.
    ///
    /// The payload is opaque to the protocol but must be 7-bit.
    pub fn send_extension(&mut self, extension: ExtensionType, payload: Bytes) -> Result<Frame> {
        self.require_connected()?;
        let frame = self.request(extension.message_type(), payload)?;
        match frame.status {
            Status::Ok => Ok(frame),
            status => Err(Self::failure(status, &frame.payload)),
        }
    }

    /// Send console text to be printed on the host.
    pub fn send_stdout(&mut self, text: &str) -> Result<()> {
        self.require_connected()?;
        let id = self.bound_id()?;
        self.send_frame(&Frame::request(
            id,
            MessageType::Stdout,
            Armour::encode_text(text),
        ))
    }

    /// Say goodbye if connected. Errors are logged, not returned.
    pub fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if let Err(e) = self.goodbye(0) {
            warn!(error = %e, "Goodbye on close failed");
        }
    }

    fn require_connected(&self) -> Result<()> {
        match self.state {
            SessionState::Connected => Ok(()),
            _ => Err(Error::NotConnected),
        }
    }

    fn bound_id(&self) -> Result<u8> {
        self.router.bound_id().ok_or(Error::NotConnected)
    }

    fn reset(&mut self) {
        self.state = SessionState::Disconnected;
        self.router.bind(None);
    }

    fn release_after_failed_check(&mut self) {
        if let Err(e) = self.goodbye(0) {
            debug!(error = %e, "Goodbye after failed version check failed");
        }
    }

    fn failure(status: Status, payload: &[u8]) -> Error {
        match Outcome::from_payload(status, payload) {
            Ok(Outcome::AppFault(fault)) => Error::Application(fault),
            Ok(Outcome::ServerFailure { message }) => Error::ServerFailure(message),
            Ok(Outcome::Ok(_)) => Error::InvalidFrame("Unexpected OK status".to_string()),
            Err(e) => e,
        }
    }

    /// Send one hello for `id`, tagged with a fresh nonce.
    ///
    /// Only an OK echoing that nonce accepts the id. Replies to another
    /// peer's hello for the same id are skipped. `Ok(false)` when no such OK
    /// arrived within the response wait: the id is held or was just claimed
    /// by another peer.
    fn claim(&mut self, id: u8) -> Result<bool> {
        let nonce = Armour::encode(&rand::random::<u32>().to_be_bytes());
        self.send_frame(&Frame::request(id, MessageType::ClientHello, nonce.clone()))?;

        let deadline = Instant::now() + self.config.response_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.await_response(MessageType::ClientHello, remaining) {
                Ok(frame) if frame.is_ok() && frame.payload == nonce => return Ok(true),
                Ok(_) => trace!(client_id = id, "Hello reply belongs to another claimant"),
                Err(Error::Timeout(_)) => return Ok(false),
                Err(e) => return Err(e),
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
        }
    }

    fn request(&mut self, msg_type: MessageType, payload: Bytes) -> Result<Frame> {
        let id = self.bound_id()?;
        self.send_frame(&Frame::request(id, msg_type, payload))?;
        self.await_response(msg_type, self.config.response_timeout)
    }

    fn send_frame(&mut self, frame: &Frame) -> Result<()> {
        for unit in self.codec.encode(frame)? {
            self.sink.send(&unit)?;
        }
        Ok(())
    }

    /// Poll for the response to the outstanding request.
    ///
    /// Control events are handled on the way: console text goes to the
    /// callback, identity enquiries are answered, goodbyes end the session.
    fn await_response(&mut self, expected: MessageType, timeout: Duration) -> Result<Frame> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let message = match self.source.receive(remaining) {
                Ok(message) => message,
                Err(Error::Timeout(_)) => return Err(Error::Timeout(timeout)),
                Err(e) => return Err(e),
            };

            let inbound = match self.router.route(&message) {
                Ok(Some(inbound)) => inbound,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "Discarding invalid message");
                    continue;
                }
            };

            let negotiating = self.state == SessionState::Negotiating;
            match inbound {
                Inbound::Frame(frame) if frame.msg_type == expected => return Ok(frame),
                // the candidate id may belong to a live session of another client
                Inbound::Frame(frame) if negotiating => {
                    trace!(msg_type = ?frame.msg_type, "Ignoring traffic of another session");
                }
                Inbound::Stdout { client_id, .. }
                    if negotiating && client_id != BROADCAST_CLIENT_ID =>
                {
                    trace!(client_id, "Ignoring output of another session");
                }
                Inbound::ClientGoodbye { client_id, .. } if negotiating => {
                    trace!(client_id, "Ignoring goodbye of another session");
                }
                Inbound::Frame(frame) => {
                    return Err(Error::ProtocolMismatch {
                        expected,
                        received: frame.msg_type,
                    })
                }
                Inbound::Stdout { text, .. } => (self.on_stdout)(text.as_str()),
                Inbound::ClientGoodbye { code, .. } => {
                    info!(code, "Server ended this session");
                    self.reset();
                    return Err(Error::ClientExit(code));
                }
                Inbound::ServerGoodbye => {
                    info!("Server disconnected");
                    self.reset();
                    return Err(Error::ServerExit);
                }
                Inbound::IdentityEnquiry => {
                    let reply = identity_reply(self.config.version);
                    self.sink.send(&reply)?;
                }
                Inbound::Foreign(bytes) => {
                    if let Some(callback) = self.on_foreign.as_mut() {
                        callback(&bytes[..]);
                    }
                }
            }
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}
