//! Shared fixtures for integration tests.
//!
//! [`ScriptHost`] understands a tiny line-based language:
//! - `name = expr` assigns, `print(expr)` prints, `raise Kind('msg')` faults
//! - expressions: integers, quoted strings, names, `a + b`, `repeat('s', n)`,
//!   `None`, `True`, `False`

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use bytes::Bytes;
use sysexwire::protocol::{Frame, FrameCodec, Reassembler};
use sysexwire::server::{Console, Relay, ServerBuilder};
use sysexwire::transport::{CablePort, CableSender};
use sysexwire::{Client, ClientBuilder, ExecutionHost, Fault, MessageSink, MessageSource, Server, Value, VirtualCable};

/// Scope of one session.
pub type Scope = HashMap<String, Value>;

/// Toy execution host.
#[derive(Debug, Default)]
pub struct ScriptHost;

impl ExecutionHost for ScriptHost {
    type Scope = Scope;

    fn execute(&mut self, code: &str, scope: &mut Scope, console: &mut Console) -> Result<(), Fault> {
        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix("raise ") {
                return Err(parse_raise(rest));
            }
            if let Some((name, expr)) = split_assignment(line) {
                let value = eval_expr(expr, scope, console)?;
                scope.insert(name.to_string(), value);
                continue;
            }
            eval_expr(line, scope, console)?;
        }
        Ok(())
    }

    fn evaluate(&mut self, expr: &str, scope: &mut Scope, console: &mut Console) -> Result<Value, Fault> {
        eval_expr(expr.trim(), scope, console)
    }
}

fn parse_raise(rest: &str) -> Fault {
    match rest.split_once('(') {
        Some((kind, args)) => Fault::new(kind.trim(), unquote(args.trim_end_matches(')').trim())),
        None => Fault::new(rest.trim(), ""),
    }
}

fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let (name, expr) = line.split_once('=')?;
    let name = name.trim();
    let is_ident = !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    is_ident.then_some((name, expr.trim()))
}

fn unquote(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"')
}

fn is_quoted(s: &str) -> bool {
    s.len() >= 2 && (s.starts_with('\'') || s.starts_with('"')) && s.ends_with(s.as_bytes()[0] as char)
}

fn eval_expr(expr: &str, scope: &mut Scope, console: &mut Console) -> Result<Value, Fault> {
    if let Some(inner) = expr.strip_prefix("print(").and_then(|e| e.strip_suffix(')')) {
        let value = eval_expr(inner.trim(), scope, console)?;
        match value {
            Value::Str(text) => console.print(&format!("{}\n", text)),
            other => console.print(&format!("{}\n", other)),
        }
        return Ok(Value::Nil);
    }
    if let Some(inner) = expr.strip_prefix("repeat(").and_then(|e| e.strip_suffix(')')) {
        let (text, count) = inner
            .split_once(',')
            .ok_or_else(|| Fault::new("TypeError", "repeat() takes 2 arguments"))?;
        let count = eval_expr(count.trim(), scope, console)?
            .as_int()
            .ok_or_else(|| Fault::new("TypeError", "count must be an integer"))?;
        let text = eval_expr(text.trim(), scope, console)?;
        let text = text
            .as_str()
            .ok_or_else(|| Fault::new("TypeError", "text must be a string"))?;
        return Ok(Value::Str(text.repeat(count.max(0) as usize)));
    }
    if !is_quoted(expr) {
        if let Some((lhs, rhs)) = expr.split_once('+') {
            let lhs = eval_expr(lhs.trim(), scope, console)?;
            let rhs = eval_expr(rhs.trim(), scope, console)?;
            return match (lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(a + &b)),
                _ => Err(Fault::new("TypeError", "unsupported operand types for +")),
            };
        }
    }
    atom(expr, scope)
}

fn atom(expr: &str, scope: &Scope) -> Result<Value, Fault> {
    match expr {
        "None" => return Ok(Value::Nil),
        "True" => return Ok(Value::Bool(true)),
        "False" => return Ok(Value::Bool(false)),
        _ => {}
    }
    if let Ok(n) = expr.parse::<i64>() {
        return Ok(Value::Int(n));
    }
    if is_quoted(expr) {
        return Ok(Value::Str(unquote(expr).to_string()));
    }
    scope
        .get(expr)
        .cloned()
        .ok_or_else(|| Fault::new("NameError", format!("name '{}' is not defined", expr)))
}

type Job = Box<dyn FnOnce(&mut Server<ScriptHost>) + Send>;

/// A server running on a background thread over two virtual cables.
pub struct Harness {
    pub requests: VirtualCable,
    pub responses: VirtualCable,
    jobs: mpsc::Sender<Job>,
    stop: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
}

impl Harness {
    /// Start a default server.
    pub fn start() -> Self {
        Self::start_with(|builder| builder, false)
    }

    /// Start a server configured by `configure`.
    ///
    /// With `relayed`, the server emits INTERNAL frames on an internal cable
    /// and a [`Relay`] thread forwards them to clients.
    pub fn start_with<F>(configure: F, relayed: bool) -> Self
    where
        F: FnOnce(ServerBuilder<ScriptHost>) -> ServerBuilder<ScriptHost> + Send + 'static,
    {
        let requests = VirtualCable::new(4096);
        let responses = VirtualCable::new(4096);
        let stop = Arc::new(AtomicBool::new(false));
        let (jobs, job_rx) = mpsc::channel::<Job>();
        let mut threads = Vec::new();

        let mut inbound = requests.port();
        let internal = VirtualCable::new(4096);
        let server_sink: Box<dyn MessageSink + Send> = if relayed {
            let mut relay_in = internal.port();
            let mut relay = Relay::new(responses.sender());
            let stop = Arc::clone(&stop);
            threads.push(std::thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    match relay_in.try_receive() {
                        Ok(Some(message)) => {
                            relay.on_sysex(&message).expect("relay send");
                        }
                        Ok(None) => std::thread::sleep(Duration::from_micros(100)),
                        Err(e) => panic!("relay receive failed: {}", e),
                    }
                }
            }));
            Box::new(internal.sender())
        } else {
            Box::new(responses.sender())
        };

        let server_stop = Arc::clone(&stop);
        threads.push(std::thread::spawn(move || {
            let builder = Server::builder(ScriptHost).console_output(std::io::sink());
            let mut server = configure(builder).build(server_sink);
            loop {
                while let Ok(job) = job_rx.try_recv() {
                    job(&mut server);
                }
                if server_stop.load(Ordering::SeqCst) {
                    break;
                }
                if server.pump(&mut inbound).expect("server pump") == 0 {
                    std::thread::sleep(Duration::from_micros(100));
                }
            }
        }));

        Self {
            requests,
            responses,
            jobs,
            stop,
            threads,
        }
    }

    /// Client builder with test-friendly timeouts.
    pub fn client_builder(&self) -> ClientBuilder {
        Client::builder().response_timeout(Duration::from_millis(500))
    }

    /// Build a client on this harness' cables.
    pub fn build(&self, builder: ClientBuilder) -> Client {
        builder.build(self.requests.sender(), self.responses.port())
    }

    /// Build and connect a client.
    pub fn connect(&self) -> Client {
        let mut client = self.build(self.client_builder());
        client.hello(Duration::from_secs(2)).expect("hello");
        client
    }

    /// Run `f` on the server thread and wait for its result.
    pub fn with_server<T, F>(&self, f: F) -> T
    where
        T: Send + 'static,
        F: FnOnce(&mut Server<ScriptHost>) -> T + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        self.jobs
            .send(Box::new(move |server| {
                let _ = tx.send(f(server));
            }))
            .expect("server thread alive");
        rx.recv_timeout(Duration::from_secs(5)).expect("server job result")
    }

    /// A raw peer sending on the request cable and listening on the response cable.
    pub fn raw_peer(&self) -> RawPeer {
        RawPeer {
            out: self.requests.sender(),
            input: self.responses.port(),
            codec: FrameCodec::new(),
            reassembler: Reassembler::keyed(),
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
    }
}

/// Hand-driven peer for wire-level assertions.
pub struct RawPeer {
    out: CableSender,
    input: CablePort,
    codec: FrameCodec,
    reassembler: Reassembler,
}

impl RawPeer {
    pub fn send(&mut self, frame: &Frame) {
        for unit in self.codec.encode(frame).unwrap() {
            self.out.send(&unit).unwrap();
        }
    }

    pub fn send_raw(&mut self, bytes: &[u8]) {
        self.out.send(bytes).unwrap();
    }

    /// Collect every frame arriving within `window`.
    pub fn collect(&mut self, window: Duration) -> Vec<Frame> {
        let deadline = std::time::Instant::now() + window;
        let mut frames = Vec::new();
        while std::time::Instant::now() < deadline {
            match self.input.try_receive().unwrap() {
                Some(unit) => {
                    if let Ok(fragment) = self.codec.decode_fragment(&unit) {
                        if let Some(frame) = self.reassembler.push(fragment).unwrap() {
                            frames.push(frame);
                        }
                    }
                }
                None => std::thread::sleep(Duration::from_micros(100)),
            }
        }
        frames
    }

    /// Wait for the first frame matching `pred`.
    pub fn expect(&mut self, window: Duration, pred: impl Fn(&Frame) -> bool) -> Option<Frame> {
        let deadline = std::time::Instant::now() + window;
        while std::time::Instant::now() < deadline {
            match self.input.try_receive().unwrap() {
                Some(unit) => {
                    if let Ok(fragment) = self.codec.decode_fragment(&unit) {
                        if let Some(frame) = self.reassembler.push(fragment).unwrap() {
                            if pred(&frame) {
                                return Some(frame);
                            }
                        }
                    }
                }
                None => std::thread::sleep(Duration::from_micros(100)),
            }
        }
        None
    }

    /// Raw units received so far, undecoded.
    pub fn drain_raw(&mut self) -> Vec<Bytes> {
        let mut units = Vec::new();
        while let Some(unit) = self.input.try_receive().unwrap() {
            units.push(unit);
        }
        units
    }
}
