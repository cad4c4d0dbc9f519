//! Loopback - a client and server talking over virtual cables.
//!
//! This example demonstrates:
//! - Implementing an [`ExecutionHost`] with a per-session scope
//! - Running a server loop on its own thread
//! - Claiming a session, running requests, and relaying console output
//!
//! # Running
//!
//! ```sh
//! RUST_LOG=debug cargo run --example loopback
//! ```

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysexwire::server::Console;
use sysexwire::{Client, ExecutionHost, Fault, Server, Value, VirtualCable};
use tracing_subscriber::EnvFilter;

/// Host understanding `set NAME NUMBER`, `add NAME NUMBER` and `say TEXT`.
struct Registers;

impl ExecutionHost for Registers {
    type Scope = BTreeMap<String, i64>;

    fn execute(
        &mut self,
        code: &str,
        scope: &mut Self::Scope,
        console: &mut Console,
    ) -> Result<(), Fault> {
        for line in code.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let mut words = line.splitn(3, ' ');
            match (words.next(), words.next(), words.next()) {
                (Some("say"), Some(first), rest) => {
                    console.print(&format!("{} {}\n", first, rest.unwrap_or("")));
                }
                (Some(op @ ("set" | "add")), Some(name), Some(number)) => {
                    let number: i64 = number
                        .trim()
                        .parse()
                        .map_err(|_| Fault::new("ValueError", format!("not a number: {}", number)))?;
                    let slot = scope.entry(name.to_string()).or_insert(0);
                    *slot = if op == "set" { number } else { *slot + number };
                }
                _ => return Err(Fault::new("SyntaxError", format!("cannot run '{}'", line))),
            }
        }
        Ok(())
    }

    fn evaluate(
        &mut self,
        expr: &str,
        scope: &mut Self::Scope,
        _console: &mut Console,
    ) -> Result<Value, Fault> {
        let expr = expr.trim();
        if expr == "*" {
            let all = scope
                .iter()
                .map(|(k, v)| (k.clone(), Value::Int(*v)))
                .collect();
            return Ok(Value::Map(all));
        }
        scope
            .get(expr)
            .map(|v| Value::Int(*v))
            .ok_or_else(|| Fault::new("NameError", format!("no register '{}'", expr)))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let requests = VirtualCable::default();
    let responses = VirtualCable::default();
    let stop = Arc::new(AtomicBool::new(false));

    // Server side: poll the request cable until asked to stop
    let mut inbound = requests.port();
    let server_sink = responses.sender();
    let server_stop = Arc::clone(&stop);
    let server = std::thread::spawn(move || -> sysexwire::Result<()> {
        let mut server = Server::builder(Registers).build(server_sink);
        while !server_stop.load(Ordering::SeqCst) {
            if server.pump(&mut inbound)? == 0 {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
        server.shutdown()
    });

    // Client side
    let mut client = Client::builder()
        .response_timeout(Duration::from_millis(250))
        .stdout_callback(|text| print!("[host] {}", text))
        .build(requests.sender(), responses.port());

    let id = client.hello(Duration::from_secs(2))?;
    println!("claimed client id {}", id);

    client.exec("set apples 3\nadd apples 4\nsay counted the apples")?;
    println!("apples = {}", client.eval("apples")?);

    match client.eval("pears") {
        Err(sysexwire::Error::Application(fault)) => println!("fault: {}", fault),
        other => println!("unexpected: {:?}", other),
    }

    client.exec("set pears 2")?;
    println!("registers = {}", client.eval("*")?);

    client.goodbye(0)?;

    stop.store(true, Ordering::SeqCst);
    server
        .join()
        .map_err(|_| "server thread panicked")??;
    Ok(())
}
