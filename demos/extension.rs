//! Extension - custom message types bound to named capabilities.
//!
//! This example demonstrates:
//! - Offering capabilities with `ServerBuilder::extension`
//! - Binding them per session with `Client::register_extension`
//! - Sending opaque 7-bit payloads and armoured structured values
//! - Answering through an INTERNAL relay
//!
//! # Running
//!
//! ```sh
//! cargo run --example extension
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use sysexwire::codec::Armour;
use sysexwire::protocol::Origin;
use sysexwire::server::{Console, Relay, Reply};
use sysexwire::{
    Client, ExecutionHost, Fault, MessageSource, Server, Value, VirtualCable,
};
use tracing_subscriber::EnvFilter;

/// Marker placed in a session's scope by the `cue` capability.
#[derive(Serialize, Deserialize, Debug, Clone)]
struct Cue {
    bar: u32,
    label: String,
}

/// Host without a scripting language: everything goes through extensions.
struct Timeline;

impl ExecutionHost for Timeline {
    type Scope = Vec<Cue>;

    fn execute(&mut self, code: &str, _: &mut Vec<Cue>, _: &mut Console) -> Result<(), Fault> {
        Err(Fault::new("NotSupported", format!("cannot run '{}'", code)))
    }

    fn evaluate(&mut self, _: &str, cues: &mut Vec<Cue>, _: &mut Console) -> Result<Value, Fault> {
        Ok(Value::List(
            cues.iter().map(|c| Value::from(c.label.as_str())).collect(),
        ))
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let requests = VirtualCable::default();
    let responses = VirtualCable::default();
    let internal = VirtualCable::default();
    let stop = Arc::new(AtomicBool::new(false));

    // The server answers on the internal link; the relay moves its frames
    // to the client-facing cable.
    let mut inbound = requests.port();
    let server_sink = internal.sender();
    let mut relay_in = internal.port();
    let mut relay = Relay::new(responses.sender());
    let server_stop = Arc::clone(&stop);
    let server = std::thread::spawn(move || -> sysexwire::Result<()> {
        let mut server = Server::builder(Timeline)
            .response_origin(Origin::Internal)
            .extension("checksum", |payload: &[u8], _: &mut Vec<Cue>, _: &mut Console| {
                let sum = payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) & 0x7F;
                Reply::ok(Bytes::copy_from_slice(&[sum]))
            })
            .extension("cue", |payload: &[u8], cues: &mut Vec<Cue>, console: &mut Console| {
                match Armour::decode_value::<Cue>(payload) {
                    Ok(cue) => {
                        console.print(&format!("cue '{}' at bar {}\n", cue.label, cue.bar));
                        cues.push(cue);
                        match Armour::encode_value(&cues.len()) {
                            Ok(count) => Reply::ok(count),
                            Err(e) => Reply::fail(&e.to_string()),
                        }
                    }
                    Err(e) => Reply::fail(&format!("bad cue: {}", e)),
                }
            })
            .build(server_sink);

        while !server_stop.load(Ordering::SeqCst) {
            let mut busy = server.pump(&mut inbound)?;
            while let Some(message) = relay_in.try_receive()? {
                relay.on_sysex(&message)?;
                busy += 1;
            }
            if busy == 0 {
                std::thread::sleep(Duration::from_micros(200));
            }
        }
        server.shutdown()
    });

    let mut client = Client::builder()
        .response_timeout(Duration::from_millis(250))
        .stdout_callback(|text| print!("[host] {}", text))
        .build(requests.sender(), responses.port());
    client.hello(Duration::from_secs(2))?;

    let checksum = client.register_extension("checksum")?;
    let cue = client.register_extension("cue")?;
    println!("checksum -> 0x{:02X}, cue -> 0x{:02X}", checksum.tag(), cue.tag());

    let reply = client.send_extension(checksum, Bytes::from_static(&[0x10, 0x20, 0x30]))?;
    println!("checksum = 0x{:02X}", reply.payload()[0]);

    for (bar, label) in [(1, "intro"), (17, "verse"), (33, "chorus")] {
        let payload = Armour::encode_value(&Cue {
            bar,
            label: label.to_string(),
        })?;
        let reply = client.send_extension(cue, payload)?;
        let count: usize = Armour::decode_value(reply.payload())?;
        println!("{} cue(s) stored", count);
    }
    println!("labels = {}", client.eval("")?);

    if let Err(e) = client.register_extension("transport") {
        println!("transport not offered: {}", e);
    }

    client.goodbye(0)?;
    stop.store(true, Ordering::SeqCst);
    server
        .join()
        .map_err(|_| "server thread panicked")??;
    Ok(())
}
