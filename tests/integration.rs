//! Integration tests for sysexwire.
//!
//! These tests run a server on a background thread and drive it over
//! virtual cables, either through the client API or with raw frames.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use sysexwire::codec::Armour;
use sysexwire::protocol::{
    identity_reply, Frame, FrameCodec, MessageType, Origin, Reassembler, Status, Version,
    EXTENSION_TYPE_BASE, FRAME_OVERHEAD, MAX_DATA_LEN,
};
use sysexwire::server::{Console, Reply};
use sysexwire::{Error, MessageSink, MessageSource, Outcome, SessionState, Value};

use common::{Harness, Scope};

const WINDOW: Duration = Duration::from_millis(300);

/// Test unit boundaries through the public codec.
#[test]
fn test_fragmentation_boundary() {
    let codec = FrameCodec::new();

    let exact = Frame::request(1, MessageType::Exec, Bytes::from(vec![b'a'; MAX_DATA_LEN]));
    let units = codec.encode(&exact).unwrap();
    assert_eq!(units.len(), 1);
    assert_eq!(units[0].len(), FRAME_OVERHEAD + MAX_DATA_LEN);

    let over = Frame::request(1, MessageType::Exec, Bytes::from(vec![b'a'; MAX_DATA_LEN + 1]));
    let units = codec.encode(&over).unwrap();
    assert_eq!(units.len(), 2);

    let mut reassembler = Reassembler::strict();
    let mut out = None;
    for unit in units {
        out = reassembler.push(codec.decode_fragment(&unit).unwrap()).unwrap();
    }
    assert_eq!(out.unwrap(), over);
}

/// Test that a strict reassembler refuses a second message mid-sequence.
#[test]
fn test_interleaved_fragments_are_rejected() {
    let codec = FrameCodec::with_max_data_len(4);
    let long = Frame::request(1, MessageType::Exec, Bytes::from_static(b"abcdefgh"));
    let other = Frame::request(1, MessageType::Eval, Bytes::from_static(b"x"));

    let first = codec.encode(&long).unwrap().remove(0);
    let intruder = codec.encode(&other).unwrap().remove(0);

    let mut reassembler = Reassembler::strict();
    assert!(reassembler
        .push(codec.decode_fragment(&first).unwrap())
        .unwrap()
        .is_none());
    assert!(reassembler
        .push(codec.decode_fragment(&intruder).unwrap())
        .is_err());
}

/// Test EVAL over raw frames for a fixed client id.
#[test]
fn test_raw_eval_session() {
    let harness = Harness::start();
    let mut peer = harness.raw_peer();

    peer.send(&Frame::request(5, MessageType::ClientHello, Bytes::new()));
    let hello = peer
        .expect(WINDOW, |f| f.msg_type == MessageType::ClientHello)
        .expect("hello reply");
    assert_eq!(hello.client_id, 5);
    assert_eq!(hello.origin, Origin::Server);
    assert!(hello.is_ok());

    peer.send(&Frame::request(5, MessageType::Eval, Armour::encode_text("2+2")));
    let reply = peer
        .expect(WINDOW, |f| f.msg_type == MessageType::Eval)
        .expect("eval reply");
    assert_eq!(reply.client_id, 5);
    assert_eq!(
        Outcome::from_payload(reply.status, &reply.payload).unwrap(),
        Outcome::Ok(Value::Int(4))
    );
}

/// Test that only one of two hellos for the same id is accepted.
#[test]
fn test_hello_is_exclusive() {
    let harness = Harness::start();
    let mut first = harness.raw_peer();
    let mut second = harness.raw_peer();
    let first_nonce = Armour::encode(b"first");
    let second_nonce = Armour::encode(b"second");

    first.send(&Frame::request(7, MessageType::ClientHello, first_nonce.clone()));
    second.send(&Frame::request(7, MessageType::ClientHello, second_nonce.clone()));

    // both peers watch the same wire, so each sees every reply
    for peer in [&mut first, &mut second] {
        let accepted: Vec<Bytes> = peer
            .collect(WINDOW)
            .into_iter()
            .filter(|f| f.msg_type == MessageType::ClientHello && f.client_id == 7 && f.is_ok())
            .map(|f| f.payload)
            .collect();
        assert_eq!(accepted, vec![first_nonce.clone()]);
    }
    assert_eq!(harness.with_server(|s| s.session_ids()), vec![7]);
}

/// Test a client losing a race for its candidate id.
#[test]
fn test_client_losing_hello_race_picks_another_id() {
    let harness = Harness::start();
    let rival_id = Arc::new(Mutex::new(None));
    let sink = RivalFirst {
        inner: harness.requests.sender(),
        rival_id: Arc::clone(&rival_id),
    };
    let mut client = harness
        .client_builder()
        .build(sink, harness.responses.port());

    let id = client.hello(Duration::from_secs(2)).unwrap();
    let rival = (*rival_id.lock().unwrap()).expect("rival hello sent");
    assert_ne!(id, rival);
    let mut expected = vec![id, rival];
    expected.sort_unstable();
    assert_eq!(harness.with_server(|s| s.session_ids()), expected);
}

/// Sink that lets another peer claim the first candidate id just before the client.
struct RivalFirst {
    inner: sysexwire::transport::CableSender,
    rival_id: Arc<Mutex<Option<u8>>>,
}

impl MessageSink for RivalFirst {
    fn send(&mut self, message: &[u8]) -> sysexwire::Result<()> {
        let codec = FrameCodec::new();
        let mut rival_id = self.rival_id.lock().unwrap();
        if rival_id.is_none() {
            if let Ok(fragment) = codec.decode_fragment(message) {
                if fragment.header.msg_type == MessageType::ClientHello {
                    let id = fragment.header.client_id;
                    *rival_id = Some(id);
                    let rival =
                        Frame::request(id, MessageType::ClientHello, Armour::encode(b"rival"));
                    for unit in codec.encode(&rival)? {
                        self.inner.send(&unit)?;
                    }
                }
            }
        }
        self.inner.send(message)
    }
}

/// Test that captured output is sent before the response.
#[test]
fn test_stdout_precedes_response() {
    let harness = Harness::start();
    let mut peer = harness.raw_peer();

    peer.send(&Frame::request(9, MessageType::ClientHello, Bytes::new()));
    peer.expect(WINDOW, |f| f.msg_type == MessageType::ClientHello)
        .expect("hello reply");

    peer.send(&Frame::request(
        9,
        MessageType::Exec,
        Armour::encode_text("print('one')\nprint('two')\nprint('three')"),
    ));
    let frames = peer.collect(WINDOW);
    let kinds: Vec<MessageType> = frames.iter().map(|f| f.msg_type).collect();
    assert_eq!(kinds, vec![MessageType::Stdout, MessageType::Exec]);
    assert_eq!(
        Armour::decode_text(&frames[0].payload).unwrap(),
        "one\ntwo\nthree\n"
    );
    assert_eq!(frames[1].status, Status::Ok);
}

/// Test a full client session: hello, exec, eval, goodbye.
#[test]
fn test_client_session_lifecycle() {
    let harness = Harness::start();
    let mut client = harness.connect();

    let id = client.client_id().unwrap();
    assert!((1..=127).contains(&id));
    assert_eq!(client.state(), SessionState::Connected);
    assert!(harness.with_server(move |s| s.has_session(id)));

    client.exec("x = 40").unwrap();
    assert_eq!(client.eval("x + 2").unwrap(), Value::Int(42));
    assert_eq!(client.eval("None").unwrap(), Value::Nil);

    client.goodbye(0).unwrap();
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(client.client_id().is_none());
    assert_eq!(harness.with_server(|s| s.session_count()), 0);
}

/// Test that requests before hello are refused locally.
#[test]
fn test_requests_need_a_session() {
    let harness = Harness::start();
    let mut client = harness.build(harness.client_builder());
    assert!(matches!(client.eval("1"), Err(Error::NotConnected)));
    assert!(matches!(client.exec("x = 1"), Err(Error::NotConnected)));
}

/// Test that raised faults come back as application errors.
#[test]
fn test_exec_fault() {
    let harness = Harness::start();
    let mut client = harness.connect();

    match client.exec("raise ValueError('x')") {
        Err(Error::Application(fault)) => {
            assert_eq!(fault.kind, "ValueError");
            assert_eq!(fault.message, "x");
        }
        other => panic!("expected application fault, got {:?}", other),
    }
    // the session survives a fault
    assert_eq!(client.eval("1 + 1").unwrap(), Value::Int(2));

    match client.eval("missing") {
        Err(Error::Application(fault)) => assert_eq!(fault.kind, "NameError"),
        other => panic!("expected NameError, got {:?}", other),
    }
}

/// Test that console output reaches the client callback.
#[test]
fn test_stdout_callback() {
    let harness = Harness::start();
    let printed = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&printed);
    let mut client = harness.build(
        harness
            .client_builder()
            .stdout_callback(move |text| sink.lock().unwrap().push_str(text)),
    );
    client.hello(Duration::from_secs(2)).unwrap();

    client
        .exec("print('one')\nprint('two')\nprint('three')")
        .unwrap();
    assert_eq!(*printed.lock().unwrap(), "one\ntwo\nthree\n");
}

/// Test that each client gets its own scope.
#[test]
fn test_scopes_are_per_client() {
    let harness = Harness::start();
    let mut a = harness.connect();
    let mut b = harness.connect();
    assert_ne!(a.client_id(), b.client_id());

    a.exec("x = 1").unwrap();
    b.exec("x = 2").unwrap();
    assert_eq!(a.eval("x").unwrap(), Value::Int(1));
    assert_eq!(b.eval("x").unwrap(), Value::Int(2));
    assert_eq!(harness.with_server(|s| s.session_count()), 2);
}

/// Test requests and responses spanning many units.
#[test]
fn test_large_payloads() {
    let harness = Harness::start();
    let mut client = harness.connect();

    let text = "z".repeat(5 * MAX_DATA_LEN);
    client.exec(&format!("s = '{}'", text)).unwrap();
    assert_eq!(client.eval("s").unwrap(), Value::Str(text));

    let value = client.eval("repeat('ab', 3000)").unwrap();
    assert_eq!(value.as_str().map(str::len), Some(6000));
}

/// Test the version gate in both directions.
#[test]
fn test_version_gate() {
    let harness = Harness::start_with(|b| b.version(Version::new(1, 1, 0)), false);
    let mut client = harness.build(harness.client_builder());
    match client.hello(Duration::from_secs(2)) {
        Err(Error::VersionMismatch { client: c, server }) => {
            assert_eq!(c, Version::CURRENT);
            assert_eq!(server, Version::new(1, 1, 0));
        }
        other => panic!("expected version mismatch, got {:?}", other),
    }
    assert_eq!(client.state(), SessionState::Disconnected);
    // the claimed id was handed back
    assert_eq!(harness.with_server(|s| s.session_count()), 0);

    let mut matching = harness.build(harness.client_builder().version(Version::new(1, 1, 0)));
    assert!(matching.hello(Duration::from_secs(2)).is_ok());
    assert_eq!(matching.version_query().unwrap(), Version::new(1, 1, 0));
}

/// Test hello when the server has no room left.
#[test]
fn test_hello_when_server_is_full() {
    let harness = Harness::start_with(|b| b.max_sessions(1), false);
    let _first = harness.connect();

    let mut second = harness.build(
        harness
            .client_builder()
            .response_timeout(Duration::from_millis(2)),
    );
    let window = Duration::from_millis(500);
    let started = std::time::Instant::now();
    let err = second.hello(window).unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    // the whole window is spent retrying, not just one pass over the ids
    assert!(started.elapsed() >= window);
    assert!(err.is_retryable());
    assert_eq!(second.state(), SessionState::Disconnected);
}

/// Test that a kicked client sees its exit code.
#[test]
fn test_kick() {
    let harness = Harness::start();
    let mut client = harness.connect();
    let id = client.client_id().unwrap();

    harness.with_server(move |s| s.kick(id, 3)).unwrap();
    match client.eval("1") {
        Err(Error::ClientExit(code)) => assert_eq!(code, 3),
        other => panic!("expected client exit, got {:?}", other),
    }
    assert_eq!(client.state(), SessionState::Disconnected);
    assert!(matches!(client.eval("1"), Err(Error::NotConnected)));
}

/// Test that server shutdown disconnects every client.
#[test]
fn test_shutdown() {
    let harness = Harness::start();
    let mut a = harness.connect();
    let mut b = harness.connect();

    harness.with_server(|s| s.shutdown()).unwrap();
    assert!(matches!(a.eval("1"), Err(Error::ServerExit)));
    assert!(matches!(b.exec("x = 1"), Err(Error::ServerExit)));
    assert!(!a.is_connected());
    assert!(!b.is_connected());
    assert_eq!(harness.with_server(|s| s.session_count()), 0);
}

/// Test that foreign MIDI and identity enquiries do not disturb requests.
#[test]
fn test_foreign_traffic_and_identity() {
    let harness = Harness::start();
    let foreign = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));
    let seen = Arc::clone(&foreign);
    let mut client = harness.build(
        harness
            .client_builder()
            .foreign_callback(move |bytes| seen.lock().unwrap().push(bytes.to_vec())),
    );
    client.hello(Duration::from_secs(2)).unwrap();

    let mut tap = harness.requests.port();
    let mut noise = harness.responses.sender();
    noise.send(&[0x90, 0x3C, 0x40]).unwrap();
    noise.send(&[0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7]).unwrap();

    assert_eq!(client.eval("3 + 4").unwrap(), Value::Int(7));
    assert_eq!(*foreign.lock().unwrap(), vec![vec![0x90, 0x3C, 0x40]]);

    let mut requests_sent = Vec::new();
    while let Some(unit) = tap.try_receive().unwrap() {
        requests_sent.push(unit);
    }
    assert!(requests_sent.contains(&identity_reply(Version::CURRENT)));
}

/// Test named capabilities bound per session.
#[test]
fn test_extension_round_trip() {
    let harness = Harness::start_with(
        |b| {
            b.extension("reverse", |payload: &[u8], _: &mut Scope, console: &mut Console| {
                console.print("reversing\n");
                let mut reversed = payload.to_vec();
                reversed.reverse();
                Reply::ok(Bytes::from(reversed))
            })
        },
        false,
    );
    let printed = Arc::new(Mutex::new(String::new()));
    let sink = Arc::clone(&printed);
    let mut client = harness.build(
        harness
            .client_builder()
            .stdout_callback(move |text| sink.lock().unwrap().push_str(text)),
    );
    client.hello(Duration::from_secs(2)).unwrap();

    let reverse = client.register_extension("reverse").unwrap();
    assert_eq!(reverse.tag(), EXTENSION_TYPE_BASE);
    // binding the same name again yields the same tag
    assert_eq!(client.register_extension("reverse").unwrap(), reverse);

    let reply = client
        .send_extension(reverse, Bytes::from_static(b"abc"))
        .unwrap();
    assert_eq!(reply.payload(), b"cba");
    assert_eq!(*printed.lock().unwrap(), "reversing\n");

    assert!(matches!(
        client.register_extension("missing"),
        Err(Error::ServerFailure(_))
    ));
}

/// Test a server answering through an INTERNAL relay.
#[test]
fn test_relayed_server() {
    let harness = Harness::start_with(|b| b.response_origin(Origin::Internal), true);
    let mut client = harness.connect();

    client.exec("y = 10").unwrap();
    assert_eq!(client.eval("y + 5").unwrap(), Value::Int(15));
    let text = "q".repeat(3 * MAX_DATA_LEN);
    assert_eq!(
        client.eval(&format!("'{}'", text)).unwrap(),
        Value::Str(text)
    );
}

/// Test client console text printed on the host.
#[test]
fn test_client_stdout_reaches_host() {
    let buffer = Arc::new(Mutex::new(Vec::<u8>::new()));
    let writer = SharedWriter(Arc::clone(&buffer));
    let harness = Harness::start_with(move |b| b.console_output(writer), false);
    let mut client = harness.connect();

    client.send_stdout("hello host\n").unwrap();
    // a round trip makes sure the server has handled the text
    client.eval("1").unwrap();
    let text = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
    assert!(text.contains("hello host"));
}

#[derive(Clone)]
struct SharedWriter(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for SharedWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
