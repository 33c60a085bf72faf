//! Full daemon lifecycle over a real loopback socket: publish, handshake,
//! sequential calls, shutdown, runtime-file cleanup.

use std::net::TcpStream;
use std::path::Path;
use std::time::{Duration, Instant};

use serde_json::{json, Map, Value};
use tempfile::TempDir;

use monod_core::runtime::{read_auth_token, read_record, runtime_paths_at};
use monod_core::types::{FactoryRef, RuntimeRecord, ServiceName};
use monod_daemon::{
    start_blocking, CallError, DaemonConfig, DaemonError, FactoryRegistry, ServiceObject,
    EXIT_ALREADY_RUNNING,
};
use monod_wire::codec::JsonCodec;
use monod_wire::frame::DEFAULT_MAX_FRAME_BYTES;
use monod_wire::message::{recv_blocking, send_blocking, Message, PROTOCOL_VERSION};

#[derive(Debug)]
struct Counter {
    value: i64,
}

impl ServiceObject for Counter {
    fn call(
        &mut self,
        method: &str,
        _args: &[Value],
        _kwargs: &Map<String, Value>,
    ) -> Result<Value, CallError> {
        match method {
            "inc" => {
                self.value += 1;
                Ok(json!(self.value))
            }
            other => Err(CallError::no_such_method(other)),
        }
    }
}

fn registry() -> FactoryRegistry {
    let mut registry = FactoryRegistry::new();
    registry.register("fixtures:counter", || Ok(Box::new(Counter { value: 0 })));
    registry
}

fn config(name: &str, base: &Path) -> DaemonConfig {
    let mut config = DaemonConfig::new(
        ServiceName::from(name),
        FactoryRef::from("fixtures:counter"),
        base.to_path_buf(),
    );
    // Long TTL so the daemon only exits when the test says so.
    config.idle_ttl = Duration::from_secs(30);
    config
}

fn wait_for_record(base: &Path, name: &ServiceName) -> RuntimeRecord {
    let paths = runtime_paths_at(base, name);
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(record) = read_record(&paths) {
            return record;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("daemon did not publish a runtime record in time");
}

fn connect_and_handshake(base: &Path, record: &RuntimeRecord, name: &ServiceName) -> TcpStream {
    let paths = runtime_paths_at(base, name);
    let token = read_auth_token(&paths).expect("auth token");
    let mut stream =
        TcpStream::connect((record.host.as_str(), record.port)).expect("tcp connect");

    send_blocking(
        &mut stream,
        &JsonCodec,
        &Message::Hello {
            protocol_version: PROTOCOL_VERSION,
            token,
            codec_id: "json".to_string(),
        },
    )
    .expect("send hello");

    match recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES).expect("hello reply") {
        Message::HelloOk { pid, .. } => assert_eq!(pid, record.pid),
        other => panic!("expected HELLO_OK, got {other:?}"),
    }
    stream
}

fn call(stream: &mut TcpStream, method: &str) -> Message {
    send_blocking(
        stream,
        &JsonCodec,
        &Message::Call {
            method: method.to_string(),
            args: vec![],
            kwargs: Map::new(),
        },
    )
    .expect("send call");
    recv_blocking(stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES).expect("call reply")
}

#[test]
fn daemon_serves_calls_and_cleans_up_on_shutdown() {
    let base = TempDir::new().expect("base dir");
    let name = ServiceName::from("e2e");
    let daemon_config = config("e2e", base.path());

    let daemon = std::thread::spawn({
        let registry = registry();
        move || start_blocking(daemon_config, &registry)
    });

    let record = wait_for_record(base.path(), &name);
    assert_eq!(record.service_name, name);
    assert_eq!(record.codec_id, "json");
    assert_eq!(record.host, "127.0.0.1");

    let mut stream = connect_and_handshake(base.path(), &record, &name);

    for expected in 1..=3 {
        match call(&mut stream, "inc") {
            Message::Result { value } => assert_eq!(value, json!(expected)),
            other => panic!("expected RESULT, got {other:?}"),
        }
    }

    send_blocking(&mut stream, &JsonCodec, &Message::Ping {}).expect("ping");
    match recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES).expect("pong") {
        Message::Pong { pid, active_clients, .. } => {
            assert_eq!(pid, record.pid);
            assert_eq!(active_clients, 1);
        }
        other => panic!("expected PONG, got {other:?}"),
    }

    send_blocking(&mut stream, &JsonCodec, &Message::Shutdown { force: false })
        .expect("shutdown");
    match recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES).expect("ack") {
        Message::Result { value } => assert_eq!(value, json!({ "stopping": true })),
        other => panic!("expected shutdown ack, got {other:?}"),
    }

    daemon.join().expect("daemon thread").expect("clean exit");

    let paths = runtime_paths_at(base.path(), &name);
    assert!(read_record(&paths).is_none(), "record removed on teardown");
    assert!(!paths.auth_file.exists(), "token removed on teardown");
    assert!(paths.lock_file.exists(), "lock file persists");
}

#[test]
fn second_daemon_detects_live_peer_and_exits() {
    let base = TempDir::new().expect("base dir");
    let name = ServiceName::from("solo");
    let first_config = config("solo", base.path());

    let first = std::thread::spawn({
        let registry = registry();
        move || start_blocking(first_config, &registry)
    });
    let record = wait_for_record(base.path(), &name);

    // A second entrypoint for the same name must defer to the winner without
    // touching its files.
    let err = start_blocking(config("solo", base.path()), &registry())
        .expect_err("loser must not serve");
    assert!(
        matches!(err, DaemonError::AlreadyRunning { pid, .. } if pid == record.pid),
        "got: {err}"
    );
    assert_eq!(err.exit_code(), EXIT_ALREADY_RUNNING);

    let paths = runtime_paths_at(base.path(), &name);
    let still = read_record(&paths).expect("record untouched");
    assert_eq!(still, record);

    // Wind the winner down.
    let mut stream = connect_and_handshake(base.path(), &record, &name);
    send_blocking(&mut stream, &JsonCodec, &Message::Shutdown { force: false })
        .expect("shutdown");
    let _ = recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES);
    first.join().expect("daemon thread").expect("clean exit");
}
