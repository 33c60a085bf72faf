//! Coordinator behavior against scripted daemons and unspawnable entrypoints.

use std::net::TcpListener;
use std::path::Path;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{json, Map};
use tempfile::TempDir;

use monod_client::{ClientError, ServiceConfig};
use monod_core::runtime::{
    ensure_auth_token, publish_record, read_auth_token, read_record, runtime_paths_at,
};
use monod_core::types::{FactoryRef, RuntimeRecord, ServiceName};
use monod_wire::codec::JsonCodec;
use monod_wire::frame::DEFAULT_MAX_FRAME_BYTES;
use monod_wire::message::{recv_blocking, send_blocking, Message};

fn config(base: &Path, name: &str) -> ServiceConfig {
    let mut config = ServiceConfig::new(ServiceName::from(name), FactoryRef::from("demo:counter"))
        .expect("config");
    config.base_dir = base.to_path_buf();
    // An entrypoint that exits immediately: any spawn attempt cannot produce
    // a daemon, so recovery paths terminate deterministically.
    config.daemon_program = Path::new("/bin/false").to_path_buf();
    config.daemon_args = vec![];
    config.start_timeout = Duration::from_millis(600);
    config.connect_timeout = Duration::from_millis(200);
    config
}

fn stale_record(name: &str) -> RuntimeRecord {
    RuntimeRecord {
        protocol_version: 1,
        pid: 999_999,
        host: "127.0.0.1".to_string(),
        port: 1,
        service_name: ServiceName::from(name),
        codec_id: "json".to_string(),
        started_at: Utc::now(),
    }
}

#[test]
fn empty_state_with_dead_entrypoint_fails_within_start_timeout() {
    let base = TempDir::new().expect("base");
    let config = config(base.path(), "ghost");

    let started = Instant::now();
    let err = config.connect().expect_err("nothing can serve");
    let elapsed = started.elapsed();

    assert!(matches!(err, ClientError::ConnectionFailed(_)), "got: {err:?}");
    assert!(
        elapsed < Duration::from_secs(3),
        "must fail deterministically near start_timeout, took {elapsed:?}"
    );
}

#[test]
fn stale_record_is_cleaned_and_token_rotated() {
    let base = TempDir::new().expect("base");
    let name = ServiceName::from("stale");
    let paths = runtime_paths_at(base.path(), &name);

    publish_record(&paths, &stale_record("stale")).expect("stale record");
    let old_token = ensure_auth_token(&paths).expect("old token");

    let config = config(base.path(), "stale");
    let err = config.connect().expect_err("dead entrypoint cannot revive it");
    assert!(matches!(err, ClientError::ConnectionFailed(_)), "got: {err:?}");

    assert!(
        read_record(&paths).is_none(),
        "stale record must be unlinked under the lock"
    );
    match read_auth_token(&paths) {
        Ok(new_token) => assert_ne!(new_token, old_token, "credential must rotate"),
        // Also acceptable: recovery ran again and the token is mid-rotation.
        Err(_) => {}
    }
}

#[test]
fn stale_recovery_is_idempotent() {
    let base = TempDir::new().expect("base");
    let name = ServiceName::from("repeat");
    let paths = runtime_paths_at(base.path(), &name);
    publish_record(&paths, &stale_record("repeat")).expect("stale record");

    let config = config(base.path(), "repeat");
    for _ in 0..2 {
        let err = config.connect().expect_err("no live daemon");
        assert!(matches!(err, ClientError::ConnectionFailed(_)), "got: {err:?}");
        assert!(read_record(&paths).is_none());
        assert!(paths.lock_file.exists(), "lock survives recovery");
    }
}

#[test]
fn connects_to_live_daemon_without_spawning() {
    let base = TempDir::new().expect("base");
    let name = ServiceName::from("live");
    let paths = runtime_paths_at(base.path(), &name);
    let token = ensure_auth_token(&paths).expect("token");

    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let port = listener.local_addr().expect("addr").port();

    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().expect("accept");
        match recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES).expect("hello") {
            Message::Hello { token: sent, .. } => assert_eq!(sent, token),
            other => panic!("expected HELLO, got {other:?}"),
        }
        send_blocking(
            &mut stream,
            &JsonCodec,
            &Message::HelloOk {
                pid: 4321,
                started_at: Utc::now(),
                server_info: Map::new(),
            },
        )
        .expect("hello ok");

        match recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES).expect("call") {
            Message::Call { method, .. } => assert_eq!(method, "inc"),
            other => panic!("expected CALL, got {other:?}"),
        }
        send_blocking(&mut stream, &JsonCodec, &Message::Result { value: json!(1) })
            .expect("result");
        // Client close.
        let _ = recv_blocking(&mut stream, &JsonCodec, DEFAULT_MAX_FRAME_BYTES);
        let _ = send_blocking(
            &mut stream,
            &JsonCodec,
            &Message::Result { value: serde_json::Value::Null },
        );
    });

    publish_record(
        &paths,
        &RuntimeRecord {
            protocol_version: 1,
            pid: 4321,
            host: "127.0.0.1".to_string(),
            port,
            service_name: name,
            codec_id: "json".to_string(),
            started_at: Utc::now(),
        },
    )
    .expect("record");

    // daemon_program is /bin/false: success proves no spawn was needed.
    let config = config(base.path(), "live");
    let value = config.call_once("inc", vec![], Map::new()).expect("call");
    assert_eq!(value, json!(1));
    server.join().expect("server thread");
}
