//! Operator-command surface: ping / call / status / shutdown through argv.

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use assert_cmd::prelude::*;
use predicates::str::contains;
use tempfile::TempDir;

fn subcommand(base: &Path, sub: &str, name: &str) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("monod"));
    cmd.env("MONOD_RUNTIME_DIR", base);
    cmd.arg(sub);
    cmd.args(["--name", name, "--base-dir"]);
    cmd.arg(base);
    // Long TTL so the daemon survives the gaps between separate invocations.
    cmd.args(["--idle-ttl", "30"]);
    cmd
}

#[test]
fn ping_call_status_shutdown_roundtrip() {
    let base = TempDir::new().expect("base");
    let name = "cli-demo";

    // First contact spawns the daemon.
    subcommand(base.path(), "ping", name)
        .assert()
        .success()
        .stdout(contains("\"pid\""));

    // inc twice through argv; the counter is shared daemon state.
    subcommand(base.path(), "call", name)
        .arg("inc")
        .assert()
        .success()
        .stdout(contains("1"));
    subcommand(base.path(), "call", name)
        .args(["inc", "--args", "[9]"])
        .assert()
        .success()
        .stdout(contains("10"));

    let assert = subcommand(base.path(), "status", name)
        .arg("--json")
        .assert()
        .success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8");
    let payload: serde_json::Value = serde_json::from_str(&stdout).expect("status json");
    assert_eq!(payload["running"], serde_json::Value::Bool(true));
    assert_eq!(payload["name"], serde_json::json!(name));
    assert!(payload["pid"].as_u64().is_some(), "status carries the pid");
    assert_eq!(payload["record"]["codec_id"], serde_json::json!("json"));

    subcommand(base.path(), "shutdown", name)
        .assert()
        .success()
        .stdout(contains("shutdown requested"));

    // The ack precedes teardown; give the daemon a moment to finish it.
    std::thread::sleep(Duration::from_millis(500));

    let gone = subcommand(base.path(), "status", name)
        .arg("--json")
        .assert()
        .success();
    let stdout = String::from_utf8(gone.get_output().stdout.clone()).expect("utf8");
    let payload: serde_json::Value = serde_json::from_str(&stdout).expect("status json");
    assert_eq!(payload["running"], serde_json::Value::Bool(false));
}

#[test]
fn shutdown_without_daemon_is_not_an_error() {
    let base = TempDir::new().expect("base");
    subcommand(base.path(), "shutdown", "nobody")
        .assert()
        .success()
        .stdout(contains("not running"));
}

#[test]
fn call_on_failing_method_exits_nonzero() {
    let base = TempDir::new().expect("base");
    subcommand(base.path(), "call", "boom-cli")
        .args(["--factory", "monod.demo:boom", "boom"])
        .assert()
        .failure()
        .stderr(contains("nope"));

    // Clean up the spawned daemon.
    let mut shutdown = subcommand(base.path(), "shutdown", "boom-cli");
    shutdown.args(["--factory", "monod.demo:boom"]);
    shutdown.assert().success();
}

#[test]
fn rejects_malformed_factory_reference() {
    let base = TempDir::new().expect("base");
    subcommand(base.path(), "ping", "badref")
        .args(["--factory", "no-separator"])
        .assert()
        .failure()
        .stderr(contains("invalid --factory"));
}
