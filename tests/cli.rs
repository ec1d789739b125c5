use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

const BIN: &str = env!("CARGO_BIN_EXE_warden");

#[test]
fn check_config_prints_effective_configuration() {
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    file.write_all(
        br#"{
            "node_id": 2,
            "name": "coordinator_2",
            "peers": [
                { "id": 1, "address": "coordinator_1:5000" },
                { "id": 2, "address": "coordinator_2:5000" }
            ]
        }"#,
    )
    .expect("write config");

    let output = Command::new(BIN)
        .arg("check-config")
        .arg("--config")
        .arg(file.path())
        .arg("--watch")
        .arg("filter_1, joiner_1")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run warden");
    assert!(output.status.success(), "{output:?}");

    let config: serde_json::Value = serde_json::from_slice(&output.stdout).expect("json");
    assert_eq!(config["node_id"], 2);
    assert_eq!(config["watch"], serde_json::json!(["filter_1", "joiner_1"]));
    assert_eq!(config["timing"]["heartbeat_interval_ms"], 100);
}

#[test]
fn check_config_rejects_node_id_zero() {
    let output = Command::new(BIN)
        .args(["check-config", "--id", "0"])
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run warden");
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("node_id must not be 0"), "{stderr}");
}

#[test]
fn check_config_rejects_malformed_peer_list() {
    let output = Command::new(BIN)
        .args(["check-config", "--id", "1", "--peers", "2:host"])
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run warden");
    assert!(!output.status.success());
}

#[test]
fn node_writes_to_the_configured_log_file() {
    let dir = tempfile::tempdir().expect("temp dir");
    let log_path = dir.path().join("warden.log");

    let mut child = Command::new(BIN)
        .args([
            "node",
            "--id",
            "1",
            "--election-port",
            "0",
            "--heartbeat-port",
            "0",
            "--orchestrator",
            "noop",
        ])
        .env("WARDEN_LOG_FILE", &log_path)
        .env("RUST_LOG", "debug")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .expect("failed to start warden");

    let deadline = Instant::now() + Duration::from_secs(10);
    let mut contents = String::new();
    while Instant::now() < deadline {
        contents = std::fs::read_to_string(&log_path).unwrap_or_default();
        if contents.contains("Starting warden node 1") {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    let _ = child.kill();
    let _ = child.wait();

    assert!(contents.contains("Starting warden node 1"), "log file: {contents:?}");
}
