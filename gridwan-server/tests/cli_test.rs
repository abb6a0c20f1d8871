#![allow(deprecated)] // Command::cargo_bin

use assert_cmd::Command;
use predicates::str::contains;

fn gridwan_cmd() -> Command {
    let mut cmd = Command::cargo_bin("gridwan").unwrap();
    cmd.env_remove("GRIDWAN_TARGETS")
        .env_remove("GRIDWAN_NODE_ID")
        .env_remove("GRIDWAN_DATA_DIR")
        .env_remove("GRIDWAN_BIND_ADDR")
        .env_remove("GRIDWAN_QUEUE_CAPACITY")
        .env("RUST_LOG", "warn");
    cmd
}

fn status_json(output: &[u8]) -> serde_json::Value {
    serde_json::from_slice(output).expect("forward prints status JSON on stdout")
}

#[test]
fn test_help_lists_subcommands() {
    gridwan_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(contains("forward"))
        .stdout(contains("receive"));
}

#[test]
fn test_missing_subcommand_fails() {
    gridwan_cmd().assert().failure();
}

#[test]
fn test_forward_standalone_drains_stdin() {
    let data_dir = tempfile::tempdir().unwrap();
    let output = gridwan_cmd()
        .env("GRIDWAN_NODE_ID", "cli-node")
        .args(["forward", "--data-dir", data_dir.path().to_str().unwrap()])
        .write_stdin("{\"container\":\"orders\",\"key\":\"o1\",\"value\":\"{}\"}\nnot json\n")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let status = status_json(&output);
    assert_eq!(status["node_id"], "cli-node");
    assert_eq!(status["replication_enabled"], false);
    assert_eq!(status["link_count"], 0);
}

#[test]
fn test_forward_with_unreachable_link_reports_pending_update() {
    let data_dir = tempfile::tempdir().unwrap();
    std::fs::write(
        data_dir.path().join("wan.json"),
        serde_json::json!({
            "node_id": "cli-node",
            "links": [{
                "name": "tokyo",
                "group_name": "tokyo",
                "password": "tokyo-pass",
                "targets": ["127.0.0.1:1"],
                "connect_attempts": 1,
                "connect_delay_ms": 10
            }]
        })
        .to_string(),
    )
    .unwrap();

    let output = gridwan_cmd()
        .args([
            "forward",
            "--data-dir",
            data_dir.path().to_str().unwrap(),
            "--drain-timeout-secs",
            "0",
        ])
        .write_stdin("{\"container\":\"orders\",\"key\":\"o1\",\"value\":\"{}\"}\n")
        .timeout(std::time::Duration::from_secs(30))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let status = status_json(&output);
    let link = &status["links"][0];
    assert_eq!(link["name"], "tokyo");
    assert_eq!(link["state"], "stopped");
    assert_eq!(link["offered"], 1);
    assert_eq!(link["sent"], 0);
}
