use std::fs;
use std::path::PathBuf;

use predicates::str::contains;
use tempfile::TempDir;

fn write_config(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("coordinator.toml");
    fs::write(&path, content).expect("write config");
    path
}

macro_rules! txcoord {
    () => {
        assert_cmd::cargo::cargo_bin_cmd!("txcoord")
    };
}

#[test]
fn valid_config_lists_participants() {
    let dir = TempDir::new().expect("create temp dir");
    let config = write_config(
        &dir,
        r#"
default_timeout_ms = 2000
default_max_retries = 1

[retry]
base_delay_ms = 50
max_delay_ms = 500

[[participants]]
id = "payments"
endpoint = "http://payments.internal"
timeout_ms = 750

[[participants]]
id = "inventory"
endpoint = "http://inventory.internal"
max_retries = 4
"#,
    );

    txcoord!()
        .args(["check-config", "--config"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("Configuration OK"))
        .stdout(contains("default timeout: 2000ms"))
        .stdout(contains("default max retries: 1"))
        .stdout(contains(
            "payments -> http://payments.internal (timeout 750ms, retries default)",
        ))
        .stdout(contains(
            "inventory -> http://inventory.internal (timeout default, retries 4)",
        ));
}

#[test]
fn empty_config_uses_defaults() {
    let dir = TempDir::new().expect("create temp dir");
    let config = write_config(&dir, "");

    txcoord!()
        .args(["check-config", "-c"])
        .arg(&config)
        .assert()
        .success()
        .stdout(contains("default timeout: 30000ms"))
        .stdout(contains("event capacity: 256"))
        .stdout(contains("No participants declared."));
}

#[test]
fn inverted_retry_delays_are_rejected() {
    let dir = TempDir::new().expect("create temp dir");
    let config = write_config(&dir, "[retry]\nbase_delay_ms = 900\nmax_delay_ms = 100\n");

    txcoord!()
        .args(["check-config", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("error: configuration error"))
        .stderr(contains("caused by: retry base delay"));
}

#[test]
fn duplicate_participants_are_rejected() {
    let dir = TempDir::new().expect("create temp dir");
    let config = write_config(
        &dir,
        r#"
[[participants]]
id = "a"
endpoint = "http://a"

[[participants]]
id = "a"
endpoint = "http://a2"
"#,
    );

    txcoord!()
        .args(["check-config", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("participant 'a' is declared more than once"));
}

#[test]
fn unknown_keys_are_reported_with_path() {
    let dir = TempDir::new().expect("create temp dir");
    let config = write_config(&dir, "default_timeout = 5\n");

    txcoord!()
        .args(["check-config", "--config"])
        .arg(&config)
        .assert()
        .failure()
        .stderr(contains("failed to parse config at"))
        .stderr(contains("coordinator.toml"));
}

#[test]
fn missing_config_fails() {
    let dir = TempDir::new().expect("create temp dir");

    txcoord!()
        .args(["check-config", "--config"])
        .arg(dir.path().join("absent.toml"))
        .assert()
        .failure()
        .stderr(contains("caused by: failed to read config at"));
}
