//! CLI argument parsing and startup failure tests.
//!
//! Nothing here talks to a real server; runs that get past configuration
//! loading use endpoints that fail to connect immediately.

use assert_cmd::Command;

#[test]
fn help_runs() {
    Command::cargo_bin("rfan")
        .unwrap()
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn version_runs() {
    Command::cargo_bin("rfan")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn config_is_required() {
    Command::cargo_bin("rfan")
        .unwrap()
        .assert()
        .failure()
        .stderr(predicates::str::contains("--config"));
}

#[test]
fn unknown_flag_is_rejected() {
    Command::cargo_bin("rfan")
        .unwrap()
        .args(["--config", "jobs.yaml", "--mirror-deletes"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("--mirror-deletes"));
}

#[test]
fn missing_config_file_fails() {
    Command::cargo_bin("rfan")
        .unwrap()
        .args(["--config", "/definitely/not/there.yaml"])
        .assert()
        .failure()
        .stderr(predicates::str::contains("failed to load config"));
}

#[test]
fn invalid_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("jobs.yaml");
    std::fs::write(&config_path, "jobs: []\n").unwrap();
    Command::cargo_bin("rfan")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("no jobs defined"));
}

#[test]
fn config_without_targets_fails() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("jobs.yaml");
    std::fs::write(
        &config_path,
        "jobs:\n  - name: backup\n    source:\n      url: sftp://src.example.com\n",
    )
    .unwrap();
    Command::cargo_bin("rfan")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicates::str::contains("no targets defined"));
}

#[test]
fn unreachable_source_fails_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let config_path = dir.path().join("jobs.yaml");
    // nothing listens on the discard port of localhost
    std::fs::write(
        &config_path,
        "jobs:\n  - name: backup\n    source:\n      url: sftp://127.0.0.1:9\n      username: sync\n      password: pw\n    targets:\n      - url: sftp://127.0.0.1:9\n        username: sync\n        password: pw\n",
    )
    .unwrap();
    Command::cargo_bin("rfan")
        .unwrap()
        .args(["--config", config_path.to_str().unwrap(), "--no-progress"])
        .timeout(std::time::Duration::from_secs(120))
        .assert()
        .failure()
        .stderr(predicates::str::contains("connect source"));
}

#[test]
fn dry_run_flag_is_accepted() {
    Command::cargo_bin("rfan")
        .unwrap()
        .args(["--dry-run", "--concurrency", "4", "--help"])
        .assert()
        .success();
}
