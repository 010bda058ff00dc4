//! CLI-level smoke tests driving the real `keel` binary, no daemon
//! required: argument parsing and the "daemon unreachable" error path.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    Command::cargo_bin("keel")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Create a container"))
        .stdout(predicate::str::contains("Pull an image"));
}

#[test]
fn version_without_daemon_still_prints_client_version() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("no-such-daemon.sock");

    Command::cargo_bin("keel")
        .unwrap()
        .arg("--host")
        .arg(format!("unix://{}", sock.display()))
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("Client:"))
        .stderr(predicate::str::contains("Cannot connect to the daemon"));
}

#[test]
fn ps_without_daemon_fails_with_connection_error() {
    let dir = tempfile::tempdir().unwrap();
    let sock = dir.path().join("no-such-daemon.sock");

    Command::cargo_bin("keel")
        .unwrap()
        .arg("--host")
        .arg(format!("unix://{}", sock.display()))
        .arg("ps")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn unsupported_endpoint_scheme_is_rejected() {
    Command::cargo_bin("keel")
        .unwrap()
        .arg("--host")
        .arg("ftp://example.com")
        .arg("ps")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unsupported daemon endpoint"));
}

#[test]
fn missing_required_create_argument_is_a_usage_error() {
    Command::cargo_bin("keel")
        .unwrap()
        .arg("create")
        .assert()
        .failure()
        .code(2);
}
