//! CLI integration tests for pgbulkload.
//!
//! These verify argument parsing, help output, and exit codes for error
//! conditions that do not need a live database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

fn cmd() -> Command {
    Command::cargo_bin("pgbulkload").unwrap()
}

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("load"))
        .stdout(predicate::str::contains("check"));
}

#[test]
fn test_load_subcommand_help() {
    cmd()
        .args(["load", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--truncate"))
        .stdout(predicate::str::contains("--data-only"))
        .stdout(predicate::str::contains("--schema-only"))
        .stdout(predicate::str::contains("--target-schema"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pgbulkload"));
}

#[test]
fn test_output_json_flag_exists() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--output-json"));
}

#[test]
fn test_missing_config_fails() {
    cmd()
        .args(["--config", "/nonexistent/load.yaml", "check"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_invalid_config_rejected() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(b"source: {type: fixed, uri: stdin, table: t, fields: []}\ntarget: {uri: 'postgresql://u@h/d'}\n")
        .unwrap();
    file.flush().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "check"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("at least one field"));
}

#[test]
fn test_data_only_and_schema_only_conflict() {
    let mut file = tempfile::NamedTempFile::with_suffix(".yaml").unwrap();
    file.write_all(
        b"source:\n  type: fixed\n  uri: stdin\n  table: t\n  fields:\n    - { name: v, start: 0, length: 4 }\ntarget:\n  uri: 'postgresql://u@h/d'\n",
    )
    .unwrap();
    file.flush().unwrap();

    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "load",
            "--data-only",
            "--schema-only",
        ])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("mutually exclusive"));
}
