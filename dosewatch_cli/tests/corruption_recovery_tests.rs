//! Corruption recovery tests for the dosewatch binary.
//!
//! These tests verify the system can handle:
//! - A corrupted store document (refused, never overwritten)
//! - Empty or missing files
//! - Stray temp files from an interrupted commit
//! - Corrupted guardian links, outbox lines and config files

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::io::Write as IoWrite;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const ENROLLED_AT: &str = "2024-01-15T00:00:00Z";

fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("dosewatch"))
}

fn setup_test_dir() -> TempDir {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    fs::write(dir.path().join("config.toml"), "").unwrap();
    dir
}

fn at(root: &Path, now: &str) -> Command {
    let mut cmd = cli();
    cmd.arg("--data-dir")
        .arg(root.join("data"))
        .arg("--config")
        .arg(root.join("config.toml"))
        .arg("--now")
        .arg(now);
    cmd
}

fn store_path(root: &Path) -> PathBuf {
    root.join("data/store/dosewatch.json")
}

fn enroll(root: &Path) -> (String, String) {
    let out = at(root, ENROLLED_AT)
        .args(["--json", "patient", "add", "--name", "Rosa", "--timezone", "UTC"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let patient: serde_json::Value = serde_json::from_slice(&out).unwrap();
    let patient = patient["id"].as_str().unwrap().to_string();

    let out = at(root, ENROLLED_AT)
        .args(["--json", "med", "add", "--patient", &patient, "--name", "Warfarin"])
        .args(["--slot", "08:00", "--quantity", "10"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let med: serde_json::Value = serde_json::from_slice(&out).unwrap();
    (patient, med["id"].as_str().unwrap().to_string())
}

#[test]
fn test_corrupted_store_is_refused_not_replaced() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("data/store")).unwrap();
    fs::write(store_path(root), "{ invalid json }}}}").expect("Failed to write corrupted store");

    at(root, ENROLLED_AT)
        .args(["patient", "add", "--name", "Rosa", "--timezone", "UTC"])
        .assert()
        .failure()
        .code(5)
        .stderr(predicate::str::contains("JSON error"));

    // The unreadable document is left for manual recovery
    let content = fs::read_to_string(store_path(root)).unwrap();
    assert_eq!(content, "{ invalid json }}}}");
}

#[test]
fn test_sweep_aborts_on_corrupted_store() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("data/store")).unwrap();
    fs::write(store_path(root), "[1, 2").unwrap();

    at(root, ENROLLED_AT)
        .arg("sweep")
        .assert()
        .failure()
        .code(6)
        .stderr(predicate::str::contains("Sweep aborted"));
}

#[test]
fn test_empty_store_document() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();

    fs::create_dir_all(root.join("data/store")).unwrap();
    fs::write(store_path(root), "").unwrap();

    at(root, ENROLLED_AT)
        .args(["patient", "add", "--name", "Rosa", "--timezone", "UTC"])
        .assert()
        .success();
}

#[test]
fn test_stray_temp_file_ignored() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();
    let (patient, _) = enroll(root);

    // Simulate a crash between temp write and rename
    let mut stray = fs::File::create(root.join("data/store/.tmpABC123")).unwrap();
    write!(stray, r#"{{"patients":[{{"id":"partial"#).unwrap();
    drop(stray);

    at(root, ENROLLED_AT)
        .args(["med", "list", "--patient", &patient])
        .assert()
        .success()
        .stdout(predicate::str::contains("Warfarin"));
}

#[test]
fn test_missing_guardian_links() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();
    enroll(root);

    // No guardians.json: the miss is still recorded
    at(root, "2024-01-15T12:00:00Z")
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 missed"));
}

#[test]
fn test_corrupted_guardian_links_do_not_block_sweep() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();
    let (patient, _) = enroll(root);

    fs::write(root.join("data/guardians.json"), "{ not valid json at all }").unwrap();

    at(root, "2024-01-15T12:00:00Z")
        .arg("sweep")
        .assert()
        .success()
        .stdout(predicate::str::contains("1 missed"));

    at(root, "2024-01-15T12:00:00Z")
        .args(["stats", "summary", "--patient", &patient])
        .assert()
        .success()
        .stdout(predicate::str::contains("missed   1"));
}

#[test]
fn test_corrupted_outbox_line() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();
    enroll(root);

    let outbox = root.join("data/outbox/notifications.jsonl");
    fs::create_dir_all(outbox.parent().unwrap()).unwrap();
    fs::write(&outbox, "{ partial\n").unwrap();

    at(root, "2024-01-15T08:30:00Z")
        .arg("remind")
        .assert()
        .success()
        .stdout(predicate::str::contains("Sent 1 reminders"));

    let content = fs::read_to_string(&outbox).unwrap();
    assert!(content.contains("\"type\":\"reminder\""));
}

#[test]
fn test_invalid_config_rejected() {
    let temp_dir = setup_test_dir();
    let root = temp_dir.path();

    fs::write(
        root.join("config.toml"),
        "[adherence]\ngrace_minutes = 10\nlate_threshold_minutes = 30\n",
    )
    .unwrap();

    at(root, ENROLLED_AT)
        .args(["patient", "list"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Configuration error"));

    fs::write(root.join("config.toml"), "[adherence\n").unwrap();
    at(root, ENROLLED_AT)
        .args(["patient", "list"])
        .assert()
        .failure()
        .code(2);
}
