//! Integration tests for the dosewatch binary.
//!
//! These tests verify end-to-end behavior including:
//! - Patient and medication management
//! - Dose recording and classification
//! - Sweep passes, reminders and guardian alerts
//! - Analytics and CSV export

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use tempfile::TempDir;

const ENROLLED_AT: &str = "2024-01-15T00:00:00Z";

/// Helper to get the path to the CLI binary
fn cli() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("dosewatch"))
}

/// A data directory plus an empty config file, so the user's config never leaks in
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fs::write(dir.path().join("config.toml"), "").unwrap();
        Self { dir }
    }

    fn data_dir(&self) -> PathBuf {
        self.dir.path().join("data")
    }

    /// Command pinned to `now`
    fn at(&self, now: &str) -> Command {
        let mut cmd = cli();
        cmd.arg("--data-dir")
            .arg(self.data_dir())
            .arg("--config")
            .arg(self.dir.path().join("config.toml"))
            .arg("--now")
            .arg(now);
        cmd
    }

    /// Run with `--json` and parse stdout
    fn json(&self, now: &str, args: &[&str]) -> Value {
        let output = self
            .at(now)
            .arg("--json")
            .args(args)
            .assert()
            .success()
            .get_output()
            .stdout
            .clone();
        serde_json::from_slice(&output).expect("stdout is not JSON")
    }

    fn add_patient(&self, timezone: &str) -> String {
        let patient = self.json(
            ENROLLED_AT,
            &["patient", "add", "--name", "Rosa", "--timezone", timezone],
        );
        patient["id"].as_str().unwrap().to_string()
    }

    fn add_med(&self, patient: &str, slots: &[&str], quantity: u32) -> String {
        let quantity = quantity.to_string();
        let mut args = vec![
            "med",
            "add",
            "--patient",
            patient,
            "--name",
            "Warfarin",
            "--quantity",
            &quantity,
        ];
        for slot in slots {
            args.push("--slot");
            args.push(slot);
        }
        let med = self.json(ENROLLED_AT, &args);
        med["id"].as_str().unwrap().to_string()
    }

    fn outbox(&self) -> String {
        fs::read_to_string(self.data_dir().join("outbox/notifications.jsonl")).unwrap_or_default()
    }
}

#[test]
fn test_cli_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "Medication adherence tracking engine",
        ));
}

#[test]
fn test_patient_add_and_list() {
    let env = TestEnv::new();
    let id = env.add_patient("America/New_York");

    let patients = env.json(ENROLLED_AT, &["patient", "list"]);
    assert_eq!(patients.as_array().unwrap().len(), 1);
    assert_eq!(patients[0]["id"], id.as_str());
    assert_eq!(patients[0]["timezone"], "America/New_York");

    assert!(env.data_dir().join("store/dosewatch.json").exists());
}

#[test]
fn test_invalid_timezone_is_validation_error() {
    let env = TestEnv::new();

    env.at(ENROLLED_AT)
        .args(["patient", "add", "--name", "Rosa", "--timezone", "Mars/Olympus"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid time zone"));
}

#[test]
fn test_record_on_time_and_late() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00", "20:00"], 10);

    let on_time = env.json(
        "2024-01-15T08:10:00Z",
        &["record", "--patient", &patient, "--medication", &med, "--slot", "08:00"],
    );
    assert_eq!(on_time["outcome"]["status"], "taken");
    assert_eq!(on_time["outcome"]["timing"]["kind"], "on_time");
    assert_eq!(on_time["local_date"], "2024-01-15");

    env.at("2024-01-15T21:00:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "20:00"])
        .assert()
        .success()
        .stdout(predicate::str::contains("late"))
        .stdout(predicate::str::contains("60 minutes late"));

    let meds = env.json(ENROLLED_AT, &["med", "list", "--patient", &patient]);
    assert_eq!(meds[0]["remaining_quantity"], 8);
}

#[test]
fn test_report_after_midnight_counts_for_previous_evening() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["23:00"], 10);

    let entry = env.json(
        "2024-01-16T00:15:00Z",
        &["record", "--patient", &patient, "--medication", &med, "--slot", "23:00"],
    );
    assert_eq!(entry["local_date"], "2024-01-15");
    assert_eq!(entry["outcome"]["timing"]["kind"], "late");

    // The taken dose is not overwritten by a miss once grace runs out
    let swept = env.json("2024-01-16T01:30:00Z", &["sweep"]);
    assert_eq!(swept["missed"], 0);

    let summary = env.json("2024-01-16T01:30:00Z", &["stats", "summary", "--patient", &patient]);
    assert_eq!(summary["missed"], 0);
}

#[test]
fn test_second_report_for_slot_is_conflict() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00"], 10);

    env.at("2024-01-15T08:05:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "08:00"])
        .assert()
        .success();

    env.at("2024-01-15T09:30:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "08:00"])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("already resolved"));
}

#[test]
fn test_malformed_slot_rejected() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00"], 10);

    env.at("2024-01-15T08:05:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "8am"])
        .assert()
        .failure()
        .code(2);

    let summary = env.json("2024-01-15T08:05:00Z", &["stats", "summary", "--patient", &patient]);
    assert_eq!(summary["on_time"], 0);
}

#[test]
fn test_sweep_marks_missed_once() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    env.add_med(&patient, &["08:00", "20:00"], 10);

    let first = env.json("2024-01-15T23:00:00Z", &["sweep"]);
    assert_eq!(first["missed"], 2);

    let second = env.json("2024-01-15T23:30:00Z", &["sweep"]);
    assert_eq!(second["missed"], 0);

    let summary = env.json("2024-01-15T23:30:00Z", &["stats", "summary", "--patient", &patient]);
    assert_eq!(summary["missed"], 2);
    assert_eq!(summary["adherence_percentage"], 0);
}

#[test]
fn test_sweep_respects_grace_window() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    env.add_med(&patient, &["08:00"], 10);

    // Two hours of grace: 09:59 is still pending
    let early = env.json("2024-01-15T09:59:00Z", &["sweep"]);
    assert_eq!(early["missed"], 0);

    let late = env.json("2024-01-15T10:01:00Z", &["sweep"]);
    assert_eq!(late["missed"], 1);
}

#[test]
fn test_guardian_alert_queued() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    env.add_med(&patient, &["08:00"], 10);

    let links = serde_json::json!([{
        "patient_id": patient,
        "guardian_id": "6f1c3c1e-2a64-4d4e-9a55-3f6f8f6b1a01",
        "guardian_contact": "ana@example.com",
        "status": "active"
    }]);
    fs::write(
        env.data_dir().join("guardians.json"),
        serde_json::to_string(&links).unwrap(),
    )
    .unwrap();

    env.json("2024-01-15T12:00:00Z", &["sweep"]);

    let outbox = env.outbox();
    assert!(outbox.contains("guardian_alert"));
    assert!(outbox.contains("ana@example.com"));
    assert!(outbox.contains("08:00"));
    assert!(outbox.contains(r#""queued_at":"2024-01-15T12:00:00Z""#));
}

#[test]
fn test_remind_queues_recent_slots() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    env.add_med(&patient, &["08:00", "20:00"], 10);

    let result = env.json("2024-01-15T08:30:00Z", &["remind"]);
    assert_eq!(result["reminders"], 1);

    let outbox = env.outbox();
    assert!(outbox.contains("reminder"));
    assert!(!outbox.contains("\"scheduled_slot\":\"20:00\""));
}

#[test]
fn test_stats_runway_and_next() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    env.add_med(&patient, &["08:00", "20:00"], 10);

    let runway = env.json(ENROLLED_AT, &["stats", "runway", "--patient", &patient]);
    assert_eq!(runway[0]["days_remaining"], 5);
    assert_eq!(runway[0]["status"], "low");

    let next = env.json("2024-01-15T07:00:00Z", &["stats", "next", "--patient", &patient]);
    assert_eq!(next["slot"], "08:00");
    assert_eq!(next["minutes_until"], 60);

    let heatmap = env.json(ENROLLED_AT, &["stats", "heatmap", "--patient", &patient]);
    assert_eq!(heatmap.as_array().unwrap().len(), 30);
}

#[test]
fn test_reliability_counts_taken_days() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00"], 10);

    env.at("2024-01-15T08:00:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "08:00"])
        .assert()
        .success();

    let result = env.json("2024-01-15T12:00:00Z", &["stats", "reliability", "--patient", &patient]);
    assert_eq!(result["reliability_index"], 1);
}

#[test]
fn test_export_writes_csv() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00", "20:00"], 10);

    env.at("2024-01-15T08:05:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "08:00"])
        .assert()
        .success();
    env.json("2024-01-15T23:00:00Z", &["sweep"]);

    let csv_path = env.dir.path().join("ledger.csv");
    env.at("2024-01-15T23:00:00Z")
        .args(["export", "--patient", &patient, "--out"])
        .arg(&csv_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Exported 2 entries"));

    let csv_content = fs::read_to_string(&csv_path).expect("Failed to read CSV");
    assert!(csv_content.starts_with("id,medication_id,medication,scheduled_slot"));
    assert!(csv_content.contains("on_time"));
    assert!(csv_content.contains("missed"));
}

#[test]
fn test_deleted_medication_is_hidden() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00"], 10);

    env.at(ENROLLED_AT)
        .args(["med", "delete", "--id", &med])
        .assert()
        .success();

    let meds = env.json(ENROLLED_AT, &["med", "list", "--patient", &patient]);
    assert!(meds.as_array().unwrap().is_empty());

    env.at("2024-01-15T08:05:00Z")
        .args(["record", "--patient", &patient, "--medication", &med, "--slot", "08:00"])
        .assert()
        .failure()
        .code(4);

    let swept = env.json("2024-01-15T23:00:00Z", &["sweep"]);
    assert_eq!(swept["missed"], 0);
}

#[test]
fn test_paused_medication_not_swept() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00"], 10);

    env.at(ENROLLED_AT)
        .args(["med", "deactivate", "--id", &med])
        .assert()
        .success();

    let swept = env.json("2024-01-15T23:00:00Z", &["sweep"]);
    assert_eq!(swept["missed"], 0);
}

#[test]
fn test_refill_and_slots() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    let med = env.add_med(&patient, &["08:00"], 10);

    let refilled = env.json(ENROLLED_AT, &["med", "refill", "--id", &med, "--quantity", "20"]);
    assert_eq!(refilled["remaining_quantity"], 30);

    let updated = env.json(
        ENROLLED_AT,
        &["med", "slots", "--id", &med, "--slot", "21:00", "--slot", "09:00"],
    );
    assert_eq!(updated["slots"], serde_json::json!(["09:00", "21:00"]));
}

#[test]
fn test_daemon_stops_after_max_passes() {
    let env = TestEnv::new();
    let patient = env.add_patient("UTC");
    env.add_med(&patient, &["08:00"], 10);

    env.at("2024-01-15T12:00:00Z")
        .args(["daemon", "--max-passes", "1"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Daemon stopped after 1 passes"));

    let summary = env.json("2024-01-15T12:00:00Z", &["stats", "summary", "--patient", &patient]);
    assert_eq!(summary["missed"], 1);
}
