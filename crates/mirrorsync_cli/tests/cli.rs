//! End-to-end tests for the `mirrorsync` binary.

use serde_json::Value;
use std::fs;
use std::process::{Command, Output};
use tempfile::TempDir;

fn mirrorsync(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mirrorsync"))
        .args(args)
        .output()
        .expect("failed to run mirrorsync")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write(dir: &TempDir, name: &str, contents: &str) -> String {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path.to_string_lossy().into_owned()
}

fn record<'a>(report: &'a Value, family: &str, uuid: &str) -> Option<&'a Value> {
    report["mirror"]
        .as_array()
        .unwrap()
        .iter()
        .find(|r| r["family"] == family && r["uuid"] == uuid)
}

const SNAPSHOT: &str = r#"{
    "instance": [
        {"id": "vm-1", "name": "web", "state": "Stopped"},
        {"id": "vm-2", "name": "db", "state": "Running"}
    ],
    "zone": [{"id": "zone-1", "name": "east"}]
}"#;

#[test]
fn classify_prints_categories() {
    let output = mirrorsync(&["classify", "VM.START", "USER.LOGIN", "MAINTENANCE"]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert!(text.contains("VM.START -> VM."));
    assert!(text.contains("USER.LOGIN -> USER."));
    assert!(text.contains("MAINTENANCE -> MAINTENANCE"));
}

#[test]
fn classify_json_flags_session_and_offering() {
    let output = mirrorsync(&[
        "classify",
        "--format",
        "json",
        "USER.LOGOUT",
        "NETWORK.OFFERING.EDIT",
    ]);
    assert!(output.status.success());

    let rows: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(rows[0]["category"], "USER.");
    assert_eq!(rows[0]["session"], true);
    assert_eq!(rows[1]["category"], "NETWORK.");
    assert_eq!(rows[1]["offering"], true);
}

#[test]
fn decode_reports_each_line() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "actions.jsonl",
        "{\"event\":\"VM.START\",\"entityUuid\":\"vm-1\"}\n\n{broken\n{\"eventType\":\"VOLUME.ATTACH\"}\n",
    );

    let output = mirrorsync(&["decode", "--channel", "action", &file]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert!(text.contains("VM.START [VM.] vm-1"));
    assert!(text.contains("error: malformed"));
    assert!(text.contains("3 action payloads: 2 decoded, 1 failed"));
}

#[test]
fn decode_json_keeps_line_numbers() {
    let dir = TempDir::new().unwrap();
    let file = write(
        &dir,
        "states.jsonl",
        "{\"id\":\"vol-1\",\"resource\":\"Volume\",\"new-state\":\"Ready\"}\n{\"resource\":\"Volume\"}\n",
    );

    let output = mirrorsync(&["decode", "-c", "states", "-f", "json", &file]);
    assert!(output.status.success());

    let lines: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(lines[0]["line"], 1);
    assert_eq!(lines[0]["event"]["newState"], "Ready");
    assert_eq!(lines[1]["line"], 2);
    assert!(lines[1]["error"].as_str().unwrap().contains("`id`"));
}

#[test]
fn decode_rejects_unknown_channel() {
    let dir = TempDir::new().unwrap();
    let file = write(&dir, "x.jsonl", "{}\n");

    let output = mirrorsync(&["decode", "--channel", "billing", &file]);
    assert!(!output.status.success());
}

#[test]
fn replay_applies_events_to_mirror() {
    let dir = TempDir::new().unwrap();
    let platform = write(&dir, "platform.json", SNAPSHOT);
    let actions = write(
        &dir,
        "actions.jsonl",
        "{\"event\":\"VM.START\",\"id\":\"vm-1\"}\n{\"event\":\"USER.LOGIN\"}\nnot json\n",
    );
    let alerts = write(&dir, "alerts.jsonl", "{\"subject\":\"host down\"}\n");

    let output = mirrorsync(&[
        "replay",
        "--platform",
        &platform,
        "--actions",
        &actions,
        "--alerts",
        &alerts,
        "--full-resync",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let report: Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["stats"]["received"], 4);
    assert_eq!(report["stats"]["decode_failures"], 1);
    assert_eq!(report["stats"]["alerts"], 1);

    let vm = record(&report, "instance", "vm-1").unwrap();
    assert_eq!(vm["status"], "Running");
    assert_eq!(record(&report, "instance", "vm-2").unwrap()["status"], "Running");
    assert!(record(&report, "zone", "zone-1").is_some());
    assert!(!report["initial_sync"].as_array().unwrap().is_empty());
}

#[test]
fn replay_writes_output_file() {
    let dir = TempDir::new().unwrap();
    let platform = write(&dir, "platform.json", SNAPSHOT);
    let actions = write(
        &dir,
        "actions.jsonl",
        "{\"event\":\"VM.CREATE\",\"entityUuid\":\"vm-2\"}\n",
    );
    let out = dir.path().join("result.json");

    let output = mirrorsync(&[
        "replay",
        "-p",
        &platform,
        "--actions",
        &actions,
        "--output",
        out.to_str().unwrap(),
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).is_empty());

    let report: Value = serde_json::from_str(&fs::read_to_string(&out).unwrap()).unwrap();
    let db = record(&report, "instance", "vm-2").unwrap();
    assert_eq!(db["name"], "db");
    assert_eq!(db["active"], true);
    // Scoped sync only touches the event's resource.
    assert!(record(&report, "instance", "vm-1").is_none());
    assert!(report.get("initial_sync").is_none());
}

#[test]
fn replay_fails_on_bad_snapshot() {
    let dir = TempDir::new().unwrap();
    let platform = write(&dir, "platform.json", "[1, 2, 3]");

    let output = mirrorsync(&["replay", "--platform", &platform]);
    assert!(!output.status.success());
    assert!(stdout(&output).is_empty());
}
