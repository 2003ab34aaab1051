#![allow(clippy::single_match_else)]

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use jsonschema::JSONSchema;
use rusqlite::Connection;
use serde_json::Value;
use ulid::Ulid;

fn fitsync_binary_path() -> PathBuf {
    match std::env::var("CARGO_BIN_EXE_fitsync") {
        Ok(value) => PathBuf::from(value),
        Err(_) => Path::new(env!("CARGO_MANIFEST_DIR")).join("../../target/debug/fitsync"),
    }
}

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

fn temp_db_path() -> PathBuf {
    std::env::temp_dir().join(format!("fitsync-cli-{}.sqlite3", Ulid::new()))
}

fn fitsync_output(db_path: &Path, args: &[&str]) -> Output {
    let mut command = Command::new(fitsync_binary_path());
    command
        .arg("--db")
        .arg(db_path)
        .env_remove("NOTION_TOKEN")
        .env_remove("NOTION_ACTIVITIES_DB_ID")
        .env_remove("NOTION_SLEEP_DB_ID")
        .env("RUST_LOG", "fitness_sync=warn");
    for arg in args {
        command.arg(arg);
    }

    match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run fitsync command {args:?}: {err}"),
    }
}

fn stdout_json(output: &Output) -> Value {
    match serde_json::from_slice::<Value>(&output.stdout) {
        Ok(value) => value,
        Err(err) => panic!(
            "failed to parse stdout as JSON: {err}\nstdout={}\nstderr={}",
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        ),
    }
}

fn assert_success(output: &Output) {
    assert!(
        output.status.success(),
        "command failed: stdout={} stderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );
}

fn assert_report_schema(report: &Value) {
    let schema_path =
        Path::new(env!("CARGO_MANIFEST_DIR")).join("../../contracts/sync-report.v1.schema.json");
    let body = fs::read_to_string(&schema_path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", schema_path.display()));
    let schema: Value = serde_json::from_str(&body)
        .unwrap_or_else(|err| panic!("failed to parse {}: {err}", schema_path.display()));
    let compiled = JSONSchema::compile(&schema)
        .unwrap_or_else(|err| panic!("failed to compile report schema: {err}"));
    if let Some(errors) = compiled
        .validate(report)
        .err()
        .map(|iter| iter.map(|err| err.to_string()).collect::<Vec<_>>())
    {
        panic!("report failed schema validation:\n{}", errors.join("\n"));
    }
}

fn actions(report: &Value) -> Vec<String> {
    report["outcomes"]
        .as_array()
        .map(|outcomes| {
            outcomes
                .iter()
                .filter_map(|outcome| outcome["action"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn count_documents(db_path: &Path) -> i64 {
    let conn = match Connection::open(db_path) {
        Ok(conn) => conn,
        Err(err) => panic!("failed to open {}: {err}", db_path.display()),
    };
    match conn.query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0)) {
        Ok(count) => count,
        Err(err) => panic!("failed to count documents: {err}"),
    }
}

#[test]
fn help_lists_expected_subcommands() {
    let output = match Command::new(fitsync_binary_path()).arg("--help").output() {
        Ok(value) => value,
        Err(err) => panic!("failed to run help command: {err}"),
    };

    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    for required in ["sync", "map", "runs"] {
        assert!(
            stdout.contains(required),
            "expected help output to contain {required}; output={stdout}"
        );
    }
}

#[test]
fn activities_sync_is_idempotent_across_runs() {
    let db_path = temp_db_path();
    let input = fixture("activities.json");
    let input = input.to_string_lossy();
    let args = ["sync", "activities", "--input", input.as_ref(), "--json"];

    let first = fitsync_output(&db_path, &args);
    assert_success(&first);
    let first_report = stdout_json(&first);
    assert_report_schema(&first_report);
    assert_eq!(actions(&first_report), vec!["created"; 3]);

    let barre = &first_report["outcomes"][1]["key"];
    assert_eq!(barre["category"], "Strength");
    assert_eq!(barre["date"], "2024-01-16");
    assert_eq!(first_report["outcomes"][2]["key"]["discriminator"], "Netflix Ride");

    let second = fitsync_output(&db_path, &args);
    assert_success(&second);
    let second_report = stdout_json(&second);
    assert_report_schema(&second_report);
    assert_eq!(actions(&second_report), vec!["skipped"; 3]);
    assert_eq!(second_report["outcomes"][0]["reason"], "unchanged");
    assert_eq!(
        first_report["outcomes"][0]["target_id"],
        second_report["outcomes"][0]["target_id"]
    );
    assert_eq!(count_documents(&db_path), 3);

    let _ = fs::remove_file(&db_path);
}

#[test]
fn sleep_sync_separates_naps_and_suppresses_empty_nights() {
    let db_path = temp_db_path();
    let input = fixture("sleep.jsonl");
    let input = input.to_string_lossy();

    let output = fitsync_output(
        &db_path,
        &["sync", "sleep", "--input", input.as_ref(), "--json"],
    );
    assert_success(&output);
    let report = stdout_json(&output);
    assert_report_schema(&report);

    assert_eq!(actions(&report), vec!["created", "created", "skipped"]);
    assert_eq!(report["outcomes"][0]["key"]["discriminator"], "Main Sleep");
    assert_eq!(report["outcomes"][1]["key"]["discriminator"], "Nap");
    assert_eq!(report["outcomes"][2]["reason"], "zero_duration");
    assert_eq!(count_documents(&db_path), 2);

    let _ = fs::remove_file(&db_path);
}

#[test]
fn dry_run_leaves_store_empty_and_is_recorded() {
    let db_path = temp_db_path();
    let input = fixture("activities.json");
    let input = input.to_string_lossy();

    let output = fitsync_output(
        &db_path,
        &[
            "sync",
            "activities",
            "--input",
            input.as_ref(),
            "--limit",
            "2",
            "--dry-run",
            "--json",
        ],
    );
    assert_success(&output);
    let report = stdout_json(&output);
    assert_eq!(actions(&report), vec!["created"; 2]);
    assert_eq!(count_documents(&db_path), 0);

    let runs = fitsync_output(&db_path, &["runs", "list", "--json"]);
    assert_success(&runs);
    let runs = stdout_json(&runs);
    assert_eq!(runs.as_array().map(Vec::len), Some(1));
    assert_eq!(runs[0]["dry_run"], true);
    assert_eq!(runs[0]["created"], 2);

    let _ = fs::remove_file(&db_path);
}

#[test]
fn map_prints_properties_without_touching_the_store() {
    let db_path = temp_db_path();
    let input = fixture("sleep.jsonl");
    let input = input.to_string_lossy();

    let output = fitsync_output(
        &db_path,
        &["map", "sleep", "--input", input.as_ref(), "--start", "1"],
    );
    assert_success(&output);
    let previews = stdout_json(&output);
    assert_eq!(previews.as_array().map(Vec::len), Some(2));
    assert_eq!(previews[0]["key"]["discriminator"], "Nap");
    assert_eq!(previews[0]["suppressed"], Value::Null);
    assert_eq!(previews[1]["suppressed"], "zero_duration");
    assert_eq!(
        previews[0]["tracked"]["Light Sleep"],
        serde_json::json!({"type": "rich_text", "value": "0h 25m"})
    );
    assert!(!db_path.exists());
}

#[test]
fn notion_target_without_token_fails_before_syncing() {
    let db_path = temp_db_path();
    let input = fixture("activities.json");
    let input = input.to_string_lossy();

    let output = fitsync_output(
        &db_path,
        &[
            "sync",
            "activities",
            "--input",
            input.as_ref(),
            "--target",
            "notion",
            "--database-id",
            "db-activities",
        ],
    );
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("NOTION_TOKEN"));
    assert!(output.stdout.is_empty());

    let _ = fs::remove_file(&db_path);
}

#[test]
fn invalid_config_is_rejected() {
    let db_path = temp_db_path();
    let config_path = std::env::temp_dir().join(format!("fitsync-config-{}.json", Ulid::new()));
    if let Err(err) = fs::write(&config_path, r#"{"utc_offset": "Asia/Kuala_Lumpur"}"#) {
        panic!("failed to write config: {err}");
    }
    let input = fixture("sleep.jsonl");
    let input = input.to_string_lossy();

    let mut command = Command::new(fitsync_binary_path());
    command
        .arg("--db")
        .arg(&db_path)
        .arg("--config")
        .arg(&config_path)
        .args(["map", "sleep", "--input", input.as_ref()]);
    let output = match command.output() {
        Ok(output) => output,
        Err(err) => panic!("failed to run fitsync: {err}"),
    };

    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("utc_offset"));

    let _ = fs::remove_file(&config_path);
}
