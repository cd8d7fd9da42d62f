//! CLI Integration Tests
//!
//! These tests verify that the CLI commands work correctly end-to-end.
//! They test the actual binary behavior, not just the library.
//!
//! Run with:
//! ```bash
//! cargo test --test cli_integration
//! ```

use serde_json::Value;
use std::path::Path;
use std::process::Command;
use tempfile::{tempdir, TempDir};

/// Run iavl against `db_path` and return (parsed stdout, success)
fn run_iavl(args: &[&str], db_path: &Path) -> (Value, bool) {
    let config = db_path.with_file_name("config.json");
    let output = Command::new(env!("CARGO_BIN_EXE_iavl"))
        .arg("-d")
        .arg(db_path)
        .arg("--config")
        .arg(&config)
        .args(args)
        .output()
        .expect("Failed to execute iavl");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let value = serde_json::from_str(stdout.trim()).unwrap_or(Value::Null);
    (value, output.status.success())
}

fn setup() -> (TempDir, std::path::PathBuf) {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("tree.iavl");
    let (_, success) = run_iavl(&["init"], &db_path);
    assert!(success, "init should succeed");
    (dir, db_path)
}

// ============================================================================
// Database Initialization Tests
// ============================================================================

#[test]
fn test_cli_init_creates_database() {
    let dir = tempdir().unwrap();
    let db_path = dir.path().join("tree.iavl");

    let (out, success) = run_iavl(&["init"], &db_path);
    assert!(success, "init should succeed");
    assert_eq!(out["status"], "ok");
    assert!(db_path.exists(), "database file should be created");

    let (_, success) = run_iavl(&["init"], &db_path);
    assert!(!success, "init should refuse an existing database");
}

#[test]
fn test_cli_default_path() {
    let output = Command::new(env!("CARGO_BIN_EXE_iavl"))
        .args(["--help"])
        .output()
        .expect("Failed to execute iavl");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("[default: tree.iavl]"),
        "Default database path should be tree.iavl, got: {}",
        stdout
    );
}

// ============================================================================
// Key/Value Tests
// ============================================================================

#[test]
fn test_cli_set_and_get() {
    let (_dir, db) = setup();

    let (out, success) = run_iavl(&["set", "greeting", "hello"], &db);
    assert!(success, "set should succeed");
    assert_eq!(out["updated"], false);
    assert_eq!(out["version"], 1);

    let (out, success) = run_iavl(&["get", "greeting"], &db);
    assert!(success, "get should succeed");
    assert_eq!(out["value"], "hello");

    let (out, _) = run_iavl(&["set", "greeting", "bonjour"], &db);
    assert_eq!(out["updated"], true);
    assert_eq!(out["version"], 2);

    let (out, _) = run_iavl(&["get", "greeting", "--version", "1"], &db);
    assert_eq!(out["value"], "hello");
}

#[test]
fn test_cli_get_missing_key_fails() {
    let (_dir, db) = setup();
    let (out, success) = run_iavl(&["get", "nothing"], &db);
    assert!(!success, "get of a missing key should fail");
    assert_eq!(out["status"], "error");
}

#[test]
fn test_cli_remove() {
    let (_dir, db) = setup();
    run_iavl(&["set", "a", "1"], &db);

    let (out, success) = run_iavl(&["remove", "a"], &db);
    assert!(success);
    assert_eq!(out["removed"], true);
    assert_eq!(out["version"], 2);

    let (out, _) = run_iavl(&["remove", "a"], &db);
    assert_eq!(out["removed"], false);

    let (_, success) = run_iavl(&["get", "a"], &db);
    assert!(!success, "removed key should be gone");
}

#[test]
fn test_cli_no_auto_commit_discards_changes() {
    let (_dir, db) = setup();
    let (out, success) = run_iavl(&["--no-auto-commit", "set", "a", "1"], &db);
    assert!(success);
    assert_eq!(out["status"], "discarded");
    assert_eq!(out["version"], Value::Null);

    let (_, success) = run_iavl(&["get", "a"], &db);
    assert!(!success, "uncommitted change should not persist");
}

#[test]
fn test_cli_range() {
    let (_dir, db) = setup();
    for (k, v) in [("b", "2"), ("a", "1"), ("d", "4"), ("c", "3")] {
        run_iavl(&["set", k, v], &db);
    }

    let (out, success) = run_iavl(&["range", "--start", "b", "--end", "d"], &db);
    assert!(success);
    assert_eq!(out["count"], 2);
    assert_eq!(out["entries"][0]["key"], "b");
    assert_eq!(out["entries"][1]["key"], "c");

    let (out, _) = run_iavl(&["range", "--descending", "--limit", "1"], &db);
    assert_eq!(out["count"], 1);
    assert_eq!(out["entries"][0]["key"], "d");
}

// ============================================================================
// Version Tests
// ============================================================================

#[test]
fn test_cli_versions_and_hash() {
    let (_dir, db) = setup();
    run_iavl(&["set", "a", "1"], &db);
    run_iavl(&["set", "b", "2"], &db);

    let (out, success) = run_iavl(&["versions"], &db);
    assert!(success);
    assert_eq!(out["count"], 2);
    assert_eq!(out["versions"][1]["size"], 2);

    let (latest, _) = run_iavl(&["hash"], &db);
    assert_eq!(latest["version"], 2);
    assert_eq!(latest["hash"], out["versions"][1]["hash"]);

    let (_, success) = run_iavl(&["hash", "--version", "9"], &db);
    assert!(!success, "unknown version should fail");
}

#[test]
fn test_cli_empty_commit() {
    let (_dir, db) = setup();
    let (out, success) = run_iavl(&["commit"], &db);
    assert!(success);
    assert_eq!(out["version"], 1);
    assert_eq!(
        out["hash"],
        "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
    );
}

#[test]
fn test_cli_prune_keep_recent() {
    let (_dir, db) = setup();
    for i in 0..4 {
        run_iavl(&["set", "k", &i.to_string()], &db);
    }

    let (out, success) = run_iavl(&["prune", "--keep-recent", "2"], &db);
    assert!(success);
    assert_eq!(out["versions"], serde_json::json!([3, 4]));

    let (out, _) = run_iavl(&["get", "k", "--version", "3"], &db);
    assert_eq!(out["value"], "2");
    let (_, success) = run_iavl(&["get", "k", "--version", "1"], &db);
    assert!(!success, "pruned version should be gone");
}

#[test]
fn test_cli_diff() {
    let (_dir, db) = setup();
    run_iavl(&["set", "a", "1"], &db);
    run_iavl(&["set", "b", "2"], &db);
    run_iavl(&["remove", "a"], &db);

    let (out, success) = run_iavl(&["diff", "1", "3"], &db);
    assert!(success);
    assert_eq!(out["added"], 1);
    assert_eq!(out["removed"], 1);
    assert_eq!(out["entries"][0]["type"], "removed");
    assert_eq!(out["entries"][1]["key"], "b");
}

#[test]
fn test_cli_status_and_compact() {
    let (_dir, db) = setup();
    run_iavl(&["set", "a", "1"], &db);
    run_iavl(&["set", "a", "2"], &db);

    let (_, success) = run_iavl(&["compact"], &db);
    assert!(success, "compact should succeed");

    let (out, success) = run_iavl(&["status"], &db);
    assert!(success);
    assert_eq!(out["version"], 2);
    assert_eq!(out["size"], 1);

    let (out, _) = run_iavl(&["get", "a"], &db);
    assert_eq!(out["value"], "2");
}
