//! Tests for the offsetstore-cli binary
//!
//! These tests verify:
//! - `verify` prints a report and exits 0 on a clean file, 1 on corruption
//! - `stats` opens an existing index and prints its record counts
//! - `dump` lists every frame

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use offsetstore::{Config, Document, OffsetIndex};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn run_cli(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_offsetstore-cli"))
        .args(args)
        .env("RUST_LOG", "error")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

/// Closed index holding two flushed documents
fn setup_closed_index() -> (TempDir, Config) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder().data_dir(temp_dir.path()).build();

    let index = OffsetIndex::open(config.clone()).unwrap();
    index.put(1, &Document::new(1).with("x", 1i64)).unwrap();
    index.put(1, &Document::new(2).with("x", 2i64)).unwrap();
    index.close().unwrap();

    (temp_dir, config)
}

fn path_arg(path: &Path) -> &str {
    path.to_str().unwrap()
}

// =============================================================================
// Command Tests
// =============================================================================

#[test]
fn test_verify_clean_file() {
    let (_temp, config) = setup_closed_index();
    let path = config.file_path();

    let output = run_cli(&["verify", "--checksums", path_arg(&path)]);
    assert!(output.status.success());

    let text = stdout(&output);
    assert!(text.contains("checksums:        verified"));
    assert!(text.contains("data records:   2"));
    assert!(text.contains("torn tail:        none"));
}

#[test]
fn test_verify_corrupt_file_fails() {
    let (_temp, config) = setup_closed_index();
    let path = config.file_path();

    let mut bytes = fs::read(&path).unwrap();
    bytes[..4].copy_from_slice(b"NOPE");
    fs::write(&path, &bytes).unwrap();

    let output = run_cli(&["verify", path_arg(&path)]);
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn test_stats_reports_record_counts() {
    let (_temp, config) = setup_closed_index();

    let output = run_cli(&[
        "stats",
        "--data-dir",
        path_arg(&config.data_dir),
        "--file-name",
        &config.file_name,
    ]);
    assert!(output.status.success());
    assert!(stdout(&output).contains("document: 2"));
}

#[test]
fn test_stats_missing_index_fails() {
    let temp_dir = TempDir::new().unwrap();

    let output = run_cli(&["stats", "--data-dir", path_arg(temp_dir.path())]);
    assert_eq!(output.status.code(), Some(1));
    assert!(!temp_dir.path().join("offsets.oix").exists());
}

#[test]
fn test_dump_lists_frames() {
    let (_temp, config) = setup_closed_index();
    let path = config.file_path();

    let output = run_cli(&["dump", path_arg(&path)]);
    assert!(output.status.success());

    let text = stdout(&output);
    // header row, initial fragment, two records, final fragment
    assert_eq!(text.lines().count(), 5);
    assert_eq!(text.matches("frag").count(), 2);
}
