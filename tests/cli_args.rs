//! Integration tests for the marketgate binary
//!
//! Runs the compiled CLI against a temporary cache directory.

use std::fs;
use std::process::Command;

use tempfile::TempDir;

/// Helper to run the CLI with given args and capture output
fn run_cli(args: &[&str]) -> std::process::Output {
    Command::new(env!("CARGO_BIN_EXE_marketgate"))
        .args(args)
        .output()
        .expect("Failed to execute marketgate")
}

fn stdout_json(output: &std::process::Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn test_help_flag_exits_successfully() {
    let output = run_cli(&["--help"]);
    assert!(output.status.success(), "Expected --help to exit successfully");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("marketgate"), "Help should mention marketgate");
    assert!(stdout.contains("fetch"), "Help should list the fetch command");
}

#[test]
fn test_missing_command_fails() {
    let output = run_cli(&[]);
    assert!(!output.status.success());
}

#[test]
fn test_stats_reports_defaults() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&["--cache-dir", dir.path().to_str().unwrap(), "stats"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let stats = stdout_json(&output);
    assert_eq!(stats["daily_budget"]["daily_limit"], 100);
    assert_eq!(stats["daily_budget"]["remaining"], 100);
    assert_eq!(stats["burst_limiter"]["max_requests"], 5);
    assert_eq!(stats["cache"]["memory"]["max_size"], 500);
    assert_eq!(stats["cache"]["persistent"]["count"], 0);
}

#[test]
fn test_config_file_is_honoured() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("marketgate.toml");
    fs::write(&config, "[daily]\ndaily_limit = 25\n\n[burst]\nmax_requests = 2\n").unwrap();

    let output = run_cli(&[
        "--config",
        config.to_str().unwrap(),
        "--cache-dir",
        dir.path().join("cache").to_str().unwrap(),
        "--memory-size",
        "12",
        "stats",
    ]);
    assert!(output.status.success());

    let stats = stdout_json(&output);
    assert_eq!(stats["daily_budget"]["daily_limit"], 25);
    assert_eq!(stats["burst_limiter"]["max_requests"], 2);
    assert_eq!(stats["cache"]["memory"]["max_size"], 12);
}

#[test]
fn test_invalid_config_exits_with_error() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&[
        "--cache-dir",
        dir.path().to_str().unwrap(),
        "--memory-size",
        "0",
        "stats",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("memory_max_size"), "{}", stderr);
}

#[test]
fn test_get_on_empty_cache_is_a_miss() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&[
        "--cache-dir",
        dir.path().to_str().unwrap(),
        "get",
        "daily:search",
        "bike",
    ]);
    assert!(output.status.success());

    let lookup = stdout_json(&output);
    assert!(lookup["value"].is_null());
    assert_eq!(lookup["from_cache"], false);
}

#[test]
fn test_fetch_rejects_malformed_target() {
    let dir = TempDir::new().unwrap();
    let output = run_cli(&[
        "--cache-dir",
        dir.path().to_str().unwrap(),
        "fetch",
        "--source",
        "daily",
        "daily:search",
        "no-url-here",
    ]);
    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Invalid fetch target"), "{}", stderr);
}

#[test]
fn test_cleanup_and_clear_succeed_on_empty_cache() {
    let dir = TempDir::new().unwrap();
    let cache_dir = dir.path().to_str().unwrap();

    let output = run_cli(&["--cache-dir", cache_dir, "cleanup"]);
    assert!(output.status.success());
    let report = stdout_json(&output);
    assert_eq!(report["memory_removed"], 0);
    assert_eq!(report["persistent_removed"], 0);

    let output = run_cli(&["--cache-dir", cache_dir, "clear"]);
    assert!(output.status.success());
    let output = run_cli(&["--cache-dir", cache_dir, "clear", "--namespace", "burst:search"]);
    assert!(output.status.success());
}
