//! Behavior-driven tests for CLI user journeys
//!
//! These tests run the `finx` binary and verify WHAT the user sees on stdout and in
//! the exit code. Every fetch uses `--mock`, so nothing touches the network.

use std::io::Write;
use std::process::{Command, Output};

use serde_json::Value;

fn finx(args: &[&str]) -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_finx"));
    command.args(args).env_remove("FINX_CONFIG").env_remove("RUST_LOG");
    command
}

fn run(command: &mut Command) -> Output {
    command.output().expect("finx binary should start")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be one JSON document")
}

// =============================================================================
// CLI User Journey: Fetch
// =============================================================================

#[test]
fn user_can_fetch_an_absolute_url_and_sees_status_body_and_outcome() {
    // Given: A user fetching a quote endpoint offline
    let mut command = finx(&[
        "fetch",
        "https://api.iex.test/stable/stock/MSFT/quote",
        "--mock",
        "--max-attempts",
        "3",
    ]);

    // When: The command runs
    let output = run(&mut command);

    // Then: It succeeds and prints the response with its outcome
    assert_eq!(output.status.code(), Some(0));
    let data = stdout_json(&output);
    assert_eq!(data["status"], 200);
    assert_eq!(data["body"], serde_json::json!({}));
    assert_eq!(data["outcome"]["ok"], true);
    assert_eq!(data["outcome"]["from_cache"], false);
}

#[test]
fn user_can_point_at_a_config_file_through_the_environment() {
    // Given: A config file with a base url exported as FINX_CONFIG
    let mut file = tempfile::NamedTempFile::new().expect("temp file");
    write!(file, r#"{{ "base_url": "https://cdn.finra.org/equity" }}"#).expect("write config");
    let mut command = finx(&["fetch", "regsho/daily", "-q", "date=20240105", "--mock"]);
    command.env("FINX_CONFIG", file.path());

    // When: The user fetches a path target
    let output = run(&mut command);

    // Then: The path resolves against the configured base url
    assert_eq!(output.status.code(), Some(0));
    assert_eq!(stdout_json(&output)["status"], 200);
}

#[test]
fn user_sees_a_configuration_error_for_a_path_without_base_url() {
    // Given: No config anywhere
    let mut command = finx(&["fetch", "regsho/daily", "--mock"]);

    // When: The user fetches a path target
    let output = run(&mut command);

    // Then: The command fails with the configuration exit code and a message on stderr
    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("error:"), "stderr was: {stderr}");
    assert!(stderr.contains("base url"), "stderr was: {stderr}");
}

#[test]
fn user_sees_a_usage_error_for_malformed_arguments() {
    // Given: A body that is not JSON
    let mut command = finx(&["fetch", "https://api.iex.test/x", "--mock", "--body", "{"]);

    // When: The command runs
    let output = run(&mut command);

    // Then: Argument parsing rejects it
    assert_eq!(output.status.code(), Some(2));
    assert!(output.stdout.is_empty());
}

// =============================================================================
// CLI User Journey: Inspection
// =============================================================================

#[test]
fn user_can_check_how_a_rate_limit_status_is_treated() {
    // Given: A 429 with a Retry-After header
    let mut command = finx(&["classify", "--status", "429", "-H", "Retry-After:2"]);

    // When: The user classifies it
    let output = run(&mut command);

    // Then: The server delay and retry decision are shown
    assert_eq!(output.status.code(), Some(0));
    let data = stdout_json(&output);
    assert_eq!(data["category"], "rate_limit");
    assert_eq!(data["code"], "http.rate_limit");
    assert_eq!(data["retry_after_ms"], 2_000);
    assert_eq!(data["retry_allowed"], true);
}

#[test]
fn user_can_preview_a_backoff_schedule() {
    // Given: Four attempts without jitter
    let mut command = finx(&[
        "backoff",
        "--attempts",
        "4",
        "--base-ms",
        "100",
        "--max-ms",
        "300",
        "--jitter",
        "0",
        "--pretty",
    ]);

    // When: The user prints the schedule
    let output = run(&mut command);

    // Then: One delay per retry, doubling up to the cap
    assert_eq!(output.status.code(), Some(0));
    let data = stdout_json(&output);
    let delays: Vec<u64> = data["steps"]
        .as_array()
        .expect("steps array")
        .iter()
        .map(|step| step["delay_ms"].as_u64().expect("delay"))
        .collect();
    assert_eq!(delays, vec![100, 200, 300]);
}
