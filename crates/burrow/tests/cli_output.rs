//! Integration tests for CLI output behavior
//!
//! The default behavior is quiet (no logs). Use -v/--verbose to enable logs.
//! Every test points HOME and BURROW_DIR at a temp directory so no real
//! sessions or config are touched.

use std::path::Path;
use std::process::{Command, Output};
use std::time::{Duration, Instant};

fn burrow(home: &Path, args: &[&str]) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_burrow"));
    cmd.args(args)
        .env("HOME", home)
        .env("BURROW_DIR", home.join("sockets"))
        .env_remove("BURROW_SESSION")
        .env_remove("BURROW_LOG");
    cmd
}

fn run(cmd: &mut Command) -> Output {
    cmd.output().expect("Failed to execute burrow")
}

fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Names of live sessions according to `burrow list --json`.
fn live_names(home: &Path) -> Vec<String> {
    let output = run(&mut burrow(home, &["list", "--json"]));
    assert!(output.status.success(), "list failed: {}", stderr(&output));
    let sessions: Vec<serde_json::Value> =
        serde_json::from_slice(&output.stdout).expect("list --json should print a JSON array");
    sessions
        .iter()
        .filter_map(|s| s["name"].as_str().map(str::to_string))
        .collect()
}

fn wait_for(home: &Path, what: impl Fn(&[String]) -> bool) -> Vec<String> {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let names = live_names(home);
        if what(&names) || Instant::now() > deadline {
            return names;
        }
        std::thread::sleep(Duration::from_millis(100));
    }
}

#[test]
fn test_list_empty_registry_is_quiet() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&mut burrow(home.path(), &["list"]));

    assert!(
        output.status.success(),
        "burrow list failed with exit code {:?}. stderr: {}",
        output.status.code(),
        stderr(&output)
    );
    assert!(stdout(&output).contains("No sessions running"));
    assert!(
        stderr(&output).is_empty(),
        "Default quiet mode should have empty stderr, got: {}",
        stderr(&output)
    );
}

#[test]
fn test_list_json_empty_registry() {
    let home = tempfile::tempdir().unwrap();
    assert!(live_names(home.path()).is_empty());
}

#[test]
fn test_verbose_mode_logs_json_to_stderr() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&mut burrow(home.path(), &["-v", "list"]));

    assert!(output.status.success());
    assert!(
        stderr(&output).contains(r#""event":"cli.list_started""#),
        "verbose mode should log JSON events, got: {}",
        stderr(&output)
    );
    assert!(!stdout(&output).contains(r#""event":"#));
}

#[test]
fn test_fork_outside_session_fails_descriptively() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&mut burrow(home.path(), &["fork"]));

    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("BURROW_SESSION"),
        "fork without a session should name the missing variable, got: {}",
        stderr(&output)
    );
}

#[test]
fn test_fork_from_dead_source_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = run(burrow(home.path(), &["fork", "copy"]).env("BURROW_SESSION", "gone"));

    assert!(!output.status.success());
    assert!(
        stderr(&output).contains("gone"),
        "should name the unresponsive source, got: {}",
        stderr(&output)
    );
}

#[test]
fn test_detach_outside_session_without_name_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&mut burrow(home.path(), &["detach"]));

    assert!(!output.status.success());
    assert!(stderr(&output).contains("BURROW_SESSION"));
}

#[test]
fn test_kill_missing_session_fails() {
    let home = tempfile::tempdir().unwrap();
    let output = run(&mut burrow(home.path(), &["kill", "nothing-here"]));

    assert!(!output.status.success());
    assert!(stderr(&output).contains("nothing-here"));
}

#[test]
fn test_invalid_name_is_rejected() {
    let home = tempfile::tempdir().unwrap();
    let long = "x".repeat(65);
    let output = run(&mut burrow(home.path(), &["kill", &long]));

    assert!(!output.status.success());
    assert!(stderr(&output).contains("Invalid session name"));
}

#[test]
fn test_new_list_fork_kill_roundtrip() {
    let home = tempfile::tempdir().unwrap();
    let home = home.path();

    let output = run(&mut burrow(home, &["new", "e2e", "sleep", "30"]));
    assert!(output.status.success(), "new failed: {}", stderr(&output));
    assert!(stdout(&output).contains("Started"));

    let names = wait_for(home, |names| names.iter().any(|n| n == "e2e"));
    assert_eq!(names, vec!["e2e".to_string()]);

    // A second `new` finds the running session instead of starting another.
    let output = run(&mut burrow(home, &["new", "e2e", "sleep", "30"]));
    assert!(output.status.success());
    assert!(stdout(&output).contains("already running"));

    let output = run(burrow(home, &["fork"]).env("BURROW_SESSION", "e2e"));
    assert!(output.status.success(), "fork failed: {}", stderr(&output));
    assert!(stdout(&output).contains("e2e-1"));

    let names = wait_for(home, |names| names.len() == 2);
    assert_eq!(names, vec!["e2e".to_string(), "e2e-1".to_string()]);

    for name in ["e2e", "e2e-1"] {
        let output = run(&mut burrow(home, &["kill", name]));
        assert!(output.status.success(), "kill failed: {}", stderr(&output));
    }

    let names = wait_for(home, |names| names.is_empty());
    assert!(names.is_empty(), "sessions still listed: {:?}", names);
}
