use std::path::PathBuf;

use super::*;

#[test]
fn test_cli_build() {
    let app = build_cli();
    assert_eq!(app.get_name(), "burrow");
}

#[test]
fn test_cli_requires_subcommand() {
    let app = build_cli();
    assert!(app.try_get_matches_from(vec!["burrow"]).is_err());
}

#[test]
fn test_cli_attach_with_command() {
    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "attach", "work", "vim", "-p", "a.rs"])
        .unwrap();
    let attach = matches.subcommand_matches("attach").unwrap();
    assert_eq!(attach.get_one::<String>("name").unwrap(), "work");
    let command: Vec<&String> = attach.get_many::<String>("command").unwrap().collect();
    assert_eq!(command, vec!["vim", "-p", "a.rs"]);
}

#[test]
fn test_cli_attach_alias() {
    let app = build_cli();
    let matches = app.try_get_matches_from(vec!["burrow", "a", "work"]).unwrap();
    let attach = matches.subcommand_matches("attach").unwrap();
    assert_eq!(attach.get_one::<String>("name").unwrap(), "work");
    assert!(attach.get_many::<String>("command").is_none());
}

#[test]
fn test_cli_attach_requires_name() {
    let app = build_cli();
    assert!(app.try_get_matches_from(vec!["burrow", "attach"]).is_err());
}

#[test]
fn test_cli_new_command() {
    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "new", "build", "cargo", "watch"])
        .unwrap();
    let new = matches.subcommand_matches("new").unwrap();
    assert_eq!(new.get_one::<String>("name").unwrap(), "build");
    assert_eq!(new.get_many::<String>("command").unwrap().count(), 2);
}

#[test]
fn test_cli_list_json_flag() {
    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "ls", "--json"])
        .unwrap();
    let list = matches.subcommand_matches("list").unwrap();
    assert!(list.get_flag("json"));
}

#[test]
fn test_cli_fork_name_is_optional() {
    let app = build_cli();
    let matches = app.try_get_matches_from(vec!["burrow", "fork"]).unwrap();
    let fork = matches.subcommand_matches("fork").unwrap();
    assert!(fork.get_one::<String>("name").is_none());

    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "fork", "copy"])
        .unwrap();
    let fork = matches.subcommand_matches("fork").unwrap();
    assert_eq!(fork.get_one::<String>("name").unwrap(), "copy");
}

#[test]
fn test_cli_history_format() {
    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "history", "work", "--format", "html"])
        .unwrap();
    let history = matches.subcommand_matches("history").unwrap();
    assert_eq!(history.get_one::<String>("format").unwrap(), "html");

    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "history", "work"])
        .unwrap();
    let history = matches.subcommand_matches("history").unwrap();
    assert_eq!(history.get_one::<String>("format").unwrap(), "plain");
}

#[test]
fn test_cli_history_rejects_unknown_format() {
    let app = build_cli();
    let result = app.try_get_matches_from(vec!["burrow", "history", "work", "--format", "pdf"]);
    assert!(result.is_err());
}

#[test]
fn test_cli_global_flags_after_subcommand() {
    let app = build_cli();
    let matches = app
        .try_get_matches_from(vec!["burrow", "kill", "work", "-v", "--socket-dir", "/tmp/s"])
        .unwrap();
    assert!(matches.get_flag("verbose"));
    assert_eq!(
        matches.get_one::<PathBuf>("socket-dir").unwrap(),
        &PathBuf::from("/tmp/s")
    );
}
