use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Environment variable set inside every session's child process. Holds the
/// session name, unencoded.
pub const SESSION_ENV: &str = "BURROW_SESSION";

/// Lifecycle state of a session daemon as reported on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Running,
    Draining,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Starting => write!(f, "starting"),
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Draining => write!(f, "draining"),
        }
    }
}

/// Metadata a daemon reports about its session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub name: String,
    /// Child argv joined with single spaces. Empty when the default shell runs.
    #[serde(default)]
    pub command: String,
    /// Absolute working directory of the child.
    pub cwd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// RFC 3339 timestamp of daemon start.
    pub created_at: String,
    /// Clients currently attached (probe connections excluded).
    pub clients: usize,
    pub status: SessionStatus,
}

impl SessionInfo {
    /// Rebuild an argv from the wire form. Empty when the default shell ran.
    ///
    /// Arguments that contained spaces are split apart; the wire form does
    /// not preserve them.
    pub fn argv(&self) -> Vec<String> {
        split_command(&self.command)
    }
}

/// Join argv tokens for the `command` field of [`SessionInfo`].
pub fn join_command(argv: &[String]) -> String {
    argv.join(" ")
}

/// Split a `command` field on spaces, dropping empty segments.
pub fn split_command(command: &str) -> Vec<String> {
    command
        .split(' ')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Export format for terminal history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryFormat {
    /// Scrollback and screen as text, trailing blanks trimmed.
    #[default]
    Plain,
    /// Escape-sequence stream that repaints the terminal when written to one.
    Replay,
    /// A `<pre>` block with inline color styles.
    Html,
}

impl fmt::Display for HistoryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HistoryFormat::Plain => write!(f, "plain"),
            HistoryFormat::Replay => write!(f, "replay"),
            HistoryFormat::Html => write!(f, "html"),
        }
    }
}

impl FromStr for HistoryFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(HistoryFormat::Plain),
            "replay" => Ok(HistoryFormat::Replay),
            "html" => Ok(HistoryFormat::Html),
            other => Err(format!(
                "unknown history format '{}' (expected plain, replay or html)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(command: &str) -> SessionInfo {
        SessionInfo {
            name: "dev".to_string(),
            command: command.to_string(),
            cwd: "/tmp/x".to_string(),
            pid: Some(4242),
            created_at: "2026-01-01T00:00:00Z".to_string(),
            clients: 1,
            status: SessionStatus::Running,
        }
    }

    #[test]
    fn test_session_info_wire_format() {
        let json = serde_json::to_value(info("vim -p")).unwrap();
        assert_eq!(json["name"], "dev");
        assert_eq!(json["command"], "vim -p");
        assert_eq!(json["cwd"], "/tmp/x");
        assert_eq!(json["pid"], 4242);
        assert_eq!(json["clients"], 1);
        assert_eq!(json["status"], "running");
    }

    #[test]
    fn test_session_info_missing_command_defaults_empty() {
        let json = r#"{"name":"a","cwd":"/","created_at":"x","clients":0,"status":"starting"}"#;
        let parsed: SessionInfo = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.command, "");
        assert!(parsed.argv().is_empty());
        assert_eq!(parsed.pid, None);
    }

    #[test]
    fn test_split_command_drops_empty_segments() {
        assert_eq!(split_command("vim  -p "), vec!["vim", "-p"]);
        assert!(split_command("").is_empty());
        assert!(split_command("   ").is_empty());
    }

    #[test]
    fn test_join_then_split_is_lossy_for_spaced_args() {
        let argv = vec!["echo".to_string(), "hello world".to_string()];
        let joined = join_command(&argv);
        assert_eq!(joined, "echo hello world");
        assert_eq!(split_command(&joined), vec!["echo", "hello", "world"]);
    }

    #[test]
    fn test_history_format_parse() {
        assert_eq!("plain".parse::<HistoryFormat>(), Ok(HistoryFormat::Plain));
        assert_eq!("replay".parse::<HistoryFormat>(), Ok(HistoryFormat::Replay));
        assert_eq!("html".parse::<HistoryFormat>(), Ok(HistoryFormat::Html));
        assert!("svg".parse::<HistoryFormat>().is_err());
    }

    #[test]
    fn test_history_format_display_matches_serde() {
        for format in [
            HistoryFormat::Plain,
            HistoryFormat::Replay,
            HistoryFormat::Html,
        ] {
            let json = serde_json::to_string(&format).unwrap();
            assert_eq!(json, format!("\"{}\"", format));
        }
    }
}
