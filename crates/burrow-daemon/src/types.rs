use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_paths::BurrowPaths;
use serde::{Deserialize, Serialize};

use crate::errors::DaemonError;

/// Daemon configuration.
///
/// Read from the `[daemon]` section of `~/.burrow/config.toml`. Shared by the
/// CLI (socket directory, probe timeout) and by each session daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Directory holding one socket per session.
    /// Default: `$BURROW_DIR`, else `$XDG_RUNTIME_DIR/burrow`, else `/tmp/burrow-<uid>`.
    #[serde(default)]
    pub socket_dir: Option<PathBuf>,

    /// Lines of scrollback kept by the terminal engine.
    /// Default: 10000
    #[serde(default = "default_scrollback_lines")]
    pub scrollback_lines: usize,

    /// Output chunks buffered per client before the slowest ones start
    /// dropping output.
    /// Default: 256
    #[serde(default = "default_output_channel_capacity")]
    pub output_channel_capacity: usize,

    /// Bound on connect + `info` round trip when probing a session.
    /// Default: 1000
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Time in seconds to wait for connections to flush during shutdown.
    /// Default: 2
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Program run when a session is created without a command.
    /// Default: `$SHELL`, else `/bin/sh`.
    #[serde(default)]
    pub default_shell: Option<String>,
}

impl DaemonConfig {
    /// Validate configuration values.
    ///
    /// Called after loading config to catch misconfiguration early.
    pub fn validate(&self) -> Result<(), DaemonError> {
        if self.scrollback_lines == 0 {
            return Err(DaemonError::ConfigInvalid(
                "scrollback_lines must be > 0".to_string(),
            ));
        }
        if self.scrollback_lines > 1_000_000 {
            return Err(DaemonError::ConfigInvalid(
                "scrollback_lines must be <= 1000000".to_string(),
            ));
        }
        if self.output_channel_capacity == 0 {
            return Err(DaemonError::ConfigInvalid(
                "output_channel_capacity must be > 0".to_string(),
            ));
        }
        if self.output_channel_capacity > 65_536 {
            return Err(DaemonError::ConfigInvalid(
                "output_channel_capacity must be <= 65536".to_string(),
            ));
        }
        if self.probe_timeout_ms == 0 {
            return Err(DaemonError::ConfigInvalid(
                "probe_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.shutdown_timeout_secs == 0 {
            return Err(DaemonError::ConfigInvalid(
                "shutdown_timeout_secs must be > 0".to_string(),
            ));
        }
        if self
            .default_shell
            .as_deref()
            .is_some_and(|s| s.trim().is_empty())
        {
            return Err(DaemonError::ConfigInvalid(
                "default_shell must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// The socket directory, falling back to the per-user runtime default.
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(|| {
            burrow_paths::default_socket_dir(nix::unistd::getuid().as_raw())
        })
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Shell for sessions created without a command.
    pub fn default_shell(&self) -> String {
        if let Some(shell) = &self.default_shell {
            return shell.clone();
        }
        match std::env::var("SHELL") {
            Ok(shell) if !shell.is_empty() => shell,
            _ => "/bin/sh".to_string(),
        }
    }
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket_dir: None,
            scrollback_lines: default_scrollback_lines(),
            output_channel_capacity: default_output_channel_capacity(),
            probe_timeout_ms: default_probe_timeout_ms(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            default_shell: None,
        }
    }
}

fn default_scrollback_lines() -> usize {
    10_000
}

fn default_output_channel_capacity() -> usize {
    256
}

fn default_probe_timeout_ms() -> u64 {
    1_000
}

fn default_shutdown_timeout_secs() -> u64 {
    2
}

/// Wrapper for deserializing the `[daemon]` section from a burrow config file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    daemon: DaemonConfig,
}

/// Load daemon configuration from `config_path`.
///
/// Falls back to defaults if the file doesn't exist, can't be read, or
/// doesn't parse. Values are validated either way.
pub fn load_daemon_config_from(config_path: &Path) -> Result<DaemonConfig, DaemonError> {
    let config = match std::fs::read_to_string(config_path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(file) => file.daemon,
            Err(e) => {
                tracing::warn!(
                    event = "daemon.config.parse_failed",
                    path = %config_path.display(),
                    error = %e,
                );
                DaemonConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => DaemonConfig::default(),
        Err(e) => {
            tracing::warn!(
                event = "daemon.config.read_failed",
                path = %config_path.display(),
                error = %e,
            );
            DaemonConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}

/// Load daemon configuration from `~/.burrow/config.toml`.
pub fn load_daemon_config() -> Result<DaemonConfig, DaemonError> {
    let paths = BurrowPaths::resolve().unwrap_or_else(|e| {
        tracing::warn!(
            event = "daemon.config.home_dir_fallback",
            error = %e,
            fallback = "/tmp/.burrow",
        );
        BurrowPaths::from_dir(PathBuf::from("/tmp/.burrow"))
    });
    load_daemon_config_from(&paths.user_config())
}

/// What one daemon runs and where it listens.
#[derive(Debug, Clone)]
pub struct SessionSpec {
    /// Session name, unencoded.
    pub name: String,
    /// Child argv. Empty means the configured default shell.
    pub argv: Vec<String>,
    /// Absolute working directory for the child.
    pub cwd: PathBuf,
    pub cols: u16,
    pub rows: u16,
    /// Path the listener is bound to. Removed when the daemon exits.
    pub socket_path: PathBuf,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_config_defaults() {
        let config = DaemonConfig::default();
        assert_eq!(config.scrollback_lines, 10_000);
        assert_eq!(config.output_channel_capacity, 256);
        assert_eq!(config.probe_timeout(), Duration::from_millis(1000));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
        assert!(config.socket_dir.is_none());
    }

    #[test]
    fn test_load_daemon_config_from_toml() {
        let toml = r#"
[daemon]
scrollback_lines = 500
probe_timeout_ms = 250
socket_dir = "/run/burrow-test"
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.daemon.scrollback_lines, 500);
        assert_eq!(file.daemon.probe_timeout_ms, 250);
        assert_eq!(
            file.daemon.socket_dir(),
            PathBuf::from("/run/burrow-test")
        );
        // Defaults for unset fields
        assert_eq!(file.daemon.output_channel_capacity, 256);
    }

    #[test]
    fn test_load_daemon_config_missing_section() {
        let toml = r#"
[ui]
theme = "dark"
"#;
        let file: ConfigFile = toml::from_str(toml).unwrap();
        assert_eq!(file.daemon.scrollback_lines, 10_000);
        assert_eq!(file.daemon.shutdown_timeout_secs, 2);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_daemon_config_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.scrollback_lines, 10_000);
    }

    #[test]
    fn test_load_unparseable_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[daemon\nscrollback_lines = ").unwrap();
        let config = load_daemon_config_from(&path).unwrap();
        assert_eq!(config.output_channel_capacity, 256);
    }

    #[test]
    fn test_load_invalid_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[daemon]\noutput_channel_capacity = 0\n").unwrap();
        let err = load_daemon_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("output_channel_capacity"));
        assert!(err.is_user_error());
    }

    #[test]
    fn test_validate_defaults_ok() {
        assert!(DaemonConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_zero_scrollback_fails() {
        let config = DaemonConfig {
            scrollback_lines: 0,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("scrollback_lines"));
    }

    #[test]
    fn test_validate_huge_channel_fails() {
        let config = DaemonConfig {
            output_channel_capacity: 1_000_000,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("output_channel_capacity"));
    }

    #[test]
    fn test_validate_zero_timeouts_fail() {
        let config = DaemonConfig {
            probe_timeout_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("probe_timeout_ms"));

        let config = DaemonConfig {
            shutdown_timeout_secs: 0,
            ..Default::default()
        };
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("shutdown_timeout_secs")
        );
    }

    #[test]
    fn test_validate_blank_shell_fails() {
        let config = DaemonConfig {
            default_shell: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_configured_shell_wins() {
        let config = DaemonConfig {
            default_shell: Some("/bin/zsh".to_string()),
            ..Default::default()
        };
        assert_eq!(config.default_shell(), "/bin/zsh");
    }
}
