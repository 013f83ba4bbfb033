use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Environment variable that overrides the socket directory.
pub const SOCKET_DIR_ENV: &str = "BURROW_DIR";

#[derive(Debug, thiserror::Error)]
pub enum PathError {
    #[error("home directory not found, set $HOME environment variable")]
    HomeNotFound,
}

/// Centralized path construction for the `~/.burrow/` directory layout.
///
/// Sockets do not live here: they go in a runtime directory, see
/// [`default_socket_dir`]. Use `resolve()` in production code and
/// `from_dir()` in tests.
#[derive(Debug, Clone)]
pub struct BurrowPaths {
    burrow_dir: PathBuf,
}

impl BurrowPaths {
    /// Resolve paths from the user's home directory (`~/.burrow`).
    pub fn resolve() -> Result<Self, PathError> {
        let home = dirs::home_dir().ok_or(PathError::HomeNotFound)?;
        Ok(Self {
            burrow_dir: home.join(".burrow"),
        })
    }

    /// Create paths from an explicit base directory. Use in tests.
    pub fn from_dir(burrow_dir: PathBuf) -> Self {
        Self { burrow_dir }
    }

    /// The base `~/.burrow` directory.
    pub fn burrow_dir(&self) -> &Path {
        &self.burrow_dir
    }

    pub fn user_config(&self) -> PathBuf {
        self.burrow_dir.join("config.toml")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.burrow_dir.join("logs")
    }

    /// Log file for one daemon. `encoded_name` must already be filesystem-safe.
    pub fn session_log(&self, encoded_name: &str) -> PathBuf {
        self.logs_dir().join(format!("{encoded_name}.log"))
    }
}

/// Default directory holding one socket per session.
///
/// `$BURROW_DIR` wins, then `$XDG_RUNTIME_DIR/burrow`, then
/// `<tmp>/burrow-<uid>`.
pub fn default_socket_dir(uid: u32) -> PathBuf {
    socket_dir_from(
        std::env::var_os(SOCKET_DIR_ENV),
        dirs::runtime_dir(),
        std::env::temp_dir(),
        uid,
    )
}

fn socket_dir_from(
    env_override: Option<OsString>,
    runtime_dir: Option<PathBuf>,
    temp_dir: PathBuf,
    uid: u32,
) -> PathBuf {
    if let Some(dir) = env_override.filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(runtime) = runtime_dir {
        return runtime.join("burrow");
    }
    temp_dir.join(format!("burrow-{uid}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_paths() -> BurrowPaths {
        BurrowPaths::from_dir(PathBuf::from("/home/user/.burrow"))
    }

    #[test]
    fn test_resolve_returns_ok_when_home_set() {
        let result = BurrowPaths::resolve();
        assert!(result.is_ok());
        let paths = result.unwrap();
        assert!(paths.burrow_dir().to_string_lossy().contains(".burrow"));
    }

    #[test]
    fn test_from_dir() {
        let paths = BurrowPaths::from_dir(PathBuf::from("/tmp/test-burrow"));
        assert_eq!(paths.burrow_dir(), Path::new("/tmp/test-burrow"));
    }

    #[test]
    fn test_user_config() {
        assert_eq!(
            test_paths().user_config(),
            PathBuf::from("/home/user/.burrow/config.toml")
        );
    }

    #[test]
    fn test_session_log() {
        assert_eq!(
            test_paths().session_log("dev%2Eapi"),
            PathBuf::from("/home/user/.burrow/logs/dev%2Eapi.log")
        );
    }

    #[test]
    fn test_socket_dir_env_override_wins() {
        let dir = socket_dir_from(
            Some(OsString::from("/custom/sockets")),
            Some(PathBuf::from("/run/user/1000")),
            PathBuf::from("/tmp"),
            1000,
        );
        assert_eq!(dir, PathBuf::from("/custom/sockets"));
    }

    #[test]
    fn test_socket_dir_empty_env_is_ignored() {
        let dir = socket_dir_from(
            Some(OsString::new()),
            Some(PathBuf::from("/run/user/1000")),
            PathBuf::from("/tmp"),
            1000,
        );
        assert_eq!(dir, PathBuf::from("/run/user/1000/burrow"));
    }

    #[test]
    fn test_socket_dir_falls_back_to_tmp_with_uid() {
        let dir = socket_dir_from(None, None, PathBuf::from("/tmp"), 501);
        assert_eq!(dir, PathBuf::from("/tmp/burrow-501"));
    }
}
