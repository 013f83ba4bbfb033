//! The socket directory as a registry of sessions.
//!
//! There is no central index: a session exists while a daemon listens on
//! `<dir>/<encoded name>`. A file in the directory only suggests a session;
//! connecting to it is the only proof.

use std::os::unix::fs::{DirBuilderExt, FileTypeExt};
use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_daemon::DaemonConfig;
use burrow_paths::SOCKET_DIR_ENV;
use burrow_protocol::{
    ClientMessage, DaemonMessage, IpcConnection, IpcError, NameError, SessionInfo, SessionName,
};
use tracing::{debug, info, warn};

use crate::errors::CoreError;

/// Usable bytes of `sockaddr_un.sun_path` on every supported platform.
pub const MAX_SOCKET_PATH: usize = 103;

/// Result of probing one registry entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// A daemon accepted the connection.
    Live,
    /// Nothing is listening: no file, or the connection was refused.
    Absent,
    /// The probe failed some other way. Probe again; never assume live.
    Unknown,
}

/// Lookup and maintenance of session entries, keyed by encoded name.
pub trait SessionRegistry {
    /// Bounded connect to the entry.
    fn probe(&self, encoded: &str) -> Liveness;

    /// Encoded names of every entry, decoding left to the caller.
    fn enumerate(&self) -> Result<Vec<String>, CoreError>;

    /// Remove an entry whose daemon is gone. Best effort and idempotent.
    fn cleanup_stale(&self, encoded: &str);

    /// Connect and ask the daemon for its [`SessionInfo`]. A probe: focus
    /// and the attached client set are untouched.
    fn probe_info(&self, encoded: &str) -> Result<SessionInfo, CoreError>;
}

/// Socket directory to use, in priority order: explicit override,
/// `$BURROW_DIR`, the config file, then the per-user runtime default.
pub fn resolve_socket_dir(cli_override: Option<&Path>, config: &DaemonConfig) -> PathBuf {
    if let Some(dir) = cli_override {
        return dir.to_path_buf();
    }
    if let Some(dir) = std::env::var_os(SOCKET_DIR_ENV).filter(|v| !v.is_empty()) {
        return PathBuf::from(dir);
    }
    config.socket_dir()
}

/// [`SessionRegistry`] backed by a directory of Unix sockets.
#[derive(Debug, Clone)]
pub struct SocketRegistry {
    dir: PathBuf,
    timeout: Duration,
}

impl SocketRegistry {
    /// Use `dir` as the registry, creating it with mode `0700` if missing.
    pub fn open(dir: impl Into<PathBuf>, timeout: Duration) -> Result<Self, CoreError> {
        let dir = dir.into();
        if !dir.exists() {
            std::fs::DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&dir)
                .map_err(|e| CoreError::io(format!("create {}", dir.display()), e))?;
            debug!(event = "core.registry.dir_created", dir = %dir.display());
        }
        Ok(Self { dir, timeout })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn entry_path(&self, encoded: &str) -> PathBuf {
        self.dir.join(encoded)
    }

    /// Socket path for `name`, checked against the `sun_path` limit.
    pub fn socket_path(&self, name: &SessionName) -> Result<PathBuf, CoreError> {
        let path = self.entry_path(&name.encoded());
        let len = path.as_os_str().len();
        if len > MAX_SOCKET_PATH {
            return Err(CoreError::InvalidName {
                name: name.to_string(),
                reason: format!(
                    "socket path {} is {} bytes, limit is {}",
                    path.display(),
                    len,
                    MAX_SOCKET_PATH
                ),
            });
        }
        Ok(path)
    }

    /// Open a connection to an entry with the registry's timeout on connect
    /// and on every read.
    pub fn connect(&self, encoded: &str) -> Result<IpcConnection, IpcError> {
        IpcConnection::connect(&self.entry_path(encoded), self.timeout)
    }

    /// One request/response exchange with the entry's daemon. An entry
    /// nobody listens on is removed before reporting it missing.
    pub fn request(&self, name: &SessionName, msg: &ClientMessage) -> Result<DaemonMessage, CoreError> {
        let encoded = name.encoded();
        let mut conn = match self.connect(&encoded) {
            Ok(conn) => conn,
            Err(IpcError::NotRunning { .. }) => {
                self.cleanup_stale(&encoded);
                return Err(CoreError::SessionNotFound {
                    name: name.to_string(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        Ok(conn.request(msg)?)
    }
}

impl SessionRegistry for SocketRegistry {
    fn probe(&self, encoded: &str) -> Liveness {
        match self.connect(encoded) {
            Ok(_) => Liveness::Live,
            Err(IpcError::NotRunning { .. }) => Liveness::Absent,
            Err(e) => {
                debug!(event = "core.registry.probe_inconclusive", entry = encoded, error = %e);
                Liveness::Unknown
            }
        }
    }

    fn enumerate(&self) -> Result<Vec<String>, CoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(CoreError::io(format!("read {}", self.dir.display()), e)),
        };

        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| CoreError::io(format!("read {}", self.dir.display()), e))?;
            if !entry.file_type().is_ok_and(|t| t.is_socket()) {
                continue;
            }
            match entry.file_name().into_string() {
                Ok(name) => names.push(name),
                Err(raw) => {
                    warn!(event = "core.registry.non_utf8_entry", entry = ?raw);
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn cleanup_stale(&self, encoded: &str) {
        let path = self.entry_path(encoded);
        match std::fs::remove_file(&path) {
            Ok(()) => info!(event = "core.registry.stale_removed", entry = encoded),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(event = "core.registry.stale_already_gone", entry = encoded);
            }
            Err(e) => {
                warn!(
                    event = "core.registry.stale_remove_failed",
                    entry = encoded,
                    error = %e,
                );
            }
        }
    }

    fn probe_info(&self, encoded: &str) -> Result<SessionInfo, CoreError> {
        let name = burrow_protocol::name::decode(encoded)?;
        let mut conn = match self.connect(encoded) {
            Ok(conn) => conn,
            Err(IpcError::NotRunning { .. }) => return Err(CoreError::SessionNotFound { name }),
            Err(e) => {
                return Err(CoreError::SourceUnresponsive {
                    name,
                    reason: e.to_string(),
                });
            }
        };
        match conn.request(&ClientMessage::Info) {
            Ok(DaemonMessage::Info { session }) => Ok(session),
            Ok(other) => Err(CoreError::Protocol {
                message: format!("expected info, got {:?}", other),
            }),
            Err(e @ IpcError::DaemonError { .. }) => Err(e.into()),
            Err(e) => Err(CoreError::SourceUnresponsive {
                name,
                reason: e.to_string(),
            }),
        }
    }
}

/// What `list_sessions` found.
#[derive(Debug, Default)]
pub struct Listing {
    pub live: Vec<SessionInfo>,
    /// Entries that answered the connect but not the info request.
    pub unresponsive: Vec<String>,
    /// Entries removed because nothing was listening.
    pub cleaned: Vec<String>,
    /// Files whose names are not valid encodings. Reported, never deleted.
    pub malformed: Vec<NameError>,
}

/// Probe every entry once, collecting live sessions and removing stale
/// entries.
pub fn list_sessions<R: SessionRegistry>(registry: &R) -> Result<Listing, CoreError> {
    let mut listing = Listing::default();
    for encoded in registry.enumerate()? {
        if let Err(e) = SessionName::from_encoded(&encoded) {
            warn!(event = "core.registry.malformed_entry", entry = %encoded, error = %e);
            listing.malformed.push(e);
            continue;
        }
        match registry.probe_info(&encoded) {
            Ok(info) => listing.live.push(info),
            Err(CoreError::SessionNotFound { .. }) => {
                registry.cleanup_stale(&encoded);
                listing.cleaned.push(encoded);
            }
            Err(e @ CoreError::AllocationFailure { .. }) => return Err(e),
            Err(e) => {
                warn!(event = "core.registry.probe_failed", entry = %encoded, error = %e);
                listing.unresponsive.push(encoded);
            }
        }
    }
    info!(
        event = "core.registry.list_completed",
        live = listing.live.len(),
        cleaned = listing.cleaned.len(),
    );
    Ok(listing)
}
