pub mod connection;
pub mod shutdown;

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use burrow_protocol::{SESSION_ENV, SessionInfo, SessionStatus, join_command};
use bytes::Bytes;
use tokio::net::UnixListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::engine::{HistoryFormat, Vt100Engine};
use crate::errors::DaemonError;
use crate::pty::{ManagedPty, SpawnedPty, spawn_pty_reader, spawn_pty_writer};
use crate::session::{Attachment, ClientId, DaemonState, SessionCore};
use crate::types::{DaemonConfig, SessionSpec};

/// How often the daemon checks that its socket entry is still in place.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

/// How long to wait for a killed child to be reaped before giving up on its
/// exit code.
const REAP_TIMEOUT: Duration = Duration::from_millis(500);

/// Why the daemon left `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EndReason {
    ChildExited,
    Killed,
    EntryRemoved,
}

impl std::fmt::Display for EndReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EndReason::ChildExited => write!(f, "child_exited"),
            EndReason::Killed => write!(f, "killed"),
            EndReason::EntryRemoved => write!(f, "entry_removed"),
        }
    }
}

/// Device + inode of the socket file this daemon bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct SocketIdentity {
    dev: u64,
    ino: u64,
}

impl SocketIdentity {
    fn capture(path: &Path) -> Result<Self, DaemonError> {
        let meta = std::fs::symlink_metadata(path)?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    /// Whether `path` still names the file we bound.
    fn is_intact(&self, path: &Path) -> bool {
        std::fs::symlink_metadata(path)
            .map(|meta| meta.dev() == self.dev && meta.ino() == self.ino)
            .unwrap_or(false)
    }

    /// Remove `path` only if it is still ours. Another daemon may have
    /// claimed the name since.
    fn remove(&self, path: &Path) {
        if !self.is_intact(path) {
            debug!(event = "daemon.server.socket_remove_skipped", socket = %path.display());
            return;
        }
        if let Err(e) = std::fs::remove_file(path) {
            warn!(
                event = "daemon.server.socket_remove_failed",
                socket = %path.display(),
                error = %e,
            );
        }
    }
}

struct Inner {
    core: SessionCore,
    pty: ManagedPty,
}

/// The running session: metadata, guarded state, and the input queue.
pub struct Daemon {
    name: String,
    command: String,
    cwd: String,
    created_at: String,
    pid: Option<u32>,
    inner: Mutex<Inner>,
    input_tx: mpsc::UnboundedSender<Bytes>,
    kill_requested: CancellationToken,
    ended: CancellationToken,
}

impl Daemon {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock leaves the state usable; keep serving.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn apply_size(inner: &mut Inner, size: Option<(u16, u16)>) {
        if let Some((cols, rows)) = size
            && let Err(e) = inner.pty.resize(cols, rows)
        {
            error!(event = "daemon.pty.resize_failed", error = %e);
        }
    }

    fn feed(&self, chunk: Bytes) {
        self.lock().core.feed(chunk);
    }

    pub fn attach(&self, cols: u16, rows: u16) -> Result<Attachment, DaemonError> {
        let mut inner = self.lock();
        if inner.core.state() != DaemonState::Running {
            return Err(DaemonError::Draining);
        }
        let attachment = inner.core.attach(cols, rows)?;
        Self::apply_size(&mut inner, attachment.apply_size);
        Ok(attachment)
    }

    pub fn detach(&self, id: ClientId) {
        let mut inner = self.lock();
        let size = inner.core.detach(id);
        Self::apply_size(&mut inner, size);
    }

    pub fn detach_all(&self) -> usize {
        self.lock().core.detach_all()
    }

    pub fn resize(&self, id: ClientId, cols: u16, rows: u16) {
        let mut inner = self.lock();
        let size = inner.core.resize(id, cols, rows);
        Self::apply_size(&mut inner, size);
    }

    /// Queue input for the child if `id` holds focus. Returns whether the
    /// input was accepted.
    pub fn send_input(&self, id: ClientId, data: Vec<u8>) -> bool {
        if !self.lock().core.is_focused(id) {
            return false;
        }
        self.input_tx.send(Bytes::from(data)).is_ok()
    }

    pub fn history(&self, format: HistoryFormat) -> Result<Option<Vec<u8>>, DaemonError> {
        Ok(self.lock().core.history(format)?)
    }

    pub fn info(&self) -> SessionInfo {
        let inner = self.lock();
        let status = match inner.core.state() {
            DaemonState::Starting => SessionStatus::Starting,
            DaemonState::Running => SessionStatus::Running,
            DaemonState::Draining | DaemonState::Terminated => SessionStatus::Draining,
        };
        SessionInfo {
            name: self.name.clone(),
            command: self.command.clone(),
            cwd: self.cwd.clone(),
            pid: self.pid,
            created_at: self.created_at.clone(),
            clients: inner.core.client_count(),
            status,
        }
    }

    pub fn request_kill(&self) {
        info!(event = "daemon.session.kill_requested");
        self.kill_requested.cancel();
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.lock().core.exit_code()
    }

    /// Cancelled once the session has drained and connections should close.
    pub fn ended(&self) -> &CancellationToken {
        &self.ended
    }

    /// Make sure the child is gone and record its exit code.
    async fn finish_child(&self, reason: EndReason) -> Option<u32> {
        {
            let mut inner = self.lock();
            inner.core.set_state(DaemonState::Draining);
            if reason != EndReason::ChildExited
                && matches!(inner.pty.try_exit_code(), Ok(None))
                && let Err(e) = inner.pty.kill()
            {
                warn!(event = "daemon.pty.kill_failed", error = %e);
            }
        }

        let deadline = tokio::time::Instant::now() + REAP_TIMEOUT;
        let code = loop {
            let status = self.lock().pty.try_exit_code();
            match status {
                Ok(Some(code)) => break Some(code),
                Ok(None) if tokio::time::Instant::now() < deadline => {}
                Ok(None) => {
                    // Still alive after EOF: something else closed the PTY.
                    let _ = self.lock().pty.kill();
                    break None;
                }
                Err(e) => {
                    warn!(event = "daemon.pty.wait_failed", error = %e);
                    break None;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        self.lock().core.set_exit_code(code);
        code
    }
}

fn resolve_program(spec: &SessionSpec, config: &DaemonConfig) -> (String, Vec<String>) {
    match spec.argv.split_first() {
        Some((program, args)) => (program.clone(), args.to_vec()),
        None => (config.default_shell(), Vec::new()),
    }
}

fn start_session(
    spec: &SessionSpec,
    config: &DaemonConfig,
    kill_requested: CancellationToken,
) -> Result<(Arc<Daemon>, Box<dyn std::io::Read + Send>), DaemonError> {
    let (program, args) = resolve_program(spec, config);
    let env = vec![(SESSION_ENV.to_string(), spec.name.clone())];
    let SpawnedPty {
        pty,
        reader,
        writer,
    } = ManagedPty::spawn(&program, &args, &spec.cwd, spec.cols, spec.rows, &env)?;

    let engine = Vt100Engine::new(spec.cols, spec.rows, config.scrollback_lines);
    let mut core = SessionCore::new(
        Box::new(engine),
        config.output_channel_capacity,
        (spec.cols, spec.rows),
    );
    core.set_state(DaemonState::Running);

    let daemon = Daemon {
        name: spec.name.clone(),
        command: join_command(&spec.argv),
        cwd: spec.cwd.display().to_string(),
        created_at: chrono::Utc::now().to_rfc3339(),
        pid: pty.child_process_id(),
        inner: Mutex::new(Inner { core, pty }),
        input_tx: spawn_pty_writer(writer),
        kill_requested,
        ended: CancellationToken::new(),
    };
    Ok((Arc::new(daemon), reader))
}

/// Run one session daemon on an already-bound listener.
///
/// Spawns the child in a PTY, serves connections until the child exits,
/// `shutdown` is cancelled, a client sends `kill`, or the socket file is
/// removed out from under us. Then drains connections and removes the socket
/// file. Returns the child's exit code when it is known.
///
/// If the child cannot be started the socket file is removed and the error
/// returned.
pub async fn run_server(
    spec: SessionSpec,
    config: DaemonConfig,
    listener: std::os::unix::net::UnixListener,
    shutdown: CancellationToken,
) -> Result<Option<u32>, DaemonError> {
    let socket_path: PathBuf = spec.socket_path.clone();
    let identity = SocketIdentity::capture(&socket_path)?;

    let started = listener
        .set_nonblocking(true)
        .map_err(DaemonError::from)
        .and_then(|_| UnixListener::from_std(listener).map_err(DaemonError::from))
        .and_then(|listener| {
            start_session(&spec, &config, shutdown.clone()).map(|s| (listener, s))
        });
    let (listener, (daemon, reader)) = match started {
        Ok(started) => started,
        Err(e) => {
            error!(
                event = "daemon.server.start_failed",
                session = %spec.name,
                error = %e,
            );
            identity.remove(&socket_path);
            return Err(e);
        }
    };

    info!(
        event = "daemon.server.started",
        session = %spec.name,
        pid = std::process::id(),
        child_pid = ?daemon.pid,
        socket = %socket_path.display(),
    );

    let (exit_tx, mut exit_rx) = oneshot::channel();
    let feeder = daemon.clone();
    spawn_pty_reader(reader, move |chunk| feeder.feed(chunk), exit_tx);

    let tracker = TaskTracker::new();
    let mut watchdog = tokio::time::interval(WATCHDOG_INTERVAL);
    watchdog.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            accept = listener.accept() => {
                match accept {
                    Ok((stream, _addr)) => {
                        tracker.spawn(connection::handle_connection(stream, daemon.clone()));
                    }
                    Err(e) => {
                        error!(event = "daemon.server.accept_failed", error = %e);
                    }
                }
            }
            _ = &mut exit_rx => break EndReason::ChildExited,
            _ = shutdown.cancelled() => break EndReason::Killed,
            _ = watchdog.tick() => {
                if !identity.is_intact(&socket_path) {
                    warn!(
                        event = "daemon.server.entry_missing",
                        socket = %socket_path.display(),
                    );
                    break EndReason::EntryRemoved;
                }
            }
        }
    };

    info!(event = "daemon.server.drain_started", reason = %reason);
    drop(listener);

    let exit_code = daemon.finish_child(reason).await;
    daemon.ended.cancel();

    tracker.close();
    if tokio::time::timeout(config.shutdown_timeout(), tracker.wait())
        .await
        .is_err()
    {
        warn!(
            event = "daemon.server.drain_timeout",
            timeout_secs = config.shutdown_timeout_secs,
        );
    }

    identity.remove(&socket_path);
    daemon.lock().core.set_state(DaemonState::Terminated);

    info!(
        event = "daemon.server.shutdown_completed",
        exit_code = ?exit_code,
    );
    Ok(exit_code)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(argv: &[&str]) -> SessionSpec {
        SessionSpec {
            name: "t".to_string(),
            argv: argv.iter().map(|s| s.to_string()).collect(),
            cwd: PathBuf::from("/"),
            cols: 80,
            rows: 24,
            socket_path: PathBuf::from("/tmp/t"),
        }
    }

    #[test]
    fn test_resolve_program_uses_argv() {
        let config = DaemonConfig::default();
        let (program, args) = resolve_program(&spec(&["vim", "-p", "a"]), &config);
        assert_eq!(program, "vim");
        assert_eq!(args, vec!["-p", "a"]);
    }

    #[test]
    fn test_resolve_program_empty_argv_uses_default_shell() {
        let config = DaemonConfig {
            default_shell: Some("/bin/dash".to_string()),
            ..Default::default()
        };
        let (program, args) = resolve_program(&spec(&[]), &config);
        assert_eq!(program, "/bin/dash");
        assert!(args.is_empty());
    }

    #[test]
    fn test_socket_identity_detects_replacement() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s");
        let _first = std::os::unix::net::UnixListener::bind(&path).unwrap();
        let identity = SocketIdentity::capture(&path).unwrap();
        assert!(identity.is_intact(&path));

        std::fs::remove_file(&path).unwrap();
        assert!(!identity.is_intact(&path));

        // A new socket under the same name is not ours, and is left alone.
        let _second = std::os::unix::net::UnixListener::bind(&path).unwrap();
        assert!(!identity.is_intact(&path));
        identity.remove(&path);
        assert!(path.exists());
    }

    #[test]
    fn test_end_reason_display() {
        assert_eq!(EndReason::ChildExited.to_string(), "child_exited");
        assert_eq!(EndReason::Killed.to_string(), "killed");
        assert_eq!(EndReason::EntryRemoved.to_string(), "entry_removed");
    }
}
