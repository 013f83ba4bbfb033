//! Find a live session by name or start one.

use std::os::unix::fs::PermissionsExt;
use std::os::unix::net::UnixListener;
use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_daemon::{DaemonConfig, SessionSpec, run_server, wait_for_shutdown_signal};
use burrow_paths::BurrowPaths;
use burrow_protocol::SessionName;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::daemonize::{Daemonized, daemonize};
use crate::errors::CoreError;
use crate::fork::Launcher;
use crate::registry::{Liveness, SessionRegistry, SocketRegistry};

/// Bind attempts before giving up on a name that keeps changing hands.
pub const MAX_START_ATTEMPTS: u32 = 3;

const RETRY_DELAY: Duration = Duration::from_millis(50);

/// A session to find or create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub name: SessionName,
    /// Child argv. Empty runs the default shell.
    pub argv: Vec<String>,
    /// Working directory for the child. `None` uses the current directory.
    pub cwd: Option<PathBuf>,
    pub cols: u16,
    pub rows: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A daemon was already listening. The request's command was not used.
    AlreadyRunning,
    /// A new daemon was forked with this pid.
    Started { pid: i32 },
}

/// Locate a live daemon for `request.name`, or start one.
///
/// The socket is bound here, before forking, so a lost race shows up as
/// `AddrInUse` and is answered by probing again, and clients can connect as
/// soon as this returns.
pub fn ensure_session(
    registry: &SocketRegistry,
    config: &DaemonConfig,
    paths: &BurrowPaths,
    request: &LaunchRequest,
) -> Result<SessionOutcome, CoreError> {
    let socket_path = registry.socket_path(&request.name)?;
    match claim(registry, &request.name, &socket_path)? {
        Claim::Running => Ok(SessionOutcome::AlreadyRunning),
        Claim::Bound(listener) => launch(listener, socket_path, config, paths, request),
    }
}

/// What [`claim`] found at a session's socket path.
#[derive(Debug)]
enum Claim {
    /// Another daemon answers there.
    Running,
    /// The path is ours; fork a daemon onto this listener.
    Bound(UnixListener),
}

/// Probe `name` and bind its socket if nobody answers, retrying when the
/// probe is inconclusive or another starter binds first.
fn claim<R: SessionRegistry + ?Sized>(
    registry: &R,
    name: &SessionName,
    socket_path: &Path,
) -> Result<Claim, CoreError> {
    let encoded = name.encoded();

    let mut last_error = None;
    for attempt in 1..=MAX_START_ATTEMPTS {
        match registry.probe(&encoded) {
            Liveness::Live => {
                info!(event = "core.lifecycle.session_found", session = %name);
                return Ok(Claim::Running);
            }
            Liveness::Absent => registry.cleanup_stale(&encoded),
            Liveness::Unknown => {
                warn!(
                    event = "core.lifecycle.probe_inconclusive",
                    session = %name,
                    attempt = attempt,
                );
                last_error = Some(format!("probe of {} was inconclusive", socket_path.display()));
                std::thread::sleep(RETRY_DELAY);
                continue;
            }
        }

        match bind_private(socket_path) {
            Ok(listener) => return Ok(Claim::Bound(listener)),
            Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                info!(
                    event = "core.lifecycle.bind_race_lost",
                    session = %name,
                    attempt = attempt,
                );
                last_error = Some(e.to_string());
                std::thread::sleep(RETRY_DELAY);
            }
            Err(e) => {
                return Err(CoreError::io(format!("bind {}", socket_path.display()), e));
            }
        }
    }

    Err(CoreError::SourceUnresponsive {
        name: name.to_string(),
        reason: last_error.unwrap_or_else(|| "could not claim the session name".to_string()),
    })
}

fn bind_private(path: &Path) -> std::io::Result<UnixListener> {
    let listener = UnixListener::bind(path)?;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        let _ = std::fs::remove_file(path);
        return Err(e);
    }
    Ok(listener)
}

fn launch(
    listener: UnixListener,
    socket_path: PathBuf,
    config: &DaemonConfig,
    paths: &BurrowPaths,
    request: &LaunchRequest,
) -> Result<SessionOutcome, CoreError> {
    let cwd = match &request.cwd {
        Some(cwd) => cwd.clone(),
        None => std::env::current_dir()
            .map_err(|e| CoreError::io("resolve current directory".to_string(), e))?,
    };
    let spec = SessionSpec {
        name: request.name.to_string(),
        argv: request.argv.clone(),
        cwd,
        cols: request.cols,
        rows: request.rows,
        socket_path: socket_path.clone(),
    };

    let log_path = paths.session_log(&request.name.encoded());
    let forked = daemonize(&log_path).inspect_err(|_| {
        let _ = std::fs::remove_file(&socket_path);
    })?;
    match forked {
        Daemonized::ParentShouldExit { pid } => {
            info!(
                event = "core.lifecycle.session_started",
                session = %request.name,
                pid = pid,
            );
            Ok(SessionOutcome::Started { pid })
        }
        Daemonized::BecameDaemon => run_daemon(spec, config.clone(), listener),
    }
}

/// Body of the daemon process. Never returns.
fn run_daemon(spec: SessionSpec, config: DaemonConfig, listener: UnixListener) -> ! {
    crate::logging::set_quiet(false);
    let code = match serve(spec, config, listener) {
        Ok(exit_code) => {
            info!(event = "core.lifecycle.daemon_exited", child_exit_code = ?exit_code);
            0
        }
        Err(e) => {
            error!(event = "core.lifecycle.daemon_failed", error = %e);
            1
        }
    };
    std::process::exit(code)
}

fn serve(
    spec: SessionSpec,
    config: DaemonConfig,
    listener: UnixListener,
) -> Result<Option<u32>, CoreError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| CoreError::io("build runtime".to_string(), e))?;

    let drain_timeout = config.shutdown_timeout();
    let shutdown = CancellationToken::new();
    let result = runtime.block_on(async {
        let signals = tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                if let Err(e) = wait_for_shutdown_signal(shutdown).await {
                    warn!(event = "core.lifecycle.signal_setup_failed", error = %e);
                }
            }
        });
        let result = run_server(spec, config, listener, shutdown).await;
        signals.abort();
        result
    });
    // Blocking PTY tasks may still be parked on a read; do not wait forever.
    runtime.shutdown_timeout(drain_timeout);
    Ok(result?)
}

/// [`Launcher`] that changes the real working directory and starts sessions
/// through [`ensure_session`].
pub struct DaemonLauncher<'a> {
    pub registry: &'a SocketRegistry,
    pub config: &'a DaemonConfig,
    pub paths: &'a BurrowPaths,
}

impl Launcher for DaemonLauncher<'_> {
    fn change_dir(&mut self, dir: &Path) -> std::io::Result<()> {
        std::env::set_current_dir(dir)
    }

    fn launch(&mut self, request: LaunchRequest) -> Result<SessionOutcome, CoreError> {
        ensure_session(self.registry, self.config, self.paths, &request)
    }
}
