use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

use nix::libc;
use nix::unistd::{ForkResult, dup2, fork, setsid};
use tracing::{error, info};

use crate::errors::CoreError;

/// Which side of the fork the caller is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Daemonized {
    /// The original process. It carries on as the client; `pid` is the new
    /// daemon.
    ParentShouldExit { pid: i32 },
    /// The detached process. It must run the session and exit, never
    /// returning into the caller's code path.
    BecameDaemon,
}

/// Fork a detached copy of this process.
///
/// The child starts a new session (no controlling terminal, own process
/// group), reads stdin from `/dev/null` and writes stdout and stderr to
/// `log_path`. Must be called while the process is single-threaded.
pub fn daemonize(log_path: &Path) -> Result<Daemonized, CoreError> {
    if let Some(parent) = log_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| CoreError::io(format!("create {}", parent.display()), e))?;
    }
    // Opened before forking so failures reach the caller.
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path)
        .map_err(|e| CoreError::io(format!("open {}", log_path.display()), e))?;
    let devnull =
        File::open("/dev/null").map_err(|e| CoreError::io("open /dev/null".to_string(), e))?;

    // SAFETY: only `ensure_session` calls this, from the CLI's main thread,
    // and the process has no other threads at that point: registry probes
    // connect on the calling thread and the attach bridge spawns its threads
    // after the session exists. No lock can be held by a thread that is
    // missing from the child.
    match unsafe { fork() } {
        Ok(ForkResult::Parent { child }) => {
            info!(
                event = "core.daemonize.forked",
                pid = child.as_raw(),
                log = %log_path.display(),
            );
            Ok(Daemonized::ParentShouldExit {
                pid: child.as_raw(),
            })
        }
        Ok(ForkResult::Child) => {
            if let Err(e) = detach_stdio(&log, &devnull) {
                error!(event = "core.daemonize.detach_failed", error = %e);
                std::process::exit(1);
            }
            Ok(Daemonized::BecameDaemon)
        }
        Err(e) => Err(CoreError::Daemonize {
            message: format!("fork: {}", e),
        }),
    }
}

fn detach_stdio(log: &File, devnull: &File) -> nix::Result<()> {
    setsid()?;
    dup2(devnull.as_raw_fd(), libc::STDIN_FILENO)?;
    dup2(log.as_raw_fd(), libc::STDOUT_FILENO)?;
    dup2(log.as_raw_fd(), libc::STDERR_FILENO)?;
    Ok(())
}
