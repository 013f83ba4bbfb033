use std::io::{Read, Write};
use std::path::Path;

use bytes::Bytes;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::errors::DaemonError;

/// Handle to the session's PTY and its child process.
///
/// The writer is not here: it lives on its own blocking task so a child that
/// stops reading its input can never stall whoever holds this handle.
pub struct ManagedPty {
    /// Master end of the PTY. Used for resize.
    master: Box<dyn MasterPty + Send>,
    /// Child process handle. Used for wait/kill.
    child: Box<dyn Child + Send + Sync>,
}

/// Everything `ManagedPty::spawn` hands back.
pub struct SpawnedPty {
    pub pty: ManagedPty,
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

impl ManagedPty {
    /// Open a PTY and spawn `program args..` in it.
    pub fn spawn(
        program: &str,
        args: &[String],
        cwd: &Path,
        cols: u16,
        rows: u16,
        env_vars: &[(String, String)],
    ) -> Result<SpawnedPty, DaemonError> {
        let size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };

        let pair = native_pty_system()
            .openpty(size)
            .map_err(|e| DaemonError::PtyError(format!("openpty: {}", e)))?;

        let mut cmd = CommandBuilder::new(program);
        cmd.args(args);
        cmd.cwd(cwd);
        for (key, value) in env_vars {
            cmd.env(key, value);
        }

        info!(
            event = "daemon.pty.spawn_started",
            program = program,
            cwd = %cwd.display(),
            rows = rows,
            cols = cols,
        );

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| DaemonError::PtyError(format!("spawn {}: {}", program, e)))?;
        // Only the child keeps the slave open, so its exit ends our reads.
        drop(pair.slave);

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| DaemonError::PtyError(format!("clone reader: {}", e)))?;
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| DaemonError::PtyError(format!("take writer: {}", e)))?;

        info!(
            event = "daemon.pty.spawn_completed",
            pid = ?child.process_id(),
        );

        Ok(SpawnedPty {
            pty: ManagedPty {
                master: pair.master,
                child,
            },
            reader,
            writer,
        })
    }

    pub fn resize(&mut self, cols: u16, rows: u16) -> Result<(), DaemonError> {
        let new_size = PtySize {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        };
        self.master
            .resize(new_size)
            .map_err(|e| DaemonError::PtyError(format!("resize: {}", e)))?;
        debug!(event = "daemon.pty.resize_completed", rows = rows, cols = cols);
        Ok(())
    }

    pub fn child_process_id(&self) -> Option<u32> {
        self.child.process_id()
    }

    /// Exit code if the child has exited, without blocking.
    pub fn try_exit_code(&mut self) -> Result<Option<u32>, DaemonError> {
        self.child
            .try_wait()
            .map(|status| status.map(|s| s.exit_code()))
            .map_err(|e| DaemonError::PtyError(format!("try_wait: {}", e)))
    }

    pub fn kill(&mut self) -> Result<(), DaemonError> {
        self.child
            .kill()
            .map_err(|e| DaemonError::PtyError(format!("kill: {}", e)))
    }
}

/// Spawn a blocking task that reads PTY output and hands each chunk to
/// `on_output`.
///
/// The task ends on EOF or on a read error other than `EINTR`, then fires
/// `exited`. On Linux a closed slave shows up as `EIO`, which is treated as
/// EOF.
pub fn spawn_pty_reader<F>(
    mut reader: Box<dyn Read + Send>,
    mut on_output: F,
    exited: oneshot::Sender<()>,
) -> tokio::task::JoinHandle<()>
where
    F: FnMut(Bytes) + Send + 'static,
{
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(event = "daemon.pty.reader_eof");
                    break;
                }
                Ok(n) => on_output(Bytes::copy_from_slice(&buf[..n])),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => {
                    debug!(event = "daemon.pty.reader_eof", reason = "EIO");
                    break;
                }
                Err(e) => {
                    error!(event = "daemon.pty.reader_error", error = %e);
                    break;
                }
            }
        }
        let _ = exited.send(());
    })
}

/// Spawn a blocking task that owns the PTY writer and writes queued input in
/// order. Dropping every sender ends the task.
pub fn spawn_pty_writer(mut writer: Box<dyn Write + Send>) -> mpsc::UnboundedSender<Bytes> {
    let (tx, mut rx) = mpsc::unbounded_channel::<Bytes>();
    tokio::task::spawn_blocking(move || {
        while let Some(data) = rx.blocking_recv() {
            if let Err(e) = writer.write_all(&data).and_then(|_| writer.flush()) {
                warn!(event = "daemon.pty.write_failed", error = %e);
                break;
            }
        }
    });
    tx
}
