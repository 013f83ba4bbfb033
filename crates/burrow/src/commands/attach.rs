use std::io::{Read, Write};

use clap::ArgMatches;
use nix::sys::signal::{SigSet, Signal};
use nix::sys::termios;
use tracing::{error, info, warn};

use burrow_core::{ForkContext, LaunchRequest, SessionName, SessionOutcome, ensure_session};
use burrow_protocol::{ClientMessage, DaemonMessage, IpcConnection, IpcError, IpcWriter, decode_payload};

use super::helpers::{self, CliContext};
use crate::color;

/// Ctrl-\ detaches this client instead of reaching the session.
const DETACH_KEY: u8 = 0x1c;

/// How an attach ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttachEnd {
    Detached,
    Ended { exit_code: Option<u32> },
    Disconnected,
}

pub(crate) fn handle_new_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = launch_request(matches, "cli.new_failed")?;
    info!(event = "cli.new_started", session = %request.name);

    match start(ctx, &request, "cli.new_failed")? {
        SessionOutcome::AlreadyRunning => {
            println!(
                "{} {} is already running.",
                color::muted("Session"),
                color::ice(request.name.as_str())
            );
        }
        SessionOutcome::Started { pid } => {
            println!(
                "{} {} {}",
                color::aurora("Started"),
                color::ice(request.name.as_str()),
                color::muted(&format!("(pid {})", pid))
            );
            println!(
                "  {} burrow attach {}",
                color::muted("Attach:"),
                color::ice(request.name.as_str())
            );
        }
    }

    info!(event = "cli.new_completed", session = %request.name);
    Ok(())
}

pub(crate) fn handle_attach_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let request = launch_request(matches, "cli.attach_failed")?;

    if ForkContext::from_env().source.as_deref() == Some(request.name.as_str()) {
        let msg = format!(
            "Already inside session '{}'. Detach first, or attach from another terminal.",
            request.name
        );
        eprintln!("{} {}", color::error("Refusing to attach:"), msg);
        warn!(
            event = "cli.attach_failed",
            session = %request.name,
            reason = "self_attach"
        );
        return Err(msg.into());
    }

    info!(event = "cli.attach_started", session = %request.name);

    if let SessionOutcome::Started { pid } = start(ctx, &request, "cli.attach_failed")? {
        info!(event = "cli.attach_session_started", session = %request.name, pid = pid);
    }

    match attach_to_session(ctx, &request.name) {
        Ok(end) => {
            match end {
                AttachEnd::Detached => eprintln!(
                    "\r\n{} Reattach: burrow attach {}",
                    color::muted("Detached."),
                    request.name
                ),
                AttachEnd::Ended {
                    exit_code: Some(code),
                } => eprintln!("\r\n{} (exit code {})", color::muted("Session ended."), code),
                AttachEnd::Ended { exit_code: None } => {
                    eprintln!("\r\n{}", color::muted("Session ended."))
                }
                AttachEnd::Disconnected => {
                    eprintln!("\r\n{}", color::warning("Connection to session lost."))
                }
            }
            info!(event = "cli.attach_completed", session = %request.name, end = ?end);
            Ok(())
        }
        Err(e) => {
            eprintln!("{} {}", color::error("Attach failed:"), e);
            error!(event = "cli.attach_failed", session = %request.name, error = %e);
            Err(e)
        }
    }
}

fn launch_request(
    matches: &ArgMatches,
    event: &str,
) -> Result<LaunchRequest, Box<dyn std::error::Error>> {
    let name = helpers::session_name(matches, event)?;
    let argv = matches
        .get_many::<String>("command")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    let (cols, rows) = helpers::terminal_size();
    Ok(LaunchRequest {
        name,
        argv,
        cwd: None,
        cols,
        rows,
    })
}

fn start(
    ctx: &CliContext,
    request: &LaunchRequest,
    event: &str,
) -> Result<SessionOutcome, Box<dyn std::error::Error>> {
    ensure_session(&ctx.registry, &ctx.config, &ctx.paths, request).map_err(|e| {
        helpers::report("Could not start session", &e, event);
        e.into()
    })
}

fn attach_to_session(
    ctx: &CliContext,
    name: &SessionName,
) -> Result<AttachEnd, Box<dyn std::error::Error>> {
    let mut conn = ctx.registry.connect(&name.encoded())?;

    let (cols, rows) = helpers::terminal_size();
    conn.send(&ClientMessage::Attach { cols, rows })?;

    // The snapshot is always the first reply.
    let snapshot = match conn.recv()? {
        Some(DaemonMessage::Snapshot { data }) => decode_payload(&data)?,
        Some(DaemonMessage::SessionEnded { exit_code }) => {
            return Ok(AttachEnd::Ended { exit_code });
        }
        Some(DaemonMessage::Error { code, message }) => {
            return Err(format!("[{}] {}", code, message).into());
        }
        Some(other) => return Err(format!("unexpected reply to attach: {:?}", other).into()),
        None => return Err("session closed the connection before attaching".into()),
    };

    // Output may be quiet for hours.
    conn.set_read_timeout(None)?;
    conn.set_write_timeout(None)?;

    // Block SIGWINCH before spawning so every thread inherits the mask and
    // only the sigwait thread sees it.
    let mut sigwinch_set = SigSet::empty();
    sigwinch_set.add(Signal::SIGWINCH);
    sigwinch_set
        .thread_block()
        .map_err(|e| format!("failed to block SIGWINCH: {}", e))?;

    let raw_guard = enable_raw_mode()?;

    let mut stdout = std::io::stdout();
    stdout.write_all(&snapshot)?;
    stdout.flush()?;

    // Neither thread is joined: both block in syscalls that only return on
    // input or a signal, and the process exits right after the attach.
    let mut input = conn.writer()?;
    std::thread::Builder::new()
        .name("burrow-stdin".to_string())
        .spawn(move || forward_stdin(&mut input))?;

    let mut resize = conn.writer()?;
    std::thread::Builder::new()
        .name("burrow-sigwinch".to_string())
        .spawn(move || handle_sigwinch(&sigwinch_set, &mut resize))?;

    let result = forward_output(&mut conn, &mut stdout);
    drop(raw_guard);
    result
}

struct RawModeGuard {
    original: termios::Termios,
}

fn enable_raw_mode() -> Result<RawModeGuard, Box<dyn std::error::Error>> {
    let stdin = std::io::stdin();
    let original = termios::tcgetattr(&stdin)
        .map_err(|e| format!("stdin is not a terminal (tcgetattr: {})", e))?;

    // cfmakeraw clears ISIG: Ctrl-C goes to the session as 0x03.
    let mut raw = original.clone();
    termios::cfmakeraw(&mut raw);
    termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, &raw)
        .map_err(|e| format!("tcsetattr failed: {}", e))?;

    Ok(RawModeGuard { original })
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let stdin = std::io::stdin();
        if let Err(e) = termios::tcsetattr(&stdin, termios::SetArg::TCSANOW, &self.original) {
            error!(event = "cli.attach.terminal_restore_failed", error = %e);
        }
    }
}

/// Split a stdin chunk at the detach key. Returns the bytes to forward and
/// whether the key was pressed.
fn split_at_detach(chunk: &[u8]) -> (&[u8], bool) {
    match chunk.iter().position(|&b| b == DETACH_KEY) {
        Some(pos) => (&chunk[..pos], true),
        None => (chunk, false),
    }
}

/// Forward stdin to the session until the detach key, EOF or a dead socket.
fn forward_stdin(writer: &mut IpcWriter) {
    let stdin = std::io::stdin();
    let mut buf = [0u8; 4096];

    loop {
        let n = match stdin.lock().read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!(event = "cli.attach.stdin_read_failed", error = %e);
                eprint!("\r\nStdin read failed. Detaching.\r\n");
                let _ = writer.send(&ClientMessage::Detach);
                break;
            }
        };

        let (input, detach) = split_at_detach(&buf[..n]);
        if !input.is_empty()
            && let Err(e) = writer.send(&ClientMessage::input(input))
        {
            warn!(event = "cli.attach.stdin_write_failed", error = %e);
            break;
        }
        if detach {
            info!(event = "cli.attach.detach_key_pressed");
            if let Err(e) = writer.send(&ClientMessage::Detach) {
                warn!(event = "cli.attach.detach_send_failed", error = %e);
            }
            break;
        }
    }
}

/// Relay terminal resizes to the session.
fn handle_sigwinch(sigset: &SigSet, writer: &mut IpcWriter) {
    loop {
        match sigset.wait() {
            Ok(_) => {
                let (cols, rows) = helpers::terminal_size();
                if let Err(e) = writer.send(&ClientMessage::Resize { cols, rows }) {
                    warn!(event = "cli.attach.resize_send_failed", error = %e);
                    break;
                }
                info!(event = "cli.attach.resize_sent", cols = cols, rows = rows);
            }
            Err(e) => {
                error!(event = "cli.attach.sigwinch_wait_failed", error = %e);
                break;
            }
        }
    }
}

fn forward_output(
    conn: &mut IpcConnection,
    stdout: &mut std::io::Stdout,
) -> Result<AttachEnd, Box<dyn std::error::Error>> {
    loop {
        let msg = match conn.recv() {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(AttachEnd::Disconnected),
            Err(IpcError::ProtocolError { message }) => {
                error!(event = "cli.attach.parse_failed", error = %message);
                continue;
            }
            Err(e) => return Err(e.into()),
        };

        match msg {
            DaemonMessage::Output { data } | DaemonMessage::Snapshot { data } => {
                match decode_payload(&data) {
                    Ok(bytes) => {
                        stdout.write_all(&bytes)?;
                        stdout.flush()?;
                    }
                    Err(e) => warn!(event = "cli.attach.payload_decode_failed", error = %e),
                }
            }
            DaemonMessage::OutputDropped { chunks } => {
                // Reset SGR and show the cursor in case a sequence was cut.
                stdout.write_all(b"\x1b[0m\x1b[?25h")?;
                stdout.flush()?;
                warn!(event = "cli.attach.output_dropped", chunks = chunks);
                eprint!(
                    "\r\n[burrow] Output dropped ({} chunks). Display may be garbled.\r\n",
                    chunks
                );
            }
            DaemonMessage::Detached => return Ok(AttachEnd::Detached),
            DaemonMessage::SessionEnded { exit_code } => {
                return Ok(AttachEnd::Ended { exit_code });
            }
            DaemonMessage::Error { code, message } => {
                warn!(event = "cli.attach.daemon_error", code = %code, error = %message);
                eprint!("\r\n[burrow] {}\r\n", message);
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_at_detach_plain_input() {
        assert_eq!(split_at_detach(b"ls -la\r"), (&b"ls -la\r"[..], false));
    }

    #[test]
    fn test_split_at_detach_forwards_bytes_before_key() {
        assert_eq!(split_at_detach(b"ab\x1ccd"), (&b"ab"[..], true));
    }

    #[test]
    fn test_split_at_detach_key_alone() {
        let (input, detach) = split_at_detach(&[DETACH_KEY]);
        assert!(input.is_empty());
        assert!(detach);
    }

    #[test]
    fn test_ctrl_c_is_not_the_detach_key() {
        assert_eq!(split_at_detach(b"\x03"), (&b"\x03"[..], false));
    }
}
