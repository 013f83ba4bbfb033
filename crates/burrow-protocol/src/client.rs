//! Blocking JSONL client for a session daemon's Unix socket.
//!
//! Used for one-shot requests (`info`, `kill`, `history`, `detach`) and as
//! the transport under the interactive attach bridge.

use std::io::BufReader;
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, PollTimeout, poll};
use nix::sys::socket::{
    AddressFamily, SockFlag, SockType, UnixAddr, connect, getsockopt, socket, sockopt,
};

use crate::framing::{FrameError, read_frame, write_frame};
use crate::{ClientMessage, DaemonMessage, ErrorCode};

/// Error from the IPC client layer.
#[non_exhaustive]
#[derive(Debug)]
pub enum IpcError {
    /// Socket file missing or connection refused: nobody is listening.
    NotRunning { path: String },
    /// No answer within the allowed time.
    Timeout { path: String },
    /// Socket exists but connecting failed for another reason.
    ConnectionFailed(std::io::Error),
    /// Daemon returned an explicit error response.
    DaemonError { code: ErrorCode, message: String },
    /// Serialization failure, oversized frame or unexpected EOF.
    ProtocolError { message: String },
    Io(std::io::Error),
}

impl std::fmt::Display for IpcError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IpcError::NotRunning { path } => {
                write!(f, "No daemon listening at {}", path)
            }
            IpcError::Timeout { path } => write!(f, "Daemon at {} did not respond", path),
            IpcError::ConnectionFailed(e) => write!(f, "Connection failed: {}", e),
            IpcError::DaemonError { code, message } => {
                write!(f, "Daemon error [{}]: {}", code, message)
            }
            IpcError::ProtocolError { message } => write!(f, "Protocol error: {}", message),
            IpcError::Io(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IpcError::ConnectionFailed(e) | IpcError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for IpcError {
    fn from(e: std::io::Error) -> Self {
        IpcError::Io(e)
    }
}

fn is_timeout(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
    )
}

fn frame_error(e: FrameError, path: &str) -> IpcError {
    match e {
        FrameError::Io(e) if is_timeout(&e) => IpcError::Timeout {
            path: path.to_string(),
        },
        FrameError::Io(e) => IpcError::Io(e),
        other => IpcError::ProtocolError {
            message: other.to_string(),
        },
    }
}

/// Pause between attempts while the listener's backlog is full.
const CONNECT_RETRY_INTERVAL: Duration = Duration::from_millis(10);

fn connect_error(errno: Errno, path: &str) -> IpcError {
    match errno {
        Errno::ENOENT | Errno::ECONNREFUSED => IpcError::NotRunning {
            path: path.to_string(),
        },
        other => IpcError::ConnectionFailed(other.into()),
    }
}

/// Connect with a bound on how long the attempt may take.
///
/// A blocking connect can hang while the listener's backlog is full, so the
/// socket is non-blocking until connected. Everything happens on the calling
/// thread.
fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<UnixStream, IpcError> {
    let display = path.display().to_string();
    let addr = UnixAddr::new(path).map_err(|e| IpcError::ConnectionFailed(e.into()))?;
    let fd = socket(
        AddressFamily::Unix,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )
    .map_err(|e| IpcError::ConnectionFailed(e.into()))?;

    let deadline = Instant::now() + timeout;
    loop {
        match connect(fd.as_raw_fd(), &addr) {
            Ok(()) | Err(Errno::EISCONN) => break,
            Err(Errno::EINPROGRESS) => {
                wait_connected(&fd, deadline, &display)?;
                break;
            }
            // Linux reports a full backlog on a Unix socket as EAGAIN.
            Err(Errno::EAGAIN) | Err(Errno::EINTR) => {
                if Instant::now() >= deadline {
                    return Err(IpcError::Timeout { path: display });
                }
                std::thread::sleep(CONNECT_RETRY_INTERVAL);
            }
            Err(e) => return Err(connect_error(e, &display)),
        }
    }

    let stream = UnixStream::from(fd);
    stream.set_nonblocking(false)?;
    Ok(stream)
}

fn wait_connected(fd: &OwnedFd, deadline: Instant, path: &str) -> Result<(), IpcError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    let timeout = PollTimeout::try_from(remaining).unwrap_or(PollTimeout::MAX);
    let mut fds = [PollFd::new(fd.as_fd(), PollFlags::POLLOUT)];
    match poll(&mut fds, timeout) {
        Ok(0) => {
            return Err(IpcError::Timeout {
                path: path.to_string(),
            });
        }
        Ok(_) => {}
        Err(e) => return Err(IpcError::ConnectionFailed(e.into())),
    }
    match getsockopt(fd, sockopt::SocketError) {
        Ok(0) => Ok(()),
        Ok(code) => Err(connect_error(Errno::from_raw(code), path)),
        Err(e) => Err(IpcError::ConnectionFailed(e.into())),
    }
}

/// Write half of a connection. Cheap to clone off an [`IpcConnection`] so
/// input and resize can be sent from different threads.
#[derive(Debug)]
pub struct IpcWriter {
    stream: UnixStream,
    path: String,
}

impl IpcWriter {
    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), IpcError> {
        write_frame(&mut self.stream, msg).map_err(|e| frame_error(e, &self.path))
    }
}

/// A blocking JSONL connection to one session daemon.
#[derive(Debug)]
pub struct IpcConnection {
    reader: BufReader<UnixStream>,
    writer: IpcWriter,
}

impl IpcConnection {
    /// Connect to the daemon at `socket_path`. Both the connect and every
    /// subsequent read are bounded by `timeout`; pass the result through
    /// [`set_read_timeout`](Self::set_read_timeout) to stream without one.
    pub fn connect(socket_path: &Path, timeout: Duration) -> Result<Self, IpcError> {
        let stream = connect_with_timeout(socket_path, timeout)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let reader = BufReader::new(stream.try_clone()?);
        Ok(Self {
            reader,
            writer: IpcWriter {
                stream,
                path: socket_path.display().to_string(),
            },
        })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), IpcError> {
        Ok(self.reader.get_ref().set_read_timeout(timeout)?)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> Result<(), IpcError> {
        Ok(self.writer.stream.set_write_timeout(timeout)?)
    }

    /// A second handle on the write half.
    pub fn writer(&self) -> Result<IpcWriter, IpcError> {
        Ok(IpcWriter {
            stream: self.writer.stream.try_clone()?,
            path: self.writer.path.clone(),
        })
    }

    pub fn send(&mut self, msg: &ClientMessage) -> Result<(), IpcError> {
        self.writer.send(msg)
    }

    /// Read the next message. `Ok(None)` when the daemon closed the socket.
    pub fn recv(&mut self) -> Result<Option<DaemonMessage>, IpcError> {
        read_frame(&mut self.reader).map_err(|e| frame_error(e, &self.writer.path))
    }

    /// Send one request and read one response.
    ///
    /// `DaemonMessage::Error` is turned into `IpcError::DaemonError`, EOF
    /// into a protocol error.
    pub fn request(&mut self, msg: &ClientMessage) -> Result<DaemonMessage, IpcError> {
        self.send(msg)?;
        match self.recv()? {
            Some(DaemonMessage::Error { code, message }) => {
                Err(IpcError::DaemonError { code, message })
            }
            Some(response) => Ok(response),
            None => Err(IpcError::ProtocolError {
                message: "Empty response from daemon".to_string(),
            }),
        }
    }
}
