#[cfg(unix)]
pub mod client;
pub mod framing;
mod messages;
pub mod name;
mod types;

#[cfg(unix)]
pub use client::{IpcConnection, IpcError, IpcWriter};
pub use framing::{FrameError, MAX_FRAME_BYTES, read_frame, write_frame};
pub use messages::{ClientMessage, DaemonMessage, ErrorCode, decode_payload, encode_payload};
pub use name::{MalformedReason, NameError, SessionName};
pub use types::{
    HistoryFormat, SESSION_ENV, SessionInfo, SessionStatus, join_command, split_command,
};
