use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::types::{HistoryFormat, SessionInfo};

/// Error codes returned by the daemon in error responses.
///
/// Unknown codes from newer daemons deserialize to `Unknown`.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    ProtocolError,
    PtyError,
    EngineError,
    AllocationFailed,
    SessionDraining,
    Base64DecodeError,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorCode::ProtocolError => write!(f, "protocol_error"),
            ErrorCode::PtyError => write!(f, "pty_error"),
            ErrorCode::EngineError => write!(f, "engine_error"),
            ErrorCode::AllocationFailed => write!(f, "allocation_failed"),
            ErrorCode::SessionDraining => write!(f, "session_draining"),
            ErrorCode::Base64DecodeError => write!(f, "base64_decode_error"),
            ErrorCode::Unknown => write!(f, "unknown"),
        }
    }
}

/// Client -> daemon messages.
///
/// One JSON object per line, `"type"` is the tag. Binary payloads are base64.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Become an attached client. The daemon answers with `snapshot`, then
    /// streams `output` until detach or session end.
    Attach { cols: u16, rows: u16 },
    /// Metadata probe. Does not count as an attached client.
    Info,
    Resize { cols: u16, rows: u16 },
    /// Keyboard input for the child, base64-encoded.
    Input { data: String },
    /// On an attached connection: detach this client. On any other
    /// connection: detach every attached client.
    Detach,
    /// Terminate the child process and drain the session.
    Kill,
    History {
        #[serde(default)]
        format: HistoryFormat,
    },
}

impl ClientMessage {
    pub fn input(bytes: &[u8]) -> Self {
        ClientMessage::Input {
            data: encode_payload(bytes),
        }
    }
}

/// Daemon -> client messages.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonMessage {
    /// Replay of the current terminal state. Always the first reply to attach.
    Snapshot { data: String },
    /// Live PTY output, base64-encoded.
    Output { data: String },
    /// This client fell behind and `chunks` output chunks were skipped.
    OutputDropped { chunks: u64 },
    Info { session: SessionInfo },
    /// Serialized history. `None` when there is nothing to export.
    History {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<String>,
    },
    /// This client was detached (its own request or a detach-all).
    Detached,
    /// The child exited or the session was killed. The connection closes next.
    SessionEnded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        exit_code: Option<u32>,
    },
    Ack,
    Error { code: ErrorCode, message: String },
}

impl DaemonMessage {
    pub fn output(bytes: &[u8]) -> Self {
        DaemonMessage::Output {
            data: encode_payload(bytes),
        }
    }

    pub fn snapshot(bytes: &[u8]) -> Self {
        DaemonMessage::Snapshot {
            data: encode_payload(bytes),
        }
    }

    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        DaemonMessage::Error {
            code,
            message: message.into(),
        }
    }
}

pub fn encode_payload(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

pub fn decode_payload(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    BASE64.decode(data)
}
