use std::io;

use burrow_protocol::ErrorCode;

use crate::engine::EngineError;

/// All error types for the burrow-daemon crate.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("protocol error: {0}")]
    ProtocolError(String),

    #[error("PTY error: {0}")]
    PtyError(String),

    #[error("startup failed: {0}")]
    StartupFailed(String),

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("session is shutting down")]
    Draining,

    #[error("terminal engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("base64 decode error: {0}")]
    Base64Decode(#[from] base64::DecodeError),
}

impl DaemonError {
    /// Error code string for logs and the IPC protocol.
    pub fn error_code(&self) -> &'static str {
        match self {
            DaemonError::ProtocolError(_) => "protocol_error",
            DaemonError::PtyError(_) => "pty_error",
            DaemonError::StartupFailed(_) => "startup_failed",
            DaemonError::ConfigInvalid(_) => "config_invalid",
            DaemonError::Draining => "session_draining",
            DaemonError::Engine(e) => e.error_code(),
            DaemonError::Io(_) => "io_error",
            DaemonError::Serde(_) => "serialization_error",
            DaemonError::Base64Decode(_) => "base64_decode_error",
        }
    }

    /// Whether this error is caused by user input.
    pub fn is_user_error(&self) -> bool {
        matches!(self, DaemonError::ConfigInvalid(_))
    }

    /// Code sent to clients in an `error` response.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            DaemonError::PtyError(_) => ErrorCode::PtyError,
            DaemonError::Draining => ErrorCode::SessionDraining,
            DaemonError::Engine(EngineError::AllocationFailed { .. }) => {
                ErrorCode::AllocationFailed
            }
            DaemonError::Engine(_) => ErrorCode::EngineError,
            DaemonError::Base64Decode(_) => ErrorCode::Base64DecodeError,
            _ => ErrorCode::ProtocolError,
        }
    }
}
