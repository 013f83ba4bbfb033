use std::error::Error;

use burrow_daemon::{DaemonError, EngineError};
use burrow_protocol::{ErrorCode, IpcError, NameError};

/// Base trait for all burrow errors.
pub trait BurrowError: Error + Send + Sync + 'static {
    /// Error code for programmatic handling
    fn error_code(&self) -> &'static str;

    /// Whether the error was caused by user input rather than a fault.
    fn is_user_error(&self) -> bool {
        false
    }
}

/// Errors from registry, lifecycle and fork operations.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Not inside a burrow session: {var} is not set")]
    EnvironmentMissing { var: &'static str },

    #[error("Session '{name}' is unresponsive: {reason}")]
    SourceUnresponsive { name: String, reason: String },

    #[error("Session '{name}' already exists")]
    TargetExists { name: String },

    #[error("Too many sessions: '{base}-1' through '{base}-{limit}' are all taken")]
    NamesExhausted { base: String, limit: u32 },

    #[error("Allocation failed: {message}")]
    AllocationFailure { message: String },

    #[error("IO error ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed session entry '{encoded}': {reason}")]
    MalformedEncoding { encoded: String, reason: String },

    #[error("Invalid session name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    #[error("Failed to start session daemon: {message}")]
    Daemonize { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Invalid config: {message}")]
    Config { message: String },

    #[error("No session named '{name}'")]
    SessionNotFound { name: String },

    #[error("Session daemon failed: {message}")]
    Daemon { message: String },
}

impl CoreError {
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CoreError::Io {
            context: context.into(),
            source,
        }
    }
}

impl BurrowError for CoreError {
    fn error_code(&self) -> &'static str {
        match self {
            CoreError::EnvironmentMissing { .. } => "ENVIRONMENT_MISSING",
            CoreError::SourceUnresponsive { .. } => "SOURCE_UNRESPONSIVE",
            CoreError::TargetExists { .. } => "TARGET_EXISTS",
            CoreError::NamesExhausted { .. } => "NAMES_EXHAUSTED",
            CoreError::AllocationFailure { .. } => "ALLOCATION_FAILURE",
            CoreError::Io { .. } => "IO_FAILURE",
            CoreError::MalformedEncoding { .. } => "MALFORMED_ENCODING",
            CoreError::InvalidName { .. } => "INVALID_NAME",
            CoreError::Daemonize { .. } => "DAEMONIZE_FAILED",
            CoreError::Protocol { .. } => "PROTOCOL_ERROR",
            CoreError::Config { .. } => "CONFIG_INVALID",
            CoreError::SessionNotFound { .. } => "SESSION_NOT_FOUND",
            CoreError::Daemon { .. } => "DAEMON_FAILED",
        }
    }

    fn is_user_error(&self) -> bool {
        matches!(
            self,
            CoreError::EnvironmentMissing { .. }
                | CoreError::TargetExists { .. }
                | CoreError::NamesExhausted { .. }
                | CoreError::InvalidName { .. }
                | CoreError::Config { .. }
                | CoreError::SessionNotFound { .. }
        )
    }
}

impl From<NameError> for CoreError {
    fn from(e: NameError) -> Self {
        match e {
            NameError::Invalid { name, reason } => CoreError::InvalidName { name, reason },
            NameError::Malformed { encoded, reason } => CoreError::MalformedEncoding {
                encoded,
                reason: reason.to_string(),
            },
        }
    }
}

impl From<IpcError> for CoreError {
    fn from(e: IpcError) -> Self {
        match e {
            IpcError::DaemonError {
                code: ErrorCode::AllocationFailed,
                message,
            } => CoreError::AllocationFailure { message },
            other => CoreError::Protocol {
                message: other.to_string(),
            },
        }
    }
}

impl From<DaemonError> for CoreError {
    fn from(e: DaemonError) -> Self {
        match e {
            DaemonError::ConfigInvalid(message) => CoreError::Config { message },
            DaemonError::Engine(EngineError::AllocationFailed { requested }) => {
                CoreError::AllocationFailure {
                    message: format!("terminal engine could not reserve {} bytes", requested),
                }
            }
            other => CoreError::Daemon {
                message: other.to_string(),
            },
        }
    }
}
