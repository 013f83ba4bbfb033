//! Terminal state interpretation.
//!
//! The daemon only talks to [`TerminalEngine`]; which escape-sequence
//! interpreter sits behind it is a build-time choice. The shipped backend is
//! [`Vt100Engine`].

mod vt100_engine;

pub use burrow_protocol::HistoryFormat;

pub use vt100_engine::Vt100Engine;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("failed to reserve {requested} bytes for serialized terminal state")]
    AllocationFailed { requested: usize },

    #[error("serialized terminal state exceeds its {reserved} byte bound")]
    BoundsExceeded { reserved: usize },
}

impl EngineError {
    pub fn error_code(&self) -> &'static str {
        match self {
            EngineError::AllocationFailed { .. } => "allocation_failed",
            EngineError::BoundsExceeded { .. } => "bounds_exceeded",
        }
    }
}

/// Capability surface the daemon needs from a terminal interpreter.
pub trait TerminalEngine: Send {
    /// Interpret raw PTY output.
    fn feed(&mut self, bytes: &[u8]);

    fn resize(&mut self, cols: u16, rows: u16);

    /// Cursor as `(row, col)`, zero-based.
    fn cursor_position(&self) -> (u16, u16);

    /// Serialize the current state. `Ok(None)` means there is nothing to show,
    /// which is distinct from failing to produce it.
    fn serialize(&mut self, format: HistoryFormat) -> Result<Option<Vec<u8>>, EngineError>;
}

/// Output buffer with a fixed upper bound, reserved up front.
///
/// Writes that would cross the bound fail instead of growing or truncating.
pub(crate) struct BoundedBuf {
    buf: Vec<u8>,
    limit: usize,
}

impl BoundedBuf {
    pub(crate) fn with_limit(limit: usize) -> Result<Self, EngineError> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(limit)
            .map_err(|_| EngineError::AllocationFailed { requested: limit })?;
        Ok(Self { buf, limit })
    }

    pub(crate) fn push(&mut self, bytes: &[u8]) -> Result<(), EngineError> {
        if self.buf.len() + bytes.len() > self.limit {
            return Err(EngineError::BoundsExceeded {
                reserved: self.limit,
            });
        }
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn push_str(&mut self, s: &str) -> Result<(), EngineError> {
        self.push(s.as_bytes())
    }

    pub(crate) fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}
