//! Blocking JSONL framing: one JSON object per `\n`-terminated line.

use std::io::{BufRead, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

/// Largest frame accepted on either side of the socket (16 MiB).
pub const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Debug)]
pub enum FrameError {
    Io(std::io::Error),
    /// A line exceeded [`MAX_FRAME_BYTES`] without a newline.
    TooLarge,
    Invalid(serde_json::Error),
}

impl std::fmt::Display for FrameError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "IO error: {}", e),
            FrameError::TooLarge => {
                write!(f, "frame exceeds {} bytes", MAX_FRAME_BYTES)
            }
            FrameError::Invalid(e) => write!(f, "invalid frame: {}", e),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            FrameError::Invalid(e) => Some(e),
            FrameError::TooLarge => None,
        }
    }
}

impl From<std::io::Error> for FrameError {
    fn from(e: std::io::Error) -> Self {
        FrameError::Io(e)
    }
}

/// Read one frame. `Ok(None)` on clean EOF. Blank lines are skipped.
pub fn read_frame<T, R>(reader: &mut R) -> Result<Option<T>, FrameError>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut line = String::new();
    loop {
        line.clear();
        let limit = (MAX_FRAME_BYTES + 1) as u64;
        let n = (&mut *reader).take(limit).read_line(&mut line)?;
        if n == 0 {
            return Ok(None);
        }
        if n > MAX_FRAME_BYTES {
            return Err(FrameError::TooLarge);
        }
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        return serde_json::from_str(trimmed)
            .map(Some)
            .map_err(FrameError::Invalid);
    }
}

/// Serialize `msg`, write it as a single line and flush.
pub fn write_frame<T, W>(writer: &mut W, msg: &T) -> Result<(), FrameError>
where
    T: Serialize,
    W: Write,
{
    let mut buf = serde_json::to_vec(msg).map_err(FrameError::Invalid)?;
    buf.push(b'\n');
    writer.write_all(&buf)?;
    writer.flush()?;
    Ok(())
}
