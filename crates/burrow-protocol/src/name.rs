//! Bijective mapping between user-chosen session names and socket file names.
//!
//! Bytes on the allowlist pass through unchanged. Every other byte, the
//! escape marker included, becomes `%XX` (upper-case hex). Decoding is the
//! exact inverse and rejects anything `encode` could not have produced.

use std::fmt;

/// Escape marker. Always escaped itself, so it never appears raw in output.
pub const ESCAPE_MARKER: u8 = b'%';

/// Maximum length of a session name in bytes (before encoding).
pub const MAX_NAME_LEN: usize = 64;

/// Punctuation that survives encoding unchanged. `.` is deliberately absent
/// so no encoded name is `.`, `..` or a dotfile.
const SAFE_PUNCTUATION: &[u8] = b"-_+,=@";

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Why an encoded name could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MalformedReason {
    /// `%` with fewer than two characters after it.
    TruncatedEscape,
    /// `%` followed by something that is not two hex digits.
    NonHexEscape,
    /// `%XX` where `XX` decodes to an allowlisted byte.
    NonCanonicalEscape,
    /// A raw byte that `encode` would have escaped.
    UnexpectedByte(u8),
    /// The decoded bytes are not UTF-8.
    InvalidUtf8,
}

impl fmt::Display for MalformedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MalformedReason::TruncatedEscape => write!(f, "truncated escape sequence"),
            MalformedReason::NonHexEscape => write!(f, "escape sequence is not two hex digits"),
            MalformedReason::NonCanonicalEscape => write!(f, "escape of a byte that needs none"),
            MalformedReason::UnexpectedByte(b) => write!(f, "unexpected raw byte 0x{b:02x}"),
            MalformedReason::InvalidUtf8 => write!(f, "decoded name is not UTF-8"),
        }
    }
}

/// Error from session-name validation or decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameError {
    /// The user-supplied name is empty or too long.
    Invalid { name: String, reason: String },
    /// A socket file name is not a valid encoding.
    Malformed {
        encoded: String,
        reason: MalformedReason,
    },
}

impl fmt::Display for NameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NameError::Invalid { name, reason } => {
                write!(f, "invalid session name '{}': {}", name, reason)
            }
            NameError::Malformed { encoded, reason } => {
                write!(f, "malformed session entry '{}': {}", encoded, reason)
            }
        }
    }
}

impl std::error::Error for NameError {}

fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || SAFE_PUNCTUATION.contains(&byte)
}

fn hex_value(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Encode a name into a filesystem-safe segment.
pub fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for &byte in name.as_bytes() {
        if is_safe(byte) {
            out.push(byte as char);
        } else {
            out.push(ESCAPE_MARKER as char);
            out.push(HEX_DIGITS[usize::from(byte >> 4)] as char);
            out.push(HEX_DIGITS[usize::from(byte & 0x0f)] as char);
        }
    }
    out
}

/// Decode a segment produced by [`encode`].
pub fn decode(encoded: &str) -> Result<String, NameError> {
    let malformed = |reason| NameError::Malformed {
        encoded: encoded.to_string(),
        reason,
    };

    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        let byte = bytes[i];
        if byte == ESCAPE_MARKER {
            if bytes.len() - i < 3 {
                return Err(malformed(MalformedReason::TruncatedEscape));
            }
            let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) else {
                return Err(malformed(MalformedReason::NonHexEscape));
            };
            let value = (hi << 4) | lo;
            if is_safe(value) {
                return Err(malformed(MalformedReason::NonCanonicalEscape));
            }
            out.push(value);
            i += 3;
        } else if is_safe(byte) {
            out.push(byte);
            i += 1;
        } else {
            return Err(malformed(MalformedReason::UnexpectedByte(byte)));
        }
    }

    String::from_utf8(out).map_err(|_| malformed(MalformedReason::InvalidUtf8))
}

/// A validated session name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionName(String);

impl SessionName {
    /// Validate a user-supplied name: 1..=[`MAX_NAME_LEN`] bytes.
    pub fn new(name: impl Into<String>) -> Result<Self, NameError> {
        let name = name.into();
        if name.is_empty() {
            return Err(NameError::Invalid {
                name,
                reason: "name must not be empty".to_string(),
            });
        }
        if name.len() > MAX_NAME_LEN {
            return Err(NameError::Invalid {
                reason: format!("name is {} bytes, limit is {}", name.len(), MAX_NAME_LEN),
                name,
            });
        }
        Ok(Self(name))
    }

    /// Rebuild a name from a socket file name.
    pub fn from_encoded(encoded: &str) -> Result<Self, NameError> {
        Self::new(decode(encoded)?)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The filesystem-safe form used as the socket file name.
    pub fn encoded(&self) -> String {
        encode(&self.0)
    }
}

impl fmt::Display for SessionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
