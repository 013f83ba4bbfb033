use burrow_protocol::MAX_FRAME_BYTES;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::DaemonError;

/// Read a single JSONL message from an async buffered reader.
///
/// Returns `Ok(None)` when the stream is closed (EOF). Blank lines are
/// skipped. Lines longer than [`MAX_FRAME_BYTES`] are a protocol error.
pub async fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, DaemonError>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    let mut line = String::new();
    loop {
        line.clear();
        let limit = (MAX_FRAME_BYTES + 1) as u64;
        let bytes_read = (&mut *reader).take(limit).read_line(&mut line).await?;
        if bytes_read == 0 {
            return Ok(None); // EOF
        }
        if bytes_read > MAX_FRAME_BYTES {
            return Err(DaemonError::ProtocolError(format!(
                "frame exceeds {} bytes",
                MAX_FRAME_BYTES
            )));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let msg: T = serde_json::from_str(trimmed)
            .map_err(|e| DaemonError::ProtocolError(format!("invalid JSON: {}", e)))?;
        return Ok(Some(msg));
    }
}

/// Write a single JSONL message to an async writer.
///
/// Serializes the message as compact JSON followed by a newline, then flushes.
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), DaemonError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut json = serde_json::to_vec(msg)?;
    json.push(b'\n');
    writer.write_all(&json).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burrow_protocol::{ClientMessage, DaemonMessage, HistoryFormat};

    #[tokio::test]
    async fn test_roundtrip_client_message() {
        let msg = ClientMessage::History {
            format: HistoryFormat::Replay,
        };

        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &msg).await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let parsed: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert_eq!(parsed, Some(msg));
    }

    #[tokio::test]
    async fn test_read_eof() {
        let buf: &[u8] = b"";
        let mut reader = tokio::io::BufReader::new(buf);
        let result: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_blank_line_is_not_eof() {
        let buf: &[u8] = b"\n{\"type\":\"info\"}\n";
        let mut reader = tokio::io::BufReader::new(buf);
        let result: Option<ClientMessage> = read_message(&mut reader).await.unwrap();
        assert_eq!(result, Some(ClientMessage::Info));
    }

    #[tokio::test]
    async fn test_read_invalid_json() {
        let buf: &[u8] = b"not json\n";
        let mut reader = tokio::io::BufReader::new(buf);
        let result: Result<Option<ClientMessage>, _> = read_message(&mut reader).await;
        let err = result.unwrap_err();
        assert_eq!(err.error_code(), "protocol_error");
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let buf = vec![b'x'; MAX_FRAME_BYTES + 1];
        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let result: Result<Option<ClientMessage>, _> = read_message(&mut reader).await;
        assert!(result.unwrap_err().to_string().contains("frame exceeds"));
    }

    #[tokio::test]
    async fn test_multiple_messages() {
        let mut buf: Vec<u8> = Vec::new();
        write_message(&mut buf, &DaemonMessage::output(b"a")).await.unwrap();
        write_message(&mut buf, &DaemonMessage::Detached).await.unwrap();

        let mut reader = tokio::io::BufReader::new(buf.as_slice());
        let first: DaemonMessage = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(first, DaemonMessage::output(b"a"));
        let second: DaemonMessage = read_message(&mut reader).await.unwrap().unwrap();
        assert_eq!(second, DaemonMessage::Detached);
        let eof: Option<DaemonMessage> = read_message(&mut reader).await.unwrap();
        assert!(eof.is_none());
    }
}
