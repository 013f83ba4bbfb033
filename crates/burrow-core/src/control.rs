//! One-shot requests to a running session.

use burrow_protocol::{ClientMessage, DaemonMessage, HistoryFormat, SessionName, decode_payload};
use tracing::info;

use crate::errors::CoreError;
use crate::registry::SocketRegistry;

fn expect_ack(response: DaemonMessage) -> Result<(), CoreError> {
    match response {
        DaemonMessage::Ack => Ok(()),
        other => Err(CoreError::Protocol {
            message: format!("expected ack, got {:?}", other),
        }),
    }
}

/// Ask the session's daemon to kill its child and shut down.
pub fn kill_session(registry: &SocketRegistry, name: &SessionName) -> Result<(), CoreError> {
    expect_ack(registry.request(name, &ClientMessage::Kill)?)?;
    info!(event = "core.control.kill_requested", session = %name);
    Ok(())
}

/// Detach every client attached to the session. The session keeps running.
pub fn detach_clients(registry: &SocketRegistry, name: &SessionName) -> Result<(), CoreError> {
    expect_ack(registry.request(name, &ClientMessage::Detach)?)?;
    info!(event = "core.control.detach_all_requested", session = %name);
    Ok(())
}

/// Serialized terminal history, `None` when the session has nothing to show.
pub fn fetch_history(
    registry: &SocketRegistry,
    name: &SessionName,
    format: HistoryFormat,
) -> Result<Option<Vec<u8>>, CoreError> {
    match registry.request(name, &ClientMessage::History { format })? {
        DaemonMessage::History { data: None } => Ok(None),
        DaemonMessage::History { data: Some(data) } => {
            decode_payload(&data)
                .map(Some)
                .map_err(|e| CoreError::Protocol {
                    message: format!("history payload: {}", e),
                })
        }
        other => Err(CoreError::Protocol {
            message: format!("expected history, got {:?}", other),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader, Write};
    use std::os::unix::net::UnixListener;
    use std::time::Duration;

    /// Serve one connection, answering its first request with `reply`.
    fn serve_once(registry: &SocketRegistry, encoded: &str, reply: DaemonMessage) {
        let listener = UnixListener::bind(registry.entry_path(encoded)).unwrap();
        let reply = serde_json::to_string(&reply).unwrap();
        std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut line = String::new();
            BufReader::new(stream.try_clone().unwrap())
                .read_line(&mut line)
                .unwrap();
            writeln!(stream, "{}", reply).unwrap();
        });
    }

    fn registry() -> (tempfile::TempDir, SocketRegistry) {
        let dir = tempfile::tempdir().unwrap();
        let registry = SocketRegistry::open(dir.path(), Duration::from_millis(500)).unwrap();
        (dir, registry)
    }

    #[test]
    fn test_kill_missing_session_is_not_found() {
        let (_tmp, registry) = registry();
        let err = kill_session(&registry, &SessionName::new("ghost").unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound { .. }));
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_kill_stale_entry_removes_it() {
        let (_tmp, registry) = registry();
        // A socket file left behind by a daemon that died without cleaning up.
        drop(UnixListener::bind(registry.entry_path("dead")).unwrap());
        assert!(registry.entry_path("dead").exists());

        let err = kill_session(&registry, &SessionName::new("dead").unwrap()).unwrap_err();
        assert!(matches!(err, CoreError::SessionNotFound { .. }));
        assert!(!registry.entry_path("dead").exists());
    }

    #[test]
    fn test_kill_acknowledged() {
        let (_tmp, registry) = registry();
        serve_once(&registry, "dev", DaemonMessage::Ack);
        kill_session(&registry, &SessionName::new("dev").unwrap()).unwrap();
    }

    #[test]
    fn test_history_decodes_payload() {
        let (_tmp, registry) = registry();
        serve_once(
            &registry,
            "dev",
            DaemonMessage::History {
                data: Some(burrow_protocol::encode_payload(b"$ make\nok\n")),
            },
        );
        let data = fetch_history(
            &registry,
            &SessionName::new("dev").unwrap(),
            HistoryFormat::Plain,
        )
        .unwrap();
        assert_eq!(data.as_deref(), Some(&b"$ make\nok\n"[..]));
    }

    #[test]
    fn test_history_allocation_failure_propagates() {
        let (_tmp, registry) = registry();
        serve_once(
            &registry,
            "dev",
            DaemonMessage::error(burrow_protocol::ErrorCode::AllocationFailed, "no memory"),
        );
        let err = fetch_history(
            &registry,
            &SessionName::new("dev").unwrap(),
            HistoryFormat::Html,
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::AllocationFailure { .. }));
    }
}
