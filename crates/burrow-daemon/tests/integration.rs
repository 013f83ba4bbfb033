//! Integration tests for a session daemon serving real clients.
//!
//! Each test binds a socket in a temp dir, runs `run_server` with a real
//! child in a PTY, and talks JSONL to it over the socket.

use std::path::{Path, PathBuf};
use std::time::Duration;

use burrow_daemon::protocol::{read_message, write_message};
use burrow_daemon::{DaemonConfig, SessionSpec, run_server};
use burrow_protocol::{
    ClientMessage, DaemonMessage, HistoryFormat, SessionInfo, SessionStatus, decode_payload,
};
use tokio::io::BufReader;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STEP_TIMEOUT: Duration = Duration::from_secs(5);

struct TestSession {
    _dir: tempfile::TempDir,
    socket: PathBuf,
    shutdown: CancellationToken,
    handle: JoinHandle<Result<Option<u32>, burrow_daemon::DaemonError>>,
}

fn start(argv: &[&str]) -> TestSession {
    let dir = tempfile::tempdir().unwrap();
    let socket = dir.path().join("work");
    let listener = std::os::unix::net::UnixListener::bind(&socket).unwrap();

    let spec = SessionSpec {
        name: "work".to_string(),
        argv: argv.iter().map(|s| s.to_string()).collect(),
        cwd: dir.path().to_path_buf(),
        cols: 80,
        rows: 24,
        socket_path: socket.clone(),
    };
    let shutdown = CancellationToken::new();
    let handle = tokio::spawn(run_server(
        spec,
        DaemonConfig::default(),
        listener,
        shutdown.clone(),
    ));

    TestSession {
        _dir: dir,
        socket,
        shutdown,
        handle,
    }
}

impl TestSession {
    async fn finish(self) -> Option<u32> {
        self.shutdown.cancel();
        self.wait().await
    }

    async fn wait(self) -> Option<u32> {
        tokio::time::timeout(STEP_TIMEOUT, self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap()
    }
}

struct TestClient {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl TestClient {
    async fn connect(socket: &Path) -> Self {
        let stream = UnixStream::connect(socket).await.unwrap();
        let (read_half, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read_half),
            writer,
        }
    }

    /// Connect and attach, returning the client and its snapshot text.
    async fn attach(socket: &Path) -> (Self, String) {
        let mut client = Self::connect(socket).await;
        client.send(ClientMessage::Attach { cols: 80, rows: 24 }).await;
        match client.recv().await {
            DaemonMessage::Snapshot { data } => {
                let snapshot = String::from_utf8_lossy(&decode_payload(&data).unwrap()).to_string();
                (client, snapshot)
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    async fn send(&mut self, msg: ClientMessage) {
        write_message(&mut self.writer, &msg).await.unwrap();
    }

    async fn recv(&mut self) -> DaemonMessage {
        tokio::time::timeout(STEP_TIMEOUT, read_message(&mut self.reader))
            .await
            .expect("timed out waiting for daemon")
            .unwrap()
            .expect("daemon closed the connection")
    }

    async fn request(&mut self, msg: ClientMessage) -> DaemonMessage {
        self.send(msg).await;
        self.recv().await
    }

    async fn info(&mut self) -> SessionInfo {
        match self.request(ClientMessage::Info).await {
            DaemonMessage::Info { session } => session,
            other => panic!("expected info, got {:?}", other),
        }
    }

    /// Collect output until it contains `needle`.
    async fn output_until(&mut self, needle: &str) -> String {
        let mut seen = String::new();
        while !seen.contains(needle) {
            match self.recv().await {
                DaemonMessage::Output { data } => {
                    seen.push_str(&String::from_utf8_lossy(&decode_payload(&data).unwrap()));
                }
                DaemonMessage::OutputDropped { .. } => {}
                other => panic!("expected output containing {needle:?}, got {:?}", other),
            }
        }
        seen
    }

    /// Skip output until `done` matches a message, and return it.
    async fn skip_output_until(&mut self, done: impl Fn(&DaemonMessage) -> bool) -> DaemonMessage {
        loop {
            let msg = self.recv().await;
            if done(&msg) {
                return msg;
            }
            assert!(
                matches!(
                    msg,
                    DaemonMessage::Output { .. } | DaemonMessage::OutputDropped { .. }
                ),
                "unexpected message {:?}",
                msg
            );
        }
    }
}

#[tokio::test]
async fn test_snapshot_holds_earlier_output_and_live_output_follows() {
    let session = start(&["/bin/sh", "-c", "echo ready-$((40+2)); exec cat"]);

    // Wait until the child has printed, without attaching.
    let mut probe = TestClient::connect(&session.socket).await;
    let mut ready = false;
    for _ in 0..100 {
        if let DaemonMessage::History { data: Some(data) } = probe
            .request(ClientMessage::History {
                format: HistoryFormat::Plain,
            })
            .await
            && String::from_utf8_lossy(&decode_payload(&data).unwrap()).contains("ready-42")
        {
            ready = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(ready, "child output never reached the terminal engine");

    let (mut client, snapshot) = TestClient::attach(&session.socket).await;
    assert!(snapshot.contains("ready-42"));

    client.send(ClientMessage::input(b"live-line\n")).await;
    client.output_until("live-line").await;

    session.finish().await;
}

#[tokio::test]
async fn test_two_clients_receive_the_same_output() {
    let session = start(&["/bin/sh"]);
    let (mut a, _) = TestClient::attach(&session.socket).await;
    let (mut b, _) = TestClient::attach(&session.socket).await;

    // b attached last, so b holds focus and its input reaches the shell.
    b.send(ClientMessage::input(b"echo sum-$((6*7))\n")).await;
    b.output_until("sum-42").await;
    a.output_until("sum-42").await;

    session.finish().await;
}

#[tokio::test]
async fn test_detaching_one_client_leaves_the_other_streaming() {
    let session = start(&["/bin/sh"]);
    let (mut a, _) = TestClient::attach(&session.socket).await;
    let (mut b, _) = TestClient::attach(&session.socket).await;

    b.send(ClientMessage::Detach).await;
    b.skip_output_until(|m| matches!(m, DaemonMessage::Detached))
        .await;

    // Focus falls back to a.
    a.send(ClientMessage::input(b"echo prod-$((7*8))\n")).await;
    a.output_until("prod-56").await;

    let mut probe = TestClient::connect(&session.socket).await;
    assert_eq!(probe.info().await.clients, 1);

    session.finish().await;
}

#[tokio::test]
async fn test_probe_does_not_count_as_client_or_take_focus() {
    let session = start(&["/bin/sh"]);
    let (mut a, _) = TestClient::attach(&session.socket).await;

    let mut probe = TestClient::connect(&session.socket).await;
    let info = probe.info().await;
    assert_eq!(info.name, "work");
    assert_eq!(info.command, "/bin/sh");
    assert_eq!(info.clients, 1);
    assert_eq!(info.status, SessionStatus::Running);
    assert!(info.pid.is_some());

    a.send(ClientMessage::input(b"echo still-$((1+1))\n")).await;
    a.output_until("still-2").await;

    session.finish().await;
}

#[tokio::test]
async fn test_input_before_attach_is_rejected() {
    let session = start(&["/bin/sh"]);
    let mut probe = TestClient::connect(&session.socket).await;
    match probe.request(ClientMessage::input(b"ls\n")).await {
        DaemonMessage::Error { message, .. } => assert!(message.contains("not attached")),
        other => panic!("expected error, got {:?}", other),
    }
    session.finish().await;
}

#[tokio::test]
async fn test_child_exit_ends_session_and_removes_socket() {
    let session = start(&["/bin/sh", "-c", "echo bye"]);
    let socket = session.socket.clone();
    let exit_code = session.wait().await;
    assert_eq!(exit_code, Some(0));
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_kill_request_ends_session_for_attached_clients() {
    let session = start(&["/bin/sh"]);
    let (mut a, _) = TestClient::attach(&session.socket).await;

    let mut probe = TestClient::connect(&session.socket).await;
    assert_eq!(probe.request(ClientMessage::Kill).await, DaemonMessage::Ack);

    a.skip_output_until(|m| matches!(m, DaemonMessage::SessionEnded { .. }))
        .await;

    let socket = session.socket.clone();
    session.wait().await;
    assert!(!socket.exists());
}

#[tokio::test]
async fn test_detach_all_from_probe() {
    let session = start(&["/bin/sh"]);
    let (mut a, _) = TestClient::attach(&session.socket).await;
    let (mut b, _) = TestClient::attach(&session.socket).await;

    let mut probe = TestClient::connect(&session.socket).await;
    assert_eq!(probe.request(ClientMessage::Detach).await, DaemonMessage::Ack);

    for client in [&mut a, &mut b] {
        client
            .skip_output_until(|m| matches!(m, DaemonMessage::Detached))
            .await;
    }
    assert_eq!(probe.info().await.clients, 0);

    // The session itself keeps running.
    let (mut c, _) = TestClient::attach(&session.socket).await;
    c.send(ClientMessage::input(b"echo back-$((2+3))\n")).await;
    c.output_until("back-5").await;

    session.finish().await;
}

#[tokio::test]
async fn test_removed_socket_entry_stops_daemon() {
    let session = start(&["/bin/sh"]);
    let mut probe = TestClient::connect(&session.socket).await;
    probe.info().await;

    std::fs::remove_file(&session.socket).unwrap();
    session.wait().await;
}
