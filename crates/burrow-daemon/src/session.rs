use std::collections::BTreeMap;

use bytes::Bytes;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::engine::{EngineError, HistoryFormat, TerminalEngine};

/// Unique identifier for an attached client. Increases with every attach, so
/// the largest id is the most recently attached client.
pub type ClientId = u64;

/// Daemon lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Starting,
    Running,
    Draining,
    Terminated,
}

impl std::fmt::Display for DaemonState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DaemonState::Starting => write!(f, "starting"),
            DaemonState::Running => write!(f, "running"),
            DaemonState::Draining => write!(f, "draining"),
            DaemonState::Terminated => write!(f, "terminated"),
        }
    }
}

#[derive(Debug)]
struct AttachedClient {
    cols: u16,
    rows: u16,
    /// Cancelled when this client is detached from elsewhere.
    detach: CancellationToken,
}

/// What a newly attached client starts from.
pub struct Attachment {
    pub id: ClientId,
    /// Replay-format snapshot. Empty when nothing has been output yet.
    pub snapshot: Vec<u8>,
    /// Live output, starting exactly after `snapshot`.
    pub output: broadcast::Receiver<Bytes>,
    pub detach: CancellationToken,
    /// Size the PTY must take, if attaching changed it.
    pub apply_size: Option<(u16, u16)>,
}

/// Shared mutable session state: attached clients, focus, terminal engine and
/// the output fan-out channel.
///
/// Lives behind one mutex. PTY output is fed and published under that lock,
/// and attach snapshots and subscribes under it too, so no receiver ever sees
/// a byte twice or misses one between its snapshot and its first live chunk.
pub struct SessionCore {
    state: DaemonState,
    engine: Box<dyn TerminalEngine>,
    output_tx: broadcast::Sender<Bytes>,
    clients: BTreeMap<ClientId, AttachedClient>,
    focus: Option<ClientId>,
    next_client_id: ClientId,
    /// Size last applied to engine and PTY, as `(cols, rows)`.
    applied_size: (u16, u16),
    exit_code: Option<u32>,
}

impl SessionCore {
    pub fn new(
        engine: Box<dyn TerminalEngine>,
        output_channel_capacity: usize,
        initial_size: (u16, u16),
    ) -> Self {
        let (output_tx, _) = broadcast::channel(output_channel_capacity);
        Self {
            state: DaemonState::Starting,
            engine,
            output_tx,
            clients: BTreeMap::new(),
            focus: None,
            next_client_id: 1,
            applied_size: initial_size,
            exit_code: None,
        }
    }

    pub fn state(&self) -> DaemonState {
        self.state
    }

    pub fn set_state(&mut self, state: DaemonState) {
        debug!(
            event = "daemon.session.state_changed",
            from = %self.state,
            to = %state,
        );
        self.state = state;
    }

    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    pub fn set_exit_code(&mut self, code: Option<u32>) {
        self.exit_code = code;
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn focus(&self) -> Option<ClientId> {
        self.focus
    }

    pub fn is_focused(&self, id: ClientId) -> bool {
        self.focus == Some(id)
    }

    /// Interpret a PTY chunk and publish it to every attached client.
    pub fn feed(&mut self, chunk: Bytes) {
        self.engine.feed(&chunk);
        // No receivers just means nobody is attached.
        let _ = self.output_tx.send(chunk);
    }

    /// Attach a client and give it focus.
    ///
    /// The new client's size is applied before the snapshot is taken, so the
    /// snapshot matches the geometry the client will render at.
    pub fn attach(&mut self, cols: u16, rows: u16) -> Result<Attachment, EngineError> {
        let apply_size = self.apply((cols, rows));
        let snapshot = self
            .engine
            .serialize(HistoryFormat::Replay)?
            .unwrap_or_default();
        let output = self.output_tx.subscribe();

        let id = self.next_client_id;
        self.next_client_id += 1;
        let detach = CancellationToken::new();
        self.clients.insert(
            id,
            AttachedClient {
                cols,
                rows,
                detach: detach.clone(),
            },
        );
        self.focus = Some(id);

        info!(
            event = "daemon.client.attached",
            client_id = id,
            clients = self.clients.len(),
        );

        Ok(Attachment {
            id,
            snapshot,
            output,
            detach,
            apply_size,
        })
    }

    /// Remove a client. If it had focus, focus passes to the most recently
    /// attached remaining client and its size is returned for the PTY.
    pub fn detach(&mut self, id: ClientId) -> Option<(u16, u16)> {
        if self.clients.remove(&id).is_none() {
            return None;
        }
        info!(
            event = "daemon.client.detached",
            client_id = id,
            clients = self.clients.len(),
        );
        if self.focus != Some(id) {
            return None;
        }

        self.focus = self.clients.keys().next_back().copied();
        let next = self
            .focus
            .and_then(|next| self.clients.get(&next))
            .map(|c| (c.cols, c.rows))?;
        self.apply(next)
    }

    /// Detach every attached client. Returns how many there were.
    pub fn detach_all(&mut self) -> usize {
        let count = self.clients.len();
        for client in self.clients.values() {
            client.detach.cancel();
        }
        self.clients.clear();
        self.focus = None;
        info!(event = "daemon.client.detach_all_completed", clients = count);
        count
    }

    /// Record a client's size. Only the focused client's size is applied.
    pub fn resize(&mut self, id: ClientId, cols: u16, rows: u16) -> Option<(u16, u16)> {
        let client = self.clients.get_mut(&id)?;
        client.cols = cols;
        client.rows = rows;
        if self.focus == Some(id) {
            self.apply((cols, rows))
        } else {
            None
        }
    }

    pub fn history(&mut self, format: HistoryFormat) -> Result<Option<Vec<u8>>, EngineError> {
        self.engine.serialize(format)
    }

    fn apply(&mut self, size: (u16, u16)) -> Option<(u16, u16)> {
        let (cols, rows) = size;
        if size == self.applied_size || cols == 0 || rows == 0 {
            return None;
        }
        self.engine.resize(cols, rows);
        self.applied_size = size;
        Some(size)
    }
}
