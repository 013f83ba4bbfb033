//! burrow-core: session registry, lifecycle and fork orchestration
//!
//! Everything the `burrow` CLI does besides drawing: finding sessions in the
//! socket directory, starting daemons, forking sessions and one-shot
//! requests.
//!
//! # Main Entry Points
//!
//! - [`registry`] - Probe, enumerate and clean up session entries
//! - [`lifecycle`] - Find a live session or daemonize a new one
//! - [`fork`] - Start a copy of the current session
//! - [`control`] - Kill, detach-all and history requests

pub mod control;
pub mod daemonize;
pub mod errors;
pub mod fork;
pub mod lifecycle;
pub mod logging;
pub mod registry;

pub use burrow_daemon::{DaemonConfig, load_daemon_config, load_daemon_config_from};
pub use burrow_protocol::{HistoryFormat, SESSION_ENV, SessionInfo, SessionName, SessionStatus};

pub use daemonize::{Daemonized, daemonize};
pub use errors::{BurrowError, CoreError};
pub use fork::{ForkContext, Forked, Launcher, fork_session};
pub use lifecycle::{DaemonLauncher, LaunchRequest, SessionOutcome, ensure_session};
pub use registry::{
    Listing, Liveness, SessionRegistry, SocketRegistry, list_sessions, resolve_socket_dir,
};

// Re-export logging initialization
pub use logging::init_logging;
