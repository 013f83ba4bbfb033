pub mod engine;
pub mod errors;
pub mod protocol;
pub mod pty;
pub mod server;
pub mod session;
pub mod types;

// Primary re-exports
pub use engine::{EngineError, TerminalEngine, Vt100Engine};
pub use errors::DaemonError;
pub use server::run_server;
pub use server::shutdown::wait_for_shutdown_signal;
pub use types::{DaemonConfig, SessionSpec, load_daemon_config, load_daemon_config_from};
