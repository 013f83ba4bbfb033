use std::sync::OnceLock;

use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Registry, fmt, reload};

/// Environment variable holding a tracing filter directive.
pub const LOG_ENV: &str = "BURROW_LOG";

static FILTER_HANDLE: OnceLock<reload::Handle<EnvFilter, Registry>> = OnceLock::new();

fn build_filter(quiet: bool) -> EnvFilter {
    if quiet {
        return EnvFilter::new("off");
    }
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global JSON subscriber on stderr.
///
/// `quiet` turns every event off so user-facing output stays clean; the CLI
/// passes `!verbose`. Safe to call more than once, later calls are ignored.
pub fn init_logging(quiet: bool) {
    let (filter, handle) = reload::Layer::new(build_filter(quiet));
    let layer = fmt::layer()
        .json()
        .with_writer(std::io::stderr)
        .with_target(false);

    if tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()
        .is_ok()
    {
        let _ = FILTER_HANDLE.set(handle);
    }
}

/// Swap the active filter. A freshly daemonized session calls this with
/// `false` once its stderr points at the session log.
pub fn set_quiet(quiet: bool) {
    if let Some(handle) = FILTER_HANDLE.get()
        && let Err(e) = handle.reload(build_filter(quiet))
    {
        eprintln!("burrow: failed to reload log filter: {}", e);
    }
}
