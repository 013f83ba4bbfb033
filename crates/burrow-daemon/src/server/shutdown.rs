use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::errors::DaemonError;

/// Wait for SIGTERM, SIGINT or SIGHUP, then cancel `token`.
///
/// A session daemon has no terminal of its own, so a hangup only arrives
/// when someone sends it on purpose. All three end the session the same way
/// a `kill` request does.
pub async fn wait_for_shutdown_signal(token: CancellationToken) -> Result<(), DaemonError> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
        _ = sighup.recv() => "SIGHUP",
        _ = token.cancelled() => return Ok(()),
    };
    info!(event = "daemon.server.signal_received", signal = name);

    token.cancel();
    Ok(())
}
