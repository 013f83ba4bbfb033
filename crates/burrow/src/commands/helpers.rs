use std::path::PathBuf;

use clap::ArgMatches;
use tracing::{error, warn};

use burrow_core::{
    BurrowError, DaemonConfig, SessionName, SocketRegistry, load_daemon_config_from,
    resolve_socket_dir,
};
use burrow_paths::BurrowPaths;

use crate::color;

/// Everything a command needs to reach the registry and start daemons.
pub(crate) struct CliContext {
    pub registry: SocketRegistry,
    pub config: DaemonConfig,
    pub paths: BurrowPaths,
}

impl CliContext {
    pub fn load(matches: &ArgMatches) -> Result<Self, Box<dyn std::error::Error>> {
        let paths = resolve_paths();
        let config = load_config_with_warning(&paths);
        let socket_dir = resolve_socket_dir(
            matches.get_one::<PathBuf>("socket-dir").map(PathBuf::as_path),
            &config,
        );

        let registry = match SocketRegistry::open(&socket_dir, config.probe_timeout()) {
            Ok(registry) => registry,
            Err(e) => {
                eprintln!(
                    "{} {}: {}",
                    color::error("Cannot open socket directory"),
                    socket_dir.display(),
                    e
                );
                error!(
                    event = "cli.registry_open_failed",
                    dir = %socket_dir.display(),
                    error = %e
                );
                return Err(e.into());
            }
        };

        Ok(Self {
            registry,
            config,
            paths,
        })
    }
}

fn resolve_paths() -> BurrowPaths {
    BurrowPaths::resolve().unwrap_or_else(|e| {
        warn!(
            event = "cli.paths.home_dir_fallback",
            error = %e,
            fallback = "/tmp/.burrow",
        );
        BurrowPaths::from_dir(PathBuf::from("/tmp/.burrow"))
    })
}

/// Load configuration with warning on errors.
///
/// Falls back to defaults if the config fails validation, but notifies the
/// user on stderr and logs `cli.config.load_failed`.
fn load_config_with_warning(paths: &BurrowPaths) -> DaemonConfig {
    match load_daemon_config_from(&paths.user_config()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "{} Could not load config: {}. Using defaults.\n\
                 Tip: Check {} for invalid values.",
                color::warning("Warning:"),
                e,
                paths.user_config().display()
            );
            warn!(
                event = "cli.config.load_failed",
                error = %e,
                "Config load failed, using defaults"
            );
            DaemonConfig::default()
        }
    }
}

/// Print a failed operation as one line and log it under `event`.
pub(crate) fn report<E>(what: &str, e: &E, event: &str)
where
    E: std::error::Error + BurrowError,
{
    eprintln!("{} {}", color::error(&format!("{}:", what)), e);
    if e.is_user_error() {
        warn!(event = event, code = e.error_code(), error = %e);
    } else {
        error!(event = event, code = e.error_code(), error = %e);
    }
}

/// Parse a session name argument, reporting a bad one.
pub(crate) fn session_name(
    matches: &ArgMatches,
    event: &str,
) -> Result<SessionName, Box<dyn std::error::Error>> {
    let raw = matches
        .get_one::<String>("name")
        .ok_or("Session name is required")?;
    SessionName::new(raw.as_str()).map_err(|e| {
        let e = burrow_core::CoreError::from(e);
        report("Invalid session name", &e, event);
        e.into()
    })
}

/// Current terminal size as `(cols, rows)`, 80x24 when stdout is not a tty.
pub(crate) fn terminal_size() -> (u16, u16) {
    use nix::libc;
    // SAFETY: TIOCGWINSZ only writes into the zeroed winsize we own.
    unsafe {
        let mut winsize: libc::winsize = std::mem::zeroed();
        if libc::ioctl(libc::STDOUT_FILENO, libc::TIOCGWINSZ, &mut winsize) == 0
            && winsize.ws_col > 0
            && winsize.ws_row > 0
        {
            (winsize.ws_col, winsize.ws_row)
        } else {
            (80, 24)
        }
    }
}
