use std::io::Write;

use clap::ArgMatches;
use tracing::{error, info};

use burrow_core::control::{detach_clients, fetch_history, kill_session};
use burrow_core::{CoreError, ForkContext, HistoryFormat, SESSION_ENV, SessionName};

use super::helpers::{self, CliContext};
use crate::color;

pub(crate) fn handle_kill_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = helpers::session_name(matches, "cli.kill_failed")?;
    info!(event = "cli.kill_started", session = %name);

    kill_session(&ctx.registry, &name).map_err(|e| {
        helpers::report(&format!("Could not kill '{}'", name), &e, "cli.kill_failed");
        e
    })?;

    println!("{} {}", color::ember("Killed"), color::ice(name.as_str()));
    info!(event = "cli.kill_completed", session = %name);
    Ok(())
}

pub(crate) fn handle_detach_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = match matches.get_one::<String>("name") {
        Some(_) => helpers::session_name(matches, "cli.detach_failed")?,
        None => current_session()?,
    };
    info!(event = "cli.detach_started", session = %name);

    detach_clients(&ctx.registry, &name).map_err(|e| {
        helpers::report(
            &format!("Could not detach from '{}'", name),
            &e,
            "cli.detach_failed",
        );
        e
    })?;

    info!(event = "cli.detach_completed", session = %name);
    Ok(())
}

pub(crate) fn handle_history_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = helpers::session_name(matches, "cli.history_failed")?;
    let format: HistoryFormat = matches
        .get_one::<String>("format")
        .map(|f| f.parse())
        .transpose()?
        .unwrap_or_default();
    info!(event = "cli.history_started", session = %name, format = %format);

    let data = fetch_history(&ctx.registry, &name, format).map_err(|e| {
        helpers::report(
            &format!("Could not read history of '{}'", name),
            &e,
            "cli.history_failed",
        );
        e
    })?;

    match data {
        Some(bytes) => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(&bytes)?;
            stdout.flush()?;
        }
        None => eprintln!("{}", color::hint("Nothing to show.")),
    }

    info!(event = "cli.history_completed", session = %name);
    Ok(())
}

/// The session this command runs inside, from `BURROW_SESSION`.
fn current_session() -> Result<SessionName, Box<dyn std::error::Error>> {
    let Some(source) = ForkContext::from_env().source else {
        let e = CoreError::EnvironmentMissing { var: SESSION_ENV };
        helpers::report("No session given", &e, "cli.detach_failed");
        eprintln!("  {}", color::hint("Pass a session name: burrow detach <name>"));
        return Err(e.into());
    };
    SessionName::new(source).map_err(|e| {
        let e = CoreError::from(e);
        error!(event = "cli.detach_failed", error = %e);
        eprintln!("{} {}", color::error("Invalid session name:"), e);
        e.into()
    })
}
