use clap::ArgMatches;
use tracing::info;

use burrow_core::{DaemonLauncher, ForkContext, SessionOutcome, fork_session};

use super::helpers::{self, CliContext};
use crate::color;

pub(crate) fn handle_fork_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let fork_ctx = ForkContext::from_env();
    let target = matches.get_one::<String>("name").map(String::as_str);

    info!(
        event = "cli.fork_started",
        source = fork_ctx.source.as_deref().unwrap_or(""),
        target = target.unwrap_or("")
    );

    let mut launcher = DaemonLauncher {
        registry: &ctx.registry,
        config: &ctx.config,
        paths: &ctx.paths,
    };
    let forked = fork_session(
        &fork_ctx,
        target,
        helpers::terminal_size(),
        &ctx.registry,
        &mut launcher,
    )
    .map_err(|e| {
        helpers::report("Fork failed", &e, "cli.fork_failed");
        e
    })?;

    match forked.outcome {
        SessionOutcome::Started { pid } => println!(
            "{} {} into {} {}",
            color::aurora("Forked"),
            color::ice(&forked.source.name),
            color::ice(forked.target.as_str()),
            color::muted(&format!("(pid {})", pid))
        ),
        SessionOutcome::AlreadyRunning => println!(
            "{} {} is already running.",
            color::muted("Session"),
            color::ice(forked.target.as_str())
        ),
    }
    println!(
        "  {} burrow attach {}",
        color::muted("Attach:"),
        color::ice(forked.target.as_str())
    );

    info!(
        event = "cli.fork_completed",
        source = %forked.source.name,
        target = %forked.target
    );
    Ok(())
}
