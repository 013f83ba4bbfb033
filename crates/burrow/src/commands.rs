use clap::ArgMatches;
use tracing::{error, info};

mod attach;
mod control;
mod fork;
mod helpers;
mod list;

use helpers::CliContext;

pub fn run_command(matches: &ArgMatches) -> Result<(), Box<dyn std::error::Error>> {
    info!(
        event = "cli.command_started",
        version = env!("CARGO_PKG_VERSION"),
        command = matches.subcommand_name().unwrap_or("")
    );

    let ctx = CliContext::load(matches)?;

    match matches.subcommand() {
        Some(("attach", sub_matches)) => attach::handle_attach_command(&ctx, sub_matches),
        Some(("new", sub_matches)) => attach::handle_new_command(&ctx, sub_matches),
        Some(("list", sub_matches)) => list::handle_list_command(&ctx, sub_matches),
        Some(("fork", sub_matches)) => fork::handle_fork_command(&ctx, sub_matches),
        Some(("detach", sub_matches)) => control::handle_detach_command(&ctx, sub_matches),
        Some(("kill", sub_matches)) => control::handle_kill_command(&ctx, sub_matches),
        Some(("history", sub_matches)) => control::handle_history_command(&ctx, sub_matches),
        _ => {
            error!(event = "cli.command_unknown");
            Err("Unknown command".into())
        }
    }
}
