use clap::ArgMatches;
use tracing::{error, info, warn};

use burrow_core::list_sessions;

use super::helpers::{self, CliContext};
use crate::color;
use crate::table::TableFormatter;

pub(crate) fn handle_list_command(
    ctx: &CliContext,
    matches: &ArgMatches,
) -> Result<(), Box<dyn std::error::Error>> {
    let json_output = matches.get_flag("json");
    info!(event = "cli.list_started", json_output = json_output);

    let listing = list_sessions(&ctx.registry).map_err(|e| {
        helpers::report("Could not list sessions", &e, "cli.list_failed");
        e
    })?;

    for bad in &listing.malformed {
        eprintln!("{} {}", color::warning("Skipping entry:"), bad);
        warn!(event = "cli.list_malformed_entry", error = %bad);
    }
    for entry in &listing.unresponsive {
        eprintln!(
            "{} {}",
            color::warning("Not responding:"),
            color::hint(entry)
        );
    }

    if json_output {
        match serde_json::to_string_pretty(&listing.live) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("{} {}", color::error("Could not encode sessions:"), e);
                error!(event = "cli.list_failed", error = %e);
                return Err(e.into());
            }
        }
    } else if listing.live.is_empty() {
        println!("{}", color::muted("No sessions running."));
    } else {
        TableFormatter::new(&listing.live).print_table(&listing.live);
    }

    info!(
        event = "cli.list_completed",
        count = listing.live.len(),
        cleaned = listing.cleaned.len()
    );
    Ok(())
}
