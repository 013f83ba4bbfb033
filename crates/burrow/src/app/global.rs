use std::path::PathBuf;

use clap::{Arg, ArgAction, Command, value_parser};

pub fn root_command() -> Command {
    Command::new("burrow")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Persistent terminal sessions you can detach from and reattach to")
        .long_about("burrow runs each session's program under a small background daemon that owns its pseudo-terminal. Clients attach and detach freely; the program keeps running, and a reattaching client sees the screen exactly as it would have had it stayed.")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("no-color")
                .long("no-color")
                .help("Disable colored output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .arg(
            Arg::new("socket-dir")
                .long("socket-dir")
                .help("Directory holding session sockets (default: $BURROW_DIR, then config, then the runtime dir)")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .global(true),
        )
        .subcommand_required(true)
        .arg_required_else_help(true)
}
