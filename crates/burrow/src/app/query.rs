use clap::{Arg, ArgAction, Command};

pub fn list_command() -> Command {
    Command::new("list")
        .visible_alias("ls")
        .about("List running sessions")
        .arg(
            Arg::new("json")
                .long("json")
                .help("Output in JSON format")
                .action(ArgAction::SetTrue),
        )
}

pub fn history_command() -> Command {
    Command::new("history")
        .about("Print a session's scrollback and screen")
        .arg(
            Arg::new("name")
                .help("Session name")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .help("Output format")
                .value_parser(["plain", "replay", "html"])
                .default_value("plain"),
        )
}
