use clap::{Arg, Command};

fn name_arg(help: &'static str) -> Arg {
    Arg::new("name").help(help).required(true).index(1)
}

fn command_arg() -> Arg {
    Arg::new("command")
        .help("Program and arguments to run (default: your shell)")
        .num_args(1..)
        .trailing_var_arg(true)
        .allow_hyphen_values(true)
        .index(2)
}

pub fn attach_command() -> Command {
    Command::new("attach")
        .visible_alias("a")
        .about("Attach to a session, starting it if needed")
        .long_about(
            "Attaches the current terminal to the named session. If no session by \
             that name is running, one is started with the given command first. \
             Press Ctrl-\\ to detach; the session keeps running.",
        )
        .arg(name_arg("Session name"))
        .arg(command_arg())
}

pub fn new_command() -> Command {
    Command::new("new")
        .about("Start a session in the background without attaching")
        .arg(name_arg("Session name"))
        .arg(command_arg())
}

pub fn fork_command() -> Command {
    Command::new("fork")
        .about("Start a copy of the current session")
        .long_about(
            "Starts a new, independent session running the same command in the same \
             directory as the session this is run from ($BURROW_SESSION). Without a \
             name the new session is called <source>-1, <source>-2, and so on. Does \
             not attach.",
        )
        .arg(
            Arg::new("name")
                .help("Name for the new session")
                .index(1),
        )
}

pub fn detach_command() -> Command {
    Command::new("detach")
        .about("Detach every client from a session")
        .arg(
            Arg::new("name")
                .help("Session name (default: the current session)")
                .index(1),
        )
}

pub fn kill_command() -> Command {
    Command::new("kill")
        .about("Kill a session's program and end the session")
        .arg(name_arg("Session name"))
}
