mod global;
mod query;
mod session;

#[cfg(test)]
mod tests;

use clap::Command;

pub fn build_cli() -> Command {
    global::root_command()
        .subcommand(session::attach_command())
        .subcommand(session::new_command())
        .subcommand(query::list_command())
        .subcommand(session::fork_command())
        .subcommand(session::detach_command())
        .subcommand(session::kill_command())
        .subcommand(query::history_command())
}
