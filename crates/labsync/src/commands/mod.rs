//! Command dispatch: bridges CLI args to the sync engine and output formatting.

pub mod config_cmd;
pub mod pump;
pub mod status;
pub mod util;
pub mod watch;

use crate::cli::{Command, GlobalOpts};
use crate::config::Session;
use crate::error::CliError;

/// Dispatch a server-bound command to its handler.
pub async fn dispatch(cmd: Command, session: Session, global: &GlobalOpts) -> Result<(), CliError> {
    match cmd {
        Command::Watch(args) => watch::handle(session, args, global).await,
        Command::Status(args) => status::handle(session, args, global).await,
        Command::Pump(args) => pump::handle(session, args, global).await,
        // Config is handled before a session is resolved
        Command::Config(args) => config_cmd::handle(args, global),
    }
}
