//! Subcommand implementations.

pub mod check;
pub mod up;

use crate::cli::{Cli, Command};
use crate::error::Result;

pub async fn dispatch(cli: Cli) -> Result<()> {
	match cli.command {
		Command::Up(args) => up::run(args, cli.format).await,
		Command::Check => check::run(cli.format),
	}
}
