use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "sbx", version, about = "VNC-observable browser automation sandbox")]
pub struct Cli {
	/// Increase log verbosity (-v info, -vv debug)
	#[arg(short, long, action = ArgAction::Count, global = true)]
	pub verbose: u8,

	/// Output format: text (default) or json
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
	#[default]
	Text,
	Json,
}

#[derive(Subcommand)]
pub enum Command {
	/// Start a sandbox session and hold it until Ctrl-C
	Up(UpArgs),
	/// Verify that the external programs a session needs are installed
	Check,
}

#[derive(Args)]
pub struct UpArgs {
	/// Control-endpoint port (0 = allocate a free port)
	#[arg(long, default_value_t = 37367)]
	pub control_port: u16,

	/// Visual-endpoint port (0 = allocate a free port)
	#[arg(long, default_value_t = 6080)]
	pub visual_port: u16,

	/// Allocate both ports from the ephemeral range
	#[arg(long, conflicts_with_all = ["control_port", "visual_port"])]
	pub ephemeral: bool,

	/// Playwright server entry point, run via node
	#[arg(long, default_value = "playwright-server.js")]
	pub server_script: PathBuf,
}
