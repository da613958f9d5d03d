use std::path::PathBuf;

use clap::Parser;

/// Fleet orchestration server.
#[derive(Debug, Parser)]
#[command(name = "fleetd", version, about)]
pub struct Cli {
	/// Path to a fleet.toml config file.
	#[arg(short, long)]
	pub config: Option<PathBuf>,

	/// Bind host (overrides the config file).
	#[arg(long)]
	pub host: Option<String>,

	/// Bind port (overrides the config file).
	#[arg(long)]
	pub port: Option<u16>,

	/// Increase log verbosity (-v info, -vv debug).
	#[arg(short, long, action = clap::ArgAction::Count)]
	pub verbose: u8,
}
