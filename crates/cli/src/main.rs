mod cli;
mod config;
mod logging;
mod server;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fleet::commands::register_builtins;
use fleet::task::MemoryTaskStore;
use fleet::Context;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	let config = config::Config::load(cli.config.as_deref())?.merge_cli(&cli);
	tracing::info!(host = %config.host, port = config.port, "starting fleetd");

	// The server side has no local device agent; devices bring their own.
	let ctx = Context::with_poll_interval(
		Arc::new(MemoryTaskStore::new()),
		None,
		config.poll_interval(),
	);
	register_builtins(&ctx)?;

	server::serve(ctx, &config).await
}
