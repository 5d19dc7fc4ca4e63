use std::process::ExitCode;

use clap::Parser;
use hostlink_cli::{cli::Cli, commands, logging};

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	logging::init_logging(cli.verbose);

	match commands::dispatch(cli).await.map_err(anyhow::Error::from) {
		Ok(()) => ExitCode::SUCCESS,
		Err(err) => {
			eprintln!("error: {err:#}");
			ExitCode::FAILURE
		}
	}
}
