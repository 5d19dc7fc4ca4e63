use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "hostlink")]
#[command(about = "Discover lab-automation hosts and attach to them")]
#[command(version)]
pub struct Cli {
	/// Increase verbosity (-v info, -vv debug)
	#[arg(short, long, global = true, action = clap::ArgAction::Count)]
	pub verbose: u8,

	/// Output format
	#[arg(short = 'f', long, global = true, value_enum, default_value = "text")]
	pub format: OutputFormat,

	/// Config file to use instead of the default location
	#[arg(long, global = true, value_name = "FILE")]
	pub config: Option<PathBuf>,

	#[command(subcommand)]
	pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
	/// Query the network for advertised hosts
	Scan {
		/// Service types to query (defaults to the configured list)
		#[arg(value_name = "TYPE")]
		types: Vec<String>,

		/// Milliseconds to collect answers; 0 reads the cache without querying
		#[arg(long, value_name = "MS")]
		wait: Option<u64>,
	},

	/// Start a session with a host and stay attached until Ctrl-C
	Attach {
		#[command(flatten)]
		target: HostTarget,

		/// Name used in log lines and crash notices
		#[arg(long, value_name = "NAME")]
		label: Option<String>,
	},

	/// Send one request and print the response
	Request {
		#[command(flatten)]
		target: HostTarget,

		/// Request payload as JSON
		#[arg(value_name = "JSON")]
		payload: String,
	},

	/// Inspect the config file
	Config {
		#[command(subcommand)]
		action: ConfigAction,
	},
}

/// Exactly one way of reaching a host.
#[derive(Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct HostTarget {
	/// Launch a host program and talk to it over its stdin/stdout
	#[arg(long, value_name = "PROGRAM", num_args = 1.., allow_hyphen_values = true)]
	pub local: Option<Vec<OsString>>,

	/// Connect to a running host (ws://, wss://, or tcp:// URL)
	#[arg(long, value_name = "URL")]
	pub remote: Option<String>,

	/// Resolve a discovered service instance by name and connect to it
	#[arg(long, value_name = "NAME")]
	pub service: Option<String>,
}

#[derive(Subcommand, Debug, Clone, Copy)]
pub enum ConfigAction {
	/// Print the config file location
	Path,
	/// Print the effective configuration
	Show,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn local_takes_program_and_arguments() {
		let cli = Cli::parse_from(["hostlink", "attach", "--label", "bench", "--local", "python3", "-m", "host"]);
		let Commands::Attach { target, label } = cli.command else {
			panic!("expected attach");
		};
		assert_eq!(label.as_deref(), Some("bench"));
		assert_eq!(
			target.local.unwrap(),
			[OsString::from("python3"), OsString::from("-m"), OsString::from("host")]
		);
	}

	#[test]
	fn targets_are_mutually_exclusive() {
		let result = Cli::try_parse_from(["hostlink", "request", "--remote", "ws://h:1", "--service", "x", "{}"]);
		assert!(result.is_err());
	}

	#[test]
	fn a_target_is_required() {
		assert!(Cli::try_parse_from(["hostlink", "request", "{}"]).is_err());
	}

	#[test]
	fn global_flags_follow_subcommand() {
		let cli = Cli::parse_from(["hostlink", "scan", "_a._tcp.local", "--wait", "0", "-f", "json", "-vv"]);
		assert_eq!(cli.format, OutputFormat::Json);
		assert_eq!(cli.verbose, 2);
		let Commands::Scan { types, wait } = cli.command else {
			panic!("expected scan");
		};
		assert_eq!(types, ["_a._tcp.local"]);
		assert_eq!(wait, Some(0));
	}
}
