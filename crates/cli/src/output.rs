//! Rendering command results for humans or machines.

use std::io::{self, Write};

use hostlink_discovery::Services;
use serde::Serialize;

/// Output format for CLI results.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
	/// Human-readable text
	#[default]
	Text,
	/// Pretty-printed JSON
	Json,
}

pub fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
	let mut stdout = io::stdout().lock();
	serde_json::to_writer_pretty(&mut stdout, value)?;
	writeln!(stdout)
}

/// One line per service: name, address, types, then TXT pairs.
pub fn render_services(services: &Services) -> String {
	let mut out = String::new();
	for service in services.values() {
		let address = match &service.address {
			Some(address) => format!("{}:{}", address.host(), address.port),
			None => "-".to_string(),
		};
		out.push_str(&format!("{}\t{}\t{}", service.name, address, service.types.join(",")));
		if let Some(properties) = &service.properties {
			for (key, value) in properties {
				out.push_str(&format!("\t{key}={value}"));
			}
		}
		out.push('\n');
	}
	out
}
