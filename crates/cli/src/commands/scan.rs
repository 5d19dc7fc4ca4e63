use std::time::Duration;

use hostlink_discovery::Scanner;
use tracing::info;

use super::Context;
use crate::error::Result;
use crate::output::{self, OutputFormat};

pub async fn run(ctx: &Context, types: Vec<String>, wait_ms: Option<u64>) -> Result<()> {
	let types = if types.is_empty() {
		ctx.config.discovery.service_types.clone()
	} else {
		types
	};
	let wait = wait_ms.map(Duration::from_millis).unwrap_or_else(|| ctx.config.query_delay());

	let services = Scanner::scan(&types, wait).await?;
	info!(target = "hostlink.cli", count = services.len(), ?types, "scan finished");

	match ctx.format {
		OutputFormat::Json => output::print_json(&services)?,
		OutputFormat::Text => print!("{}", output::render_services(&services)),
	}
	Ok(())
}
