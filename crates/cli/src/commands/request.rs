use hostlink_runtime::{Error, Session};
use serde_json::Value;
use tracing::debug;

use super::{Context, resolve_target};
use crate::cli::HostTarget;
use crate::error::{CliError, Result};
use crate::output::{self, OutputFormat};

pub async fn run(ctx: &Context, target: HostTarget, payload: &str) -> Result<()> {
	let data: Value = serde_json::from_str(payload).map_err(CliError::Payload)?;
	let (descriptor, label) = resolve_target(ctx, target).await?;

	let mut session = Session::from_descriptor(label, descriptor, ctx.config.session_options());
	session.start().await?;
	let connection = session.connection().cloned().ok_or(Error::SessionClosed)?;

	let response = connection.request(data).await;
	let outcome = session.shutdown().await;
	debug!(target = "hostlink.cli", ?outcome, "session closed");
	let response = response?;

	match ctx.format {
		OutputFormat::Json => output::print_json(&response)?,
		OutputFormat::Text => match &response {
			Value::String(text) => println!("{text}"),
			other => println!("{other}"),
		},
	}
	Ok(())
}
