use hostlink_runtime::{Error, Session, SessionOutcome, StateSnapshot};
use serde_json::json;
use tracing::info;

use super::{Context, resolve_target};
use crate::cli::HostTarget;
use crate::error::{CliError, Result};
use crate::output::{self, OutputFormat};

pub async fn run(ctx: &Context, target: HostTarget, label: Option<String>) -> Result<()> {
	let (descriptor, default_label) = resolve_target(ctx, target).await?;
	let label = label.unwrap_or(default_label);

	let mut session = Session::from_descriptor(label.clone(), descriptor, ctx.config.session_options());
	session.start().await?;
	let connection = session.connection().cloned().ok_or(Error::SessionClosed)?;
	let initialization = connection.initialization().ok_or(Error::SessionClosed)?;

	let mut state_rx = connection.subscribe_state();
	let state = state_rx.borrow_and_update().clone();
	match ctx.format {
		OutputFormat::Json => output::print_json(&json!({
			"initialization": initialization,
			"state": state.as_deref(),
		}))?,
		OutputFormat::Text => {
			println!(
				"attached to {} as {} (protocol {})",
				initialization.identifier, initialization.client_id, initialization.version
			);
			if let Some(url) = &initialization.static_url {
				println!("static: {url}");
			}
			print_state(ctx.format, state.as_ref())?;
		}
	}

	let ctrl_c = tokio::signal::ctrl_c();
	tokio::pin!(ctrl_c);
	let mut watching = true;

	let outcome = loop {
		tokio::select! {
			_ = &mut ctrl_c => {
				info!(target = "hostlink.cli", label = %label, "interrupted, closing session");
				break session.shutdown().await;
			}
			outcome = session.closed() => break outcome,
			changed = state_rx.changed(), if watching => {
				if changed.is_err() {
					watching = false;
					continue;
				}
				let state = state_rx.borrow_and_update().clone();
				print_state(ctx.format, state.as_ref())?;
			}
		}
	};

	finish(&label, outcome)
}

fn print_state(format: OutputFormat, state: Option<&StateSnapshot>) -> Result<()> {
	let Some(state) = state else {
		return Ok(());
	};
	match format {
		OutputFormat::Json => output::print_json(&json!({ "state": state.as_ref() }))?,
		OutputFormat::Text => println!("state: {state}"),
	}
	Ok(())
}

fn finish(label: &str, outcome: SessionOutcome) -> Result<()> {
	match outcome.notice(label) {
		Some(notice) => Err(CliError::HostTerminated(notice)),
		None => Ok(()),
	}
}

#[cfg(test)]
mod tests {
	use hostlink_runtime::HostFailure;

	use super::*;

	#[test]
	fn clean_outcome_succeeds() {
		assert!(finish("bench", SessionOutcome::Clean).is_ok());
	}

	#[test]
	fn crash_becomes_notice() {
		let outcome = SessionOutcome::Failed(HostFailure {
			code: Some(3),
			message: None,
		});
		let err = finish("bench", outcome).unwrap_err();
		assert_eq!(err.to_string(), "Host \"bench\" terminated unexpectedly with code 3");
	}
}
