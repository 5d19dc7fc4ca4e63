//! Command dispatch and shared host resolution.

mod attach;
mod config;
mod request;
mod scan;

use std::path::PathBuf;

use hostlink_discovery::{Scanner, Service};
use hostlink_runtime::{HostDescriptor, LocalHostConfig, RemoteAddress};
use tracing::{debug, info};

use crate::cli::{Cli, Commands, HostTarget};
use crate::config::{self as cli_config, Config};
use crate::error::{CliError, Result};
use crate::output::OutputFormat;

/// Everything a command needs besides its own arguments.
pub struct Context {
	pub config: Config,
	pub config_path: PathBuf,
	pub format: OutputFormat,
}

impl Context {
	pub fn load(config_path: Option<PathBuf>, format: OutputFormat) -> Result<Self> {
		let config_path = config_path.unwrap_or_else(cli_config::default_path);
		let config = Config::load(&config_path)?;
		debug!(target = "hostlink.cli", path = %config_path.display(), "config loaded");
		Ok(Self {
			config,
			config_path,
			format,
		})
	}
}

pub async fn dispatch(cli: Cli) -> Result<()> {
	let ctx = Context::load(cli.config, cli.format)?;

	match cli.command {
		Commands::Scan { types, wait } => scan::run(&ctx, types, wait).await,
		Commands::Attach { target, label } => attach::run(&ctx, target, label).await,
		Commands::Request { target, payload } => request::run(&ctx, target, &payload).await,
		Commands::Config { action } => config::run(&ctx, action),
	}
}

/// Turns command-line target flags into a host descriptor, scanning the
/// network first for `--service`.
pub(crate) async fn resolve_target(ctx: &Context, target: HostTarget) -> Result<(HostDescriptor, String)> {
	if let Some(command) = target.local {
		let mut command = command.into_iter();
		let program = command.next().unwrap_or_default();
		let label = PathBuf::from(&program)
			.file_name()
			.map(|name| name.to_string_lossy().into_owned())
			.unwrap_or_else(|| "host".to_string());
		let config = LocalHostConfig::new(program)
			.args(command)
			.max_frame_len(ctx.config.session.max_frame_len);
		return Ok((HostDescriptor::Local(config), label));
	}

	if let Some(url) = target.remote {
		let address = RemoteAddress::parse(&url)?;
		return Ok((HostDescriptor::Remote(address), url));
	}

	let name = target.service.unwrap_or_default();
	let services = Scanner::scan(&ctx.config.discovery.service_types, ctx.config.query_delay()).await?;
	let service = find_service(services.values(), &name).ok_or_else(|| CliError::ServiceNotFound(name.clone()))?;
	let address = service_address(service)?;
	info!(target = "hostlink.cli", service = %service.name, %address, "resolved service");
	Ok((HostDescriptor::Remote(address), name))
}

/// Matches a full instance name or its first label, ignoring ASCII case.
fn find_service<'a>(mut services: impl Iterator<Item = &'a Service>, name: &str) -> Option<&'a Service> {
	let name = name.to_ascii_lowercase();
	let name = name.as_str();
	services.find(|service| {
		service.name == name
			|| service
				.name
				.strip_prefix(name)
				.is_some_and(|rest| rest.starts_with('.'))
	})
}

/// WebSocket unless the instance advertises `transport=tcp`.
fn service_address(service: &Service) -> Result<RemoteAddress> {
	let address = service
		.address
		.as_ref()
		.ok_or_else(|| CliError::ServiceUnresolved(service.name.clone()))?;
	let host = address.host();
	match service.property("transport") {
		Some("tcp") => Ok(RemoteAddress::Tcp {
			host,
			port: address.port,
		}),
		_ => Ok(RemoteAddress::websocket(&host, address.port)?),
	}
}
