use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CliError>;

#[derive(Debug, Error)]
pub enum CliError {
	#[error("invalid config file {path}: {source}")]
	Config {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("config file {path} has schema {found}, expected at most {supported}")]
	ConfigSchema { path: PathBuf, found: u32, supported: u32 },

	#[error("invalid request payload: {0}")]
	Payload(#[source] serde_json::Error),

	#[error("no service named {0:?} was found")]
	ServiceNotFound(String),

	#[error("service {0:?} has no address yet")]
	ServiceUnresolved(String),

	/// The host went away on its own; carries the user-facing notice.
	#[error("{0}")]
	HostTerminated(String),

	#[error(transparent)]
	Runtime(#[from] hostlink_runtime::Error),

	#[error(transparent)]
	Discovery(#[from] hostlink_discovery::Error),

	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Json(#[from] serde_json::Error),
}
