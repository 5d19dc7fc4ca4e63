//! CLI configuration file.
//!
//! Lives at `$XDG_CONFIG_HOME/hostlink/config.json` unless `--config` points
//! elsewhere. A missing file means defaults; every field is optional.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use hostlink_discovery::DEFAULT_QUERY_DELAY;
use hostlink_runtime::{DEFAULT_MAX_FRAME_LEN, SessionOptions};
use serde::{Deserialize, Serialize};

use crate::error::{CliError, Result};

/// Schema version for the config file.
pub const SCHEMA_VERSION: u32 = 1;

pub const DEFAULT_SERVICE_TYPE: &str = "_hostlink._tcp.local";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
	pub schema: u32,
	pub discovery: DiscoveryConfig,
	pub session: SessionConfig,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			schema: SCHEMA_VERSION,
			discovery: DiscoveryConfig::default(),
			session: SessionConfig::default(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct DiscoveryConfig {
	/// Types queried when `scan` is given none.
	pub service_types: Vec<String>,
	pub query_delay_ms: u64,
}

impl Default for DiscoveryConfig {
	fn default() -> Self {
		Self {
			service_types: vec![DEFAULT_SERVICE_TYPE.to_string()],
			query_delay_ms: DEFAULT_QUERY_DELAY.as_millis() as u64,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
	pub shutdown_grace_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub start_timeout_ms: Option<u64>,
	pub max_frame_len: usize,
}

impl Default for SessionConfig {
	fn default() -> Self {
		let options = SessionOptions::default();
		Self {
			shutdown_grace_ms: options.shutdown_grace.as_millis() as u64,
			start_timeout_ms: options.start_timeout.map(|t| t.as_millis() as u64),
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}
}

impl Config {
	/// Reads `path`, falling back to defaults when it does not exist.
	pub fn load(path: &Path) -> Result<Self> {
		let content = match fs::read_to_string(path) {
			Ok(content) => content,
			Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
			Err(err) => return Err(err.into()),
		};

		let config: Self = serde_json::from_str(&content).map_err(|source| CliError::Config {
			path: path.to_path_buf(),
			source,
		})?;
		if config.schema > SCHEMA_VERSION {
			return Err(CliError::ConfigSchema {
				path: path.to_path_buf(),
				found: config.schema,
				supported: SCHEMA_VERSION,
			});
		}
		Ok(config)
	}

	pub fn query_delay(&self) -> Duration {
		Duration::from_millis(self.discovery.query_delay_ms)
	}

	pub fn session_options(&self) -> SessionOptions {
		SessionOptions {
			shutdown_grace: Duration::from_millis(self.session.shutdown_grace_ms),
			start_timeout: self.session.start_timeout_ms.map(Duration::from_millis),
			max_frame_len: self.session.max_frame_len,
		}
	}
}

/// Default location: `$XDG_CONFIG_HOME/hostlink/config.json`, then the
/// platform config directory, then the working directory.
pub fn default_path() -> PathBuf {
	std::env::var_os("XDG_CONFIG_HOME")
		.map(PathBuf::from)
		.filter(|dir| dir.is_absolute())
		.or_else(dirs::config_dir)
		.unwrap_or_else(|| PathBuf::from("."))
		.join("hostlink")
		.join("config.json")
}
