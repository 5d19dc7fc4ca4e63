//! Hosts spawned as child processes.
//!
//! The child's stdin and stdout carry the framed protocol; stderr is inherited
//! so host logs land next to ours. A watcher task owns the [`Child`] and is the
//! only place that observes its exit.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::handle::{ExitNotifier, HostExit, HostHandle};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::latch::Latch;
use crate::transport::{DEFAULT_MAX_FRAME_LEN, PipeTransport};

/// Environment variable naming the default host executable.
pub const HOST_EXE_ENV: &str = "HOSTLINK_HOST_EXE";

/// How long a failed start waits for the child's exit code.
const EXIT_CODE_WAIT: Duration = Duration::from_millis(500);

/// Upper bound on waiting for the child to be reaped after a kill.
const REAP_WAIT: Duration = Duration::from_secs(2);

/// Command line and environment for a local host.
#[derive(Debug, Clone)]
pub struct LocalHostConfig {
	pub program: PathBuf,
	pub args: Vec<OsString>,
	pub env: Vec<(OsString, OsString)>,
	pub current_dir: Option<PathBuf>,
	pub max_frame_len: usize,
}

impl LocalHostConfig {
	pub fn new(program: impl Into<PathBuf>) -> Self {
		Self {
			program: program.into(),
			args: Vec::new(),
			env: Vec::new(),
			current_dir: None,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}

	/// Uses the program named by `HOSTLINK_HOST_EXE`, if set.
	pub fn from_env() -> Option<Self> {
		std::env::var_os(HOST_EXE_ENV).filter(|value| !value.is_empty()).map(Self::new)
	}

	pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
		self.args.push(arg.into());
		self
	}

	pub fn args<I, S>(mut self, args: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<OsString>,
	{
		self.args.extend(args.into_iter().map(Into::into));
		self
	}

	pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
		self.env.push((key.into(), value.into()));
		self
	}

	pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
		self.current_dir = Some(dir.into());
		self
	}

	pub fn max_frame_len(mut self, max_frame_len: usize) -> Self {
		self.max_frame_len = max_frame_len;
		self
	}
}

/// [`HostHandle`] for a child process.
///
/// Dropping the handle kills the child.
pub struct LocalHost {
	config: LocalHostConfig,
	kill_tx: Option<watch::Sender<bool>>,
	exited: Latch<HostExit>,
	connection: Option<Connection>,
}

impl LocalHost {
	pub fn new(config: LocalHostConfig) -> Self {
		Self {
			config,
			kill_tx: None,
			exited: Latch::new(),
			connection: None,
		}
	}

	/// Exit status of the child, once it has exited.
	pub fn exit(&self) -> Option<HostExit> {
		self.exited.get()
	}

	fn spawn(&self) -> Result<Child> {
		let mut cmd = Command::new(&self.config.program);
		cmd.args(&self.config.args)
			.envs(self.config.env.iter().map(|(key, value)| (key, value)))
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::inherit())
			.kill_on_drop(true);
		if let Some(dir) = &self.config.current_dir {
			cmd.current_dir(dir);
		}

		cmd.spawn().map_err(|e| {
			Error::LaunchFailed(format!("Failed to spawn {}: {e}", self.config.program.display()))
		})
	}
}

impl HostHandle for LocalHost {
	fn start(&mut self, exits: ExitNotifier) -> BoxFuture<'_, Result<Connection>> {
		Box::pin(async move {
			let mut child = self.spawn()?;
			let pid = child.id();

			let stdin = child
				.stdin
				.take()
				.ok_or_else(|| Error::LaunchFailed("child stdin was not captured".to_string()))?;
			let stdout = child
				.stdout
				.take()
				.ok_or_else(|| Error::LaunchFailed("child stdout was not captured".to_string()))?;

			let (transport, message_rx) = PipeTransport::new(stdin, stdout);
			let connection = Connection::spawn(
				transport
					.with_max_frame_len(self.config.max_frame_len)
					.into_transport_parts(message_rx),
			);

			let (kill_tx, kill_rx) = watch::channel(false);
			tokio::spawn(watch_child(
				child,
				connection.clone(),
				kill_rx,
				exits,
				self.exited.clone(),
			));
			self.kill_tx = Some(kill_tx);
			self.connection = Some(connection.clone());

			debug!(
				target = "hostlink.session",
				pid,
				program = %self.config.program.display(),
				"host spawned"
			);

			match connection.initialized().await {
				Ok(init) => {
					info!(
						target = "hostlink.session",
						pid,
						identifier = %init.identifier,
						"local host ready"
					);
					Ok(connection)
				}
				Err(e) => {
					let code = if matches!(e, Error::ConnectionClosed) {
						tokio::time::timeout(EXIT_CODE_WAIT, self.exited.wait())
							.await
							.ok()
							.and_then(|exit| exit.code)
					} else {
						None
					};
					Err(Error::StartFailed {
						message: e.to_string(),
						code,
					})
				}
			}
		})
	}

	fn stop(&mut self) -> BoxFuture<'_, ()> {
		Box::pin(async move {
			if let Some(connection) = &self.connection {
				if let Err(e) = connection.exit().await {
					debug!(target = "hostlink.session", error = %e, "exit not delivered");
				}
			}
		})
	}

	fn kill(&mut self) -> BoxFuture<'_, ()> {
		Box::pin(async move {
			if let Some(connection) = &self.connection {
				connection.shutdown();
			}
			let Some(kill_tx) = &self.kill_tx else {
				return;
			};
			kill_tx.send_replace(true);
			if tokio::time::timeout(REAP_WAIT, self.exited.wait()).await.is_err() {
				warn!(target = "hostlink.session", "host not reaped after kill");
			}
		})
	}
}

async fn watch_child(
	mut child: Child,
	connection: Connection,
	mut kill_rx: watch::Receiver<bool>,
	exits: ExitNotifier,
	exited: Latch<HostExit>,
) {
	let mut link_open = true;
	// Link loss is reported only once the killed child has been reaped.
	let (status, link_lost) = loop {
		tokio::select! {
			status = child.wait() => break (status, None),
			disconnect = connection.closed(), if link_open => {
				link_open = false;
				if disconnect.is_failure() {
					warn!(target = "hostlink.session", %disconnect, "lost protocol link to host, killing it");
					if let Err(e) = child.start_kill() {
						debug!(target = "hostlink.session", error = %e, "kill failed");
					}
					break (child.wait().await, Some(disconnect.to_string()));
				}
			}
			changed = kill_rx.changed() => {
				if changed.is_err() || *kill_rx.borrow() {
					if let Err(e) = child.start_kill() {
						debug!(target = "hostlink.session", error = %e, "kill failed");
					}
					break (child.wait().await, None);
				}
			}
		}
	};

	let exit = match (link_lost, status) {
		(Some(message), _) => HostExit::lost(message),
		(None, Ok(status)) => HostExit {
			code: status.code(),
			message: status.code().is_none().then(|| format!("host {status}")),
		},
		(None, Err(e)) => HostExit::lost(format!("failed to wait for host: {e}")),
	};
	debug!(target = "hostlink.session", code = ?exit.code, "host exited");
	exited.set(exit.clone());
	exits.notify(exit);
}
