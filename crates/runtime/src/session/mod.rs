//! Session supervision.
//!
//! A [`Session`] owns one [`HostHandle`] and walks it through
//! `Starting → Running → Closing → Closed | ClosedWithError`. Once running, a
//! supervisor task owns the handle and consumes a single FIFO event queue that
//! carries both owner close requests and host termination reports. Whichever
//! arrives first decides the terminal [`SessionOutcome`]; later events are
//! ignored, so the outcome is delivered exactly once no matter how the two race.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::latch::Latch;
use crate::transport::DEFAULT_MAX_FRAME_LEN;

mod handle;
mod local;
mod remote;


pub use handle::{ExitNotifier, HostExit, HostHandle};
pub use local::{HOST_EXE_ENV, LocalHost, LocalHostConfig};
pub use remote::{RemoteAddress, RemoteHost, connect};

use handle::SupervisorEvent;

/// Default time a host gets to exit after `exit` before it is killed.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// How long to wait for the exit report after a forced kill.
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Lifecycle of a session. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
	Starting,
	Running,
	Closing,
	Closed,
	/// Ended by a crash or failed start, with the exit code when known.
	ClosedWithError(Option<i32>),
}

impl SessionState {
	pub fn is_terminal(&self) -> bool {
		matches!(self, Self::Closed | Self::ClosedWithError(_))
	}
}

impl std::fmt::Display for SessionState {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Self::Starting => f.write_str("starting"),
			Self::Running => f.write_str("running"),
			Self::Closing => f.write_str("closing"),
			Self::Closed => f.write_str("closed"),
			Self::ClosedWithError(Some(code)) => write!(f, "closed with error (code {code})"),
			Self::ClosedWithError(None) => f.write_str("closed with error"),
		}
	}
}

/// Details of an unrequested termination.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostFailure {
	pub code: Option<i32>,
	pub message: Option<String>,
}

/// Terminal result of a session, delivered once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
	/// The owner asked the session to close.
	Clean,
	/// The host went away on its own, or never became ready.
	Failed(HostFailure),
}

impl SessionOutcome {
	/// User-facing notice for a failed session, `None` after a clean close.
	pub fn notice(&self, label: &str) -> Option<String> {
		let Self::Failed(failure) = self else {
			return None;
		};
		Some(match (failure.code, &failure.message) {
			(Some(code), _) => format!("Host \"{label}\" terminated unexpectedly with code {code}"),
			(None, Some(message)) => format!("Host \"{label}\" terminated unexpectedly: {message}"),
			(None, None) => format!("Host \"{label}\" terminated unexpectedly"),
		})
	}

	pub fn is_clean(&self) -> bool {
		matches!(self, Self::Clean)
	}
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
	/// Time between `exit` and a forced kill during close.
	pub shutdown_grace: Duration,
	/// Upper bound on reaching readiness. `None` waits indefinitely.
	pub start_timeout: Option<Duration>,
	/// Largest accepted frame for transports created from a descriptor.
	pub max_frame_len: usize,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
			start_timeout: None,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		}
	}
}

/// Where a session's host comes from.
#[derive(Debug, Clone)]
pub enum HostDescriptor {
	Local(LocalHostConfig),
	Remote(RemoteAddress),
}

/// One attachment to a host.
pub struct Session {
	label: String,
	options: SessionOptions,
	handle: Option<Box<dyn HostHandle>>,
	events_tx: mpsc::UnboundedSender<SupervisorEvent>,
	events_rx: Option<mpsc::UnboundedReceiver<SupervisorEvent>>,
	state_tx: Arc<watch::Sender<SessionState>>,
	outcome: Latch<SessionOutcome>,
	connection: Option<Connection>,
	started: bool,
	supervised: bool,
	close_requested: AtomicBool,
}

impl Session {
	pub fn new(label: impl Into<String>, handle: Box<dyn HostHandle>, options: SessionOptions) -> Self {
		let (events_tx, events_rx) = mpsc::unbounded_channel();
		let (state_tx, _) = watch::channel(SessionState::Starting);
		Self {
			label: label.into(),
			options,
			handle: Some(handle),
			events_tx,
			events_rx: Some(events_rx),
			state_tx: Arc::new(state_tx),
			outcome: Latch::new(),
			connection: None,
			started: false,
			supervised: false,
			close_requested: AtomicBool::new(false),
		}
	}

	/// Builds the matching [`LocalHost`] or [`RemoteHost`] for `descriptor`.
	pub fn from_descriptor(label: impl Into<String>, descriptor: HostDescriptor, options: SessionOptions) -> Self {
		let handle: Box<dyn HostHandle> = match descriptor {
			HostDescriptor::Local(config) => Box::new(LocalHost::new(config.max_frame_len(options.max_frame_len))),
			HostDescriptor::Remote(address) => {
				Box::new(RemoteHost::new(address).with_max_frame_len(options.max_frame_len))
			}
		};
		Self::new(label, handle, options)
	}

	pub fn label(&self) -> &str {
		&self.label
	}

	pub fn state(&self) -> SessionState {
		*self.state_tx.borrow()
	}

	/// Watches lifecycle transitions.
	pub fn subscribe(&self) -> watch::Receiver<SessionState> {
		self.state_tx.subscribe()
	}

	/// Connection to the host while the session is running.
	pub fn connection(&self) -> Option<&Connection> {
		self.connection.as_ref()
	}

	/// Starts the host and waits for readiness.
	///
	/// On failure the handle is torn down and the session ends in
	/// [`SessionState::ClosedWithError`].
	pub async fn start(&mut self) -> Result<()> {
		if self.started {
			return Err(Error::AlreadyStarted);
		}
		if self.close_requested.load(Ordering::SeqCst) || self.outcome.is_set() {
			return Err(Error::SessionClosed);
		}
		self.started = true;

		let (Some(mut handle), Some(events_rx)) = (self.handle.take(), self.events_rx.take()) else {
			return Err(Error::SessionClosed);
		};
		let exits = ExitNotifier::new(self.events_tx.clone());

		info!(target = "hostlink.session", label = %self.label, "starting host");
		let started = match self.options.start_timeout {
			Some(limit) => match tokio::time::timeout(limit, handle.start(exits)).await {
				Ok(result) => result,
				Err(_) => Err(Error::Timeout(format!("host not ready after {}ms", limit.as_millis()))),
			},
			None => handle.start(exits).await,
		};

		let connection = match started {
			Ok(connection) => connection,
			Err(e) => {
				// Returns only after the host is released.
				handle.kill().await;
				drop(handle);
				let (message, code) = match e {
					Error::StartFailed { message, code } => (message, code),
					other => (other.to_string(), None),
				};
				warn!(target = "hostlink.session", label = %self.label, code, %message, "host failed to start");
				self.state_tx.send_replace(SessionState::ClosedWithError(code));
				self.outcome.set(SessionOutcome::Failed(HostFailure {
					code,
					message: Some(message.clone()),
				}));
				return Err(Error::StartFailed { message, code });
			}
		};

		self.connection = Some(connection.clone());
		self.state_tx.send_replace(SessionState::Running);
		self.supervised = true;
		info!(target = "hostlink.session", label = %self.label, "session running");

		let supervisor = Supervisor {
			label: self.label.clone(),
			handle,
			connection,
			events: events_rx,
			state_tx: Arc::clone(&self.state_tx),
			outcome: self.outcome.clone(),
			shutdown_grace: self.options.shutdown_grace,
		};
		tokio::spawn(supervisor.run());
		Ok(())
	}

	/// Requests an orderly close. Idempotent; returns immediately.
	///
	/// Await [`closed`](Self::closed) for the result.
	pub fn close(&self) {
		if self.close_requested.swap(true, Ordering::SeqCst) {
			return;
		}
		if self.supervised {
			debug!(target = "hostlink.session", label = %self.label, "close requested");
			let _ = self.events_tx.send(SupervisorEvent::CloseRequested);
		} else if !self.outcome.is_set() {
			self.state_tx.send_replace(SessionState::Closed);
			self.outcome.set(SessionOutcome::Clean);
		}
	}

	/// Closes and waits for the terminal outcome.
	pub async fn shutdown(&self) -> SessionOutcome {
		self.close();
		self.closed().await
	}

	/// Waits for the terminal outcome.
	pub async fn closed(&self) -> SessionOutcome {
		self.outcome.wait().await
	}

	/// Terminal outcome, once delivered.
	pub fn outcome(&self) -> Option<SessionOutcome> {
		self.outcome.get()
	}

	/// Latch observers can hold on to after the session itself is dropped.
	pub fn outcome_signal(&self) -> Latch<SessionOutcome> {
		self.outcome.clone()
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.close();
	}
}

struct Supervisor {
	label: String,
	handle: Box<dyn HostHandle>,
	connection: Connection,
	events: mpsc::UnboundedReceiver<SupervisorEvent>,
	state_tx: Arc<watch::Sender<SessionState>>,
	outcome: Latch<SessionOutcome>,
	shutdown_grace: Duration,
}

impl Supervisor {
	async fn run(mut self) {
		match self.events.recv().await {
			Some(SupervisorEvent::Terminated(exit)) => self.on_crash(exit).await,
			Some(SupervisorEvent::CloseRequested) | None => self.on_close().await,
		}
	}

	async fn on_crash(self, exit: HostExit) {
		let Supervisor {
			label,
			mut handle,
			connection,
			state_tx,
			outcome,
			..
		} = self;

		warn!(target = "hostlink.session", %label, code = exit.code, message = ?exit.message, "host terminated unexpectedly");
		state_tx.send_replace(SessionState::Closing);

		connection.shutdown();
		handle.kill().await;
		drop(handle);
		connection.closed().await;

		state_tx.send_replace(SessionState::ClosedWithError(exit.code));
		outcome.set(SessionOutcome::Failed(HostFailure {
			code: exit.code,
			message: exit.message,
		}));
	}

	async fn on_close(self) {
		let Supervisor {
			label,
			mut handle,
			connection,
			mut events,
			state_tx,
			outcome,
			shutdown_grace,
		} = self;

		state_tx.send_replace(SessionState::Closing);
		handle.stop().await;

		if tokio::time::timeout(shutdown_grace, wait_terminated(&mut events)).await.is_err() {
			warn!(
				target = "hostlink.session",
				%label,
				grace_ms = shutdown_grace.as_millis() as u64,
				"host did not exit in time, killing"
			);
			handle.kill().await;
			if tokio::time::timeout(KILL_WAIT, wait_terminated(&mut events)).await.is_err() {
				warn!(target = "hostlink.session", %label, "no exit report after kill");
			}
		}

		connection.shutdown();
		drop(handle);
		connection.closed().await;

		info!(target = "hostlink.session", %label, "session closed");
		state_tx.send_replace(SessionState::Closed);
		outcome.set(SessionOutcome::Clean);
	}
}

async fn wait_terminated(events: &mut mpsc::UnboundedReceiver<SupervisorEvent>) {
	while let Some(event) = events.recv().await {
		if let SupervisorEvent::Terminated(_) = event {
			return;
		}
	}
}
