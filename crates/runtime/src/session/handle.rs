//! Seam between the session supervisor and whatever actually runs a host.

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;

use crate::connection::Connection;
use crate::error::Result;

/// How a host went away.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostExit {
	/// Process exit code, when the OS reported one.
	pub code: Option<i32>,
	/// Error text for terminations without an exit code (signals, lost links).
	pub message: Option<String>,
}

impl HostExit {
	pub fn code(code: Option<i32>) -> Self {
		Self { code, message: None }
	}

	pub fn lost(message: impl Into<String>) -> Self {
		Self {
			code: None,
			message: Some(message.into()),
		}
	}
}

pub(crate) enum SupervisorEvent {
	Terminated(HostExit),
	CloseRequested,
}

/// Reports host termination into the owning session's event queue.
///
/// Cheap to clone. Reports after the session has ended are dropped.
#[derive(Clone)]
pub struct ExitNotifier {
	tx: mpsc::UnboundedSender<SupervisorEvent>,
}

impl ExitNotifier {
	pub(crate) fn new(tx: mpsc::UnboundedSender<SupervisorEvent>) -> Self {
		Self { tx }
	}

	pub fn notify(&self, exit: HostExit) {
		let _ = self.tx.send(SupervisorEvent::Terminated(exit));
	}
}

/// A launchable host.
///
/// The supervisor owns the handle exclusively and drops it before reporting
/// the session closed.
pub trait HostHandle: Send + 'static {
	/// Brings the host up and returns a connection that has received
	/// `initialize`.
	///
	/// Any termination after this call, including one that happens while
	/// starting, must be reported through `exits`. Start failures should be
	/// returned as [`Error::StartFailed`](crate::Error::StartFailed) when an
	/// exit code is known.
	fn start(&mut self, exits: ExitNotifier) -> BoxFuture<'_, Result<Connection>>;

	/// Asks the host to shut down on its own.
	fn stop(&mut self) -> BoxFuture<'_, ()>;

	/// Forces the host down and returns once its resources are released,
	/// or after a bounded wait. Must be safe to call at any point, repeatedly.
	fn kill(&mut self) -> BoxFuture<'_, ()>;
}
