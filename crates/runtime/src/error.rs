//! Error types for the hostlink runtime.

use hostlink_protocol::{ChannelId, ErrorPayload, PROTOCOL_VERSION};
use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the hostlink runtime.
#[derive(Debug, Error)]
pub enum Error {
	/// Failed to spawn the host process.
	#[error("Failed to launch host: {0}")]
	LaunchFailed(String),

	/// Host never reached readiness.
	#[error("Host failed to start: {message}{}", code.map(|c| format!(" (exit code {c})")).unwrap_or_default())]
	StartFailed { message: String, code: Option<i32> },

	/// `start()` called on a session that was already started.
	#[error("Session already started")]
	AlreadyStarted,

	/// Operation on a session that has already ended.
	#[error("Session is closed")]
	SessionClosed,

	/// Failed to open the underlying connection.
	#[error("Failed to connect to host: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (framing, pipes, sockets).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Protocol-level error (malformed or out-of-order messages).
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Host advertised a protocol version this client does not speak.
	#[error("Unsupported protocol version {version} (this client speaks {PROTOCOL_VERSION})")]
	UnsupportedVersion { version: u32 },

	/// Host answered a request with an error descriptor.
	#[error("{name}: {message}")]
	Remote {
		/// Error class reported by the host
		name: String,
		/// Human-readable error message
		message: String,
		/// Host-side stack trace (if available)
		stack: Option<String>,
	},

	/// Channel id already has a local sink.
	#[error("Channel {0} is already open")]
	ChannelInUse(ChannelId),

	/// Channel id has no local sink.
	#[error("Channel {0} is not open")]
	ChannelNotOpen(ChannelId),

	/// Request issued after `exit` was sent.
	#[error("Connection is exiting, no new requests accepted")]
	Exiting,

	/// Connection ended before the operation completed.
	#[error("Connection closed")]
	ConnectionClosed,

	/// Host address could not be parsed.
	#[error("Invalid host address: {0}")]
	InvalidAddress(String),

	/// Timeout waiting for operation.
	#[error("Timeout: {0}")]
	Timeout(String),

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),
}

impl From<ErrorPayload> for Error {
	fn from(payload: ErrorPayload) -> Self {
		Error::Remote {
			name: payload.name.unwrap_or_else(|| "Error".to_string()),
			message: payload.message,
			stack: payload.stack,
		}
	}
}
