//! Client and host message unions.
//!
//! The exchange on a fresh connection is:
//!
//! 1. Host sends [`ServerMessage::Initialize`] (exactly once, always first)
//! 2. Host sends a [`ServerMessage::State`] snapshot
//! 3. Client sends [`ClientMessage::Request`] values, host answers each with one
//!    [`ServerMessage::Response`] carrying the same id
//! 4. Either side pushes [`ClientMessage::Channel`] / [`ServerMessage::Channel`]
//!    chunks on channels opened through a request result
//! 5. Client sends [`ClientMessage::Exit`] before disconnecting

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Protocol revision spoken by this crate.
///
/// Versions are a single increasing integer. There is no capability
/// negotiation: a client that does not know the advertised version refuses the
/// connection.
pub const PROTOCOL_VERSION: u32 = 1;

/// Client-chosen request identifier, unique among pending requests.
pub type RequestId = u32;

/// Channel identifier, assigned out of band through a request result.
pub type ChannelId = u32;

/// Identifier the host assigns to a connected client.
pub type ClientId = String;

/// Stable identifier of a host installation.
pub type HostIdentifier = String;

/// Returns true when `version` can be spoken by this client.
pub fn is_supported_version(version: u32) -> bool {
	version == PROTOCOL_VERSION
}

/// Message sent from a client to a host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
	/// Chunk sent on an already-open channel.
	Channel {
		id: ChannelId,
		#[serde(default)]
		data: Value,
	},
	/// Graceful disconnect notice.
	Exit,
	/// Operation expecting exactly one [`ServerMessage::Response`].
	Request {
		id: RequestId,
		#[serde(default)]
		data: Value,
	},
}

/// Message sent from a host to its clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
	/// Asynchronous push on a channel.
	Channel {
		id: ChannelId,
		#[serde(default)]
		data: Value,
	},
	/// First message on every connection.
	Initialize(Initialization),
	/// Answer to the pending request with the same id.
	Response {
		id: RequestId,
		#[serde(default)]
		data: Value,
		/// Set when the host failed to process the request.
		#[serde(default, skip_serializing_if = "Option::is_none")]
		error: Option<ErrorPayload>,
	},
	/// Full snapshot of host-visible state, replacing any previous one.
	State {
		#[serde(default)]
		data: Value,
	},
}

impl ServerMessage {
	/// Successful response for `id`.
	pub fn response(id: RequestId, data: Value) -> Self {
		Self::Response {
			id,
			data,
			error: None,
		}
	}

	/// Failed response for `id`.
	pub fn error_response(id: RequestId, error: ErrorPayload) -> Self {
		Self::Response {
			id,
			data: Value::Null,
			error: Some(error),
		}
	}
}

/// Payload of [`ServerMessage::Initialize`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Initialization {
	/// Identifier assigned to this client for the lifetime of the connection.
	pub client_id: ClientId,
	/// Identifier of the host installation.
	pub identifier: HostIdentifier,
	/// Base URL for static assets served by the host, if any.
	#[serde(default)]
	pub static_url: Option<String>,
	/// Protocol revision, see [`PROTOCOL_VERSION`].
	pub version: u32,
}

/// Error descriptor carried by a failed response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
	/// Human-readable message.
	pub message: String,
	/// Error class name (e.g. `"ValueError"`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub name: Option<String>,
	/// Host-side stack trace.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stack: Option<String>,
}

impl ErrorPayload {
	pub fn new(message: impl Into<String>) -> Self {
		Self {
			message: message.into(),
			name: None,
			stack: None,
		}
	}
}
