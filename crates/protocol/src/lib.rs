//! Wire types shared by hostlink clients and hosts.
//!
//! Every message is a JSON object tagged by its `type` field. Clients send
//! [`ClientMessage`] values, hosts send [`ServerMessage`] values. The framing
//! that carries them lives in `hostlink-runtime`.

pub mod messages;

pub use messages::{
	ChannelId, ClientId, ClientMessage, ErrorPayload, HostIdentifier, Initialization,
	PROTOCOL_VERSION, RequestId, ServerMessage, is_supported_version,
};
