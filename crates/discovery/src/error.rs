//! Error types for discovery.

use std::net::SocketAddr;

use thiserror::Error;

use crate::wire::WireError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
	/// The scanner was closed; only cached results remain available.
	#[error("Scanner is closed")]
	Closed,

	#[error("Failed to bind discovery socket on {addr}: {source}")]
	Bind {
		addr: SocketAddr,
		#[source]
		source: std::io::Error,
	},

	/// Sending the query for one service type failed.
	#[error("Failed to query {service_type}: {source}")]
	Query {
		service_type: String,
		#[source]
		source: std::io::Error,
	},

	/// Service type cannot be encoded as a DNS name.
	#[error("Invalid service type {name:?}: {source}")]
	InvalidName {
		name: String,
		#[source]
		source: WireError,
	},

	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),
}
