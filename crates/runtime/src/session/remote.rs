//! Hosts reached over the network.

use std::fmt;
use std::str::FromStr;

use futures_util::future::BoxFuture;
use tracing::{debug, info};
use url::Url;

use super::handle::{ExitNotifier, HostExit, HostHandle};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::transport::{self, DEFAULT_MAX_FRAME_LEN, websocket};

/// Network address of a host.
///
/// Accepts `ws://`, `wss://` and `tcp://host:port` URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteAddress {
	WebSocket(Url),
	Tcp { host: String, port: u16 },
}

impl RemoteAddress {
	pub fn parse(input: &str) -> Result<Self> {
		let url = Url::parse(input).map_err(|e| Error::InvalidAddress(format!("{input}: {e}")))?;
		match url.scheme() {
			"ws" | "wss" => Ok(Self::WebSocket(url)),
			"tcp" => {
				let host = url
					.host_str()
					.ok_or_else(|| Error::InvalidAddress(format!("{input}: missing host")))?;
				let port = url
					.port()
					.ok_or_else(|| Error::InvalidAddress(format!("{input}: missing port")))?;
				Ok(Self::Tcp {
					host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
					port,
				})
			}
			scheme => Err(Error::InvalidAddress(format!(
				"{input}: unsupported scheme {scheme:?} (expected ws, wss or tcp)"
			))),
		}
	}

	/// WebSocket address for a host advertised at `host:port`.
	pub fn websocket(host: &str, port: u16) -> Result<Self> {
		let authority = if host.contains(':') {
			format!("[{host}]")
		} else {
			host.trim_end_matches('.').to_string()
		};
		Self::parse(&format!("ws://{authority}:{port}"))
	}
}

impl FromStr for RemoteAddress {
	type Err = Error;

	fn from_str(s: &str) -> Result<Self> {
		Self::parse(s)
	}
}

impl fmt::Display for RemoteAddress {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::WebSocket(url) => write!(f, "{url}"),
			Self::Tcp { host, port } if host.contains(':') => write!(f, "tcp://[{host}]:{port}"),
			Self::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
		}
	}
}

/// Opens a bare connection to `address` without supervision.
pub async fn connect(address: &RemoteAddress, max_frame_len: usize) -> Result<Connection> {
	let parts = match address {
		RemoteAddress::WebSocket(url) => websocket::connect(url.as_str(), max_frame_len).await?,
		RemoteAddress::Tcp { host, port } => transport::connect_tcp((host.as_str(), *port), max_frame_len).await?,
	};
	Ok(Connection::spawn(parts))
}

/// [`HostHandle`] for a host reached over the network.
///
/// The link itself is the host's lifetime as far as the session can tell:
/// losing it counts as termination.
pub struct RemoteHost {
	address: RemoteAddress,
	max_frame_len: usize,
	connection: Option<Connection>,
}

impl RemoteHost {
	pub fn new(address: RemoteAddress) -> Self {
		Self {
			address,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
			connection: None,
		}
	}

	pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
		self.max_frame_len = max_frame_len;
		self
	}

	pub fn address(&self) -> &RemoteAddress {
		&self.address
	}
}

impl HostHandle for RemoteHost {
	fn start(&mut self, exits: ExitNotifier) -> BoxFuture<'_, Result<Connection>> {
		Box::pin(async move {
			let connection = connect(&self.address, self.max_frame_len).await?;
			self.connection = Some(connection.clone());

			tokio::spawn({
				let connection = connection.clone();
				async move {
					let disconnect = connection.closed().await;
					debug!(target = "hostlink.session", %disconnect, "remote link ended");
					exits.notify(HostExit::lost(disconnect.to_string()));
				}
			});

			let init = connection.initialized().await.map_err(|e| Error::StartFailed {
				message: e.to_string(),
				code: None,
			})?;
			info!(
				target = "hostlink.session",
				address = %self.address,
				identifier = %init.identifier,
				"remote host ready"
			);
			Ok(connection)
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
		})
	}
}

impl Drop for RemoteHost {
	fn drop(&mut self) {
		if let Some(connection) = &self.connection {
			connection.shutdown();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn parses_websocket_and_tcp_addresses() {
		let ws = RemoteAddress::parse("ws://lab-3.local:4567/").unwrap();
		assert!(matches!(ws, RemoteAddress::WebSocket(ref url) if url.port() == Some(4567)));

		let tcp: RemoteAddress = "tcp://127.0.0.1:4000".parse().unwrap();
		assert_eq!(
			tcp,
			RemoteAddress::Tcp {
				host: "127.0.0.1".to_string(),
				port: 4000
			}
		);
		assert_eq!(tcp.to_string(), "tcp://127.0.0.1:4000");
	}

	#[test]
	fn rejects_unknown_schemes_and_missing_ports() {
		assert!(matches!(
			RemoteAddress::parse("http://host:1"),
			Err(Error::InvalidAddress(_))
		));
		assert!(matches!(RemoteAddress::parse("tcp://host"), Err(Error::InvalidAddress(_))));
		assert!(matches!(RemoteAddress::parse("not a url"), Err(Error::InvalidAddress(_))));
	}

	#[test]
	fn websocket_from_service_address() {
		let address = RemoteAddress::websocket("lab-3.local.", 4567).unwrap();
		assert_eq!(address.to_string(), "ws://lab-3.local:4567/");

		let v6 = RemoteAddress::websocket("::1", 4567).unwrap();
		assert_eq!(v6.to_string(), "ws://[::1]:4567/");
	}
}
