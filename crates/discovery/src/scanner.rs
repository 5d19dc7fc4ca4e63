//! Multicast DNS scanner.
//!
//! A [`Scanner`] owns one UDP socket and a background receive task that
//! merges every response into a shared [`RecordStore`]. Queries go out on
//! demand; results are always read from the cache.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::service::Services;
use crate::store::RecordStore;
use crate::wire;

/// Well-known mDNS group and port.
pub const MDNS_ADDR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::new(224, 0, 0, 251), 5353);

/// How long [`Scanner::scan`] waits for answers by default.
pub const DEFAULT_QUERY_DELAY: Duration = Duration::from_millis(400);

const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(50);

#[derive(Debug, Clone)]
pub struct ScannerConfig {
	/// Local bind address. An ephemeral port makes queries "legacy unicast",
	/// so responders answer directly instead of to the group.
	pub bind_addr: SocketAddr,
	/// Destination for queries.
	pub query_addr: SocketAddr,
	/// Interface used for multicast membership when bound to port 5353.
	pub interface: Ipv4Addr,
	/// Set the unicast-response bit on questions.
	pub unicast_response: bool,
	pub recv_buffer: usize,
}

impl Default for ScannerConfig {
	fn default() -> Self {
		Self {
			bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
			query_addr: SocketAddr::V4(MDNS_ADDR),
			interface: Ipv4Addr::UNSPECIFIED,
			unicast_response: true,
			recv_buffer: 9000,
		}
	}
}

pub struct Scanner {
	socket: Mutex<Option<Arc<UdpSocket>>>,
	store: Arc<Mutex<RecordStore>>,
	config: ScannerConfig,
	cancel: CancellationToken,
}

impl Scanner {
	/// Binds with the default configuration.
	pub async fn new() -> Result<Self> {
		Self::bind(ScannerConfig::default()).await
	}

	/// Binds the socket and starts the receive task.
	pub async fn bind(config: ScannerConfig) -> Result<Self> {
		let socket = UdpSocket::bind(config.bind_addr).await.map_err(|source| Error::Bind {
			addr: config.bind_addr,
			source,
		})?;
		if config.bind_addr.port() == MDNS_ADDR.port() {
			socket.join_multicast_v4(*MDNS_ADDR.ip(), config.interface)?;
		}
		if config.query_addr.ip().is_multicast() {
			socket.set_multicast_ttl_v4(255)?;
		}

		let socket = Arc::new(socket);
		let store = Arc::new(Mutex::new(RecordStore::new()));
		let cancel = CancellationToken::new();

		info!(
			target = "hostlink.discovery",
			local = ?socket.local_addr().ok(),
			query = %config.query_addr,
			"scanner bound"
		);

		tokio::spawn(receive_loop(
			Arc::clone(&socket),
			Arc::clone(&store),
			cancel.clone(),
			config.recv_buffer,
		));

		Ok(Self {
			socket: Mutex::new(Some(socket)),
			store,
			config,
			cancel,
		})
	}

	/// One-shot helper: bind, query, close.
	pub async fn scan<S: AsRef<str>>(types: &[S], wait: Duration) -> Result<Services> {
		let scanner = Self::new().await?;
		let services = scanner.query(types, wait).await;
		scanner.close();
		services
	}

	/// Queries each type, waits `wait`, and returns the assembled services.
	///
	/// With a zero `wait` nothing is sent and the cache is read as is, which
	/// also works after [`close`](Self::close).
	pub async fn query<S: AsRef<str>>(&self, types: &[S], wait: Duration) -> Result<Services> {
		if !wait.is_zero() {
			let socket = self.socket.lock().clone().ok_or(Error::Closed)?;
			for service_type in types {
				self.send_query(&socket, service_type.as_ref()).await?;
			}
			tokio::time::sleep(wait).await;
		}

		Ok(self.store.lock().services(types, Instant::now()))
	}

	async fn send_query(&self, socket: &UdpSocket, service_type: &str) -> Result<()> {
		let packet = wire::encode_query(service_type, self.config.unicast_response).map_err(|source| {
			Error::InvalidName {
				name: service_type.to_string(),
				source,
			}
		})?;
		socket
			.send_to(&packet, self.config.query_addr)
			.await
			.map_err(|source| Error::Query {
				service_type: service_type.to_string(),
				source,
			})?;
		debug!(target = "hostlink.discovery", service_type, "query sent");
		Ok(())
	}

	/// Stops receiving and releases the socket. The cache stays readable.
	///
	/// Idempotent.
	pub fn close(&self) {
		// Holding the store lock orders this after any in-flight merge.
		let _store = self.store.lock();
		self.cancel.cancel();
		if self.socket.lock().take().is_some() {
			debug!(target = "hostlink.discovery", "scanner closed");
		}
	}

	pub fn is_closed(&self) -> bool {
		self.cancel.is_cancelled()
	}

	pub fn local_addr(&self) -> Result<SocketAddr> {
		let socket = self.socket.lock().clone().ok_or(Error::Closed)?;
		Ok(socket.local_addr()?)
	}
}

impl Drop for Scanner {
	fn drop(&mut self) {
		self.close();
	}
}

async fn receive_loop(
	socket: Arc<UdpSocket>,
	store: Arc<Mutex<RecordStore>>,
	cancel: CancellationToken,
	recv_buffer: usize,
) {
	let mut buf = vec![0u8; recv_buffer];
	loop {
		let received = tokio::select! {
			_ = cancel.cancelled() => break,
			received = socket.recv_from(&mut buf) => received,
		};

		let (len, from) = match received {
			Ok(received) => received,
			Err(err) => {
				warn!(target = "hostlink.discovery", error = %err, "receive failed");
				tokio::time::sleep(RECV_ERROR_BACKOFF).await;
				continue;
			}
		};

		let message = match wire::decode(&buf[..len]) {
			Ok(message) => message,
			Err(err) => {
				debug!(target = "hostlink.discovery", %from, error = %err, "dropping malformed datagram");
				continue;
			}
		};
		if !message.is_response {
			continue;
		}

		let mut store = store.lock();
		if cancel.is_cancelled() {
			break;
		}
		let stored = store.ingest_message(&message, Instant::now());
		trace!(target = "hostlink.discovery", %from, stored, "merged response");
	}
}
