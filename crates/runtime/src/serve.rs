//! Host side of the protocol.
//!
//! [`HostServer`] drives one client connection at a time per
//! [`serve`](HostServer::serve) call: it sends `initialize`, then the current
//! state snapshot, then answers requests through a [`RequestHandler`] while
//! pushing every state change published on its [`StateBroadcaster`].
//!
//! Requests run concurrently, so responses go out in completion order rather
//! than request order. An `exit` from any client stops the server: in-flight
//! requests are drained, the transport is closed, and [`serve_tcp`] stops
//! accepting.
//!
//! [`serve_tcp`]: HostServer::serve_tcp

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::future::BoxFuture;
use hostlink_protocol::{
	ChannelId, ClientId, ClientMessage, ErrorPayload, HostIdentifier, Initialization, PROTOCOL_VERSION, ServerMessage,
};
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::transport::{DEFAULT_MAX_FRAME_LEN, PipeTransport, Transport, TransportParts};

/// Application logic behind a host.
pub trait RequestHandler: Send + Sync + 'static {
	/// Answers one request. The returned future may run concurrently with
	/// other requests from the same peer.
	fn handle_request(&self, peer: &Peer, data: Value) -> BoxFuture<'static, std::result::Result<Value, ErrorPayload>>;

	/// Receives a chunk the client pushed on a channel.
	fn handle_channel(&self, _peer: &Peer, _id: ChannelId, _data: Value) {}
}

/// The client on the other end of a [`HostServer::serve`] call.
#[derive(Clone)]
pub struct Peer {
	client_id: ClientId,
	outbound: mpsc::UnboundedSender<ServerMessage>,
}

impl Peer {
	pub fn client_id(&self) -> &str {
		&self.client_id
	}

	/// Pushes a chunk to this client on channel `id`.
	pub fn push_channel(&self, id: ChannelId, data: Value) -> Result<()> {
		self.outbound
			.send(ServerMessage::Channel { id, data })
			.map_err(|_| Error::ConnectionClosed)
	}
}

/// Publishes full state snapshots to every connected client.
#[derive(Clone)]
pub struct StateBroadcaster {
	tx: Arc<watch::Sender<Value>>,
}

impl StateBroadcaster {
	pub fn new(initial: Value) -> Self {
		let (tx, _) = watch::channel(initial);
		Self { tx: Arc::new(tx) }
	}

	/// Replaces the snapshot. Clients that lag behind only see the latest one.
	pub fn publish(&self, state: Value) {
		self.tx.send_replace(state);
	}

	pub fn current(&self) -> Value {
		self.tx.borrow().clone()
	}

	fn subscribe(&self) -> watch::Receiver<Value> {
		self.tx.subscribe()
	}
}

/// How a [`HostServer::serve`] call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeEnd {
	/// Client sent `exit`.
	Exit,
	/// Client closed the stream without `exit`.
	Disconnected,
}

pub struct HostServer {
	identifier: HostIdentifier,
	static_url: Option<String>,
	version: u32,
	handler: Arc<dyn RequestHandler>,
	state: StateBroadcaster,
	next_client: AtomicU64,
	exit_tx: watch::Sender<bool>,
}

impl HostServer {
	pub fn new(identifier: impl Into<HostIdentifier>, handler: Arc<dyn RequestHandler>) -> Self {
		let (exit_tx, _) = watch::channel(false);
		Self {
			identifier: identifier.into(),
			static_url: None,
			version: PROTOCOL_VERSION,
			handler,
			state: StateBroadcaster::new(Value::Object(Default::default())),
			next_client: AtomicU64::new(0),
			exit_tx,
		}
	}

	pub fn with_static_url(mut self, static_url: impl Into<String>) -> Self {
		self.static_url = Some(static_url.into());
		self
	}

	/// Overrides the advertised protocol version.
	pub fn with_version(mut self, version: u32) -> Self {
		self.version = version;
		self
	}

	pub fn state(&self) -> &StateBroadcaster {
		&self.state
	}

	/// True once any client has sent `exit`.
	pub fn exit_requested(&self) -> bool {
		*self.exit_tx.borrow()
	}

	/// Serves one client until it exits, disconnects, or sends a frame that
	/// cannot be decoded.
	pub async fn serve(&self, parts: TransportParts) -> Result<ServeEnd> {
		let TransportParts {
			mut sender,
			mut receiver,
			mut message_rx,
		} = parts;

		let client_id = format!("client-{}", self.next_client.fetch_add(1, Ordering::Relaxed));
		debug!(target = "hostlink.serve", %client_id, "client connected");

		let mut reader = tokio::spawn(async move { receiver.run().await });
		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
		let peer = Peer {
			client_id: client_id.clone(),
			outbound: outbound_tx.clone(),
		};

		let mut state_rx = self.state.subscribe();
		let snapshot = state_rx.borrow_and_update().clone();
		let greeting = async {
			write(
				&mut sender,
				&ServerMessage::Initialize(Initialization {
					client_id: client_id.clone(),
					identifier: self.identifier.clone(),
					static_url: self.static_url.clone(),
					version: self.version,
				}),
			)
			.await?;
			write(&mut sender, &ServerMessage::State { data: snapshot }).await
		};
		if let Err(e) = greeting.await {
			reader.abort();
			return Err(e);
		}

		let mut tasks = JoinSet::new();
		let mut state_open = true;

		let end = loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => match serde_json::from_value::<ClientMessage>(value) {
						Ok(ClientMessage::Request { id, data }) => {
							let response = self.handler.handle_request(&peer, data);
							let outbound = outbound_tx.clone();
							tasks.spawn(async move {
								let message = match response.await {
									Ok(data) => ServerMessage::response(id, data),
									Err(error) => ServerMessage::error_response(id, error),
								};
								let _ = outbound.send(message);
							});
						}
						Ok(ClientMessage::Channel { id, data }) => self.handler.handle_channel(&peer, id, data),
						Ok(ClientMessage::Exit) => {
							info!(target = "hostlink.serve", %client_id, "exiting after receiving an exit message");
							break Ok(ServeEnd::Exit);
						}
						Err(e) => break Err(Error::ProtocolError(format!("malformed client message: {e}"))),
					},
					None => break match (&mut reader).await {
						Ok(Ok(())) => Ok(ServeEnd::Disconnected),
						Ok(Err(e)) => Err(e),
						Err(e) => Err(Error::TransportError(format!("reader task failed: {e}"))),
					},
				},
				Some(message) = outbound_rx.recv() => {
					if let Err(e) = write(&mut sender, &message).await {
						break Err(e);
					}
				}
				changed = state_rx.changed(), if state_open => {
					if changed.is_err() {
						state_open = false;
						continue;
					}
					let data = state_rx.borrow_and_update().clone();
					if let Err(e) = write(&mut sender, &ServerMessage::State { data }).await {
						break Err(e);
					}
				}
				Some(_) = tasks.join_next() => {}
			}
		};

		match end {
			Ok(ServeEnd::Exit) => {
				while tasks.join_next().await.is_some() {}
				while let Ok(message) = outbound_rx.try_recv() {
					if let Err(e) = write(&mut sender, &message).await {
						warn!(target = "hostlink.serve", %client_id, error = %e, "failed to flush response");
						break;
					}
				}
				self.exit_tx.send_replace(true);
			}
			_ => tasks.abort_all(),
		}

		reader.abort();
		if let Err(e) = sender.close().await {
			debug!(target = "hostlink.serve", %client_id, error = %e, "close failed");
		}

		match &end {
			Ok(end) => debug!(target = "hostlink.serve", %client_id, ?end, "client removed"),
			Err(e) => warn!(target = "hostlink.serve", %client_id, error = %e, "client connection error"),
		}
		end
	}

	/// Serves over the process's own stdin and stdout.
	pub async fn serve_stdio(&self) -> Result<ServeEnd> {
		let (transport, message_rx) = PipeTransport::new(tokio::io::stdout(), tokio::io::stdin());
		self.serve(transport.into_transport_parts(message_rx)).await
	}

	/// Accepts length-prefixed TCP clients until one of them sends `exit`.
	pub async fn serve_tcp(self: Arc<Self>, listener: TcpListener) -> Result<()> {
		let addr: Option<SocketAddr> = listener.local_addr().ok();
		info!(target = "hostlink.serve", ?addr, "host listening");

		let mut exit_rx = self.exit_tx.subscribe();
		loop {
			tokio::select! {
				changed = exit_rx.changed() => {
					if changed.is_err() || *exit_rx.borrow() {
						break;
					}
				}
				accept = listener.accept() => {
					let (stream, peer_addr) = accept?;
					stream.set_nodelay(true)?;
					let (read_half, write_half) = stream.into_split();
					let (transport, message_rx) = PipeTransport::new(write_half, read_half);
					let parts = transport
						.with_max_frame_len(DEFAULT_MAX_FRAME_LEN)
						.into_transport_parts(message_rx);
					let server = Arc::clone(&self);
					tokio::spawn(async move {
						if let Err(err) = server.serve(parts).await {
							warn!(target = "hostlink.serve", %peer_addr, error = %err, "tcp client failed");
						}
					});
				}
			}
		}

		Ok(())
	}
}

async fn write(sender: &mut Box<dyn Transport>, message: &ServerMessage) -> Result<()> {
	sender.send(serde_json::to_value(message)?).await
}
