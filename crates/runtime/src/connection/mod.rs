//! Client side of the hostlink protocol.
//!
//! A [`Connection`] is a cheap, cloneable handle. All correlation state
//! (pending requests, open channels) lives inside one [`ConnectionDriver`]
//! task, which is fed by two queues: commands from handles and decoded frames
//! from the transport reader. Nothing else touches those tables, so no locking
//! is involved.
//!
//! # Message Flow
//!
//! 1. Host sends `initialize`; the driver checks the version and resolves
//!    [`Connection::initialized`]
//! 2. [`Connection::request`] queues a command; the driver picks a request id
//!    not currently pending, stores the reply slot, and writes the frame
//! 3. The matching `response` removes the slot and completes the caller
//! 4. `channel` frames are routed to the sink registered for their id
//! 5. `state` frames replace the cached snapshot
//!
//! Responses and channel frames for unknown ids are discarded. Anything that
//! fails to decode tears the connection down.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use hostlink_protocol::{ChannelId, ClientMessage, Initialization, RequestId, ServerMessage, is_supported_version};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};

use crate::error::{Error, Result};
use crate::latch::Latch;
use crate::transport::{Transport, TransportParts, TransportReceiver};

#[cfg(test)]
mod tests;

/// How long the writer may keep flushing queued frames after the driver stops.
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Latest full state snapshot pushed by the host.
pub type StateSnapshot = Arc<Value>;

/// Reason a connection ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disconnect {
	/// Peer closed the stream, or the connection was shut down locally.
	Closed,
	/// Transport or protocol failure.
	Failed(String),
	/// Host advertised a protocol version this client does not speak.
	UnsupportedVersion(u32),
}

impl Disconnect {
	pub fn is_failure(&self) -> bool {
		!matches!(self, Disconnect::Closed)
	}

	fn into_error(self) -> Error {
		match self {
			Disconnect::Closed => Error::ConnectionClosed,
			Disconnect::Failed(reason) => Error::ProtocolError(reason),
			Disconnect::UnsupportedVersion(version) => Error::UnsupportedVersion { version },
		}
	}
}

impl std::fmt::Display for Disconnect {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		match self {
			Disconnect::Closed => f.write_str("connection closed"),
			Disconnect::Failed(reason) => write!(f, "connection failed: {reason}"),
			Disconnect::UnsupportedVersion(version) => write!(f, "unsupported protocol version {version}"),
		}
	}
}

enum Command {
	Request {
		data: Value,
		reply: oneshot::Sender<Result<Value>>,
	},
	OpenChannel {
		id: ChannelId,
		sink: mpsc::UnboundedSender<Value>,
		reply: oneshot::Sender<Result<()>>,
	},
	SendChannel {
		id: ChannelId,
		data: Value,
		reply: oneshot::Sender<Result<()>>,
	},
	CloseChannel {
		id: ChannelId,
	},
	Exit {
		reply: oneshot::Sender<Result<()>>,
	},
	Shutdown,
}

/// Handle to a client connection.
#[derive(Clone)]
pub struct Connection {
	commands: mpsc::UnboundedSender<Command>,
	initialized: Latch<std::result::Result<Initialization, Disconnect>>,
	closed: Latch<Disconnect>,
	state_rx: watch::Receiver<Option<StateSnapshot>>,
}

impl Connection {
	/// Creates a connection handle and the driver that must be run for it.
	pub fn new(parts: TransportParts) -> (Self, ConnectionDriver) {
		let (command_tx, command_rx) = mpsc::unbounded_channel();
		let (state_tx, state_rx) = watch::channel(None);
		let initialized = Latch::new();
		let closed = Latch::new();

		let connection = Self {
			commands: command_tx,
			initialized: initialized.clone(),
			closed: closed.clone(),
			state_rx,
		};
		let driver = ConnectionDriver {
			parts,
			commands: command_rx,
			initialized,
			closed,
			state_tx,
		};
		(connection, driver)
	}

	/// Creates a connection and spawns its driver on the current runtime.
	pub fn spawn(parts: TransportParts) -> Self {
		let (connection, driver) = Self::new(parts);
		tokio::spawn(driver.run());
		connection
	}

	/// Waits for the host's `initialize` message.
	///
	/// Fails if the connection ends first or the host speaks an unsupported
	/// protocol version.
	pub async fn initialized(&self) -> Result<Initialization> {
		self.initialized.wait().await.map_err(Disconnect::into_error)
	}

	/// Initialization data, once received.
	pub fn initialization(&self) -> Option<Initialization> {
		self.initialized.get().and_then(|result| result.ok())
	}

	/// Sends a request and waits for its response.
	pub async fn request(&self, data: Value) -> Result<Value> {
		let (reply, rx) = oneshot::channel();
		self.send_command(Command::Request { data, reply })?;
		rx.await.map_err(|_| Error::ConnectionClosed)?
	}

	/// Typed variant of [`request`](Self::request).
	pub async fn request_typed<P: Serialize, R: DeserializeOwned>(&self, params: P) -> Result<R> {
		let data = serde_json::to_value(params)?;
		let response = self.request(data).await?;
		serde_json::from_value(response).map_err(Into::into)
	}

	/// Registers a local sink for channel `id`.
	///
	/// Channel ids come out of band, usually from a request result. Messages
	/// that arrived before the channel was opened are not replayed.
	pub async fn open_channel(&self, id: ChannelId) -> Result<ChannelReceiver> {
		let (sink, rx) = mpsc::unbounded_channel();
		let (reply, reply_rx) = oneshot::channel();
		self.send_command(Command::OpenChannel { id, sink, reply })?;
		reply_rx.await.map_err(|_| Error::ConnectionClosed)??;
		Ok(ChannelReceiver { id, rx })
	}

	/// Sends a chunk on an open channel.
	pub async fn send_channel(&self, id: ChannelId, data: Value) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self.send_command(Command::SendChannel { id, data, reply })?;
		rx.await.map_err(|_| Error::ConnectionClosed)?
	}

	/// Drops the local sink for channel `id`.
	pub fn close_channel(&self, id: ChannelId) {
		let _ = self.commands.send(Command::CloseChannel { id });
	}

	/// Latest state snapshot, if the host has sent one.
	pub fn state(&self) -> Option<StateSnapshot> {
		self.state_rx.borrow().clone()
	}

	/// Watches state snapshots as they replace each other.
	pub fn subscribe_state(&self) -> watch::Receiver<Option<StateSnapshot>> {
		self.state_rx.clone()
	}

	/// Sends `exit`. No new requests are accepted afterwards; pending ones
	/// still complete if the host answers them before closing.
	pub async fn exit(&self) -> Result<()> {
		let (reply, rx) = oneshot::channel();
		self.send_command(Command::Exit { reply })?;
		rx.await.map_err(|_| Error::ConnectionClosed)?
	}

	/// Tears the connection down without waiting for the host.
	pub fn shutdown(&self) {
		let _ = self.commands.send(Command::Shutdown);
	}

	/// Waits until the connection has ended and its transport is released.
	pub async fn closed(&self) -> Disconnect {
		self.closed.wait().await
	}

	pub fn is_closed(&self) -> bool {
		self.closed.is_set()
	}

	fn send_command(&self, command: Command) -> Result<()> {
		self.commands.send(command).map_err(|_| Error::ConnectionClosed)
	}
}

/// In-order receiver for one channel id.
pub struct ChannelReceiver {
	id: ChannelId,
	rx: mpsc::UnboundedReceiver<Value>,
}

impl ChannelReceiver {
	pub fn id(&self) -> ChannelId {
		self.id
	}

	/// Next chunk, or `None` once the channel is closed or the connection ends.
	pub async fn recv(&mut self) -> Option<Value> {
		self.rx.recv().await
	}
}

/// Dispatch loop owning the transport and all correlation tables.
pub struct ConnectionDriver {
	parts: TransportParts,
	commands: mpsc::UnboundedReceiver<Command>,
	initialized: Latch<std::result::Result<Initialization, Disconnect>>,
	closed: Latch<Disconnect>,
	state_tx: watch::Sender<Option<StateSnapshot>>,
}

impl ConnectionDriver {
	/// Runs until the peer disconnects, a frame fails to decode, or every
	/// [`Connection`] handle is gone.
	pub async fn run(self) {
		let ConnectionDriver {
			parts,
			mut commands,
			initialized,
			closed,
			state_tx,
		} = self;
		let TransportParts {
			sender,
			receiver,
			mut message_rx,
		} = parts;

		let mut reader = tokio::spawn(read_loop(receiver));
		let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
		let mut writer = tokio::spawn(write_loop(sender, outbound_rx));
		let mut reader_done = false;
		let mut writer_done = false;

		let mut tables = Tables {
			outbound: outbound_tx,
			pending: HashMap::new(),
			channels: HashMap::new(),
			next_id: 0,
			exiting: false,
			ready: false,
			initialized: initialized.clone(),
			state_tx,
		};

		let disconnect = loop {
			tokio::select! {
				message = message_rx.recv() => match message {
					Some(value) => {
						if let Err(disconnect) = tables.dispatch(value) {
							break disconnect;
						}
					}
					None => {
						reader_done = true;
						break match (&mut reader).await {
							Ok(Ok(())) => Disconnect::Closed,
							Ok(Err(e)) => Disconnect::Failed(e.to_string()),
							Err(e) => Disconnect::Failed(format!("reader task failed: {e}")),
						};
					}
				},
				command = commands.recv() => match command {
					Some(Command::Shutdown) | None => break Disconnect::Closed,
					Some(command) => tables.handle(command),
				},
				result = &mut writer => {
					writer_done = true;
					break match result {
						Ok(Ok(())) => Disconnect::Closed,
						Ok(Err(e)) => Disconnect::Failed(e.to_string()),
						Err(e) => Disconnect::Failed(format!("writer task failed: {e}")),
					};
				}
			}
		};

		if !reader_done {
			reader.abort();
		}
		tables.fail_all();
		drop(tables);

		if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut writer).await.is_err() {
			tracing::debug!(target = "hostlink.connection", "writer did not drain in time, aborting");
			writer.abort();
		}

		if disconnect.is_failure() {
			tracing::warn!(target = "hostlink.connection", %disconnect, "connection torn down");
		} else {
			tracing::debug!(target = "hostlink.connection", "connection closed");
		}

		initialized.set(Err(disconnect.clone()));
		closed.set(disconnect);
	}
}

async fn read_loop(mut receiver: Box<dyn TransportReceiver>) -> Result<()> {
	receiver.run().await
}

async fn write_loop(mut sender: Box<dyn Transport>, mut outbound: mpsc::UnboundedReceiver<Value>) -> Result<()> {
	while let Some(message) = outbound.recv().await {
		sender.send(message).await?;
	}
	sender.close().await
}

struct Tables {
	outbound: mpsc::UnboundedSender<Value>,
	pending: HashMap<RequestId, oneshot::Sender<Result<Value>>>,
	channels: HashMap<ChannelId, mpsc::UnboundedSender<Value>>,
	next_id: RequestId,
	exiting: bool,
	ready: bool,
	initialized: Latch<std::result::Result<Initialization, Disconnect>>,
	state_tx: watch::Sender<Option<StateSnapshot>>,
}

impl Tables {
	fn handle(&mut self, command: Command) {
		match command {
			Command::Request { data, reply } => {
				if self.exiting {
					let _ = reply.send(Err(Error::Exiting));
					return;
				}
				let id = self.allocate_id();
				tracing::debug!(target = "hostlink.connection", id, "sending request");
				match self.write(&ClientMessage::Request { id, data }) {
					Ok(()) => {
						self.pending.insert(id, reply);
					}
					Err(e) => {
						let _ = reply.send(Err(e));
					}
				}
			}
			Command::OpenChannel { id, sink, reply } => {
				let result = match self.channels.entry(id) {
					Entry::Occupied(entry) if !entry.get().is_closed() => Err(Error::ChannelInUse(id)),
					Entry::Occupied(mut entry) => {
						entry.insert(sink);
						Ok(())
					}
					Entry::Vacant(entry) => {
						entry.insert(sink);
						Ok(())
					}
				};
				let _ = reply.send(result);
			}
			Command::SendChannel { id, data, reply } => {
				let result = if self.channels.contains_key(&id) {
					self.write(&ClientMessage::Channel { id, data })
				} else {
					Err(Error::ChannelNotOpen(id))
				};
				let _ = reply.send(result);
			}
			Command::CloseChannel { id } => {
				self.channels.remove(&id);
			}
			Command::Exit { reply } => {
				let result = if self.exiting {
					Ok(())
				} else {
					self.exiting = true;
					tracing::debug!(target = "hostlink.connection", pending = self.pending.len(), "sending exit");
					self.write(&ClientMessage::Exit)
				};
				let _ = reply.send(result);
			}
			Command::Shutdown => {}
		}
	}

	fn dispatch(&mut self, value: Value) -> std::result::Result<(), Disconnect> {
		let message: ServerMessage =
			serde_json::from_value(value).map_err(|e| Disconnect::Failed(format!("malformed message: {e}")))?;

		match message {
			ServerMessage::Initialize(init) => {
				if self.ready {
					return Err(Disconnect::Failed("duplicate initialize message".to_string()));
				}
				if !is_supported_version(init.version) {
					return Err(Disconnect::UnsupportedVersion(init.version));
				}
				tracing::debug!(
					target = "hostlink.connection",
					client_id = %init.client_id,
					identifier = %init.identifier,
					version = init.version,
					"initialized"
				);
				self.ready = true;
				self.initialized.set(Ok(init));
			}
			_ if !self.ready => {
				return Err(Disconnect::Failed(
					"host sent a message before initialize".to_string(),
				));
			}
			ServerMessage::Response { id, data, error } => match self.pending.remove(&id) {
				Some(reply) => {
					let result = match error {
						Some(payload) => Err(Error::from(payload)),
						None => Ok(data),
					};
					let _ = reply.send(result);
				}
				None => {
					tracing::debug!(target = "hostlink.connection", id, "discarding response for unknown request");
				}
			},
			ServerMessage::Channel { id, data } => match self.channels.get(&id) {
				Some(sink) => {
					if sink.send(data).is_err() {
						tracing::debug!(target = "hostlink.connection", id, "channel receiver dropped, closing");
						self.channels.remove(&id);
					}
				}
				None => {
					tracing::debug!(target = "hostlink.connection", id, "discarding message for unknown channel");
				}
			},
			ServerMessage::State { data } => {
				self.state_tx.send_replace(Some(Arc::new(data)));
			}
		}
		Ok(())
	}

	fn allocate_id(&mut self) -> RequestId {
		loop {
			let id = self.next_id;
			self.next_id = self.next_id.wrapping_add(1);
			if !self.pending.contains_key(&id) {
				return id;
			}
		}
	}

	fn write(&self, message: &ClientMessage) -> Result<()> {
		let value = serde_json::to_value(message)?;
		self.outbound.send(value).map_err(|_| Error::ConnectionClosed)
	}

	fn fail_all(&mut self) {
		for (_, reply) in self.pending.drain() {
			let _ = reply.send(Err(Error::ConnectionClosed));
		}
		self.channels.clear();
	}
}
