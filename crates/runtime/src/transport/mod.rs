//! Framed message transports.
//!
//! A transport is split into a [`Transport`] (write half) and a
//! [`TransportReceiver`] (read half). The receiver decodes frames into JSON
//! values and pushes them into an unbounded channel consumed by the
//! connection's dispatch loop.
//!
//! # Framing
//!
//! Pipe and TCP transports prefix every JSON payload with its length as a
//! 4-byte little-endian integer:
//!
//! ```text
//! [len: u32 LE][payload: len bytes of JSON]
//! ```
//!
//! The WebSocket transport maps one frame to one WebSocket message.

use std::future::Future;
use std::pin::Pin;

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;

use crate::error::{Error, Result};

pub mod websocket;

#[cfg(test)]
mod tests;

/// Default upper bound for a single frame.
pub const DEFAULT_MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Boxed future used by the object-safe transport traits.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a transport.
pub trait Transport: Send {
	/// Encodes and writes one message, preserving send order.
	fn send(&mut self, message: Value) -> TransportFuture<'_, Result<()>>;

	/// Flushes and closes the write direction.
	fn close(&mut self) -> TransportFuture<'_, Result<()>>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until the peer closes or a frame is malformed.
	///
	/// Returns `Ok(())` when the stream ends on a frame boundary or the
	/// message channel is dropped, and an error for anything that leaves the
	/// byte stream in an unknown state.
	fn run(&mut self) -> TransportFuture<'_, Result<()>>;
}

/// Both halves of a transport plus the channel the receiver feeds.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// Length-prefixed JSON transport over any byte pipe.
///
/// Used for child-process stdio (the host reads our frames on stdin and
/// writes its own on stdout) and for raw TCP sockets.
pub struct PipeTransport<W, R> {
	writer: W,
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
	max_frame_len: usize,
}

impl<W, R> PipeTransport<W, R>
where
	W: AsyncWrite + Unpin + Send + 'static,
	R: AsyncRead + Unpin + Send + 'static,
{
	/// Creates a transport writing to `writer` and reading from `reader`.
	pub fn new(writer: W, reader: R) -> (Self, mpsc::UnboundedReceiver<Value>) {
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		let transport = Self {
			writer,
			reader,
			message_tx,
			max_frame_len: DEFAULT_MAX_FRAME_LEN,
		};
		(transport, message_rx)
	}

	/// Overrides the largest accepted frame, in bytes.
	pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
		self.max_frame_len = max_frame_len;
		self
	}

	/// Splits into independently owned write and read halves.
	pub fn into_parts(self) -> (PipeTransportSender<W>, PipeTransportReceiver<R>) {
		(
			PipeTransportSender {
				writer: self.writer,
			},
			PipeTransportReceiver {
				reader: self.reader,
				message_tx: self.message_tx,
				max_frame_len: self.max_frame_len,
			},
		)
	}

	/// Boxes both halves for use by a connection.
	pub fn into_transport_parts(self, message_rx: mpsc::UnboundedReceiver<Value>) -> TransportParts {
		let (sender, receiver) = self.into_parts();
		TransportParts {
			sender: Box::new(sender),
			receiver: Box::new(receiver),
			message_rx,
		}
	}

	/// Runs the read loop in place.
	pub async fn run(&mut self) -> Result<()> {
		read_frames(&mut self.reader, &self.message_tx, self.max_frame_len).await
	}
}

/// Write half of a [`PipeTransport`].
pub struct PipeTransportSender<W> {
	writer: W,
}

impl<W: AsyncWrite + Unpin + Send> PipeTransportSender<W> {
	pub async fn send(&mut self, message: Value) -> Result<()> {
		let payload = serde_json::to_vec(&message)?;
		let length = u32::try_from(payload.len())
			.map_err(|_| Error::TransportError(format!("Frame of {} bytes exceeds u32 length prefix", payload.len())))?;

		self.writer
			.write_all(&length.to_le_bytes())
			.await
			.map_err(|e| Error::TransportError(format!("Failed to write length prefix: {e}")))?;
		self.writer
			.write_all(&payload)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to write frame: {e}")))?;
		self.writer
			.flush()
			.await
			.map_err(|e| Error::TransportError(format!("Failed to flush frame: {e}")))?;

		Ok(())
	}
}

impl<W: AsyncWrite + Unpin + Send> Transport for PipeTransportSender<W> {
	fn send(&mut self, message: Value) -> TransportFuture<'_, Result<()>> {
		Box::pin(PipeTransportSender::send(self, message))
	}

	fn close(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			self.writer
				.shutdown()
				.await
				.map_err(|e| Error::TransportError(format!("Failed to close writer: {e}")))
		})
	}
}

/// Read half of a [`PipeTransport`].
pub struct PipeTransportReceiver<R> {
	reader: R,
	message_tx: mpsc::UnboundedSender<Value>,
	max_frame_len: usize,
}

impl<R: AsyncRead + Unpin + Send> TransportReceiver for PipeTransportReceiver<R> {
	fn run(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(read_frames(&mut self.reader, &self.message_tx, self.max_frame_len))
	}
}

async fn read_frames<R: AsyncRead + Unpin>(
	reader: &mut R,
	message_tx: &mpsc::UnboundedSender<Value>,
	max_frame_len: usize,
) -> Result<()> {
	loop {
		let mut len_buf = [0u8; 4];
		let mut filled = 0;
		while filled < len_buf.len() {
			let n = reader
				.read(&mut len_buf[filled..])
				.await
				.map_err(|e| Error::TransportError(format!("Failed to read length prefix: {e}")))?;
			if n == 0 {
				if filled == 0 {
					tracing::debug!(target = "hostlink.transport", "peer closed pipe");
					return Ok(());
				}
				return Err(Error::TransportError(format!(
					"Failed to read length prefix: stream ended after {filled} of 4 bytes"
				)));
			}
			filled += n;
		}

		let length = u32::from_le_bytes(len_buf) as usize;
		if length > max_frame_len {
			return Err(Error::TransportError(format!(
				"Frame of {length} bytes exceeds limit of {max_frame_len}"
			)));
		}

		let mut payload = vec![0u8; length];
		reader
			.read_exact(&mut payload)
			.await
			.map_err(|e| Error::TransportError(format!("Failed to read frame of {length} bytes: {e}")))?;

		let message: Value = serde_json::from_slice(&payload)
			.map_err(|e| Error::ProtocolError(format!("Frame is not valid JSON: {e}")))?;

		if message_tx.send(message).is_err() {
			tracing::debug!(target = "hostlink.transport", "message channel closed, stopping reader");
			return Ok(());
		}
	}
}

/// Opens a length-prefixed transport over a TCP connection.
pub async fn connect_tcp(addr: impl ToSocketAddrs, max_frame_len: usize) -> Result<TransportParts> {
	let stream = TcpStream::connect(addr)
		.await
		.map_err(|e| Error::ConnectionFailed(format!("TCP connect failed: {e}")))?;
	stream.set_nodelay(true)?;
	let (read_half, write_half) = stream.into_split();
	let (transport, message_rx) = PipeTransport::new(write_half, read_half);
	Ok(transport.with_max_frame_len(max_frame_len).into_transport_parts(message_rx))
}
