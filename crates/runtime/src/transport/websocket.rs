//! WebSocket transport for remote hosts.
//!
//! Each protocol frame travels as one WebSocket message. Text and binary
//! messages are both accepted on read; writes use text frames, which is what
//! hosts expect from browser clients as well.

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::error::Error as WsError;

use super::{Transport, TransportFuture, TransportParts, TransportReceiver};
use crate::error::{Error, Result};

/// Connects to `url` (`ws://` or `wss://`) and returns boxed transport halves.
pub async fn connect(url: &str, max_frame_len: usize) -> Result<TransportParts> {
	let (stream, response) = tokio_tungstenite::connect_async(url)
		.await
		.map_err(|e| Error::ConnectionFailed(format!("WebSocket handshake with {url} failed: {e}")))?;

	tracing::debug!(
		target = "hostlink.transport",
		url,
		status = %response.status(),
		"websocket connected"
	);

	Ok(from_stream(stream, max_frame_len))
}

/// Wraps an established WebSocket stream (client or server side).
pub fn from_stream<S>(stream: WebSocketStream<S>, max_frame_len: usize) -> TransportParts
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	let (sink, stream) = stream.split();
	let (message_tx, message_rx) = mpsc::unbounded_channel();

	TransportParts {
		sender: Box::new(WebSocketSender { sink }),
		receiver: Box::new(WebSocketReceiver {
			stream,
			message_tx,
			max_frame_len,
		}),
		message_rx,
	}
}

struct WebSocketSender<S> {
	sink: SplitSink<WebSocketStream<S>, Message>,
}

impl<S> Transport for WebSocketSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	fn send(&mut self, message: Value) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			send_ws(&mut self.sink, Message::Text(text)).await
		})
	}

	fn close(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			SinkExt::close(&mut self.sink)
				.await
				.map_err(|e| Error::TransportError(format!("Failed to close websocket: {e}")))
		})
	}
}

async fn send_ws<K>(sink: &mut K, message: Message) -> Result<()>
where
	K: Sink<Message, Error = WsError> + Unpin,
{
	sink.send(message)
		.await
		.map_err(|e| Error::TransportError(format!("Failed to write websocket message: {e}")))
}

struct WebSocketReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<Value>,
	max_frame_len: usize,
}

impl<S> TransportReceiver for WebSocketReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send,
{
	fn run(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(read_messages(&mut self.stream, &self.message_tx, self.max_frame_len))
	}
}

async fn read_messages<T>(stream: &mut T, message_tx: &mpsc::UnboundedSender<Value>, max_frame_len: usize) -> Result<()>
where
	T: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
	while let Some(next) = stream.next().await {
		let payload = match next {
			Ok(Message::Text(text)) => text.into_bytes(),
			Ok(Message::Binary(bytes)) => bytes,
			Ok(Message::Close(frame)) => {
				tracing::debug!(target = "hostlink.transport", ?frame, "websocket closed by peer");
				return Ok(());
			}
			Ok(_) => continue,
			Err(WsError::ConnectionClosed) => return Ok(()),
			Err(e) => return Err(Error::TransportError(format!("Failed to read websocket message: {e}"))),
		};

		if payload.len() > max_frame_len {
			return Err(Error::TransportError(format!(
				"Frame of {} bytes exceeds limit of {max_frame_len}",
				payload.len()
			)));
		}

		let message: Value = serde_json::from_slice(&payload)
			.map_err(|e| Error::ProtocolError(format!("Frame is not valid JSON: {e}")))?;

		if message_tx.send(message).is_err() {
			return Ok(());
		}
	}

	Ok(())
}
