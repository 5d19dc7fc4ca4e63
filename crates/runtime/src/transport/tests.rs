use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::*;

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, message: &Value) {
	let payload = serde_json::to_vec(message).unwrap();
	writer.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
	writer.write_all(&payload).await.unwrap();
	writer.flush().await.unwrap();
}

#[tokio::test]
async fn test_sender_writes_little_endian_length_prefix() {
	let (mut host_read, client_write) = tokio::io::duplex(4096);
	let (client_read, _host_write) = tokio::io::duplex(64);

	let (transport, _rx) = PipeTransport::new(client_write, client_read);
	let (mut sender, _receiver) = transport.into_parts();

	// 302-byte payload: the prefix spans two bytes.
	sender.send(Value::String("x".repeat(300))).await.unwrap();

	let mut frame = vec![0u8; 4 + 302];
	host_read.read_exact(&mut frame).await.unwrap();
	assert_eq!(frame[..4], [0x2E, 0x01, 0x00, 0x00]);
	assert_eq!(frame[4], b'"');
	assert_eq!(frame[305], b'"');
}

#[tokio::test]
async fn test_send_message() {
	let (stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, _stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	let (mut sender, _receiver) = transport.into_parts();

	let message = serde_json::json!({"type": "request", "id": 1, "data": {"type": "isBusy"}});
	sender.send(message.clone()).await.unwrap();

	let (mut read_half, _write_half) = tokio::io::split(stdin_read);
	let mut len_buf = [0u8; 4];
	read_half.read_exact(&mut len_buf).await.unwrap();
	let length = u32::from_le_bytes(len_buf) as usize;

	let mut payload = vec![0u8; length];
	read_half.read_exact(&mut payload).await.unwrap();

	let received: Value = serde_json::from_slice(&payload).unwrap();
	assert_eq!(received, message);
}

#[tokio::test]
async fn test_multiple_messages_in_sequence() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(4096);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(4096);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let messages = vec![
		serde_json::json!({"type": "state", "data": {"n": 1}}),
		serde_json::json!({"type": "channel", "id": 4, "data": "chunk"}),
		serde_json::json!({"type": "response", "id": 2, "data": null}),
	];
	for message in &messages {
		write_frame(&mut stdout_write, message).await;
	}

	for expected in &messages {
		assert_eq!(&rx.recv().await.unwrap(), expected);
	}

	drop(stdout_write);
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_large_message() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024 * 1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024 * 1024);

	let (mut transport, mut rx) = PipeTransport::new(stdin_write, stdout_read);
	let read_task = tokio::spawn(async move { transport.run().await });

	let large_message = serde_json::json!({"type": "state", "data": "x".repeat(100_000)});
	write_frame(&mut stdout_write, &large_message).await;

	assert_eq!(rx.recv().await.unwrap(), large_message);

	drop(stdout_write);
	drop(rx);
	let _ = read_task.await;
}

#[tokio::test]
async fn test_truncated_length_prefix_is_an_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(&[0x01, 0x02]).await.unwrap();
	stdout_write.flush().await.unwrap();
	drop(stdout_write);

	let result = transport.run().await;
	assert!(result.unwrap_err().to_string().contains("Failed to read length prefix"));
}

#[tokio::test]
async fn test_truncated_payload_is_an_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(&100u32.to_le_bytes()).await.unwrap();
	stdout_write.write_all(b"{\"type\"").await.unwrap();
	drop(stdout_write);

	assert!(transport.run().await.is_err());
}

#[tokio::test]
async fn test_invalid_json_is_a_protocol_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);

	stdout_write.write_all(&3u32.to_le_bytes()).await.unwrap();
	stdout_write.write_all(b"{{{").await.unwrap();
	drop(stdout_write);

	assert!(matches!(transport.run().await, Err(Error::ProtocolError(_))));
}

#[tokio::test]
async fn test_oversized_frame_is_rejected_before_allocation() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, mut stdout_write) = tokio::io::duplex(1024);

	let (transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	let mut transport = transport.with_max_frame_len(16);

	stdout_write.write_all(&1_000_000u32.to_le_bytes()).await.unwrap();
	stdout_write.flush().await.unwrap();

	let err = transport.run().await.unwrap_err();
	assert!(err.to_string().contains("exceeds limit"), "{err}");
}

#[tokio::test]
async fn test_clean_eof_ends_reader_without_error() {
	let (_stdin_read, stdin_write) = tokio::io::duplex(1024);
	let (stdout_read, stdout_write) = tokio::io::duplex(1024);

	let (mut transport, _rx) = PipeTransport::new(stdin_write, stdout_read);
	drop(stdout_write);

	assert!(transport.run().await.is_ok());
}

#[tokio::test]
async fn test_tcp_transport_round_trip() {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let server = tokio::spawn(async move {
		let (mut socket, _) = listener.accept().await.unwrap();
		let mut len_buf = [0u8; 4];
		socket.read_exact(&mut len_buf).await.unwrap();
		let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
		socket.read_exact(&mut payload).await.unwrap();
		let echoed: Value = serde_json::from_slice(&payload).unwrap();
		write_frame(&mut socket, &echoed).await;
	});

	let TransportParts {
		mut sender,
		mut receiver,
		mut message_rx,
	} = connect_tcp(addr, DEFAULT_MAX_FRAME_LEN).await.unwrap();
	let reader = tokio::spawn(async move { receiver.run().await });

	let message = serde_json::json!({"type": "exit"});
	sender.send(message.clone()).await.unwrap();
	assert_eq!(message_rx.recv().await.unwrap(), message);

	server.await.unwrap();
	assert!(reader.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_websocket_transport_round_trip() {
	let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();

	let server = tokio::spawn(async move {
		let (socket, _) = listener.accept().await.unwrap();
		let ws = tokio_tungstenite::accept_async(socket).await.unwrap();
		let TransportParts {
			mut sender,
			mut receiver,
			mut message_rx,
		} = websocket::from_stream(ws, DEFAULT_MAX_FRAME_LEN);
		let reader = tokio::spawn(async move { receiver.run().await });
		let incoming = message_rx.recv().await.unwrap();
		sender.send(serde_json::json!({"echo": incoming})).await.unwrap();
		let _ = sender.close().await;
		reader.abort();
	});

	let TransportParts {
		mut sender,
		mut receiver,
		mut message_rx,
	} = websocket::connect(&format!("ws://{addr}"), DEFAULT_MAX_FRAME_LEN).await.unwrap();
	let reader = tokio::spawn(async move { receiver.run().await });

	sender.send(serde_json::json!({"type": "exit"})).await.unwrap();
	let reply = message_rx.recv().await.unwrap();
	assert_eq!(reply["echo"]["type"], "exit");
	drop(sender);

	assert!(reader.await.unwrap().is_ok());
	server.await.unwrap();
}
