use std::time::Duration;

use hostlink_protocol::{ErrorPayload, PROTOCOL_VERSION};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream, duplex};

use super::*;
use crate::transport::PipeTransport;

/// Raw host end of a duplex pair, speaking frames directly.
struct FakeHost {
	reader: DuplexStream,
	writer: DuplexStream,
}

impl FakeHost {
	async fn send(&mut self, message: &ServerMessage) {
		let payload = serde_json::to_vec(message).unwrap();
		self.writer.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
		self.writer.write_all(&payload).await.unwrap();
		self.writer.flush().await.unwrap();
	}

	async fn send_raw(&mut self, payload: &[u8]) {
		self.writer.write_all(&(payload.len() as u32).to_le_bytes()).await.unwrap();
		self.writer.write_all(payload).await.unwrap();
		self.writer.flush().await.unwrap();
	}

	async fn recv(&mut self) -> ClientMessage {
		let mut len_buf = [0u8; 4];
		self.reader.read_exact(&mut len_buf).await.unwrap();
		let mut payload = vec![0u8; u32::from_le_bytes(len_buf) as usize];
		self.reader.read_exact(&mut payload).await.unwrap();
		serde_json::from_slice(&payload).unwrap()
	}

	async fn recv_request(&mut self) -> (RequestId, Value) {
		match self.recv().await {
			ClientMessage::Request { id, data } => (id, data),
			other => panic!("expected request, got {other:?}"),
		}
	}
}

fn initialize(version: u32) -> ServerMessage {
	ServerMessage::Initialize(Initialization {
		client_id: "client-1".to_string(),
		identifier: "host-a".to_string(),
		static_url: None,
		version,
	})
}

fn connect() -> (Connection, FakeHost) {
	let (client_write, host_read) = duplex(64 * 1024);
	let (host_write, client_read) = duplex(64 * 1024);
	let (transport, message_rx) = PipeTransport::new(client_write, client_read);
	let connection = Connection::spawn(transport.into_transport_parts(message_rx));
	(
		connection,
		FakeHost {
			reader: host_read,
			writer: host_write,
		},
	)
}

async fn connect_initialized() -> (Connection, FakeHost) {
	let (connection, mut host) = connect();
	host.send(&initialize(PROTOCOL_VERSION)).await;
	connection.initialized().await.unwrap();
	(connection, host)
}

#[tokio::test]
async fn test_initialize_is_exposed() {
	let (connection, _host) = connect_initialized().await;

	let init = connection.initialization().unwrap();
	assert_eq!(init.client_id, "client-1");
	assert_eq!(init.identifier, "host-a");
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_unsupported_version_is_fatal() {
	let (connection, mut host) = connect();
	host.send(&initialize(PROTOCOL_VERSION + 98)).await;

	let err = connection.initialized().await.unwrap_err();
	assert!(matches!(err, Error::UnsupportedVersion { version } if version == PROTOCOL_VERSION + 98));
	assert_eq!(
		connection.closed().await,
		Disconnect::UnsupportedVersion(PROTOCOL_VERSION + 98)
	);
}

#[tokio::test]
async fn test_message_before_initialize_is_fatal() {
	let (connection, mut host) = connect();
	host.send(&ServerMessage::State { data: json!({}) }).await;

	assert!(matches!(connection.closed().await, Disconnect::Failed(_)));
	assert!(connection.initialized().await.is_err());
}

#[tokio::test]
async fn test_duplicate_initialize_is_fatal() {
	let (connection, mut host) = connect_initialized().await;
	host.send(&initialize(PROTOCOL_VERSION)).await;

	assert!(matches!(connection.closed().await, Disconnect::Failed(_)));
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
	let (connection, mut host) = connect_initialized().await;

	let first = tokio::spawn({
		let connection = connection.clone();
		async move { connection.request(json!({"op": "first"})).await }
	});
	let (first_id, first_data) = host.recv_request().await;
	assert_eq!(first_data["op"], "first");

	let second = tokio::spawn({
		let connection = connection.clone();
		async move { connection.request(json!({"op": "second"})).await }
	});
	let (second_id, _) = host.recv_request().await;
	assert_ne!(first_id, second_id);

	host.send(&ServerMessage::response(second_id, json!("two"))).await;
	assert_eq!(second.await.unwrap().unwrap(), json!("two"));
	assert!(!first.is_finished());

	host.send(&ServerMessage::response(first_id, json!("one"))).await;
	assert_eq!(first.await.unwrap().unwrap(), json!("one"));
}

#[tokio::test]
async fn test_response_for_unknown_id_is_discarded() {
	let (connection, mut host) = connect_initialized().await;

	let pending = tokio::spawn({
		let connection = connection.clone();
		async move { connection.request(json!({"op": "ping"})).await }
	});
	let (id, _) = host.recv_request().await;

	host.send(&ServerMessage::response(id.wrapping_add(99), json!("stray"))).await;
	host.send(&ServerMessage::response(id, json!("pong"))).await;

	assert_eq!(pending.await.unwrap().unwrap(), json!("pong"));
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_pending_request_ids_are_unique() {
	let (connection, mut host) = connect_initialized().await;

	let mut tasks = Vec::new();
	for n in 0..3 {
		let connection = connection.clone();
		tasks.push(tokio::spawn(async move { connection.request(json!(n)).await }));
	}

	let mut ids = Vec::new();
	for _ in 0..3 {
		let (id, data) = host.recv_request().await;
		assert!(!ids.contains(&id));
		ids.push(id);
		host.send(&ServerMessage::response(id, data)).await;
	}

	let mut results = Vec::new();
	for task in tasks {
		results.push(task.await.unwrap().unwrap());
	}
	results.sort_by_key(|v| v.as_i64());
	assert_eq!(results, vec![json!(0), json!(1), json!(2)]);
}

#[tokio::test]
async fn test_error_response_becomes_remote_error() {
	let (connection, mut host) = connect_initialized().await;

	let pending = tokio::spawn({
		let connection = connection.clone();
		async move { connection.request(json!({"op": "fail"})).await }
	});
	let (id, _) = host.recv_request().await;
	let mut payload = ErrorPayload::new("no such experiment");
	payload.name = Some("KeyError".to_string());
	host.send(&ServerMessage::error_response(id, payload)).await;

	let err = pending.await.unwrap().unwrap_err();
	assert!(matches!(&err, Error::Remote { name, .. } if name == "KeyError"), "{err}");
	assert!(err.to_string().contains("no such experiment"));
}

#[tokio::test]
async fn test_request_typed_round_trips_typed_values() {
	#[derive(Serialize)]
	struct Query {
		name: String,
	}

	#[derive(serde::Deserialize, Debug, PartialEq)]
	struct Answer {
		count: u32,
	}

	let (connection, mut host) = connect_initialized().await;
	let pending = tokio::spawn({
		let connection = connection.clone();
		async move {
			connection
				.request_typed::<_, Answer>(Query {
					name: "plates".to_string(),
				})
				.await
		}
	});

	let (id, data) = host.recv_request().await;
	assert_eq!(data, json!({"name": "plates"}));
	host.send(&ServerMessage::response(id, json!({"count": 4}))).await;

	assert_eq!(pending.await.unwrap().unwrap(), Answer { count: 4 });
}

#[tokio::test]
async fn test_channel_messages_arrive_in_order() {
	let (connection, mut host) = connect_initialized().await;
	let mut channel = connection.open_channel(5).await.unwrap();
	assert_eq!(channel.id(), 5);

	host.send(&ServerMessage::Channel { id: 6, data: json!("elsewhere") }).await;
	for chunk in ["a", "b", "c"] {
		host.send(&ServerMessage::Channel { id: 5, data: json!(chunk) }).await;
	}

	assert_eq!(channel.recv().await, Some(json!("a")));
	assert_eq!(channel.recv().await, Some(json!("b")));
	assert_eq!(channel.recv().await, Some(json!("c")));
	assert!(!connection.is_closed());
}

#[tokio::test]
async fn test_channel_open_and_send_rules() {
	let (connection, mut host) = connect_initialized().await;

	let _channel = connection.open_channel(1).await.unwrap();
	assert!(matches!(connection.open_channel(1).await, Err(Error::ChannelInUse(1))));
	assert!(matches!(
		connection.send_channel(2, json!("x")).await,
		Err(Error::ChannelNotOpen(2))
	));

	connection.send_channel(1, json!({"line": 1})).await.unwrap();
	assert_eq!(
		host.recv().await,
		ClientMessage::Channel {
			id: 1,
			data: json!({"line": 1})
		}
	);

	connection.close_channel(1);
	assert!(matches!(
		connection.send_channel(1, json!("late")).await,
		Err(Error::ChannelNotOpen(1))
	));
}

#[tokio::test]
async fn test_dropped_channel_receiver_can_be_reopened() {
	let (connection, mut host) = connect_initialized().await;

	drop(connection.open_channel(9).await.unwrap());
	let mut channel = connection.open_channel(9).await.unwrap();

	host.send(&ServerMessage::Channel { id: 9, data: json!(1) }).await;
	assert_eq!(channel.recv().await, Some(json!(1)));
}

#[tokio::test]
async fn test_state_is_last_write_wins() {
	let (connection, mut host) = connect_initialized().await;
	assert!(connection.state().is_none());

	let mut states = connection.subscribe_state();
	host.send(&ServerMessage::State { data: json!({"a": 1}) }).await;
	host.send(&ServerMessage::State { data: json!({"b": 2}) }).await;

	loop {
		if let Some(state) = states.borrow_and_update().clone() {
			if *state == json!({"b": 2}) {
				break;
			}
		}
		states.changed().await.unwrap();
	}
	assert_eq!(*connection.state().unwrap(), json!({"b": 2}));
}

#[tokio::test]
async fn test_exit_rejects_new_requests_but_keeps_pending_ones() {
	let (connection, mut host) = connect_initialized().await;

	let pending = tokio::spawn({
		let connection = connection.clone();
		async move { connection.request(json!({"op": "slow"})).await }
	});
	let (id, _) = host.recv_request().await;

	connection.exit().await.unwrap();
	assert_eq!(host.recv().await, ClientMessage::Exit);
	assert!(matches!(connection.request(json!({})).await, Err(Error::Exiting)));

	host.send(&ServerMessage::response(id, json!("done"))).await;
	assert_eq!(pending.await.unwrap().unwrap(), json!("done"));
}

#[tokio::test]
async fn test_host_disconnect_fails_pending_requests() {
	let (connection, mut host) = connect_initialized().await;

	let pending = tokio::spawn({
		let connection = connection.clone();
		async move { connection.request(json!({"op": "never"})).await }
	});
	host.recv_request().await;
	drop(host);

	assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionClosed)));
	assert_eq!(connection.closed().await, Disconnect::Closed);
	assert!(matches!(connection.request(json!({})).await, Err(Error::ConnectionClosed)));
}

#[tokio::test]
async fn test_malformed_message_tears_down_connection() {
	let (connection, mut host) = connect_initialized().await;
	let mut channel = connection.open_channel(3).await.unwrap();

	host.send_raw(br#"{"type":"bogus"}"#).await;

	assert!(matches!(connection.closed().await, Disconnect::Failed(_)));
	assert_eq!(channel.recv().await, None);
}

#[tokio::test]
async fn test_shutdown_closes_transport() {
	let (connection, mut host) = connect_initialized().await;
	connection.shutdown();

	assert_eq!(connection.closed().await, Disconnect::Closed);

	let mut buf = [0u8; 1];
	let read = tokio::time::timeout(Duration::from_secs(1), host.reader.read(&mut buf))
		.await
		.unwrap()
		.unwrap();
	assert_eq!(read, 0);
}
