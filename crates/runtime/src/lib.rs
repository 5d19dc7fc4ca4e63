//! hostlink runtime - transports, connections, and session supervision
//!
//! This crate provides everything between a [`Session`] owner and the bytes on
//! the wire:
//!
//! - **Transport**: length-prefixed JSON over pipes and TCP, or one message
//!   per WebSocket frame
//! - **Connection**: request/response correlation, channel routing, and the
//!   latest state snapshot
//! - **Serve**: the host side of the same protocol
//! - **Session**: starting a local or remote host, waiting for readiness, and
//!   reporting exactly one terminal outcome
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐
//! │   Session    │  lifecycle, supervisor task
//! └──────┬───────┘
//!        │ HostHandle (LocalHost / RemoteHost)
//! ┌──────▼───────┐
//! │  Connection  │  dispatch task owning pending/channel tables
//! └──────┬───────┘
//! ┌──────▼───────┐
//! │  Transport   │  pipe / TCP / WebSocket
//! └──────────────┘
//! ```

pub mod connection;
pub mod error;
pub mod latch;
pub mod serve;
pub mod session;
pub mod transport;

pub use connection::{ChannelReceiver, Connection, ConnectionDriver, Disconnect, StateSnapshot};
pub use error::{Error, Result};
pub use latch::Latch;
pub use serve::{HostServer, Peer, RequestHandler, ServeEnd, StateBroadcaster};
pub use session::{
	ExitNotifier, HostDescriptor, HostExit, HostFailure, HostHandle, LocalHost, LocalHostConfig, RemoteAddress,
	RemoteHost, Session, SessionOptions, SessionOutcome, SessionState,
};
pub use transport::{
	DEFAULT_MAX_FRAME_LEN, PipeTransport, PipeTransportReceiver, PipeTransportSender, Transport, TransportParts,
	TransportReceiver,
};
