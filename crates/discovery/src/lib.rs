//! hostlink discovery - find hosts advertised over multicast DNS
//!
//! A [`Scanner`] sends PTR queries for service types and caches every record
//! it hears, each with its own expiry taken from the record TTL. Services are
//! assembled on demand from whatever is still live:
//!
//! ```text
//! PTR  _hostlink._tcp.local → bench._hostlink._tcp.local   (instance)
//! SRV  bench._hostlink._tcp.local → bench.local:4567        (address)
//! A    bench.local → 10.0.0.7                               (ipv4)
//! TXT  bench._hostlink._tcp.local → ["version=1"]          (properties)
//! ```

pub mod error;
pub mod scanner;
pub mod service;
pub mod store;
pub mod wire;

pub use error::{Error, Result};
pub use scanner::{DEFAULT_QUERY_DELAY, MDNS_ADDR, Scanner, ScannerConfig};
pub use service::{Service, ServiceAddress, Services};
pub use store::RecordStore;
