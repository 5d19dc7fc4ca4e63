//! Time-expiring record cache.
//!
//! Every entry carries an absolute expiry computed at arrival. Nothing is
//! evicted in the background: [`RecordStore::services`] runs a cleanup pass
//! before assembling results, so an expired record can never contribute.

use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

use crate::service::{Service, ServiceAddress, Services};
use crate::wire::{Message, Record, RecordData};

#[derive(Debug, Clone)]
struct Entry<T> {
	data: T,
	expires: Instant,
}

#[derive(Debug, Clone)]
struct SrvTarget {
	target: String,
	port: u16,
}

/// Raw records by kind and owner name.
#[derive(Debug, Default)]
pub struct RecordStore {
	a: HashMap<String, Entry<Ipv4Addr>>,
	aaaa: HashMap<String, Entry<Ipv6Addr>>,
	srv: HashMap<String, Entry<SrvTarget>>,
	txt: HashMap<String, Entry<Vec<Vec<u8>>>>,
	/// Owner name → pointed-to name → expiry.
	ptr: HashMap<String, HashMap<String, Instant>>,
}

impl RecordStore {
	pub fn new() -> Self {
		Self::default()
	}

	/// Merges the answer and additional sections of a response.
	///
	/// Returns how many records were stored.
	pub fn ingest_message(&mut self, message: &Message, now: Instant) -> usize {
		message
			.answers
			.iter()
			.chain(&message.additionals)
			.filter(|record| self.ingest(record, now))
			.count()
	}

	/// Merges one record. PTR records add or refresh a target; other kinds
	/// replace the payload for their name. Unknown kinds are ignored.
	pub fn ingest(&mut self, record: &Record, now: Instant) -> bool {
		let Some(expires) = now.checked_add(Duration::from_secs(u64::from(record.ttl))) else {
			return false;
		};
		let name = normalize(&record.name);

		match &record.data {
			RecordData::A(addr) => {
				self.a.insert(name, Entry { data: *addr, expires });
			}
			RecordData::Aaaa(addr) => {
				self.aaaa.insert(name, Entry { data: *addr, expires });
			}
			RecordData::Srv { port, target, .. } => {
				let data = SrvTarget {
					target: normalize(target),
					port: *port,
				};
				self.srv.insert(name, Entry { data, expires });
			}
			RecordData::Txt(strings) => {
				self.txt.insert(
					name,
					Entry {
						data: strings.clone(),
						expires,
					},
				);
			}
			RecordData::Ptr(target) => {
				self.ptr
					.entry(name)
					.or_default()
					.insert(normalize(target), expires);
			}
			RecordData::Other { rtype, .. } => {
				trace!(target = "hostlink.discovery", rtype, name = %record.name, "ignoring record");
				return false;
			}
		}
		true
	}

	/// Drops every entry whose expiry is not after `now`.
	pub fn cleanup(&mut self, now: Instant) {
		self.a.retain(|_, entry| entry.expires > now);
		self.aaaa.retain(|_, entry| entry.expires > now);
		self.srv.retain(|_, entry| entry.expires > now);
		self.txt.retain(|_, entry| entry.expires > now);
		self.ptr.retain(|_, targets| {
			targets.retain(|_, expires| *expires > now);
			!targets.is_empty()
		});
	}

	/// Cleans up, then assembles services for the requested types.
	pub fn services<S: AsRef<str>>(&mut self, types: &[S], now: Instant) -> Services {
		self.cleanup(now);

		let mut services = Services::new();
		for service_type in types {
			let service_type = service_type.as_ref();
			let Some(targets) = self.ptr.get(&normalize(service_type)) else {
				continue;
			};
			for name in targets.keys() {
				let service = services.entry(name.clone()).or_insert_with(|| Service::new(name));
				if !service.types.iter().any(|t| t == service_type) {
					service.types.push(service_type.to_string());
				}
			}
		}

		for service in services.values_mut() {
			if let Some(srv) = self.srv.get(&service.name) {
				let domain = &srv.data.target;
				service.address = Some(ServiceAddress {
					domain: domain.clone(),
					ipv4: self.a.get(domain).map(|entry| entry.data),
					ipv6: self.aaaa.get(domain).map(|entry| entry.data),
					port: srv.data.port,
				});
			}
			if let Some(txt) = self.txt.get(&service.name) {
				service.properties = Some(parse_txt(&txt.data));
			}
		}

		services
	}

	/// Number of live entries, counting each PTR target separately.
	pub fn len(&self) -> usize {
		self.a.len()
			+ self.aaaa.len()
			+ self.srv.len()
			+ self.txt.len()
			+ self.ptr.values().map(HashMap::len).sum::<usize>()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Lookup key for a DNS name: no trailing dot, ASCII lowercase.
fn normalize(name: &str) -> String {
	name.strip_suffix('.').unwrap_or(name).to_ascii_lowercase()
}

/// `key=value` pairs; the value keeps any further `=`. Empty strings and
/// strings without `=` are skipped.
fn parse_txt(strings: &[Vec<u8>]) -> std::collections::BTreeMap<String, String> {
	strings
		.iter()
		.filter(|s| !s.is_empty())
		.filter_map(|s| {
			let text = String::from_utf8_lossy(s);
			let (key, value) = text.split_once('=')?;
			Some((key.to_string(), value.to_string()))
		})
		.collect()
}
