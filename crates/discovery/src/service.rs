use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Discovered services keyed by instance name.
pub type Services = BTreeMap<String, Service>;

/// A service instance assembled from PTR, SRV, A/AAAA and TXT records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
	/// Full instance name, e.g. `bench._hostlink._tcp.local`.
	pub name: String,
	/// Requested types that pointed at this instance, in request order.
	pub types: Vec<String>,
	/// `None` until an SRV record for the instance is known.
	pub address: Option<ServiceAddress>,
	/// TXT key/value pairs; `None` when no TXT record is known.
	pub properties: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAddress {
	/// SRV target host name.
	pub domain: String,
	pub ipv4: Option<Ipv4Addr>,
	pub ipv6: Option<Ipv6Addr>,
	pub port: u16,
}

impl ServiceAddress {
	/// Best address to dial: IPv4, then IPv6.
	pub fn ip(&self) -> Option<IpAddr> {
		self.ipv4.map(IpAddr::V4).or(self.ipv6.map(IpAddr::V6))
	}

	/// Host part for a URL, falling back to the SRV target name.
	pub fn host(&self) -> String {
		match self.ip() {
			Some(ip) => ip.to_string(),
			None => self.domain.clone(),
		}
	}
}

impl Service {
	pub(crate) fn new(name: &str) -> Self {
		Self {
			name: name.to_string(),
			types: Vec::new(),
			address: None,
			properties: None,
		}
	}

	pub fn property(&self, key: &str) -> Option<&str> {
		self.properties.as_ref()?.get(key).map(String::as_str)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn serializes_with_camel_case_and_nulls() {
		let service = Service {
			name: "bench._hostlink._tcp.local".to_string(),
			types: vec!["_hostlink._tcp.local".to_string()],
			address: Some(ServiceAddress {
				domain: "bench.local".to_string(),
				ipv4: Some(Ipv4Addr::new(10, 0, 0, 7)),
				ipv6: None,
				port: 4567,
			}),
			properties: None,
		};

		assert_eq!(
			serde_json::to_value(&service).unwrap(),
			json!({
				"name": "bench._hostlink._tcp.local",
				"types": ["_hostlink._tcp.local"],
				"address": {"domain": "bench.local", "ipv4": "10.0.0.7", "ipv6": null, "port": 4567},
				"properties": null
			})
		);
	}

	#[test]
	fn host_prefers_ipv4_then_ipv6_then_domain() {
		let mut address = ServiceAddress {
			domain: "bench.local".to_string(),
			ipv4: None,
			ipv6: None,
			port: 1,
		};
		assert_eq!(address.host(), "bench.local");

		address.ipv6 = Some(Ipv6Addr::LOCALHOST);
		assert_eq!(address.host(), "::1");

		address.ipv4 = Some(Ipv4Addr::LOCALHOST);
		assert_eq!(address.host(), "127.0.0.1");
	}
}
