//! DNS message codec, limited to what multicast DNS discovery needs.
//!
//! Names are decoded to dotted form without the trailing root dot. Compression
//! pointers are followed when decoding (bounded hop count); names are never
//! compressed when encoding.

use std::net::{Ipv4Addr, Ipv6Addr};

use thiserror::Error;

pub const TYPE_A: u16 = 1;
pub const TYPE_PTR: u16 = 12;
pub const TYPE_TXT: u16 = 16;
pub const TYPE_AAAA: u16 = 28;
pub const TYPE_SRV: u16 = 33;

pub const CLASS_IN: u16 = 1;

/// Top bit of the question class: ask for a unicast reply.
const UNICAST_RESPONSE: u16 = 0x8000;
/// Top bit of a record class in mDNS responses.
const CACHE_FLUSH: u16 = 0x8000;

const FLAG_RESPONSE: u16 = 0x8000;
const FLAG_AUTHORITATIVE: u16 = 0x0400;

const HEADER_LEN: usize = 12;
const MAX_LABEL_LEN: usize = 63;
const MAX_NAME_LEN: usize = 255;
const MAX_POINTER_HOPS: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WireError {
	#[error("message truncated at offset {0}")]
	Truncated(usize),
	#[error("invalid label header {0:#04x}")]
	BadLabel(u8),
	#[error("compression pointer loop or out-of-range target")]
	BadPointer,
	#[error("name exceeds {MAX_NAME_LEN} bytes")]
	NameTooLong,
	#[error("label {0:?} is empty or longer than {MAX_LABEL_LEN} bytes")]
	BadLabelLength(String),
	#[error("malformed rdata for record type {0}")]
	BadRdata(u16),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
	pub name: String,
	pub qtype: u16,
	pub unicast_response: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordData {
	A(Ipv4Addr),
	Aaaa(Ipv6Addr),
	Ptr(String),
	Srv {
		priority: u16,
		weight: u16,
		port: u16,
		target: String,
	},
	/// Character strings in wire order; may be empty.
	Txt(Vec<Vec<u8>>),
	Other {
		rtype: u16,
		data: Vec<u8>,
	},
}

impl RecordData {
	pub fn rtype(&self) -> u16 {
		match self {
			Self::A(_) => TYPE_A,
			Self::Aaaa(_) => TYPE_AAAA,
			Self::Ptr(_) => TYPE_PTR,
			Self::Srv { .. } => TYPE_SRV,
			Self::Txt(_) => TYPE_TXT,
			Self::Other { rtype, .. } => *rtype,
		}
	}
}

/// A resource record from any section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
	pub name: String,
	/// Record class with the cache-flush bit masked off.
	pub class: u16,
	pub ttl: u32,
	pub data: RecordData,
}

impl Record {
	pub fn new(name: impl Into<String>, ttl: u32, data: RecordData) -> Self {
		Self {
			name: name.into(),
			class: CLASS_IN,
			ttl,
			data,
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
	pub id: u16,
	pub is_response: bool,
	pub questions: Vec<Question>,
	pub answers: Vec<Record>,
	pub authorities: Vec<Record>,
	pub additionals: Vec<Record>,
}

/// Encodes a single PTR question for `name`.
pub fn encode_query(name: &str, unicast_response: bool) -> Result<Vec<u8>, WireError> {
	let mut w = Writer::default();
	w.header(0, 1, 0, 0);
	w.name(name)?;
	w.u16(TYPE_PTR);
	w.u16(if unicast_response { CLASS_IN | UNICAST_RESPONSE } else { CLASS_IN });
	Ok(w.buf)
}

/// Encodes an authoritative response carrying `answers` and `additionals`.
pub fn encode_response(answers: &[Record], additionals: &[Record]) -> Result<Vec<u8>, WireError> {
	let mut w = Writer::default();
	w.header(
		FLAG_RESPONSE | FLAG_AUTHORITATIVE,
		0,
		answers.len() as u16,
		additionals.len() as u16,
	);
	for record in answers.iter().chain(additionals) {
		w.record(record)?;
	}
	Ok(w.buf)
}

pub fn decode(buf: &[u8]) -> Result<Message, WireError> {
	let mut r = Reader { buf, pos: 0 };
	if buf.len() < HEADER_LEN {
		return Err(WireError::Truncated(buf.len()));
	}

	let id = r.u16()?;
	let flags = r.u16()?;
	let qdcount = r.u16()?;
	let ancount = r.u16()?;
	let nscount = r.u16()?;
	let arcount = r.u16()?;

	let mut message = Message {
		id,
		is_response: flags & FLAG_RESPONSE != 0,
		..Message::default()
	};

	for _ in 0..qdcount {
		let name = r.name()?;
		let qtype = r.u16()?;
		let qclass = r.u16()?;
		message.questions.push(Question {
			name,
			qtype,
			unicast_response: qclass & UNICAST_RESPONSE != 0,
		});
	}
	for _ in 0..ancount {
		message.answers.push(r.record()?);
	}
	for _ in 0..nscount {
		message.authorities.push(r.record()?);
	}
	for _ in 0..arcount {
		message.additionals.push(r.record()?);
	}

	Ok(message)
}

struct Reader<'a> {
	buf: &'a [u8],
	pos: usize,
}

impl<'a> Reader<'a> {
	fn bytes(&mut self, len: usize) -> Result<&'a [u8], WireError> {
		let end = self.pos.checked_add(len).ok_or(WireError::Truncated(self.pos))?;
		let slice = self.buf.get(self.pos..end).ok_or(WireError::Truncated(self.pos))?;
		self.pos = end;
		Ok(slice)
	}

	fn u16(&mut self) -> Result<u16, WireError> {
		let b = self.bytes(2)?;
		Ok(u16::from_be_bytes([b[0], b[1]]))
	}

	fn u32(&mut self) -> Result<u32, WireError> {
		let b = self.bytes(4)?;
		Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
	}

	fn name(&mut self) -> Result<String, WireError> {
		let (name, end) = read_name(self.buf, self.pos)?;
		self.pos = end;
		Ok(name)
	}

	fn record(&mut self) -> Result<Record, WireError> {
		let name = self.name()?;
		let rtype = self.u16()?;
		let class = self.u16()?;
		let ttl = self.u32()?;
		let rdlen = self.u16()? as usize;
		let rdata_start = self.pos;
		let rdata = self.bytes(rdlen)?;

		let data = match rtype {
			TYPE_A => {
				let octets: [u8; 4] = rdata.try_into().map_err(|_| WireError::BadRdata(rtype))?;
				RecordData::A(Ipv4Addr::from(octets))
			}
			TYPE_AAAA => {
				let octets: [u8; 16] = rdata.try_into().map_err(|_| WireError::BadRdata(rtype))?;
				RecordData::Aaaa(Ipv6Addr::from(octets))
			}
			TYPE_PTR => RecordData::Ptr(read_name(self.buf, rdata_start)?.0),
			TYPE_SRV => {
				if rdata.len() < 7 {
					return Err(WireError::BadRdata(rtype));
				}
				RecordData::Srv {
					priority: u16::from_be_bytes([rdata[0], rdata[1]]),
					weight: u16::from_be_bytes([rdata[2], rdata[3]]),
					port: u16::from_be_bytes([rdata[4], rdata[5]]),
					target: read_name(self.buf, rdata_start + 6)?.0,
				}
			}
			TYPE_TXT => RecordData::Txt(read_character_strings(rdata).ok_or(WireError::BadRdata(rtype))?),
			_ => RecordData::Other {
				rtype,
				data: rdata.to_vec(),
			},
		};

		Ok(Record {
			name,
			class: class & !CACHE_FLUSH,
			ttl,
			data,
		})
	}
}

/// Reads a possibly compressed name at `start`.
///
/// Returns the name and the offset just past it in the original position
/// (after the first pointer, if any).
fn read_name(buf: &[u8], start: usize) -> Result<(String, usize), WireError> {
	let mut labels: Vec<String> = Vec::new();
	let mut pos = start;
	let mut resume = None;
	let mut hops = 0;
	let mut total = 0;

	loop {
		let header = *buf.get(pos).ok_or(WireError::Truncated(pos))?;
		match header & 0xC0 {
			0x00 if header == 0 => {
				pos += 1;
				break;
			}
			0x00 => {
				let len = header as usize;
				let label = buf.get(pos + 1..pos + 1 + len).ok_or(WireError::Truncated(pos))?;
				total += len + 1;
				if total > MAX_NAME_LEN {
					return Err(WireError::NameTooLong);
				}
				labels.push(String::from_utf8_lossy(label).into_owned());
				pos += 1 + len;
			}
			0xC0 => {
				let low = *buf.get(pos + 1).ok_or(WireError::Truncated(pos))?;
				let target = (((header & 0x3F) as usize) << 8) | low as usize;
				hops += 1;
				if hops > MAX_POINTER_HOPS || target >= buf.len() {
					return Err(WireError::BadPointer);
				}
				resume.get_or_insert(pos + 2);
				pos = target;
			}
			_ => return Err(WireError::BadLabel(header)),
		}
	}

	Ok((labels.join("."), resume.unwrap_or(pos)))
}

fn read_character_strings(rdata: &[u8]) -> Option<Vec<Vec<u8>>> {
	let mut strings = Vec::new();
	let mut i = 0;
	while i < rdata.len() {
		let len = rdata[i] as usize;
		strings.push(rdata.get(i + 1..i + 1 + len)?.to_vec());
		i += 1 + len;
	}
	Some(strings)
}

#[derive(Default)]
struct Writer {
	buf: Vec<u8>,
}

impl Writer {
	fn header(&mut self, flags: u16, qdcount: u16, ancount: u16, arcount: u16) {
		self.u16(0);
		self.u16(flags);
		self.u16(qdcount);
		self.u16(ancount);
		self.u16(0);
		self.u16(arcount);
	}

	fn u16(&mut self, value: u16) {
		self.buf.extend_from_slice(&value.to_be_bytes());
	}

	fn u32(&mut self, value: u32) {
		self.buf.extend_from_slice(&value.to_be_bytes());
	}

	fn name(&mut self, name: &str) -> Result<(), WireError> {
		let trimmed = name.trim_end_matches('.');
		if trimmed.len() + 2 > MAX_NAME_LEN {
			return Err(WireError::NameTooLong);
		}
		if !trimmed.is_empty() {
			for label in trimmed.split('.') {
				if label.is_empty() || label.len() > MAX_LABEL_LEN {
					return Err(WireError::BadLabelLength(label.to_string()));
				}
				self.buf.push(label.len() as u8);
				self.buf.extend_from_slice(label.as_bytes());
			}
		}
		self.buf.push(0);
		Ok(())
	}

	fn record(&mut self, record: &Record) -> Result<(), WireError> {
		self.name(&record.name)?;
		self.u16(record.data.rtype());
		self.u16(record.class);
		self.u32(record.ttl);

		let len_at = self.buf.len();
		self.u16(0);
		let start = self.buf.len();
		match &record.data {
			RecordData::A(addr) => self.buf.extend_from_slice(&addr.octets()),
			RecordData::Aaaa(addr) => self.buf.extend_from_slice(&addr.octets()),
			RecordData::Ptr(target) => self.name(target)?,
			RecordData::Srv {
				priority,
				weight,
				port,
				target,
			} => {
				self.u16(*priority);
				self.u16(*weight);
				self.u16(*port);
				self.name(target)?;
			}
			RecordData::Txt(strings) => {
				for s in strings {
					let len = u8::try_from(s.len()).map_err(|_| WireError::BadRdata(TYPE_TXT))?;
					self.buf.push(len);
					self.buf.extend_from_slice(s);
				}
			}
			RecordData::Other { data, .. } => self.buf.extend_from_slice(data),
		}

		let rdlen = u16::try_from(self.buf.len() - start).map_err(|_| WireError::BadRdata(record.data.rtype()))?;
		self.buf[len_at..len_at + 2].copy_from_slice(&rdlen.to_be_bytes());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn query_has_one_ptr_question_with_unicast_bit() {
		let packet = encode_query("_hostlink._tcp.local.", true).unwrap();
		let message = decode(&packet).unwrap();

		assert!(!message.is_response);
		assert_eq!(
			message.questions,
			vec![Question {
				name: "_hostlink._tcp.local".to_string(),
				qtype: TYPE_PTR,
				unicast_response: true,
			}]
		);
		assert!(message.answers.is_empty());
	}

	#[test]
	fn response_records_decode_by_section() {
		let answers = [Record::new(
			"_hostlink._tcp.local",
			120,
			RecordData::Ptr("bench._hostlink._tcp.local".to_string()),
		)];
		let additionals = [
			Record::new(
				"bench._hostlink._tcp.local",
				120,
				RecordData::Srv {
					priority: 0,
					weight: 0,
					port: 4567,
					target: "bench.local".to_string(),
				},
			),
			Record::new("bench.local", 120, RecordData::A(Ipv4Addr::new(10, 0, 0, 7))),
			Record::new(
				"bench._hostlink._tcp.local",
				4500,
				RecordData::Txt(vec![b"version=1".to_vec(), Vec::new()]),
			),
		];

		let message = decode(&encode_response(&answers, &additionals).unwrap()).unwrap();
		assert!(message.is_response);
		assert_eq!(message.answers, answers);
		assert_eq!(message.additionals, additionals);
	}

	#[test]
	fn follows_compression_pointers() {
		// One question "_x._tcp.local" at offset 12, one PTR answer whose owner
		// and target both point back into it.
		let mut message = vec![0, 0, 0x84, 0, 0, 1, 0, 1, 0, 0, 0, 0];
		message.extend_from_slice(&[2, b'_', b'x', 4, b'_', b't', b'c', b'p', 5, b'l', b'o', b'c', b'a', b'l', 0]);
		message.extend_from_slice(&TYPE_PTR.to_be_bytes());
		message.extend_from_slice(&CLASS_IN.to_be_bytes());

		message.extend_from_slice(&[1, b'a', 0xC0, 12]);
		message.extend_from_slice(&TYPE_PTR.to_be_bytes());
		message.extend_from_slice(&(CLASS_IN | CACHE_FLUSH).to_be_bytes());
		message.extend_from_slice(&60u32.to_be_bytes());
		message.extend_from_slice(&2u16.to_be_bytes());
		message.extend_from_slice(&[0xC0, 20]);

		let decoded = decode(&message).unwrap();
		assert_eq!(decoded.questions[0].name, "_x._tcp.local");
		assert_eq!(decoded.answers[0].name, "a._x._tcp.local");
		assert_eq!(decoded.answers[0].class, CLASS_IN);
		assert_eq!(decoded.answers[0].ttl, 60);
		assert_eq!(decoded.answers[0].data, RecordData::Ptr("local".to_string()));
	}

	#[test]
	fn pointer_loops_are_rejected() {
		let mut message = vec![0, 0, 0x84, 0, 0, 1, 0, 0, 0, 0, 0, 0];
		message.extend_from_slice(&[0xC0, 12]);
		message.extend_from_slice(&TYPE_PTR.to_be_bytes());
		message.extend_from_slice(&CLASS_IN.to_be_bytes());

		assert_eq!(decode(&message), Err(WireError::BadPointer));
	}

	#[test]
	fn truncated_messages_are_errors() {
		assert!(matches!(decode(&[0; 5]), Err(WireError::Truncated(_))));

		let packet = encode_query("_hostlink._tcp.local", false).unwrap();
		assert!(decode(&packet[..packet.len() - 3]).is_err());
	}

	#[test]
	fn bad_address_length_is_rejected() {
		let record = Record::new(
			"x.local",
			10,
			RecordData::Other {
				rtype: TYPE_A,
				data: vec![1, 2, 3],
			},
		);
		let packet = encode_response(&[record], &[]).unwrap();
		assert_eq!(decode(&packet), Err(WireError::BadRdata(TYPE_A)));
	}

	#[test]
	fn overlong_labels_cannot_be_encoded() {
		let label = "a".repeat(64);
		assert!(matches!(
			encode_query(&format!("{label}.local"), true),
			Err(WireError::BadLabelLength(_))
		));
		assert!(matches!(encode_query("a..local", true), Err(WireError::BadLabelLength(_))));
	}
}
