// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Binary event envelope.
//!
//! Field 1 is the publishing service as a varint, field 2 the event body as
//! length-delimited bytes. Zero services and empty bodies are omitted on
//! encode, and unknown fields are skipped on decode, so older and newer
//! publishers interoperate.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{EventError, Result};

const WIRE_VARINT: u64 = 0;
const WIRE_FIXED64: u64 = 1;
const WIRE_LEN: u64 = 2;
const WIRE_FIXED32: u64 = 5;

const FIELD_SERVICE: u64 = 1;
const FIELD_EVENT: u64 = 2;

/// The service that published an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Service {
	#[default]
	Invalid,
	Excomms,
	Invite,
	Threading,
}

impl Service {
	pub fn as_str(&self) -> &'static str {
		match self {
			Service::Invalid => "INVALID",
			Service::Excomms => "EXCOMMS",
			Service::Invite => "INVITE",
			Service::Threading => "THREADING",
		}
	}

	pub fn code(&self) -> u64 {
		match self {
			Service::Invalid => 0,
			Service::Excomms => 1,
			Service::Invite => 2,
			Service::Threading => 3,
		}
	}

	/// Unknown codes decode as `Invalid` rather than failing.
	pub fn from_code(code: u64) -> Self {
		match code {
			1 => Service::Excomms,
			2 => Service::Invite,
			3 => Service::Threading,
			_ => Service::Invalid,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Envelope {
	pub service: Service,
	pub event: Bytes,
}

impl Envelope {
	pub fn new(service: Service, event: impl Into<Bytes>) -> Self {
		Self {
			service,
			event: event.into(),
		}
	}

	pub fn encode(&self) -> Bytes {
		let mut buf = BytesMut::with_capacity(self.event.len() + 12);
		if self.service != Service::Invalid {
			put_varint(&mut buf, FIELD_SERVICE << 3 | WIRE_VARINT);
			put_varint(&mut buf, self.service.code());
		}
		if !self.event.is_empty() {
			put_varint(&mut buf, FIELD_EVENT << 3 | WIRE_LEN);
			put_varint(&mut buf, self.event.len() as u64);
			buf.put_slice(&self.event);
		}
		buf.freeze()
	}

	pub fn decode(mut buf: impl Buf) -> Result<Self> {
		let mut envelope = Envelope::default();
		while buf.has_remaining() {
			let key = get_varint(&mut buf)?;
			let field = key >> 3;
			match (field, key & 0x7) {
				(FIELD_SERVICE, WIRE_VARINT) => {
					envelope.service = Service::from_code(get_varint(&mut buf)?);
				}
				(FIELD_EVENT, WIRE_LEN) => {
					let len = get_len(&mut buf)?;
					envelope.event = buf.copy_to_bytes(len);
				}
				(0, _) => return Err(EventError::Envelope("field number 0".to_string())),
				(_, WIRE_VARINT) => {
					get_varint(&mut buf)?;
				}
				(_, WIRE_FIXED64) => skip(&mut buf, 8)?,
				(_, WIRE_LEN) => {
					let len = get_len(&mut buf)?;
					buf.advance(len);
				}
				(_, WIRE_FIXED32) => skip(&mut buf, 4)?,
				(_, wire) => {
					return Err(EventError::Envelope(format!(
						"unsupported wire type {wire} for field {field}"
					)))
				}
			}
		}
		Ok(envelope)
	}
}

fn put_varint(buf: &mut BytesMut, mut v: u64) {
	while v >= 0x80 {
		buf.put_u8((v as u8 & 0x7f) | 0x80);
		v >>= 7;
	}
	buf.put_u8(v as u8);
}

fn get_varint(buf: &mut impl Buf) -> Result<u64> {
	let mut value = 0u64;
	for shift in (0..64).step_by(7) {
		if !buf.has_remaining() {
			return Err(EventError::Envelope("truncated varint".to_string()));
		}
		let b = buf.get_u8();
		value |= u64::from(b & 0x7f) << shift;
		if b & 0x80 == 0 {
			return Ok(value);
		}
	}
	Err(EventError::Envelope("varint overflow".to_string()))
}

fn get_len(buf: &mut impl Buf) -> Result<usize> {
	let len = get_varint(buf)? as usize;
	if len > buf.remaining() {
		return Err(EventError::Envelope(format!(
			"length {len} exceeds remaining {} bytes",
			buf.remaining()
		)));
	}
	Ok(len)
}

fn skip(buf: &mut impl Buf, n: usize) -> Result<()> {
	if buf.remaining() < n {
		return Err(EventError::Envelope("truncated fixed-width field".to_string()));
	}
	buf.advance(n);
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn encodes_known_wire_bytes() {
		let envelope = Envelope::new(Service::Invite, &b"hi"[..]);
		assert_eq!(&envelope.encode()[..], &[0x08, 0x02, 0x12, 0x02, b'h', b'i']);
	}

	#[test]
	fn defaults_are_omitted() {
		assert!(Envelope::default().encode().is_empty());
		assert_eq!(Envelope::decode(&b""[..]).unwrap(), Envelope::default());
	}

	#[test]
	fn long_bodies_use_multi_byte_lengths() {
		let body = vec![7u8; 300];
		let encoded = Envelope::new(Service::Threading, body.clone()).encode();
		assert_eq!(&encoded[2..5], &[0x12, 0xac, 0x02]);
		let decoded = Envelope::decode(encoded).unwrap();
		assert_eq!(decoded.service, Service::Threading);
		assert_eq!(&decoded.event[..], &body[..]);
	}

	#[test]
	fn skips_unknown_fields() {
		// field 3 varint, field 4 length-delimited, then the known fields
		let raw = [0x18, 0x96, 0x01, 0x22, 0x01, 0xff, 0x08, 0x01, 0x12, 0x01, b'x'];
		let decoded = Envelope::decode(&raw[..]).unwrap();
		assert_eq!(decoded.service, Service::Excomms);
		assert_eq!(&decoded.event[..], b"x");
	}

	#[test]
	fn rejects_truncated_input() {
		assert!(Envelope::decode(&[0x12, 0x05, b'a'][..]).is_err());
		assert!(Envelope::decode(&[0x08, 0x80][..]).is_err());
		assert!(Envelope::decode(&[0x0b][..]).is_err());
	}

	#[test]
	fn unknown_service_code_is_invalid() {
		let decoded = Envelope::decode(&[0x08, 0x63][..]).unwrap();
		assert_eq!(decoded.service, Service::Invalid);
	}
}
