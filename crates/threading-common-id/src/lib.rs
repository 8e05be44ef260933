// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Prefixed 64-bit identifiers.
//!
//! Every persisted object in the threading service is identified by a 64-bit
//! integer. On the wire and in logs the integer is rendered as
//! `<prefix><base32hex(value)>` where the value is encoded big-endian and the
//! `=` padding is stripped, giving exactly 13 data characters. In the database
//! the raw integer is stored.
//!
//! Each identifier kind is its own type (see [`ThreadId`], [`SavedQueryId`],
//! ...) so an ID for one kind of object cannot be passed where another is
//! expected. The zero value of every ID type is *not* valid; it encodes to SQL
//! `NULL` and to an empty string.

mod generator;
mod sql;

use std::fmt;

use base32::Alphabet;
use thiserror::Error;

pub use generator::{next_value, IdGenerator};
pub use sql::{scan_value, ScanSource};

const ALPHABET: Alphabet = Alphabet::Rfc4648Hex { padding: false };

/// Number of base32hex characters needed for a padding-stripped 8-byte value.
pub const ENCODED_LEN: usize = 13;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdError {
	#[error("invalid id: {0}")]
	InvalidId(String),

	#[error("unsupported scan source for id: {0}")]
	UnsupportedSource(&'static str),
}

pub type Result<T> = std::result::Result<T, IdError>;

/// Untyped identifier shared by all typed ID wrappers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId {
	prefix: &'static str,
	val: u64,
	is_valid: bool,
}

impl ObjectId {
	pub const fn empty(prefix: &'static str) -> Self {
		Self {
			prefix,
			val: 0,
			is_valid: false,
		}
	}

	pub const fn from_value(prefix: &'static str, val: u64) -> Self {
		Self {
			prefix,
			val,
			is_valid: val != 0,
		}
	}

	pub fn prefix(&self) -> &'static str {
		self.prefix
	}

	pub fn value(&self) -> u64 {
		self.val
	}

	pub fn is_valid(&self) -> bool {
		self.is_valid
	}

	/// Parses `<prefix><13 base32hex chars>`.
	///
	/// The input must be in canonical form: a different spelling of the same
	/// value (such as non-zero trailing bits in the last character) is rejected
	/// so that text and value stay in one-to-one correspondence.
	pub fn parse(prefix: &'static str, s: &str) -> Result<Self> {
		let data = s
			.strip_prefix(prefix)
			.ok_or_else(|| IdError::InvalidId(s.to_string()))?;
		if data.len() != ENCODED_LEN {
			return Err(IdError::InvalidId(s.to_string()));
		}
		if !data
			.bytes()
			.all(|b| b.is_ascii_digit() || (b'A'..=b'V').contains(&b))
		{
			return Err(IdError::InvalidId(s.to_string()));
		}
		let bytes = base32::decode(ALPHABET, data).ok_or_else(|| IdError::InvalidId(s.to_string()))?;
		let raw: [u8; 8] = bytes
			.as_slice()
			.try_into()
			.map_err(|_| IdError::InvalidId(s.to_string()))?;
		let val = u64::from_be_bytes(raw);
		if encode_value(val) != data {
			return Err(IdError::InvalidId(s.to_string()));
		}
		Ok(Self::from_value(prefix, val))
	}
}

impl fmt::Display for ObjectId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		if !self.is_valid {
			return Ok(());
		}
		write!(f, "{}{}", self.prefix, encode_value(self.val))
	}
}

fn encode_value(val: u64) -> String {
	base32::encode(ALPHABET, &val.to_be_bytes())
}

/// Declares a typed identifier with a fixed text prefix.
#[macro_export]
macro_rules! object_id {
	($(#[$meta:meta])* $name:ident, $prefix:expr) => {
		$(#[$meta])*
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
		pub struct $name($crate::ObjectId);

		impl $name {
			pub const PREFIX: &'static str = $prefix;

			/// Mints a new time-ordered ID.
			pub fn new() -> Self {
				Self($crate::ObjectId::from_value(Self::PREFIX, $crate::next_value()))
			}

			pub const fn empty() -> Self {
				Self($crate::ObjectId::empty(Self::PREFIX))
			}

			pub const fn from_value(val: u64) -> Self {
				Self($crate::ObjectId::from_value(Self::PREFIX, val))
			}

			pub fn parse(s: &str) -> $crate::Result<Self> {
				$crate::ObjectId::parse(Self::PREFIX, s).map(Self)
			}

			/// Decodes a value read from a database column or driver buffer.
			pub fn scan(src: $crate::ScanSource<'_>) -> $crate::Result<Self> {
				$crate::scan_value(src).map(Self::from_value)
			}

			pub fn value(&self) -> u64 {
				self.0.value()
			}

			pub fn is_valid(&self) -> bool {
				self.0.is_valid()
			}

			pub fn object_id(&self) -> $crate::ObjectId {
				self.0
			}
		}

		impl Default for $name {
			fn default() -> Self {
				Self::empty()
			}
		}

		impl ::std::fmt::Display for $name {
			fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
				::std::fmt::Display::fmt(&self.0, f)
			}
		}

		impl ::std::str::FromStr for $name {
			type Err = $crate::IdError;

			fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
				Self::parse(s)
			}
		}

		impl ::serde::Serialize for $name {
			fn serialize<S: ::serde::Serializer>(&self, serializer: S) -> ::std::result::Result<S::Ok, S::Error> {
				serializer.collect_str(self)
			}
		}

		impl<'de> ::serde::Deserialize<'de> for $name {
			fn deserialize<D: ::serde::Deserializer<'de>>(deserializer: D) -> ::std::result::Result<Self, D::Error> {
				let s = <::std::borrow::Cow<'de, str> as ::serde::Deserialize>::deserialize(deserializer)?;
				if s.is_empty() {
					return Ok(Self::empty());
				}
				Self::parse(&s).map_err(::serde::de::Error::custom)
			}
		}

		impl ::sqlx::Type<::sqlx::Sqlite> for $name {
			fn type_info() -> ::sqlx::sqlite::SqliteTypeInfo {
				<i64 as ::sqlx::Type<::sqlx::Sqlite>>::type_info()
			}

			fn compatible(ty: &::sqlx::sqlite::SqliteTypeInfo) -> bool {
				<i64 as ::sqlx::Type<::sqlx::Sqlite>>::compatible(ty)
			}
		}

		impl<'q> ::sqlx::Encode<'q, ::sqlx::Sqlite> for $name {
			fn encode_by_ref(
				&self,
				buf: &mut <::sqlx::Sqlite as ::sqlx::Database>::ArgumentBuffer<'q>,
			) -> ::std::result::Result<::sqlx::encode::IsNull, ::sqlx::error::BoxDynError> {
				if !self.is_valid() {
					return Ok(::sqlx::encode::IsNull::Yes);
				}
				<i64 as ::sqlx::Encode<'q, ::sqlx::Sqlite>>::encode_by_ref(&(self.value() as i64), buf)
			}
		}

		impl<'r> ::sqlx::Decode<'r, ::sqlx::Sqlite> for $name {
			fn decode(
				value: <::sqlx::Sqlite as ::sqlx::Database>::ValueRef<'r>,
			) -> ::std::result::Result<Self, ::sqlx::error::BoxDynError> {
				let raw = <i64 as ::sqlx::Decode<'r, ::sqlx::Sqlite>>::decode(value)?;
				Ok(Self::scan($crate::ScanSource::Int(raw))?)
			}
		}
	};
}

object_id!(
	/// Identifies a thread.
	ThreadId,
	"t_"
);
object_id!(
	/// Identifies a single item (message or event) within a thread.
	ThreadItemId,
	"ti_"
);
object_id!(SavedQueryId, "sq_");
object_id!(SavedMessageId, "sm_");
object_id!(ScheduledMessageId, "schm_");
object_id!(TriggeredMessageId, "trm_");
object_id!(TriggeredMessageItemId, "trmi_");
object_id!(BatchJobId, "batchJob_");
object_id!(BatchTaskId, "batchTask_");
