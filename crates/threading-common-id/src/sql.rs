// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::{IdError, Result};

/// A raw column value handed to an ID for decoding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ScanSource<'a> {
	Null,
	Int(i64),
	UInt(u64),
	Text(&'a str),
	Bytes(&'a [u8]),
	Real(f64),
}

/// Accepts integers and decimal text. `NULL` decodes to the invalid zero value.
pub fn scan_value(src: ScanSource<'_>) -> Result<u64> {
	match src {
		ScanSource::Null => Ok(0),
		ScanSource::Int(v) => Ok(v as u64),
		ScanSource::UInt(v) => Ok(v),
		ScanSource::Text(s) => parse_decimal(s),
		ScanSource::Bytes(b) => {
			let s = std::str::from_utf8(b).map_err(|_| IdError::InvalidId(format!("{b:?}")))?;
			parse_decimal(s)
		}
		ScanSource::Real(_) => Err(IdError::UnsupportedSource("real")),
	}
}

fn parse_decimal(s: &str) -> Result<u64> {
	s.parse::<u64>().map_err(|_| IdError::InvalidId(s.to_string()))
}
