// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Timestamps are persisted as integer microseconds since the Unix epoch.

use chrono::{DateTime, Utc};

use crate::error::{DbError, Result};

pub fn to_micros(t: DateTime<Utc>) -> i64 {
	t.timestamp_micros()
}

pub fn from_micros(us: i64) -> DateTime<Utc> {
	DateTime::<Utc>::from_timestamp_micros(us).unwrap_or_default()
}

pub fn opt_from_micros(us: Option<i64>) -> Option<DateTime<Utc>> {
	us.map(from_micros)
}

/// Renders a time as an iteration cursor. Sub-microsecond precision is dropped.
pub fn format_time_cursor(t: DateTime<Utc>) -> String {
	to_micros(t).to_string()
}

pub fn parse_time_cursor(s: &str) -> Result<DateTime<Utc>> {
	let us: i64 = s
		.parse()
		.map_err(|_| DbError::InvalidIterator(format!("invalid time cursor '{s}'")))?;
	DateTime::<Utc>::from_timestamp_micros(us)
		.ok_or_else(|| DbError::InvalidIterator(format!("time cursor out of range '{s}'")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{DurationRound, TimeDelta};
	use proptest::prelude::*;

	#[test]
	fn cursor_drops_nanoseconds() {
		let t = DateTime::<Utc>::from_timestamp(1_500_000_000, 123_456_789).unwrap();
		let c = format_time_cursor(t);
		assert_eq!(c, "1500000000123456");
		let back = parse_time_cursor(&c).unwrap();
		assert_eq!(back, t.duration_trunc(TimeDelta::microseconds(1)).unwrap());
	}

	#[test]
	fn bad_cursor_is_invalid_iterator() {
		assert!(matches!(parse_time_cursor("abc"), Err(DbError::InvalidIterator(_))));
		assert!(matches!(parse_time_cursor(""), Err(DbError::InvalidIterator(_))));
	}

	proptest! {
		#[test]
		fn cursor_round_trip(us in 0i64..4_000_000_000_000_000) {
			let t = from_micros(us);
			prop_assert_eq!(parse_time_cursor(&format_time_cursor(t)).unwrap(), t);
		}
	}
}
