// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;

/// Milliseconds between the Unix epoch and 2016-01-01T00:00:00Z.
const EPOCH_OFFSET_MS: i64 = 1_451_606_400_000;
const SEQUENCE_BITS: u32 = 22;

static GLOBAL: IdGenerator = IdGenerator::new();

/// Hands out strictly increasing 64-bit values of the form
/// `(millis since 2016) << 22 | sequence`.
///
/// When more than 2^22 values are requested within one millisecond the
/// generator borrows from the next millisecond rather than repeating.
#[derive(Debug)]
pub struct IdGenerator {
	last: AtomicU64,
}

impl IdGenerator {
	pub const fn new() -> Self {
		Self {
			last: AtomicU64::new(0),
		}
	}

	pub fn next(&self) -> u64 {
		let millis = (Utc::now().timestamp_millis() - EPOCH_OFFSET_MS).max(1) as u64;
		let floor = millis << SEQUENCE_BITS;
		let mut prev = self.last.load(Ordering::Relaxed);
		loop {
			let candidate = floor.max(prev + 1);
			match self
				.last
				.compare_exchange_weak(prev, candidate, Ordering::AcqRel, Ordering::Relaxed)
			{
				Ok(_) => return candidate,
				Err(actual) => prev = actual,
			}
		}
	}
}

impl Default for IdGenerator {
	fn default() -> Self {
		Self::new()
	}
}

/// Returns the next value from the process-wide generator.
pub fn next_value() -> u64 {
	GLOBAL.next()
}
