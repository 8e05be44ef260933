// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queue subscriber tuning.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberConfig {
	/// How long a receive call waits for messages before returning empty.
	pub queue_wait_secs: u64,
	/// How long a received message stays hidden before it is redelivered.
	pub visibility_timeout_secs: u64,
	pub stop_wait_secs: u64,
}

impl SubscriberConfig {
	pub fn queue_wait(&self) -> Duration {
		Duration::from_secs(self.queue_wait_secs)
	}

	pub fn visibility_timeout(&self) -> Duration {
		Duration::from_secs(self.visibility_timeout_secs)
	}

	pub fn stop_wait(&self) -> Duration {
		Duration::from_secs(self.stop_wait_secs)
	}
}

impl Default for SubscriberConfig {
	fn default() -> Self {
		Self {
			queue_wait_secs: 20,
			visibility_timeout_secs: 30,
			stop_wait_secs: 10,
		}
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriberConfigLayer {
	#[serde(default)]
	pub queue_wait_secs: Option<u64>,
	#[serde(default)]
	pub visibility_timeout_secs: Option<u64>,
	#[serde(default)]
	pub stop_wait_secs: Option<u64>,
}

impl SubscriberConfigLayer {
	pub fn merge(&mut self, other: SubscriberConfigLayer) {
		if other.queue_wait_secs.is_some() {
			self.queue_wait_secs = other.queue_wait_secs;
		}
		if other.visibility_timeout_secs.is_some() {
			self.visibility_timeout_secs = other.visibility_timeout_secs;
		}
		if other.stop_wait_secs.is_some() {
			self.stop_wait_secs = other.stop_wait_secs;
		}
	}

	pub fn finalize(self) -> SubscriberConfig {
		let defaults = SubscriberConfig::default();
		SubscriberConfig {
			queue_wait_secs: self.queue_wait_secs.unwrap_or(defaults.queue_wait_secs),
			visibility_timeout_secs: self
				.visibility_timeout_secs
				.unwrap_or(defaults.visibility_timeout_secs),
			stop_wait_secs: self.stop_wait_secs.unwrap_or(defaults.stop_wait_secs),
		}
	}
}
