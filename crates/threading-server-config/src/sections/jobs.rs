// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background jobs configuration section.

use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct JobsConfigLayer {
	pub scheduled_messages_interval_secs: Option<u64>,
	pub batch_tasks_interval_secs: Option<u64>,
	pub batch_max_pending_tasks: Option<u32>,
	pub batch_post_messages_lease_secs: Option<u64>,
	pub history_retention_days: Option<u32>,
}

impl JobsConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.scheduled_messages_interval_secs.is_some() {
			self.scheduled_messages_interval_secs = other.scheduled_messages_interval_secs;
		}
		if other.batch_tasks_interval_secs.is_some() {
			self.batch_tasks_interval_secs = other.batch_tasks_interval_secs;
		}
		if other.batch_max_pending_tasks.is_some() {
			self.batch_max_pending_tasks = other.batch_max_pending_tasks;
		}
		if other.batch_post_messages_lease_secs.is_some() {
			self.batch_post_messages_lease_secs = other.batch_post_messages_lease_secs;
		}
		if other.history_retention_days.is_some() {
			self.history_retention_days = other.history_retention_days;
		}
	}

	pub fn finalize(self) -> JobsConfig {
		let defaults = JobsConfig::default();
		JobsConfig {
			scheduled_messages_interval_secs: self
				.scheduled_messages_interval_secs
				.unwrap_or(defaults.scheduled_messages_interval_secs),
			batch_tasks_interval_secs: self
				.batch_tasks_interval_secs
				.unwrap_or(defaults.batch_tasks_interval_secs),
			batch_max_pending_tasks: self
				.batch_max_pending_tasks
				.unwrap_or(defaults.batch_max_pending_tasks),
			batch_post_messages_lease_secs: self
				.batch_post_messages_lease_secs
				.unwrap_or(defaults.batch_post_messages_lease_secs),
			history_retention_days: self
				.history_retention_days
				.unwrap_or(defaults.history_retention_days),
		}
	}
}

#[derive(Debug, Clone, PartialEq)]
pub struct JobsConfig {
	pub scheduled_messages_interval_secs: u64,
	pub batch_tasks_interval_secs: u64,
	/// Upper bound on tasks leased per sweep.
	pub batch_max_pending_tasks: u32,
	pub batch_post_messages_lease_secs: u64,
	pub history_retention_days: u32,
}

impl JobsConfig {
	pub fn scheduled_messages_interval(&self) -> Duration {
		Duration::from_secs(self.scheduled_messages_interval_secs)
	}

	pub fn batch_tasks_interval(&self) -> Duration {
		Duration::from_secs(self.batch_tasks_interval_secs)
	}

	pub fn batch_post_messages_lease(&self) -> Duration {
		Duration::from_secs(self.batch_post_messages_lease_secs)
	}
}

impl Default for JobsConfig {
	fn default() -> Self {
		Self {
			scheduled_messages_interval_secs: 60,
			batch_tasks_interval_secs: 5,
			batch_max_pending_tasks: 200,
			batch_post_messages_lease_secs: 60,
			history_retention_days: 30,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_layer_finalize_defaults() {
		let config = JobsConfigLayer::default().finalize();
		assert_eq!(config, JobsConfig::default());
		assert_eq!(config.batch_tasks_interval(), Duration::from_secs(5));
	}

	#[test]
	fn test_merge_overwrites() {
		let mut base = JobsConfigLayer {
			batch_tasks_interval_secs: Some(10),
			history_retention_days: Some(90),
			..Default::default()
		};
		base.merge(JobsConfigLayer {
			history_retention_days: Some(7),
			..Default::default()
		});
		assert_eq!(base.batch_tasks_interval_secs, Some(10));
		assert_eq!(base.history_retention_days, Some(7));
	}

	#[test]
	fn test_deserialize_layer_partial() {
		let layer: JobsConfigLayer = toml::from_str("batch_max_pending_tasks = 50").unwrap();
		assert_eq!(layer.batch_max_pending_tasks, Some(50));
		assert!(layer.scheduled_messages_interval_secs.is_none());
	}
}
