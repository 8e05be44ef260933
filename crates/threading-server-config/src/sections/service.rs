// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Service identity: the web domain used in deep links, the deployment
//! environment, and the namespace event topics live under.

use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct ServiceConfig {
	pub web_domain: String,
	pub environment: String,
	pub events_topic: String,
}

impl Default for ServiceConfig {
	fn default() -> Self {
		ServiceConfigLayer::default().finalize()
	}
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServiceConfigLayer {
	#[serde(default)]
	pub web_domain: Option<String>,
	#[serde(default)]
	pub environment: Option<String>,
	#[serde(default)]
	pub events_topic: Option<String>,
}

impl ServiceConfigLayer {
	pub fn merge(&mut self, other: ServiceConfigLayer) {
		if other.web_domain.is_some() {
			self.web_domain = other.web_domain;
		}
		if other.environment.is_some() {
			self.environment = other.environment;
		}
		if other.events_topic.is_some() {
			self.events_topic = other.events_topic;
		}
	}

	pub fn finalize(self) -> ServiceConfig {
		ServiceConfig {
			web_domain: self.web_domain.unwrap_or_else(|| "localhost".to_string()),
			environment: self.environment.unwrap_or_else(|| "dev".to_string()),
			events_topic: self.events_topic.unwrap_or_else(|| "threading-events".to_string()),
		}
	}
}
