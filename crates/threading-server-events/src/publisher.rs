// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use tracing::debug;

use crate::envelope::Envelope;
use crate::error::Result;
use crate::event::Event;
use crate::queue::TopicPublisher;
use crate::sns::topic_arn;

/// Publishes typed events to per-event topics.
#[derive(Clone)]
pub struct EventPublisher {
	env: String,
	namespace: String,
	topics: Arc<dyn TopicPublisher>,
}

impl EventPublisher {
	pub fn new(
		env: impl Into<String>,
		namespace: impl Into<String>,
		topics: Arc<dyn TopicPublisher>,
	) -> Self {
		Self {
			env: env.into(),
			namespace: namespace.into(),
			topics,
		}
	}

	pub fn env(&self) -> &str {
		&self.env
	}

	pub fn namespace(&self) -> &str {
		&self.namespace
	}

	/// Topic ARN that events of type `E` are published to.
	pub fn topic_arn<E: Event>(&self) -> String {
		topic_arn(&self.namespace, &E::resource_name(&self.env))
	}

	#[tracing::instrument(skip(self, event), fields(event = E::NAME, service = E::SERVICE.as_str()))]
	pub async fn publish<E: Event>(&self, event: &E) -> Result<()> {
		let body = serde_json::to_vec(event)?;
		let envelope = Envelope::new(E::SERVICE, body);
		let arn = self.topic_arn::<E>();
		self.topics
			.publish(&arn, &BASE64.encode(envelope.encode()))
			.await?;
		debug!(topic_arn = %arn, "event published");
		Ok(())
	}
}
