// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Topic notification wrapper delivered to subscribed queues.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::error::Result;

/// The JSON document a queue receives for each topic publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnsMessage {
	/// Base64 of the encoded [`Envelope`].
	#[serde(rename = "Message")]
	pub message: String,
	#[serde(rename = "TopicArn")]
	pub topic_arn: String,
}

impl SnsMessage {
	pub fn new(envelope: &Envelope, topic_arn: impl Into<String>) -> Self {
		Self {
			message: BASE64.encode(envelope.encode()),
			topic_arn: topic_arn.into(),
		}
	}

	pub fn parse(body: &str) -> Result<Self> {
		Ok(serde_json::from_str(body)?)
	}

	pub fn envelope(&self) -> Result<Envelope> {
		let raw = BASE64.decode(self.message.as_bytes())?;
		Envelope::decode(raw.as_slice())
	}

	pub fn resource_name(&self) -> &str {
		resource_name_from_arn(&self.topic_arn)
	}
}

/// `{env}-{service}-{event}`, lowercased.
pub fn resource_name(env: &str, service: &str, event: &str) -> String {
	format!("{env}-{service}-{event}").to_lowercase()
}

/// The last `:`-separated segment of an ARN.
pub fn resource_name_from_arn(arn: &str) -> &str {
	arn.rsplit(':').next().unwrap_or(arn)
}

/// Topic ARN for a resource inside a namespace.
pub fn topic_arn(namespace: &str, resource: &str) -> String {
	format!("arn:aws:sns:{namespace}:{resource}")
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::envelope::Service;

	#[test]
	fn resource_name_is_lowercased() {
		assert_eq!(
			resource_name("Prod", "THREADING", "PublishedThreadItem"),
			"prod-threading-publishedthreaditem"
		);
	}

	#[test]
	fn resource_name_from_arn_takes_last_segment() {
		assert_eq!(
			resource_name_from_arn("arn:aws:sns:us-east-1:1234:dev-invite-event"),
			"dev-invite-event"
		);
		assert_eq!(resource_name_from_arn("bare"), "bare");
	}

	#[test]
	fn wrapper_json_uses_transport_field_names() {
		let msg = SnsMessage::new(
			&Envelope::new(Service::Excomms, &b"{}"[..]),
			topic_arn("threading-events", "dev-excomms-event"),
		);
		let json = serde_json::to_value(&msg).unwrap();
		assert!(json.get("Message").is_some());
		assert_eq!(
			json["TopicArn"],
			"arn:aws:sns:threading-events:dev-excomms-event"
		);

		let parsed = SnsMessage::parse(&json.to_string()).unwrap();
		assert_eq!(parsed.resource_name(), "dev-excomms-event");
		let envelope = parsed.envelope().unwrap();
		assert_eq!(envelope.service, Service::Excomms);
		assert_eq!(&envelope.event[..], b"{}");
	}

	#[test]
	fn bad_base64_is_an_error() {
		let msg = SnsMessage {
			message: "not base64!".to_string(),
			topic_arn: "arn:x".to_string(),
		};
		assert!(msg.envelope().is_err());
	}
}
