// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Messages posted automatically in response to thread lifecycle events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threading_common_id::{TriggeredMessageId, TriggeredMessageItemId};

use crate::model::{EndpointChannel, ItemBody, ThreadType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TriggerKey {
	/// Welcome message for a new patient thread.
	NewPatient,
	/// Reply to the first message an actor posts in a thread.
	AwayMessage,
}

impl TriggerKey {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerKey::NewPatient => "NEW_PATIENT",
			TriggerKey::AwayMessage => "AWAY_MESSAGE",
		}
	}
}

impl std::str::FromStr for TriggerKey {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"NEW_PATIENT" => Ok(TriggerKey::NewPatient),
			"AWAY_MESSAGE" => Ok(TriggerKey::AwayMessage),
			_ => Err(format!("unknown trigger key '{s}'")),
		}
	}
}

/// Subkey for a welcome message, derived from how the patient arrived.
pub fn new_patient_subkey(source_type: &str, source_data: &str) -> String {
	format!("{source_type}:{source_data}")
}

/// Subkey for an away message.
pub fn away_message_subkey(actor_entity_type: &str, thread_type: ThreadType, channel: EndpointChannel) -> String {
	format!("{actor_entity_type}:{}:{}", thread_type.as_str(), channel.as_str())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredMessage {
	pub id: TriggeredMessageId,
	pub organization_entity_id: String,
	pub actor_entity_id: String,
	pub trigger_key: TriggerKey,
	pub trigger_subkey: String,
	pub enabled: bool,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredMessageItem {
	pub id: TriggeredMessageItemId,
	pub triggered_message_id: TriggeredMessageId,
	pub ordinal: i64,
	pub internal: bool,
	pub actor_entity_id: String,
	pub data: ItemBody,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
}
