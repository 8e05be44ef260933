// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threading_common_id::{ScheduledMessageId, ThreadId, ThreadItemId};

use crate::model::{ItemBody, ItemType};

/// Lifecycle of a scheduled message. `Sent` and `Deleted` are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduledMessageStatus {
	#[default]
	Pending,
	Sent,
	Deleted,
}

impl ScheduledMessageStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			ScheduledMessageStatus::Pending => "PENDING",
			ScheduledMessageStatus::Sent => "SENT",
			ScheduledMessageStatus::Deleted => "DELETED",
		}
	}

	pub fn is_terminal(&self) -> bool {
		!matches!(self, ScheduledMessageStatus::Pending)
	}
}

impl std::str::FromStr for ScheduledMessageStatus {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"PENDING" => Ok(ScheduledMessageStatus::Pending),
			"SENT" => Ok(ScheduledMessageStatus::Sent),
			"DELETED" => Ok(ScheduledMessageStatus::Deleted),
			_ => Err(format!("unknown scheduled message status '{s}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledMessage {
	pub id: ScheduledMessageId,
	pub thread_id: ThreadId,
	pub actor_entity_id: String,
	pub item_type: ItemType,
	pub internal: bool,
	pub content: ItemBody,
	pub scheduled_for: DateTime<Utc>,
	pub sent_at: Option<DateTime<Utc>>,
	pub sent_thread_item_id: Option<ThreadItemId>,
	pub status: ScheduledMessageStatus,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
}

impl ScheduledMessage {
	/// A scheduled message is due once its time has passed and it has not
	/// already been sent or deleted.
	pub fn is_due(&self, now: DateTime<Utc>) -> bool {
		self.status == ScheduledMessageStatus::Pending && self.scheduled_for <= now
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::Message;
	use chrono::Duration;

	fn scheduled(status: ScheduledMessageStatus, at: DateTime<Utc>) -> ScheduledMessage {
		ScheduledMessage {
			id: ScheduledMessageId::from_value(1),
			thread_id: ThreadId::from_value(2),
			actor_entity_id: "actor".into(),
			item_type: ItemType::Message,
			internal: false,
			content: ItemBody::Message(Message {
				text: "hi".into(),
				..Default::default()
			}),
			scheduled_for: at,
			sent_at: None,
			sent_thread_item_id: None,
			status,
			created: at,
			modified: at,
		}
	}

	#[test]
	fn due_only_when_pending_and_past() {
		let now = Utc::now();
		assert!(scheduled(ScheduledMessageStatus::Pending, now).is_due(now));
		assert!(!scheduled(ScheduledMessageStatus::Pending, now + Duration::seconds(1)).is_due(now));
		assert!(!scheduled(ScheduledMessageStatus::Sent, now).is_due(now));
		assert!(!scheduled(ScheduledMessageStatus::Deleted, now).is_due(now));
	}

	#[test]
	fn status_round_trip() {
		for s in [
			ScheduledMessageStatus::Pending,
			ScheduledMessageStatus::Sent,
			ScheduledMessageStatus::Deleted,
		] {
			assert_eq!(s.as_str().parse::<ScheduledMessageStatus>().unwrap(), s);
		}
		assert!("LATER".parse::<ScheduledMessageStatus>().is_err());
		assert!(ScheduledMessageStatus::Sent.is_terminal());
	}
}
