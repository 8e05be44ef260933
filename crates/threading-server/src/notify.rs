// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Push notifications for new messages and badge refreshes.
//!
//! Each recipient gets its own short message. An empty short message is a
//! silent push: the client refreshes state without alerting the user.

use std::collections::{HashMap, HashSet};

use threading_common_thread::{
	truncate_with_ellipsis, Message, ReferenceType, Thread, ThreadEntity, ThreadItem, ThreadType, SUMMARY_MAX_BYTES,
};
use threading_server_db::{DbError, ThreadEntityUpdate};

use crate::clients::{Notification, NotificationKind};
use crate::error::Result;
use crate::indexer::IndexUpdate;
use crate::server::ThreadServer;

pub const MENTION_TEXT: &str = "You have a new mention in a thread";
pub const GENERIC_TEXT: &str = "You have a new message";
const NEW_MESSAGE_KEY: &str = "new_message";
const BADGE_KEY: &str = "badge_update";

pub const RECEIVE_NOTIFICATIONS: &str = "receive_notifications";
pub const ALERT_ALL_MESSAGES: &str = "alert_all_messages";
pub const PREVIEW_PATIENT_CONTENT: &str = "preview_patient_message_content_in_notification";
pub const PREVIEW_TEAM_CONTENT: &str = "preview_team_message_content_in_notification";

#[derive(Debug, Clone, PartialEq, Eq)]
struct Recipient {
	entity_id: String,
	patient: bool,
}

/// True if the entity has not been sent a generic notification since it
/// last viewed the thread.
fn not_notified_since_view(te: Option<&ThreadEntity>) -> bool {
	let Some(te) = te else {
		return true;
	};
	match (te.last_unread_notify, te.last_viewed) {
		(None, _) => true,
		(Some(notified), Some(viewed)) => notified < viewed,
		(Some(_), None) => false,
	}
}

/// The message text shown on the lock screen: titled for everything but
/// support threads.
fn clear_text(thread: &Thread, message: &Message) -> String {
	let title = if thread.user_title.is_empty() {
		&thread.system_title
	} else {
		&thread.user_title
	};
	let text = if thread.thread_type != ThreadType::Support && !title.is_empty() {
		format!("{title}: {}", message.summary)
	} else {
		message.summary.clone()
	};
	truncate_with_ellipsis(&text, SUMMARY_MAX_BYTES)
}

impl ThreadServer {
	async fn bool_setting(&self, node_id: &str, key: &str, default: bool) -> bool {
		match self.clients.settings.bool_value(node_id, key).await {
			Ok(value) => value.unwrap_or(default),
			Err(e) => {
				tracing::warn!(error = %e, node_id, key, "settings lookup failed, using default");
				default
			}
		}
	}

	async fn clear_text_allowed(&self, thread: &Thread) -> bool {
		match thread.thread_type {
			ThreadType::Support | ThreadType::Setup => true,
			t if t.is_patient() => {
				self.bool_setting(&thread.organization_id, PREVIEW_PATIENT_CONTENT, false)
					.await
			}
			t if t.is_team() => self.bool_setting(&thread.organization_id, PREVIEW_TEAM_CONTENT, false).await,
			_ => false,
		}
	}

	/// Notifies the members of a thread about a newly published item.
	#[tracing::instrument(skip(self, thread, item, update), fields(thread_id = %thread.id, item_id = %item.id))]
	pub(crate) async fn notify_members_of_publish(
		&self,
		thread: &Thread,
		item: &ThreadItem,
		publisher: &str,
		update: &IndexUpdate,
	) -> Result<()> {
		let Some(message) = item.message() else {
			return Ok(());
		};
		let member_ids: Vec<String> = self
			.dal
			.thread_members(thread.id)
			.await?
			.into_iter()
			.map(|te| te.entity_id)
			.collect();
		let mut recipients: Vec<Recipient> = self
			.indexer
			.resolve_internal_entities(&member_ids)
			.await?
			.into_iter()
			.filter(|e| e.id != publisher)
			.map(|e| Recipient {
				entity_id: e.id,
				patient: false,
			})
			.collect();
		if thread.thread_type == ThreadType::SecureExternal
			&& !item.internal
			&& !thread.primary_entity_id.is_empty()
			&& thread.primary_entity_id != publisher
		{
			recipients.push(Recipient {
				entity_id: thread.primary_entity_id.clone(),
				patient: true,
			});
		}
		if recipients.is_empty() {
			return Ok(());
		}

		let mentioned: HashSet<&str> = message
			.text_refs
			.iter()
			.filter(|r| r.ref_type == ReferenceType::Entity)
			.map(|r| r.id.as_str())
			.collect();
		let entities: HashMap<String, ThreadEntity> = self
			.dal
			.entities_for_thread(thread.id)
			.await?
			.into_iter()
			.map(|te| (te.entity_id.clone(), te))
			.collect();

		let mut to_notify = Vec::new();
		let mut short_messages = HashMap::new();
		let mut marked = Vec::new();
		for r in recipients {
			if !self.bool_setting(&r.entity_id, RECEIVE_NOTIFICATIONS, true).await {
				continue;
			}
			let te = entities.get(&r.entity_id);
			let text = if r.patient {
				if not_notified_since_view(te) {
					marked.push(r.entity_id.clone());
					GENERIC_TEXT.to_string()
				} else {
					String::new()
				}
			} else if mentioned.contains(r.entity_id.as_str()) {
				MENTION_TEXT.to_string()
			} else if !update.wants_notification(&r.entity_id) {
				String::new()
			} else if self.bool_setting(&r.entity_id, ALERT_ALL_MESSAGES, true).await {
				if self.clear_text_allowed(thread).await {
					clear_text(thread, message)
				} else {
					GENERIC_TEXT.to_string()
				}
			} else if not_notified_since_view(te) {
				marked.push(r.entity_id.clone());
				GENERIC_TEXT.to_string()
			} else {
				String::new()
			};
			short_messages.insert(r.entity_id.clone(), text);
			to_notify.push(r.entity_id);
		}
		if to_notify.is_empty() {
			return Ok(());
		}

		if !marked.is_empty() {
			let now = self.now();
			let thread_id = thread.id;
			self.dal
				.transact(|tx| async move {
					for entity_id in &marked {
						tx.update_thread_entity(
							thread_id,
							entity_id,
							&ThreadEntityUpdate {
								last_unread_notify: Some(now),
								..Default::default()
							},
						)
						.await?;
					}
					Ok::<_, DbError>(())
				})
				.await?;
		}

		let unread_counts = self
			.dal
			.unread_notifications_counts(&to_notify)
			.await?
			.unwrap_or_default();
		let notification = Notification {
			kind: NotificationKind::NewMessage,
			organization_id: thread.organization_id.clone(),
			thread_id: Some(thread.id),
			item_id: Some(item.id),
			entities_to_notify: to_notify,
			short_messages,
			unread_counts,
			dedupe_key: NEW_MESSAGE_KEY.to_string(),
			collapse_key: NEW_MESSAGE_KEY.to_string(),
		};
		self.clients.notifications.send(&notification).await?;
		tracing::debug!(recipients = notification.entities_to_notify.len(), "notification sent");
		Ok(())
	}

	/// Sends a silent push carrying fresh badge counts. Failures are logged.
	pub(crate) async fn refresh_badges(&self, organization_id: &str, entity_ids: &[String]) {
		if let Err(e) = self.send_badge_update(organization_id, entity_ids).await {
			tracing::warn!(error = %e, count = entity_ids.len(), "failed to refresh badge counts");
		}
	}

	async fn send_badge_update(&self, organization_id: &str, entity_ids: &[String]) -> Result<()> {
		let Some(unread_counts) = self.dal.unread_notifications_counts(entity_ids).await? else {
			return Ok(());
		};
		self.clients
			.notifications
			.send(&Notification {
				kind: NotificationKind::BadgeUpdate,
				organization_id: organization_id.to_string(),
				thread_id: None,
				item_id: None,
				entities_to_notify: entity_ids.to_vec(),
				short_messages: HashMap::new(),
				unread_counts,
				dedupe_key: BADGE_KEY.to_string(),
				collapse_key: BADGE_KEY.to_string(),
			})
			.await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::{Duration, Utc};
	use threading_common_thread::ThreadId;

	use crate::api::{MessagePost, PostMessageRequest};
	use crate::testing::{app_source, TestEnv};

	fn entity(last_viewed: Option<i64>, last_unread_notify: Option<i64>) -> ThreadEntity {
		let base = Utc::now();
		ThreadEntity {
			thread_id: ThreadId::from_value(1),
			entity_id: "e".to_string(),
			member: true,
			following: false,
			joined: base,
			last_viewed: last_viewed.map(|s| base + Duration::seconds(s)),
			last_unread_notify: last_unread_notify.map(|s| base + Duration::seconds(s)),
			last_referenced: None,
		}
	}

	#[test]
	fn generic_notifications_are_throttled_until_next_view() {
		assert!(not_notified_since_view(None));
		assert!(not_notified_since_view(Some(&entity(Some(10), None))));
		assert!(not_notified_since_view(Some(&entity(Some(10), Some(5)))));
		assert!(!not_notified_since_view(Some(&entity(Some(10), Some(15)))));
		assert!(!not_notified_since_view(Some(&entity(None, Some(15)))));
	}

	#[test]
	fn clear_text_is_titled_except_for_support() {
		let mut thread = Thread::new("o1", ThreadType::Team);
		thread.user_title = "Front desk".to_string();
		let message = Message {
			summary: "lunch?".to_string(),
			..Default::default()
		};
		assert_eq!(clear_text(&thread, &message), "Front desk: lunch?");

		thread.thread_type = ThreadType::Support;
		assert_eq!(clear_text(&thread, &message), "lunch?");

		thread.thread_type = ThreadType::Team;
		let long = Message {
			summary: "x".repeat(400),
			..Default::default()
		};
		assert!(clear_text(&thread, &long).len() <= SUMMARY_MAX_BYTES + "…".len());
	}

	async fn post(env: &TestEnv, thread_id: ThreadId, from: &str, text: &str, internal: bool) {
		env.server
			.post_message(PostMessageRequest {
				thread_id,
				from_entity_id: from.to_string(),
				message: MessagePost {
					internal,
					text: text.to_string(),
					source: app_source(from),
					..Default::default()
				},
				..Default::default()
			})
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn mentions_and_generic_text_for_team_threads() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1", "a2", "a3"]).await;

		post(&env, thread.id, "a1", r#"<ref id="a2" type="entity">B</ref> ping"#, false).await;

		let sent = env.clients.notifications.sent().await;
		let n = sent.last().unwrap();
		assert_eq!(n.kind, NotificationKind::NewMessage);
		assert!(!n.entities_to_notify.contains(&"a1".to_string()));
		assert_eq!(n.short_messages["a2"], MENTION_TEXT);
		assert_eq!(n.short_messages["a3"], GENERIC_TEXT);
		assert_eq!(n.dedupe_key, "new_message");
		assert_eq!(n.collapse_key, "new_message");
	}

	#[tokio::test]
	async fn team_preview_setting_enables_clear_text() {
		let env = TestEnv::new().await;
		env.clients.settings.set_bool("o1", PREVIEW_TEAM_CONTENT, true).await;
		let thread = env.team_thread(&["a1", "a2"]).await;

		post(&env, thread.id, "a1", "hello there", false).await;

		let sent = env.clients.notifications.sent().await;
		assert_eq!(sent.last().unwrap().short_messages["a2"], "Team: hello there");
	}

	#[tokio::test]
	async fn patient_gets_generic_text_once_until_viewing() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;

		post(&env, thread.id, "a1", "your results are in", false).await;
		post(&env, thread.id, "a1", "call us", false).await;

		let sent = env.clients.notifications.sent().await;
		let texts: Vec<&str> = sent
			.iter()
			.filter(|n| n.kind == NotificationKind::NewMessage)
			.map(|n| n.short_messages["p1"].as_str())
			.collect();
		assert_eq!(texts, vec![GENERIC_TEXT, ""]);
	}

	#[tokio::test]
	async fn internal_notes_never_reach_the_patient() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;

		post(&env, thread.id, "a1", "note to self", true).await;

		for n in env.clients.notifications.sent().await {
			assert!(!n.entities_to_notify.contains(&"p1".to_string()));
		}
	}

	#[tokio::test]
	async fn muted_entities_are_skipped() {
		let env = TestEnv::new().await;
		env.clients.settings.set_bool("a2", RECEIVE_NOTIFICATIONS, false).await;
		let thread = env.team_thread(&["a1", "a2"]).await;

		post(&env, thread.id, "a1", "anyone?", false).await;

		assert!(env
			.clients
			.notifications
			.sent()
			.await
			.iter()
			.all(|n| !n.entities_to_notify.contains(&"a2".to_string())));
	}
}
