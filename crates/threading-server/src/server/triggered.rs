// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Canned messages posted automatically when something happens in an
//! organization, keyed by `(organization, trigger key, subkey)`.

use threading_common_thread::{
	ItemBody, Thread, ThreadItem, TriggerKey, TriggeredMessage, TriggeredMessageId, TriggeredMessageItem,
	TriggeredMessageItemId,
};

use super::messages::{build_message, media_ids, message_post, Post};
use super::{required, ThreadServer};
use crate::api::{
	CreateTriggeredMessageRequest, DeleteTriggeredMessageRequest, EmptyResponse, MessagePost,
	TriggeredMessageResponse, TriggeredMessageView, TriggeredMessagesRequest, TriggeredMessagesResponse,
	UpdateTriggeredMessageRequest,
};
use crate::clients::OwnerType;
use crate::error::{Result, ServerError};

impl ThreadServer {
	/// Stores a triggered message, replacing any existing one with the same
	/// keys.
	#[tracing::instrument(skip(self, req), fields(organization_id = %req.organization_entity_id, key = req.trigger_key.as_str(), subkey = %req.trigger_subkey))]
	pub async fn create_triggered_message(&self, req: CreateTriggeredMessageRequest) -> Result<TriggeredMessageResponse> {
		required(&req.organization_entity_id, "OrganizationEntityID")?;
		required(&req.actor_entity_id, "ActorEntityID")?;
		let now = self.now();
		let tm = TriggeredMessage {
			id: TriggeredMessageId::new(),
			organization_entity_id: req.organization_entity_id,
			actor_entity_id: req.actor_entity_id,
			trigger_key: req.trigger_key,
			trigger_subkey: req.trigger_subkey,
			enabled: req.enabled,
			created: now,
			modified: now,
		};
		self.store_triggered_message(&tm, req.messages).await?;
		tracing::info!(triggered_message_id = %tm.id, "triggered message created");
		self.triggered_message_view(tm.id).await
	}

	/// Lookup by ID, or by organization and keys.
	#[tracing::instrument(skip(self, req))]
	pub async fn triggered_messages(&self, req: TriggeredMessagesRequest) -> Result<TriggeredMessagesResponse> {
		let id = match (req.triggered_message_id, req.organization_entity_id, req.trigger_key) {
			(Some(id), _, _) => Some(id),
			(None, Some(org), Some(key)) => self
				.dal
				.triggered_message_for_keys(&org, key, req.trigger_subkey.as_deref().unwrap_or_default(), &[])
				.await?
				.map(|tm| tm.id),
			_ => {
				return Err(ServerError::invalid(
					"TriggeredMessageID or OrganizationEntityID and TriggerKey are required",
				))
			}
		};
		let triggered_messages = match id {
			Some(id) => vec![self.triggered_message_view(id).await?.triggered_message],
			None => Vec::new(),
		};
		Ok(TriggeredMessagesResponse { triggered_messages })
	}

	#[tracing::instrument(skip(self, req), fields(triggered_message_id = %req.triggered_message_id))]
	pub async fn update_triggered_message(&self, req: UpdateTriggeredMessageRequest) -> Result<TriggeredMessageResponse> {
		let mut tm = self.dal.triggered_message(req.triggered_message_id, &[]).await?;
		if let Some(enabled) = req.enabled {
			tm.enabled = enabled;
		}
		match req.messages {
			Some(messages) => self.store_triggered_message(&tm, messages).await?,
			None => {
				self.dal
					.update_triggered_message_enabled(tm.id, tm.enabled)
					.await?
			}
		}
		self.triggered_message_view(tm.id).await
	}

	#[tracing::instrument(skip(self, req), fields(triggered_message_id = %req.triggered_message_id))]
	pub async fn delete_triggered_message(&self, req: DeleteTriggeredMessageRequest) -> Result<EmptyResponse> {
		if !self.dal.delete_triggered_message(req.triggered_message_id).await? {
			return Err(ServerError::not_found(format!(
				"triggered message {}",
				req.triggered_message_id
			)));
		}
		Ok(EmptyResponse::default())
	}

	/// Posts the enabled triggered message for the keys into `thread`. A
	/// missing or disabled message is a no-op. Replays for the same thread
	/// post nothing new.
	#[tracing::instrument(skip(self, thread), fields(thread_id = %thread.id, key = key.as_str(), subkey = %subkey))]
	pub async fn post_triggered_message(&self, thread: &Thread, key: TriggerKey, subkey: &str) -> Result<Vec<ThreadItem>> {
		let Some(tm) = self
			.dal
			.triggered_message_for_keys(&thread.organization_id, key, subkey, &[])
			.await?
		else {
			return Ok(Vec::new());
		};
		if !tm.enabled {
			tracing::debug!(triggered_message_id = %tm.id, "triggered message disabled");
			return Ok(Vec::new());
		}
		let items = self.dal.triggered_message_items(tm.id).await?;
		let mut messages: Vec<MessagePost> = items
			.iter()
			.filter_map(|item| item.data.as_message().map(|m| message_post(m, item.internal)))
			.collect();
		if messages.is_empty() {
			return Ok(Vec::new());
		}
		self.clone_message_attachments(OwnerType::Thread, &thread.id.to_string(), &mut messages)
			.await?;

		let posted = self
			.post(Post {
				thread_id: thread.id,
				actor_entity_id: tm.actor_entity_id.clone(),
				messages,
				uuid: Some(format!("{}:{}", tm.id, thread.id)),
				single: false,
				notify: true,
			})
			.await?;
		tracing::info!(triggered_message_id = %tm.id, posted = posted.created.len(), "triggered message posted");
		Ok(posted.created)
	}

	async fn store_triggered_message(&self, tm: &TriggeredMessage, messages: Vec<MessagePost>) -> Result<()> {
		if messages.is_empty() {
			return Err(ServerError::invalid("At least 1 Message is required"));
		}
		let now = self.now();
		let mut items = Vec::with_capacity(messages.len());
		for (ordinal, post) in messages.iter().enumerate() {
			let message = build_message(post)?;
			items.push(TriggeredMessageItem {
				id: TriggeredMessageItemId::empty(),
				triggered_message_id: tm.id,
				ordinal: ordinal as i64,
				internal: post.internal,
				actor_entity_id: tm.actor_entity_id.clone(),
				data: ItemBody::Message(message),
				created: now,
				modified: now,
			});
		}
		let media = media_ids(&messages);
		if !media.is_empty() {
			self.clients
				.media
				.claim_media(&media, OwnerType::TriggeredMessage, &tm.id.to_string())
				.await?;
		}
		self.dal.create_triggered_message(tm, &items).await?;
		Ok(())
	}

	async fn triggered_message_view(&self, id: TriggeredMessageId) -> Result<TriggeredMessageResponse> {
		let triggered_message = self.dal.triggered_message(id, &[]).await?;
		let items = self.dal.triggered_message_items(id).await?;
		Ok(TriggeredMessageResponse {
			triggered_message: TriggeredMessageView {
				triggered_message,
				items,
			},
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::{Attachment, AttachmentData};
	use threading_server_db::Iteration;

	use crate::testing::{app_source, TestEnv};

	fn text(t: &str) -> MessagePost {
		MessagePost {
			text: t.to_string(),
			source: app_source("o1"),
			..Default::default()
		}
	}

	fn create_req(subkey: &str, messages: Vec<MessagePost>) -> CreateTriggeredMessageRequest {
		CreateTriggeredMessageRequest {
			organization_entity_id: "o1".to_string(),
			actor_entity_id: "o1".to_string(),
			trigger_key: TriggerKey::NewPatient,
			trigger_subkey: subkey.to_string(),
			enabled: true,
			messages,
		}
	}

	#[tokio::test]
	async fn creating_with_same_keys_replaces() {
		let env = TestEnv::new().await;
		env.server
			.create_triggered_message(create_req("PRACTICE_CODE:123", vec![text("m1")]))
			.await
			.unwrap();
		env.server
			.create_triggered_message(create_req("PRACTICE_CODE:123", vec![text("m2")]))
			.await
			.unwrap();

		let resp = env
			.server
			.triggered_messages(TriggeredMessagesRequest {
				organization_entity_id: Some("o1".to_string()),
				trigger_key: Some(TriggerKey::NewPatient),
				trigger_subkey: Some("PRACTICE_CODE:123".to_string()),
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(resp.triggered_messages.len(), 1);
		let items = &resp.triggered_messages[0].items;
		assert_eq!(items.len(), 1);
		assert_eq!(items[0].data.as_message().unwrap().text, "m2");
	}

	#[tokio::test]
	async fn posting_is_idempotent_per_thread_and_respects_enabled() {
		let env = TestEnv::new().await;
		let tm = env
			.server
			.create_triggered_message(create_req("PRACTICE_CODE:9", vec![text("welcome"), text("how can we help?")]))
			.await
			.unwrap()
			.triggered_message
			.triggered_message;
		let thread = env.patient_thread().await;

		let posted = env
			.server
			.post_triggered_message(&thread, TriggerKey::NewPatient, "PRACTICE_CODE:9")
			.await
			.unwrap();
		assert_eq!(posted.len(), 2);
		let replay = env
			.server
			.post_triggered_message(&thread, TriggerKey::NewPatient, "PRACTICE_CODE:9")
			.await
			.unwrap();
		assert!(replay.is_empty());

		env.server
			.update_triggered_message(UpdateTriggeredMessageRequest {
				triggered_message_id: tm.id,
				enabled: Some(false),
				messages: None,
			})
			.await
			.unwrap();
		let other = env.patient_thread().await;
		let posted = env
			.server
			.post_triggered_message(&other, TriggerKey::NewPatient, "PRACTICE_CODE:9")
			.await
			.unwrap();
		assert!(posted.is_empty());

		let items = env
			.server
			.dal()
			.iterate_thread_items(thread.id, false, &Iteration::default())
			.await
			.unwrap()
			.into_items();
		assert_eq!(items.len(), 2);
		assert_eq!(items[0].message().unwrap().text, "welcome");
	}

	#[tokio::test]
	async fn attachments_are_claimed_then_cloned_per_thread() {
		let env = TestEnv::new().await;
		let mut message = text("see attached");
		message.attachments.push(Attachment {
			title: "photo".to_string(),
			url: String::new(),
			user_title: String::new(),
			content_id: String::new(),
			data: AttachmentData::Image {
				media_id: "m1".to_string(),
				mimetype: "image/png".to_string(),
			},
		});
		let tm = env
			.server
			.create_triggered_message(create_req("PRACTICE_CODE:1", vec![message]))
			.await
			.unwrap()
			.triggered_message
			.triggered_message;
		let claims = env.clients.media.claims().await;
		assert_eq!(claims[0].owner_type, OwnerType::TriggeredMessage);
		assert_eq!(claims[0].owner_id, tm.id.to_string());

		let thread = env.patient_thread().await;
		env.server
			.post_triggered_message(&thread, TriggerKey::NewPatient, "PRACTICE_CODE:1")
			.await
			.unwrap();
		let clones = env.clients.media.clones().await;
		assert_eq!(clones, vec![(OwnerType::Thread, thread.id.to_string(), "m1".to_string())]);
	}

	#[tokio::test]
	async fn update_replaces_items_and_delete_removes() {
		let env = TestEnv::new().await;
		let tm = env
			.server
			.create_triggered_message(create_req("x", vec![text("one")]))
			.await
			.unwrap()
			.triggered_message
			.triggered_message;
		let updated = env
			.server
			.update_triggered_message(UpdateTriggeredMessageRequest {
				triggered_message_id: tm.id,
				enabled: None,
				messages: Some(vec![text("two"), text("three")]),
			})
			.await
			.unwrap()
			.triggered_message;
		assert_eq!(updated.triggered_message.id, tm.id);
		assert_eq!(updated.items.len(), 2);

		let req = DeleteTriggeredMessageRequest {
			triggered_message_id: tm.id,
		};
		env.server.delete_triggered_message(req.clone()).await.unwrap();
		assert!(env.server.delete_triggered_message(req).await.unwrap_err().is_not_found());
	}
}
