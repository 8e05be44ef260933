// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Messages queued for posting at a later time.

use threading_common_thread::{
	ItemBody, ItemType, ScheduledMessage, ScheduledMessageId, ScheduledMessageStatus, ThreadItem,
};
use threading_server_db::{QueryOption, ScheduledMessageUpdate};

use super::messages::{build_message, media_ids, message_post, post_in_tx, Post};
use super::{required, ThreadServer};
use crate::api::{
	CreateScheduledMessageRequest, DeleteScheduledMessageRequest, EmptyResponse, ScheduledMessageResponse,
	ScheduledMessagesRequest, ScheduledMessagesResponse,
};
use crate::clients::OwnerType;
use crate::error::{Result, ServerError};

impl ThreadServer {
	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id, scheduled_for = %req.scheduled_for))]
	pub async fn create_scheduled_message(&self, req: CreateScheduledMessageRequest) -> Result<ScheduledMessageResponse> {
		if !req.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		required(&req.actor_entity_id, "ActorEntityID")?;
		let now = self.now();
		if req.scheduled_for <= now {
			return Err(ServerError::invalid("ScheduledFor must be in the future"));
		}
		let message = build_message(&req.message)?;
		let thread = self.dal.thread(req.thread_id, &[]).await?;

		let media = media_ids([&req.message]);
		if !media.is_empty() {
			self.clients
				.media
				.claim_media(&media, OwnerType::Thread, &thread.id.to_string())
				.await?;
		}

		let id = self
			.dal
			.create_scheduled_message(&ScheduledMessage {
				id: ScheduledMessageId::empty(),
				thread_id: thread.id,
				actor_entity_id: req.actor_entity_id,
				item_type: ItemType::Message,
				internal: req.message.internal,
				content: ItemBody::Message(message),
				scheduled_for: req.scheduled_for,
				sent_at: None,
				sent_thread_item_id: None,
				status: ScheduledMessageStatus::Pending,
				created: now,
				modified: now,
			})
			.await?;
		tracing::info!(scheduled_message_id = %id, "scheduled message created");
		let scheduled_message = self.dal.scheduled_message(id, &[]).await?;
		Ok(ScheduledMessageResponse { scheduled_message })
	}

	/// Marks a scheduled message deleted whatever its current status.
	#[tracing::instrument(skip(self, req), fields(scheduled_message_id = %req.scheduled_message_id))]
	pub async fn delete_scheduled_message(&self, req: DeleteScheduledMessageRequest) -> Result<EmptyResponse> {
		self.dal.delete_scheduled_message(req.scheduled_message_id).await?;
		Ok(EmptyResponse::default())
	}

	#[tracing::instrument(skip(self, req))]
	pub async fn scheduled_messages(&self, req: ScheduledMessagesRequest) -> Result<ScheduledMessagesResponse> {
		let scheduled_messages = match (req.scheduled_message_id, req.thread_id) {
			(Some(id), _) => vec![self.dal.scheduled_message(id, &[]).await?],
			(None, Some(thread_id)) => self.dal.scheduled_messages_for_thread(thread_id, &req.status).await?,
			(None, None) => return Err(ServerError::invalid("ScheduledMessageID or ThreadID is required")),
		};
		Ok(ScheduledMessagesResponse { scheduled_messages })
	}

	/// Posts a due scheduled message and marks it sent. The pending check,
	/// the post and the status change share one transaction, so a delete that
	/// lands first always wins. The scheduled message ID is the post's
	/// idempotency key. Returns `None` when the message is no longer pending.
	#[tracing::instrument(skip(self), fields(scheduled_message_id = %id))]
	pub async fn send_scheduled_message(&self, id: ScheduledMessageId) -> Result<Option<ThreadItem>> {
		let sm = self.dal.scheduled_message(id, &[]).await?;
		if sm.status != ScheduledMessageStatus::Pending {
			tracing::debug!(status = sm.status.as_str(), "scheduled message no longer pending");
			return Ok(None);
		}
		let Some(message) = sm.content.as_message() else {
			return Err(ServerError::Internal(format!(
				"scheduled message {id} holds a {} item",
				sm.content.item_type().as_str()
			)));
		};
		let draft = message_post(message, sm.internal);
		let message = build_message(&draft)?;
		let media = media_ids([&draft]);
		if !media.is_empty() {
			self.clients
				.media
				.claim_media(&media, OwnerType::Thread, &sm.thread_id.to_string())
				.await?;
		}

		let post = Post {
			thread_id: sm.thread_id,
			actor_entity_id: sm.actor_entity_id.clone(),
			messages: vec![draft],
			uuid: Some(id.to_string()),
			single: true,
			notify: true,
		};
		let sent_at = self.now();
		let sent = self
			.dal
			.transact(|tx| {
				let post = &post;
				async move {
					let current = tx.scheduled_message(id, &[QueryOption::ForUpdate]).await?;
					if current.status != ScheduledMessageStatus::Pending {
						return Ok::<_, ServerError>(None);
					}
					let (items, created) = post_in_tx(&tx, post, vec![message]).await?;
					let item = items
						.into_iter()
						.next()
						.ok_or_else(|| ServerError::Internal("post returned no item".to_string()))?;
					tx.update_scheduled_message(
						id,
						&ScheduledMessageUpdate {
							status: Some(ScheduledMessageStatus::Sent),
							sent_at: Some(sent_at),
							sent_thread_item_id: Some(item.id),
						},
					)
					.await?;
					Ok(Some((item, created)))
				}
			})
			.await?;
		let Some((item, created)) = sent else {
			tracing::debug!("scheduled message changed before it was sent");
			return Ok(None);
		};

		if !created.is_empty() {
			let thread = self.dal.thread(sm.thread_id, &[]).await?;
			let uuid = id.to_string();
			self.after_post(&thread, &created, &sm.actor_entity_id, true, Some(&uuid))
				.await;
		}
		tracing::info!(item_id = %item.id, "scheduled message sent");
		Ok(Some(item))
	}
}
