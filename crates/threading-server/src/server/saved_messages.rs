// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use threading_common_thread::{ItemBody, SavedMessage, SavedMessageId};
use threading_server_db::SavedMessageUpdate;

use super::messages::{build_message, media_ids, with_app_source};
use super::{required, ThreadServer};
use crate::api::{
	CreateSavedMessageRequest, DeleteSavedMessageRequest, EmptyResponse, SavedMessageResponse, SavedMessagesRequest,
	SavedMessagesResponse, UpdateSavedMessageRequest,
};
use crate::clients::OwnerType;
use crate::error::{Result, ServerError};

impl ThreadServer {
	/// Saved messages by ID, or every saved message of the given owners.
	#[tracing::instrument(skip(self, req), fields(ids = req.saved_message_ids.len(), owners = req.owner_entity_ids.len()))]
	pub async fn saved_messages(&self, req: SavedMessagesRequest) -> Result<SavedMessagesResponse> {
		let saved_messages = if !req.saved_message_ids.is_empty() {
			self.dal.saved_messages(&req.saved_message_ids).await?
		} else if !req.owner_entity_ids.is_empty() {
			self.dal.saved_messages_for_owners(&req.owner_entity_ids).await?
		} else {
			return Err(ServerError::invalid("SavedMessageIDs or OwnerEntityIDs are required"));
		};
		Ok(SavedMessagesResponse { saved_messages })
	}

	#[tracing::instrument(skip(self, req), fields(owner = %req.owner_entity_id))]
	pub async fn create_saved_message(&self, req: CreateSavedMessageRequest) -> Result<SavedMessageResponse> {
		required(&req.title, "Title")?;
		required(&req.organization_id, "OrganizationID")?;
		required(&req.creator_entity_id, "CreatorEntityID")?;
		required(&req.owner_entity_id, "OwnerEntityID")?;
		let post = with_app_source(req.message, &req.creator_entity_id);
		let message = build_message(&post)?;

		let id = SavedMessageId::new();
		let media = media_ids([&post]);
		if !media.is_empty() {
			self.clients
				.media
				.claim_media(&media, OwnerType::SavedMessage, &id.to_string())
				.await?;
		}

		let now = self.now();
		self.dal
			.create_saved_message(&SavedMessage {
				id,
				title: req.title,
				organization_id: req.organization_id,
				creator_entity_id: req.creator_entity_id,
				owner_entity_id: req.owner_entity_id,
				internal: post.internal,
				content: ItemBody::Message(message),
				created: now,
				modified: now,
			})
			.await?;
		tracing::info!(saved_message_id = %id, "saved message created");
		self.saved_message(id).await
	}

	#[tracing::instrument(skip(self, req), fields(saved_message_id = %req.saved_message_id))]
	pub async fn update_saved_message(&self, req: UpdateSavedMessageRequest) -> Result<SavedMessageResponse> {
		let existing = self.saved_message(req.saved_message_id).await?.saved_message;
		if let Some(title) = &req.title {
			required(title, "Title")?;
		}
		let mut update = SavedMessageUpdate {
			title: req.title,
			..Default::default()
		};
		if let Some(post) = req.message {
			let post = with_app_source(post, &existing.creator_entity_id);
			let message = build_message(&post)?;
			let media = media_ids([&post]);
			if !media.is_empty() {
				self.clients
					.media
					.claim_media(&media, OwnerType::SavedMessage, &existing.id.to_string())
					.await?;
			}
			update.internal = Some(post.internal);
			update.content = Some(ItemBody::Message(message));
		}
		self.dal.update_saved_message(existing.id, &update).await?;
		self.saved_message(existing.id).await
	}

	#[tracing::instrument(skip(self, req), fields(saved_message_id = %req.saved_message_id))]
	pub async fn delete_saved_message(&self, req: DeleteSavedMessageRequest) -> Result<EmptyResponse> {
		if !self.dal.delete_saved_message(req.saved_message_id).await? {
			return Err(ServerError::not_found(format!("saved message {}", req.saved_message_id)));
		}
		Ok(EmptyResponse::default())
	}

	async fn saved_message(&self, id: SavedMessageId) -> Result<SavedMessageResponse> {
		let saved_message = self
			.dal
			.saved_messages(&[id])
			.await?
			.pop()
			.ok_or_else(|| ServerError::not_found(format!("saved message {id}")))?;
		Ok(SavedMessageResponse { saved_message })
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::{Attachment, AttachmentData};

	use crate::api::MessagePost;
	use crate::testing::TestEnv;

	fn create_req(text: &str) -> CreateSavedMessageRequest {
		CreateSavedMessageRequest {
			title: "Greeting".to_string(),
			organization_id: "o1".to_string(),
			creator_entity_id: "a1".to_string(),
			owner_entity_id: "a1".to_string(),
			message: MessagePost {
				text: text.to_string(),
				attachments: vec![Attachment {
					title: "photo".to_string(),
					url: String::new(),
					user_title: String::new(),
					content_id: String::new(),
					data: AttachmentData::Image {
						media_id: "m1".to_string(),
						mimetype: "image/png".to_string(),
					},
				}],
				..Default::default()
			},
		}
	}

	#[tokio::test]
	async fn create_claims_media_for_the_saved_message() {
		let env = TestEnv::new().await;
		let sm = env
			.server
			.create_saved_message(create_req(r#"hello <a href="https://example.com">there</a>"#))
			.await
			.unwrap()
			.saved_message;
		assert_eq!(sm.title, "Greeting");
		let message = sm.content.as_message().unwrap();
		assert_eq!(message.summary, "hello there");

		let claims = env.clients.media.claims().await;
		assert_eq!(claims.len(), 1);
		assert_eq!(claims[0].owner_type, OwnerType::SavedMessage);
		assert_eq!(claims[0].owner_id, sm.id.to_string());

		let listed = env
			.server
			.saved_messages(SavedMessagesRequest {
				owner_entity_ids: vec!["a1".to_string()],
				..Default::default()
			})
			.await
			.unwrap();
		assert_eq!(listed.saved_messages.len(), 1);
	}

	#[tokio::test]
	async fn update_and_delete() {
		let env = TestEnv::new().await;
		let sm = env
			.server
			.create_saved_message(create_req("first"))
			.await
			.unwrap()
			.saved_message;
		let updated = env
			.server
			.update_saved_message(UpdateSavedMessageRequest {
				saved_message_id: sm.id,
				title: Some("Renamed".to_string()),
				message: Some(MessagePost {
					text: "second".to_string(),
					internal: true,
					..Default::default()
				}),
			})
			.await
			.unwrap()
			.saved_message;
		assert_eq!(updated.title, "Renamed");
		assert!(updated.internal);
		assert_eq!(updated.content.as_message().unwrap().text, "second");

		env.server
			.delete_saved_message(DeleteSavedMessageRequest { saved_message_id: sm.id })
			.await
			.unwrap();
		let err = env
			.server
			.delete_saved_message(DeleteSavedMessageRequest { saved_message_id: sm.id })
			.await
			.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn listing_requires_ids_or_owners() {
		let env = TestEnv::new().await;
		let err = env
			.server
			.saved_messages(SavedMessagesRequest::default())
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));
	}
}
