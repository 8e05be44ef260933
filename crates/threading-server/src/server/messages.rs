// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The message write path shared by every operation that posts.

use threading_common_thread::{
	summary_from_text, truncate_to_second, Bml, Endpoint, EndpointChannel, ItemBody, Message, ReferenceType, Thread,
	ThreadId, ThreadItem,
};
use threading_server_db::{Dal, PostItemParams, ThreadEntityUpdate};
use threading_server_events::PublishedThreadItem;

use super::{required, ThreadServer};
use crate::api::{MessagePost, PostMessageRequest, PostMessageResponse, PostMessagesRequest, PostMessagesResponse};
use crate::clients::OwnerType;
use crate::error::{Result, ServerError};

/// Parses and normalizes a message for storage. Text is re-serialized in
/// canonical markup and the summary is derived from it unless supplied.
pub(crate) fn build_message(post: &MessagePost) -> Result<Message> {
	if post.text.trim().is_empty() && post.attachments.is_empty() {
		return Err(ServerError::invalid("Text or attachments are required"));
	}
	let Some(source) = post.source.clone() else {
		return Err(ServerError::invalid("Source endpoint is required"));
	};
	let bml = Bml::parse(&post.text)?;
	let text = bml.format();
	let summary = if post.summary.is_empty() {
		summary_from_text(&text)?
	} else {
		post.summary.clone()
	};
	Ok(Message {
		title: post.title.clone(),
		text,
		summary,
		source: Some(source),
		destinations: post.destinations.clone(),
		attachments: post.attachments.clone(),
		text_refs: bml.references(),
		..Default::default()
	})
}

/// Fills in an app source for posts the server makes on an entity's behalf.
pub(crate) fn with_app_source(mut post: MessagePost, actor_entity_id: &str) -> MessagePost {
	if post.source.is_none() {
		post.source = Some(Endpoint {
			channel: EndpointChannel::App,
			id: actor_entity_id.to_string(),
		});
	}
	post
}

/// The post that reproduces a stored message.
pub(crate) fn message_post(message: &Message, internal: bool) -> MessagePost {
	MessagePost {
		internal,
		source: message.source.clone(),
		destinations: message.destinations.clone(),
		text: message.text.clone(),
		title: message.title.clone(),
		summary: message.summary.clone(),
		attachments: message.attachments.clone(),
	}
}

/// Media IDs referenced by the attachments of a set of messages.
pub(crate) fn media_ids<'a>(posts: impl IntoIterator<Item = &'a MessagePost>) -> Vec<String> {
	posts
		.into_iter()
		.flat_map(|p| p.attachments.iter())
		.filter_map(|a| a.data.media_id())
		.filter(|id| !id.is_empty())
		.map(str::to_string)
		.collect()
}

fn idempotency_key(uuid: Option<&str>, index: usize, single: bool) -> Option<String> {
	let uuid = uuid.filter(|u| !u.is_empty())?;
	if single {
		Some(uuid.to_string())
	} else {
		Some(format!("{uuid}:{index}"))
	}
}

/// A set of messages bound for one thread.
#[derive(Debug, Clone)]
pub(crate) struct Post {
	pub thread_id: ThreadId,
	pub actor_entity_id: String,
	pub messages: Vec<MessagePost>,
	pub uuid: Option<String>,
	/// A single message keyed by the bare UUID rather than `{uuid}:{index}`.
	pub single: bool,
	pub notify: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct Posted {
	pub items: Vec<ThreadItem>,
	/// Items that were inserted rather than replayed.
	pub created: Vec<ThreadItem>,
	pub thread: Thread,
}

/// Appends the messages to the thread through `tx` and updates the poster's
/// and referenced entities' rows. Must run inside a transaction.
pub(crate) async fn post_in_tx(tx: &Dal, post: &Post, messages: Vec<Message>) -> Result<(Vec<ThreadItem>, Vec<ThreadItem>)> {
	let thread = tx.thread(post.thread_id, &[]).await?;
	let poster = tx.thread_entity(post.thread_id, &post.actor_entity_id, &[]).await?;
	let last_viewed = poster.as_ref().and_then(|te| te.last_viewed).unwrap_or(thread.created);
	let caught_up = thread.message_count == 0
		|| truncate_to_second(last_viewed) >= truncate_to_second(thread.last_message_timestamp);

	let mut items = Vec::with_capacity(messages.len());
	let mut created = Vec::new();
	for (i, (message, draft)) in messages.into_iter().zip(&post.messages).enumerate() {
		let posted = tx
			.post_item(PostItemParams {
				thread_id: post.thread_id,
				actor_entity_id: post.actor_entity_id.clone(),
				internal: draft.internal,
				body: ItemBody::Message(message),
				idempotency_key: idempotency_key(post.uuid.as_deref(), i, post.single),
			})
			.await?;
		if posted.created {
			created.push(posted.item.clone());
		}
		items.push(posted.item);
	}

	let Some(last) = created.last() else {
		return Ok((items, created));
	};
	tx.update_thread_entity(
		post.thread_id,
		&post.actor_entity_id,
		&ThreadEntityUpdate {
			member: Some(true),
			last_viewed: caught_up.then_some(last.created),
			..Default::default()
		},
	)
	.await?;
	for item in &created {
		let Some(message) = item.message() else {
			continue;
		};
		for r in message.text_refs.iter().filter(|r| r.ref_type == ReferenceType::Entity) {
			tx.update_thread_entity(
				post.thread_id,
				&r.id,
				&ThreadEntityUpdate {
					last_referenced: Some(item.created),
					..Default::default()
				},
			)
			.await?;
		}
	}
	Ok((items, created))
}

impl ThreadServer {
	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id, from = %req.from_entity_id))]
	pub async fn post_message(&self, req: PostMessageRequest) -> Result<PostMessageResponse> {
		let posted = self
			.post(Post {
				thread_id: req.thread_id,
				actor_entity_id: req.from_entity_id.clone(),
				messages: vec![req.message],
				uuid: req.uuid,
				single: true,
				notify: !req.dont_notify,
			})
			.await?;
		let thread = self.poster_view(posted.thread, &req.from_entity_id).await?;
		let item = posted
			.items
			.into_iter()
			.next()
			.ok_or_else(|| ServerError::Internal("post returned no item".to_string()))?;
		Ok(PostMessageResponse { item, thread })
	}

	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id, from = %req.from_entity_id, count = req.messages.len()))]
	pub async fn post_messages(&self, req: PostMessagesRequest) -> Result<PostMessagesResponse> {
		if req.messages.is_empty() {
			return Err(ServerError::invalid("At least 1 Message is required"));
		}
		let posted = self
			.post(Post {
				thread_id: req.thread_id,
				actor_entity_id: req.from_entity_id.clone(),
				messages: req.messages,
				uuid: req.uuid,
				single: false,
				notify: true,
			})
			.await?;
		let thread = self.poster_view(posted.thread, &req.from_entity_id).await?;
		Ok(PostMessagesResponse {
			items: posted.items,
			thread,
		})
	}

	/// Validates, claims media, commits the items and then runs the
	/// post-commit side effects for whatever was newly created.
	pub(crate) async fn post(&self, post: Post) -> Result<Posted> {
		if !post.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		required(&post.actor_entity_id, "FromEntityID")?;
		let messages = post.messages.iter().map(build_message).collect::<Result<Vec<_>>>()?;
		let external_poster = self.poster_is_external(&post.actor_entity_id).await?;
		if external_poster && post.messages.iter().any(|m| m.internal) {
			return Err(ServerError::invalid("External entities cannot post internal messages"));
		}

		let thread = self.dal.thread(post.thread_id, &[]).await?;
		let media = media_ids(&post.messages);
		if !media.is_empty() {
			self.clients
				.media
				.claim_media(&media, OwnerType::Thread, &thread.id.to_string())
				.await?;
		}

		let (items, created) = self
			.dal
			.transact(|tx| {
				let post = &post;
				async move { post_in_tx(&tx, post, messages).await }
			})
			.await?;

		let thread = self.dal.thread(post.thread_id, &[]).await?;
		if !created.is_empty() {
			self.after_post(&thread, &created, &post.actor_entity_id, post.notify, post.uuid.as_deref())
				.await;
		}
		Ok(Posted { items, created, thread })
	}

	/// Side effects of newly committed items: re-index, publish and notify.
	/// `uuid` is carried on the published events.
	pub(crate) async fn after_post(
		&self,
		thread: &Thread,
		created: &[ThreadItem],
		actor_entity_id: &str,
		notify: bool,
		uuid: Option<&str>,
	) {
		let update = match self.indexer.update_thread(thread).await {
			Ok(update) => update,
			Err(e) => {
				tracing::error!(error = %e, thread_id = %thread.id, "failed to update saved query index");
				Default::default()
			}
		};
		for item in created {
			self.publish(&PublishedThreadItem {
				uuid: uuid.map(str::to_string),
				organization_id: thread.organization_id.clone(),
				thread_id: thread.id,
				item_id: item.id,
				actor_entity_id: actor_entity_id.to_string(),
				primary_entity_id: thread.primary_entity_id.clone(),
				internal: item.internal,
			})
			.await;
		}
		if notify {
			if let Some(item) = created.last() {
				if let Err(e) = self.notify_members_of_publish(thread, item, actor_entity_id, &update).await {
					tracing::warn!(error = %e, thread_id = %thread.id, "failed to notify thread members");
				}
			}
		}
	}

	/// Posters unknown to the directory (system actors) are treated as
	/// internal.
	pub(crate) async fn poster_is_external(&self, entity_id: &str) -> Result<bool> {
		match self.is_external_viewer(entity_id).await {
			Ok(external) => Ok(external),
			Err(e) if e.is_not_found() => Ok(false),
			Err(e) => Err(e),
		}
	}

	async fn poster_view(&self, thread: Thread, entity_id: &str) -> Result<crate::api::ThreadView> {
		let external = self.poster_is_external(entity_id).await?;
		let te = self.dal.thread_entity(thread.id, entity_id, &[]).await?;
		Ok(super::thread_view(thread, te.as_ref(), external))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::TestEnv;
	use threading_common_thread::{Attachment, AttachmentData, Reference, ThreadType};

	fn app(id: &str) -> Option<Endpoint> {
		Some(Endpoint {
			channel: EndpointChannel::App,
			id: id.to_string(),
		})
	}

	#[test]
	fn build_message_extracts_refs_and_summary() {
		let msg = build_message(&MessagePost {
			text: r#"hi <ref id="a2" type="Entity">Dr A</ref>"#.to_string(),
			source: app("a1"),
			..Default::default()
		})
		.unwrap();
		assert_eq!(msg.text, r#"hi <ref id="a2" type="entity">Dr A</ref>"#);
		assert_eq!(msg.summary, "hi Dr A");
		assert_eq!(
			msg.text_refs,
			vec![Reference {
				ref_type: ReferenceType::Entity,
				id: "a2".to_string()
			}]
		);
	}

	#[test]
	fn build_message_validation() {
		let err = build_message(&MessagePost {
			source: app("a1"),
			..Default::default()
		})
		.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));

		let err = build_message(&MessagePost {
			text: "hello".to_string(),
			..Default::default()
		})
		.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));

		let attachment_only = build_message(&MessagePost {
			source: app("a1"),
			attachments: vec![Attachment {
				title: "x-ray".to_string(),
				url: String::new(),
				user_title: String::new(),
				content_id: String::new(),
				data: AttachmentData::Image {
					media_id: "m1".to_string(),
					mimetype: "image/png".to_string(),
				},
			}],
			..Default::default()
		});
		assert!(attachment_only.is_ok());
	}

	#[test]
	fn keys_for_single_and_batch_posts() {
		assert_eq!(idempotency_key(Some("u"), 0, true).as_deref(), Some("u"));
		assert_eq!(idempotency_key(Some("u"), 2, false).as_deref(), Some("u:2"));
		assert_eq!(idempotency_key(None, 0, true), None);
		assert_eq!(idempotency_key(Some(""), 0, true), None);
	}

	#[tokio::test]
	async fn post_message_is_idempotent_per_uuid() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;

		let req = PostMessageRequest {
			uuid: Some("retry-1".to_string()),
			thread_id: thread.id,
			from_entity_id: "a1".to_string(),
			message: MessagePost {
				text: "hello".to_string(),
				source: app("a1"),
				..Default::default()
			},
			dont_notify: false,
		};
		let first = env.server.post_message(req.clone()).await.unwrap();
		let second = env.server.post_message(req).await.unwrap();

		assert_eq!(first.item.id, second.item.id);
		let thread = env.server.dal().thread(thread.id, &[]).await.unwrap();
		assert_eq!(thread.message_count, 1);
		assert_eq!(thread.last_message_summary, "hello");
	}

	#[tokio::test]
	async fn poster_becomes_member_and_referenced_entities_are_marked() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;

		env.server
			.post_message(PostMessageRequest {
				thread_id: thread.id,
				from_entity_id: "a1".to_string(),
				message: MessagePost {
					internal: true,
					text: r#"<ref id="a2" type="entity">Dr B</ref> can you look"#.to_string(),
					source: app("a1"),
					..Default::default()
				},
				..Default::default()
			})
			.await
			.unwrap();

		let dal = env.server.dal();
		let poster = dal.thread_entity(thread.id, "a1", &[]).await.unwrap().unwrap();
		assert!(poster.member);
		assert!(!poster.following);
		assert!(poster.last_viewed.is_some());
		let referenced = dal.thread_entity(thread.id, "a2", &[]).await.unwrap().unwrap();
		assert!(referenced.last_referenced.is_some());
		assert!(!referenced.member);

		let thread = dal.thread(thread.id, &[]).await.unwrap();
		assert_eq!(thread.last_external_message_summary, "");
		assert_eq!(thread.thread_type, ThreadType::SecureExternal);
	}

	#[tokio::test]
	async fn patients_cannot_post_internal_messages() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;
		let err = env
			.server
			.post_message(PostMessageRequest {
				thread_id: thread.id,
				from_entity_id: "p1".to_string(),
				message: MessagePost {
					internal: true,
					text: "psst".to_string(),
					source: app("p1"),
					..Default::default()
				},
				..Default::default()
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn post_messages_publishes_one_event_per_item() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		let queue = env.subscribe::<PublishedThreadItem>("published").await;

		let resp = env
			.server
			.post_messages(PostMessagesRequest {
				uuid: Some("batch".to_string()),
				thread_id: thread.id,
				from_entity_id: "a1".to_string(),
				messages: vec![
					MessagePost {
						text: "one".to_string(),
						source: app("a1"),
						..Default::default()
					},
					MessagePost {
						text: "two".to_string(),
						source: app("a1"),
						..Default::default()
					},
				],
			})
			.await
			.unwrap();

		assert_eq!(resp.items.len(), 2);
		assert!(resp.items[0].created <= resp.items[1].created);
		assert_eq!(resp.thread.thread.message_count, 2);
		assert_eq!(env.broker.depth(&queue).await, 2);
	}

	#[tokio::test]
	async fn post_to_missing_thread_is_not_found() {
		let env = TestEnv::new().await;
		let err = env
			.server
			.post_message(PostMessageRequest {
				thread_id: ThreadId::new(),
				from_entity_id: "a1".to_string(),
				message: MessagePost {
					text: "hi".to_string(),
					source: app("a1"),
					..Default::default()
				},
				..Default::default()
			})
			.await
			.unwrap_err();
		assert!(err.is_not_found());
	}
}
