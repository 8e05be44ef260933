// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thread lifecycle, read state and thread / item reads.

use chrono::{DateTime, TimeZone, Utc};
use threading_common_thread::{Tag, Thread, ThreadId, ThreadType};
use threading_server_db::{DbError, IterateThreadsParams, ThreadEntityUpdate};
use threading_server_events::NewThreadEvent;

use super::messages::{build_message, media_ids, post_in_tx, Post};
use super::{required, thread_view, ThreadServer};
use crate::api::{
	CreateEmptyThreadRequest, CreateEmptyThreadResponse, CreateThreadRequest, CreateThreadResponse, DeleteThreadRequest,
	EmptyResponse, MarkThreadAsReadRequest, MarkThreadsAsReadRequest, QueryThreadsKind, QueryThreadsRequest,
	QueryThreadsResponse, ThreadEdge, ThreadItemEdge, ThreadItemRequest, ThreadItemResponse,
	ThreadItemViewDetailsRequest, ThreadItemViewDetailsResponse, ThreadItemsRequest, ThreadItemsResponse, ThreadRequest,
	ThreadResponse, ThreadsForMemberRequest, ThreadsForOrgRequest, ThreadsRequest, ThreadsResponse, TotalType,
	UpdateMemberRequest,
};
use crate::clients::{EntityStatus, OwnerType};
use crate::error::{Result, ServerError};

/// Watermarks older than this predate any real message and are treated as
/// missing.
fn launch_date() -> DateTime<Utc> {
	Utc.with_ymd_and_hms(2016, 2, 25, 0, 0, 0)
		.single()
		.unwrap_or_default()
}

/// The fields shared by both create operations.
struct NewThread<'a> {
	organization_id: &'a str,
	from_entity_id: &'a str,
	primary_entity_id: &'a str,
	member_entity_ids: &'a [String],
	thread_type: ThreadType,
	origin: threading_common_thread::ThreadOrigin,
	system_title: &'a str,
	user_title: &'a str,
	tags: &'a [String],
}

impl NewThread<'_> {
	fn validate(&self) -> Result<()> {
		required(self.organization_id, "OrganizationID")?;
		match self.thread_type {
			ThreadType::Unknown => Err(ServerError::invalid("Type is required")),
			ThreadType::LegacyTeam => Err(ServerError::invalid("Legacy team threads cannot be created")),
			ThreadType::Team if self.from_entity_id.trim().is_empty() => {
				Err(ServerError::invalid("FromEntityID is required for team threads"))
			}
			_ => Ok(()),
		}
	}

	/// The thread row and its member list. Patient-facing, support and setup
	/// threads always include the organization; team threads the creator;
	/// patient threads their primary entity.
	fn build(&self) -> (Thread, Vec<String>) {
		let mut thread = Thread::new(self.organization_id, self.thread_type);
		thread.id = ThreadId::new();
		thread.primary_entity_id = self.primary_entity_id.to_string();
		thread.origin = self.origin;
		thread.system_title = self.system_title.to_string();
		thread.user_title = self.user_title.to_string();
		thread.tags = self.tags.iter().map(Tag::new).collect();

		let mut members: Vec<String> = self.member_entity_ids.to_vec();
		if self.thread_type.requires_org_membership() {
			members.push(self.organization_id.to_string());
		}
		if self.thread_type.is_team() && !self.from_entity_id.is_empty() {
			members.push(self.from_entity_id.to_string());
		}
		if self.thread_type.is_patient() && !self.primary_entity_id.is_empty() {
			members.push(self.primary_entity_id.to_string());
		}
		members.sort();
		members.dedup();
		(thread, members)
	}
}

/// Creates the thread, its members and the creator's follow inside `tx`.
async fn create_in_tx(tx: &threading_server_db::Dal, thread: &Thread, members: &[String], from: &str) -> Result<()> {
	tx.create_thread(thread).await?;
	tx.add_thread_members(thread.id, members).await?;
	if !from.is_empty() {
		tx.update_thread_entity(
			thread.id,
			from,
			&ThreadEntityUpdate {
				following: Some(true),
				..Default::default()
			},
		)
		.await?;
	}
	Ok(())
}

impl ThreadServer {
	#[tracing::instrument(skip(self, req), fields(organization_id = %req.organization_id, thread_type = req.thread_type.as_str()))]
	pub async fn create_empty_thread(&self, req: CreateEmptyThreadRequest) -> Result<CreateEmptyThreadResponse> {
		let new = NewThread {
			organization_id: &req.organization_id,
			from_entity_id: &req.from_entity_id,
			primary_entity_id: &req.primary_entity_id,
			member_entity_ids: &req.member_entity_ids,
			thread_type: req.thread_type,
			origin: req.origin,
			system_title: &req.system_title,
			user_title: &req.user_title,
			tags: &req.tags,
		};
		new.validate()?;
		let (mut thread, members) = new.build();
		thread.last_message_summary = req.summary.clone();
		thread.last_external_message_summary = req.summary.clone();

		let from = req.from_entity_id.clone();
		self.dal
			.transact(|tx| {
				let (thread, members, from) = (&thread, &members, &from);
				async move { create_in_tx(&tx, thread, members, from).await }
			})
			.await?;

		let thread = self.dal.thread(thread.id, &[]).await?;
		if let Err(e) = self.indexer.add_thread(&thread).await {
			tracing::error!(error = %e, thread_id = %thread.id, "failed to index new thread");
		}
		self.publish(&NewThreadEvent { thread_id: thread.id }).await;
		tracing::info!(thread_id = %thread.id, "thread created");

		let te = if from.is_empty() {
			None
		} else {
			self.dal.thread_entity(thread.id, &from, &[]).await?
		};
		Ok(CreateEmptyThreadResponse {
			thread: thread_view(thread, te.as_ref(), false),
		})
	}

	/// Creates a thread and posts its first message in one transaction.
	#[tracing::instrument(skip(self, req), fields(organization_id = %req.organization_id, thread_type = req.thread_type.as_str()))]
	pub async fn create_thread(&self, req: CreateThreadRequest) -> Result<CreateThreadResponse> {
		required(&req.from_entity_id, "FromEntityID")?;
		let new = NewThread {
			organization_id: &req.organization_id,
			from_entity_id: &req.from_entity_id,
			primary_entity_id: &req.primary_entity_id,
			member_entity_ids: &req.member_entity_ids,
			thread_type: req.thread_type,
			origin: req.origin,
			system_title: &req.system_title,
			user_title: &req.user_title,
			tags: &req.tags,
		};
		new.validate()?;
		let message = build_message(&req.message)?;
		let external = self.poster_is_external(&req.from_entity_id).await?;
		if external && req.message.internal {
			return Err(ServerError::invalid("External entities cannot post internal messages"));
		}
		let (thread, members) = new.build();

		let media = media_ids([&req.message]);
		if !media.is_empty() {
			self.clients
				.media
				.claim_media(&media, OwnerType::Thread, &thread.id.to_string())
				.await?;
		}

		let post = Post {
			thread_id: thread.id,
			actor_entity_id: req.from_entity_id.clone(),
			messages: vec![req.message.clone()],
			uuid: req.uuid.clone(),
			single: true,
			notify: true,
		};
		let (items, created) = self
			.dal
			.transact(|tx| {
				let (thread, members, post) = (&thread, &members, &post);
				async move {
					create_in_tx(&tx, thread, members, &post.actor_entity_id).await?;
					post_in_tx(&tx, post, vec![message]).await
				}
			})
			.await?;

		let thread = self.dal.thread(thread.id, &[]).await?;
		self.publish(&NewThreadEvent { thread_id: thread.id }).await;
		self.after_post(&thread, &created, &req.from_entity_id, true, req.uuid.as_deref())
			.await;
		tracing::info!(thread_id = %thread.id, "thread created");

		let te = self.dal.thread_entity(thread.id, &req.from_entity_id, &[]).await?;
		let item = items
			.into_iter()
			.next()
			.ok_or_else(|| ServerError::Internal("create returned no item".to_string()))?;
		Ok(CreateThreadResponse {
			thread: thread_view(thread, te.as_ref(), external),
			item,
		})
	}

	/// Moves the viewer's read marker forward and records read receipts for
	/// the items created since the previous marker.
	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id, actor = %req.actor_entity_id))]
	pub async fn mark_thread_as_read(&self, req: MarkThreadAsReadRequest) -> Result<EmptyResponse> {
		if !req.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		required(&req.actor_entity_id, "ActorEntityID")?;
		let thread = self.dal.thread(req.thread_id, &[]).await?;
		let now = self.now();
		let viewed = req.timestamp.map_or(now, |t| t.min(now));

		let thread_id = thread.id;
		let actor = req.actor_entity_id.clone();
		self.dal
			.transact(|tx| async move {
				let previous = tx
					.thread_entity(thread_id, &actor, &[])
					.await?
					.and_then(|te| te.last_viewed);
				let items = tx.thread_item_ids_created_after(thread_id, previous).await?;
				tx.create_thread_item_view_details(&items, &actor, viewed).await?;
				tx.update_thread_entity(
					thread_id,
					&actor,
					&ThreadEntityUpdate {
						last_viewed: Some(viewed),
						..Default::default()
					},
				)
				.await?;
				Ok::<_, DbError>(())
			})
			.await?;

		self.reindex_thread(thread.id).await;
		self.refresh_badges(&thread.organization_id, &[req.actor_entity_id]).await;
		Ok(EmptyResponse::default())
	}

	/// Bulk form of [`ThreadServer::mark_thread_as_read`] driven by client
	/// watermarks. The entity, or one of its organizations, must be a member
	/// of every thread.
	#[tracing::instrument(skip(self, req), fields(entity_id = %req.entity_id, threads = req.thread_watermarks.len()))]
	pub async fn mark_threads_as_read(&self, req: MarkThreadsAsReadRequest) -> Result<EmptyResponse> {
		required(&req.entity_id, "EntityID")?;
		if req.thread_watermarks.is_empty() {
			return Ok(EmptyResponse::default());
		}
		let (_, memberships) = self.indexer.entity_and_memberships(&req.entity_id).await?;
		let ids: Vec<ThreadId> = req.thread_watermarks.iter().map(|w| w.thread_id).collect();
		let threads = self.dal.threads_by_ids(&ids, false).await?;
		for id in &ids {
			let Some(thread) = threads.iter().find(|t| t.id == *id) else {
				return Err(ServerError::not_found(format!("thread {id}")));
			};
			let is_member = thread.primary_entity_id == req.entity_id
				|| self
					.dal
					.thread_members(thread.id)
					.await?
					.iter()
					.any(|te| memberships.contains(&te.entity_id));
			if !is_member {
				return Err(ServerError::invalid(format!(
					"entity {} is not a member of thread {id}",
					req.entity_id
				)));
			}
		}

		let now = self.now();
		let launch = launch_date();
		let marks: Vec<(ThreadId, DateTime<Utc>)> = req
			.thread_watermarks
			.iter()
			.map(|w| {
				let at = w
					.last_message_timestamp
					.filter(|t| *t >= launch && *t <= now)
					.unwrap_or(now);
				(w.thread_id, at)
			})
			.collect();
		let entity_id = req.entity_id.clone();
		let seen = req.seen;
		self.dal
			.transact(|tx| {
				let (marks, entity_id) = (&marks, &entity_id);
				async move {
					for (thread_id, at) in marks {
						if seen {
							let previous = tx
								.thread_entity(*thread_id, entity_id, &[])
								.await?
								.and_then(|te| te.last_viewed);
							let items = tx.thread_item_ids_created_after(*thread_id, previous).await?;
							tx.create_thread_item_view_details(&items, entity_id, *at).await?;
						}
						tx.update_thread_entity(
							*thread_id,
							entity_id,
							&ThreadEntityUpdate {
								last_viewed: Some(*at),
								..Default::default()
							},
						)
						.await?;
					}
					Ok::<_, DbError>(())
				}
			})
			.await?;

		for (thread_id, _) in &marks {
			self.reindex_thread(*thread_id).await;
		}
		let organization_id = threads.first().map(|t| t.organization_id.clone()).unwrap_or_default();
		self.refresh_badges(&organization_id, &[req.entity_id]).await;
		Ok(EmptyResponse::default())
	}

	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id))]
	pub async fn thread(&self, req: ThreadRequest) -> Result<ThreadResponse> {
		if !req.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		let thread = self.dal.thread(req.thread_id, &[]).await?;
		let thread = self.view_for_viewer(thread, req.viewer_entity_id.as_deref()).await?;
		Ok(ThreadResponse { thread })
	}

	#[tracing::instrument(skip(self, req), fields(count = req.thread_ids.len()))]
	pub async fn threads(&self, req: ThreadsRequest) -> Result<ThreadsResponse> {
		let threads = self.dal.threads_by_ids(&req.thread_ids, false).await?;
		let threads = self
			.views_for_viewer(threads, req.viewer_entity_id.as_deref())
			.await?;
		Ok(ThreadsResponse { threads })
	}

	#[tracing::instrument(skip(self, req), fields(entity_id = %req.entity_id))]
	pub async fn threads_for_member(&self, req: ThreadsForMemberRequest) -> Result<ThreadsResponse> {
		required(&req.entity_id, "EntityID")?;
		let threads = self.dal.threads_for_member(&req.entity_id, req.primary_only).await?;
		let threads = self.views_for_viewer(threads, Some(&req.entity_id)).await?;
		Ok(ThreadsResponse { threads })
	}

	#[tracing::instrument(skip(self, req), fields(organization_id = %req.organization_id))]
	pub async fn threads_for_org(&self, req: ThreadsForOrgRequest) -> Result<ThreadsResponse> {
		required(&req.organization_id, "OrganizationID")?;
		let threads = self
			.dal
			.threads_for_org(&req.organization_id, req.thread_type, req.limit)
			.await?;
		let threads = self
			.views_for_viewer(threads, req.viewer_entity_id.as_deref())
			.await?;
		Ok(ThreadsResponse { threads })
	}

	/// Pages through the threads a viewer can see, either through one of
	/// its saved queries or by scanning with an ad hoc query.
	#[tracing::instrument(skip(self, req), fields(viewer = %req.viewer_entity_id))]
	pub async fn query_threads(&self, req: QueryThreadsRequest) -> Result<QueryThreadsResponse> {
		required(&req.viewer_entity_id, "ViewerEntityID")?;
		let (entity, memberships) = self.indexer.entity_and_memberships(&req.viewer_entity_id).await?;
		let external = entity.entity_type.is_external();

		let (query, edges, has_more, total, total_type) = match req.kind {
			QueryThreadsKind::Saved { saved_query_id } => {
				let sq = self.dal.saved_query(saved_query_id, &[]).await?;
				if sq.entity_id != req.viewer_entity_id {
					return Err(ServerError::invalid(format!(
						"saved query {saved_query_id} does not belong to {}",
						req.viewer_entity_id
					)));
				}
				let page = self
					.dal
					.iterate_threads_in_saved_query(saved_query_id, &req.viewer_entity_id, &req.iterator)
					.await?;
				let edges = page
					.edges
					.into_iter()
					.map(|e| (e.item.thread, e.item.thread_entity, e.cursor))
					.collect::<Vec<_>>();
				(Some(sq.query), edges, page.has_more, sq.total, TotalType::Exact)
			}
			kind => {
				let query = match kind {
					QueryThreadsKind::Adhoc { query } => Some(query),
					_ => None,
				};
				let page = self
					.dal
					.iterate_threads(&IterateThreadsParams {
						organization_id: req.organization_id.clone(),
						member_entity_ids: memberships,
						viewer_entity_id: req.viewer_entity_id.clone(),
						for_external: external,
						query: query.clone(),
						iteration: req.iterator.clone(),
					})
					.await?;
				let edges = page
					.edges
					.into_iter()
					.map(|e| (e.item.thread, e.item.thread_entity, e.cursor))
					.collect::<Vec<_>>();
				let total = edges.len() as i64;
				(query, edges, page.has_more, total, TotalType::Unknown)
			}
		};

		let edges = edges
			.into_iter()
			.filter(|(thread, te, _)| {
				!thread.deleted && query.as_ref().map_or(true, |q| q.matches(thread, te.as_ref(), external))
			})
			.map(|(thread, te, cursor)| ThreadEdge {
				thread: thread_view(thread, te.as_ref(), external),
				cursor,
			})
			.collect();
		Ok(QueryThreadsResponse {
			edges,
			has_more,
			total,
			total_type,
		})
	}

	#[tracing::instrument(skip(self, req), fields(item_id = %req.item_id))]
	pub async fn thread_item(&self, req: ThreadItemRequest) -> Result<ThreadItemResponse> {
		let item = self.dal.thread_item(req.item_id, &[]).await?;
		self.dal.thread(item.thread_id, &[]).await?;
		if let Some(viewer) = req.viewer_entity_id.as_deref().filter(|v| !v.is_empty()) {
			if item.internal && self.is_external_viewer(viewer).await? {
				return Err(ServerError::not_found(format!("thread item {}", req.item_id)));
			}
		}
		Ok(ThreadItemResponse { item })
	}

	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id))]
	pub async fn thread_items(&self, req: ThreadItemsRequest) -> Result<ThreadItemsResponse> {
		if !req.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		self.dal.thread(req.thread_id, &[]).await?;
		let external = match req.viewer_entity_id.as_deref().filter(|v| !v.is_empty()) {
			Some(viewer) => self.is_external_viewer(viewer).await?,
			None => false,
		};
		let page = self
			.dal
			.iterate_thread_items(req.thread_id, external, &req.iterator)
			.await?;
		Ok(ThreadItemsResponse {
			edges: page
				.edges
				.into_iter()
				.map(|e| ThreadItemEdge {
					item: e.item,
					cursor: e.cursor,
				})
				.collect(),
			has_more: page.has_more,
		})
	}

	#[tracing::instrument(skip(self, req), fields(item_id = %req.item_id))]
	pub async fn thread_item_view_details(
		&self,
		req: ThreadItemViewDetailsRequest,
	) -> Result<ThreadItemViewDetailsResponse> {
		self.dal.thread_item(req.item_id, &[]).await?;
		let details = self.dal.thread_item_view_details(req.item_id).await?;
		Ok(ThreadItemViewDetailsResponse { details })
	}

	/// Deletes a thread. A patient primary entity that is still active is
	/// removed from the directory as well. Deleting twice is a no-op.
	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id, actor = %req.actor_entity_id))]
	pub async fn delete_thread(&self, req: DeleteThreadRequest) -> Result<EmptyResponse> {
		if !req.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		required(&req.actor_entity_id, "ActorEntityID")?;
		let Some(thread) = self.dal.threads_by_ids(&[req.thread_id], true).await?.pop() else {
			return Err(ServerError::not_found(format!("thread {}", req.thread_id)));
		};
		if thread.deleted {
			return Ok(EmptyResponse::default());
		}

		if !thread.primary_entity_id.is_empty() {
			match self.clients.directory.entity(&thread.primary_entity_id).await {
				Ok(entity) if entity.entity_type.is_external() && entity.status == EntityStatus::Active => {
					match self.clients.directory.delete_entity(&entity.id).await {
						Ok(()) => tracing::info!(entity_id = %entity.id, "deleted primary entity"),
						Err(crate::clients::ClientError::NotFound(_)) => {}
						Err(e) => return Err(e.into()),
					}
				}
				Ok(_) | Err(crate::clients::ClientError::NotFound(_)) => {}
				Err(e) => return Err(e.into()),
			}
		}

		if self.dal.delete_thread(thread.id, &req.actor_entity_id).await? {
			tracing::info!(thread_id = %thread.id, "thread deleted");
		}
		Ok(EmptyResponse::default())
	}

	/// Sets whether an entity follows a thread, creating its row if needed.
	#[tracing::instrument(skip(self, req), fields(thread_id = %req.thread_id, entity_id = %req.entity_id))]
	pub async fn update_member(&self, req: UpdateMemberRequest) -> Result<EmptyResponse> {
		if !req.thread_id.is_valid() {
			return Err(ServerError::invalid("ThreadID is required"));
		}
		required(&req.entity_id, "EntityID")?;
		self.dal.thread(req.thread_id, &[]).await?;
		self.dal
			.update_thread_entity(
				req.thread_id,
				&req.entity_id,
				&ThreadEntityUpdate {
					following: req.following,
					..Default::default()
				},
			)
			.await?;
		self.reindex_thread(req.thread_id).await;
		Ok(EmptyResponse::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use threading_common_thread::{Clock, Expr, ExprFlag, ExprValue, Query, SavedQuery, SavedQueryId, SavedQueryType};
	use threading_server_db::Iteration;

	use crate::api::{MessagePost, PostMessageRequest, ThreadWatermark};
	use crate::testing::{app_source, TestEnv};

	fn message(from: &str, text: &str) -> MessagePost {
		MessagePost {
			text: text.to_string(),
			source: app_source(from),
			..Default::default()
		}
	}

	#[tokio::test]
	async fn create_thread_adds_org_primary_and_follower() {
		let env = TestEnv::new().await;
		let resp = env
			.server
			.create_thread(CreateThreadRequest {
				organization_id: "o1".to_string(),
				from_entity_id: "a1".to_string(),
				primary_entity_id: "p1".to_string(),
				thread_type: ThreadType::SecureExternal,
				message: message("a1", "welcome"),
				..Default::default()
			})
			.await
			.unwrap();

		let dal = env.server.dal();
		let members: Vec<String> = dal
			.thread_members(resp.thread.thread.id)
			.await
			.unwrap()
			.into_iter()
			.map(|te| te.entity_id)
			.collect();
		assert!(members.contains(&"o1".to_string()));
		assert!(members.contains(&"p1".to_string()));
		assert!(members.contains(&"a1".to_string()));
		let creator = dal.thread_entity(resp.thread.thread.id, "a1", &[]).await.unwrap().unwrap();
		assert!(creator.following);
		assert_eq!(resp.thread.thread.message_count, 1);
		assert_eq!(resp.item.thread_id, resp.thread.thread.id);
		assert!(!resp.thread.unread);
	}

	#[tokio::test]
	async fn create_validation() {
		let env = TestEnv::new().await;
		let err = env
			.server
			.create_empty_thread(CreateEmptyThreadRequest {
				organization_id: "o1".to_string(),
				..Default::default()
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));

		let err = env
			.server
			.create_empty_thread(CreateEmptyThreadRequest {
				organization_id: "o1".to_string(),
				thread_type: ThreadType::Team,
				..Default::default()
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));

		let err = env
			.server
			.create_thread(CreateThreadRequest {
				organization_id: "o1".to_string(),
				from_entity_id: "a1".to_string(),
				thread_type: ThreadType::Team,
				message: MessagePost {
					text: "no source".to_string(),
					..Default::default()
				},
				..Default::default()
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn mark_as_read_records_receipts_and_clears_unread() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1", "a2"]).await;
		for text in ["one", "two"] {
			env.server
				.post_message(PostMessageRequest {
					thread_id: thread.id,
					from_entity_id: "a1".to_string(),
					message: message("a1", text),
					..Default::default()
				})
				.await
				.unwrap();
		}

		let before = env
			.server
			.thread(ThreadRequest {
				thread_id: thread.id,
				viewer_entity_id: Some("a2".to_string()),
			})
			.await
			.unwrap();
		assert!(before.thread.unread);

		env.clock.advance(Duration::seconds(2));
		env.server
			.mark_thread_as_read(MarkThreadAsReadRequest {
				thread_id: thread.id,
				actor_entity_id: "a2".to_string(),
				timestamp: None,
			})
			.await
			.unwrap();

		let after = env
			.server
			.thread(ThreadRequest {
				thread_id: thread.id,
				viewer_entity_id: Some("a2".to_string()),
			})
			.await
			.unwrap();
		assert!(!after.thread.unread);

		let items = env
			.server
			.thread_items(ThreadItemsRequest {
				thread_id: thread.id,
				viewer_entity_id: None,
				iterator: Iteration::first(10),
			})
			.await
			.unwrap();
		assert_eq!(items.edges.len(), 2);
		for edge in &items.edges {
			let details = env
				.server
				.thread_item_view_details(ThreadItemViewDetailsRequest { item_id: edge.item.id })
				.await
				.unwrap()
				.details;
			assert!(details.iter().any(|d| d.actor_entity_id == "a2"));
		}

		let badges = env.clients.notifications.sent().await;
		assert!(badges
			.iter()
			.any(|n| n.kind == crate::clients::NotificationKind::BadgeUpdate
				&& n.entities_to_notify == vec!["a2".to_string()]));
	}

	#[tokio::test]
	async fn mark_threads_as_read_requires_membership() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		let err = env
			.server
			.mark_threads_as_read(MarkThreadsAsReadRequest {
				entity_id: "a2".to_string(),
				thread_watermarks: vec![ThreadWatermark {
					thread_id: thread.id,
					last_message_timestamp: None,
				}],
				seen: false,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));

		let patient_thread = env.patient_thread().await;
		env.server
			.mark_threads_as_read(MarkThreadsAsReadRequest {
				entity_id: "a2".to_string(),
				thread_watermarks: vec![ThreadWatermark {
					thread_id: patient_thread.id,
					last_message_timestamp: Some(Utc.with_ymd_and_hms(2001, 1, 1, 0, 0, 0).unwrap()),
				}],
				seen: true,
			})
			.await
			.unwrap();
		let te = env
			.server
			.dal()
			.thread_entity(patient_thread.id, "a2", &[])
			.await
			.unwrap()
			.unwrap();
		assert_eq!(te.last_viewed, Some(env.clock.now()));
	}

	#[tokio::test]
	async fn team_threads_hidden_from_non_members() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		let err = env
			.server
			.thread(ThreadRequest {
				thread_id: thread.id,
				viewer_entity_id: Some("a2".to_string()),
			})
			.await
			.unwrap_err();
		assert!(err.is_not_found());

		let resp = env
			.server
			.threads_for_member(ThreadsForMemberRequest {
				entity_id: "a1".to_string(),
				primary_only: false,
			})
			.await
			.unwrap();
		assert_eq!(resp.threads.len(), 1);
	}

	#[tokio::test]
	async fn external_viewers_do_not_see_internal_items() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;
		let note = env
			.server
			.post_message(PostMessageRequest {
				thread_id: thread.id,
				from_entity_id: "a1".to_string(),
				message: MessagePost {
					internal: true,
					..message("a1", "internal")
				},
				..Default::default()
			})
			.await
			.unwrap();

		let err = env
			.server
			.thread_item(ThreadItemRequest {
				item_id: note.item.id,
				viewer_entity_id: Some("p1".to_string()),
			})
			.await
			.unwrap_err();
		assert!(err.is_not_found());

		let items = env
			.server
			.thread_items(ThreadItemsRequest {
				thread_id: thread.id,
				viewer_entity_id: Some("p1".to_string()),
				iterator: Iteration::default(),
			})
			.await
			.unwrap();
		assert!(items.edges.is_empty());

		let view = env
			.server
			.thread(ThreadRequest {
				thread_id: thread.id,
				viewer_entity_id: Some("p1".to_string()),
			})
			.await
			.unwrap();
		assert_eq!(view.thread.thread.last_message_summary, "");
	}

	#[tokio::test]
	async fn delete_thread_removes_patient_and_is_idempotent() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;
		let req = DeleteThreadRequest {
			thread_id: thread.id,
			actor_entity_id: "a1".to_string(),
		};
		env.server.delete_thread(req.clone()).await.unwrap();
		env.server.delete_thread(req).await.unwrap();

		assert_eq!(env.clients.directory.deleted().await, vec!["p1".to_string()]);
		let events = env.server.dal().thread_events(thread.id).await.unwrap();
		assert_eq!(events.len(), 1);
		let err = env
			.server
			.thread(ThreadRequest {
				thread_id: thread.id,
				viewer_entity_id: None,
			})
			.await
			.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn query_threads_through_saved_query_and_adhoc() {
		let env = TestEnv::new().await;
		let sq_id = env
			.server
			.dal()
			.create_saved_query(&SavedQuery {
				id: SavedQueryId::empty(),
				ordinal: 1,
				short_title: "Unread".to_string(),
				long_title: String::new(),
				description: String::new(),
				entity_id: "a2".to_string(),
				query: Query::new(vec![Expr::new(ExprValue::Flag(ExprFlag::Unread))]),
				unread: 0,
				total: 0,
				hidden: false,
				notifications_enabled: false,
				sq_type: SavedQueryType::Normal,
				created: env.clock.now(),
				modified: env.clock.now(),
				template: false,
			})
			.await
			.unwrap();
		let thread = env.patient_thread().await;
		env.server
			.post_message(PostMessageRequest {
				thread_id: thread.id,
				from_entity_id: "p1".to_string(),
				message: message("p1", "my knee hurts"),
				..Default::default()
			})
			.await
			.unwrap();

		let saved = env
			.server
			.query_threads(QueryThreadsRequest {
				organization_id: None,
				viewer_entity_id: "a2".to_string(),
				kind: QueryThreadsKind::Saved { saved_query_id: sq_id },
				iterator: Iteration::default(),
			})
			.await
			.unwrap();
		assert_eq!(saved.edges.len(), 1);
		assert_eq!(saved.total, 1);
		assert_eq!(saved.total_type, TotalType::Exact);

		let adhoc = env
			.server
			.query_threads(QueryThreadsRequest {
				organization_id: Some("o1".to_string()),
				viewer_entity_id: "a2".to_string(),
				kind: QueryThreadsKind::Adhoc {
					query: Query::new(vec![Expr::new(ExprValue::Token("knee".to_string()))]),
				},
				iterator: Iteration::default(),
			})
			.await
			.unwrap();
		assert_eq!(adhoc.edges.len(), 1);
		assert_eq!(adhoc.total_type, TotalType::Unknown);

		let err = env
			.server
			.query_threads(QueryThreadsRequest {
				organization_id: None,
				viewer_entity_id: "a1".to_string(),
				kind: QueryThreadsKind::Saved { saved_query_id: sq_id },
				iterator: Iteration::default(),
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));
	}

	#[tokio::test]
	async fn update_member_sets_following() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;
		env.server
			.update_member(UpdateMemberRequest {
				thread_id: thread.id,
				entity_id: "a2".to_string(),
				following: Some(true),
			})
			.await
			.unwrap();
		let te = env
			.server
			.dal()
			.thread_entity(thread.id, "a2", &[])
			.await
			.unwrap()
			.unwrap();
		assert!(te.following);
		assert!(!te.member);
	}
}
