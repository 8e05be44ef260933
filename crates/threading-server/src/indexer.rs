// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Keeps the saved-query index in step with thread activity.
//!
//! Every change to a thread re-evaluates the saved queries of the internal
//! entities that can see it, and a new or edited saved query is rebuilt by
//! scanning the threads its owner can see.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use threading_common_thread::{is_unread, SavedQuery, SavedQueryId, SavedQueryType, Thread, ThreadEntity, ThreadId};
use threading_server_db::{Dal, DbError, IterateThreadsParams, Iteration, SavedQueryThread};

use crate::clients::{Directory, Entity, EntityType};
use crate::error::Result;

/// Threads scanned per page while rebuilding a saved query.
pub const REBUILD_BATCH_SIZE: i64 = 5000;

/// What an index update learned about the entities that can see a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexUpdate {
	/// Internal entities that have at least one saved query.
	pub indexed_entities: HashSet<String>,
	/// Entities with a notifications-enabled saved query matching the thread.
	pub should_notify: HashSet<String>,
}

impl IndexUpdate {
	/// Entities without saved queries are always notified.
	pub fn wants_notification(&self, entity_id: &str) -> bool {
		!self.indexed_entities.contains(entity_id) || self.should_notify.contains(entity_id)
	}
}

#[derive(Clone)]
pub struct SavedQueryIndexer {
	dal: Dal,
	directory: Arc<dyn Directory>,
}

impl SavedQueryIndexer {
	pub fn new(dal: Dal, directory: Arc<dyn Directory>) -> Self {
		Self { dal, directory }
	}

	/// Internal entities among `entity_ids`, with organizations replaced by
	/// their internal members. Patients and unknown IDs are dropped.
	#[tracing::instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
	pub async fn resolve_internal_entities(&self, entity_ids: &[String]) -> Result<Vec<Entity>> {
		let entities = self.directory.lookup_entities(entity_ids).await?;
		let mut seen = HashSet::new();
		let mut internal = Vec::new();
		let mut org_members = Vec::new();
		for entity in entities {
			match entity.entity_type {
				EntityType::Internal => {
					if seen.insert(entity.id.clone()) {
						internal.push(entity);
					}
				}
				EntityType::Organization => org_members.extend(entity.members.iter().cloned()),
				_ => {}
			}
		}
		if !org_members.is_empty() {
			for entity in self.directory.lookup_entities(&org_members).await? {
				if entity.entity_type == EntityType::Internal && seen.insert(entity.id.clone()) {
					internal.push(entity);
				}
			}
		}
		Ok(internal)
	}

	/// The entity and the IDs whose thread memberships it sees: itself plus
	/// its organizations for internal entities, only itself otherwise.
	pub async fn entity_and_memberships(&self, entity_id: &str) -> Result<(Entity, Vec<String>)> {
		let entity = self.directory.entity(entity_id).await?;
		let mut ids = vec![entity.id.clone()];
		if entity.entity_type == EntityType::Internal {
			ids.extend(entity.memberships.iter().cloned());
		}
		Ok((entity, ids))
	}

	/// Indexes a thread that has just been created.
	#[tracing::instrument(skip(self, thread), fields(thread_id = %thread.id))]
	pub async fn add_thread(&self, thread: &Thread) -> Result<IndexUpdate> {
		let (rows, update) = self.rows_for_thread(thread).await?;
		self.dal.add_items_to_saved_query_index(&rows).await?;
		Ok(update)
	}

	/// Replaces a thread's index rows with freshly matched ones in a single
	/// transaction.
	#[tracing::instrument(skip(self, thread), fields(thread_id = %thread.id))]
	pub async fn update_thread(&self, thread: &Thread) -> Result<IndexUpdate> {
		let (rows, update) = self.rows_for_thread(thread).await?;
		let thread_id = thread.id;
		self.dal
			.transact(|tx| async move {
				tx.remove_thread_from_all_saved_query_indexes(thread_id).await?;
				tx.add_items_to_saved_query_index(&rows).await?;
				Ok::<_, DbError>(())
			})
			.await?;
		Ok(update)
	}

	async fn rows_for_thread(&self, thread: &Thread) -> Result<(Vec<SavedQueryThread>, IndexUpdate)> {
		let mut update = IndexUpdate::default();
		if thread.deleted {
			return Ok((Vec::new(), update));
		}
		let entities = self.dal.entities_for_thread(thread.id).await?;
		let member_ids: Vec<String> = entities
			.iter()
			.filter(|te| te.member)
			.map(|te| te.entity_id.clone())
			.collect();
		if member_ids.is_empty() {
			return Ok((Vec::new(), update));
		}

		let internal: Vec<String> = self
			.resolve_internal_entities(&member_ids)
			.await?
			.into_iter()
			.map(|e| e.id)
			.collect();
		let saved_queries = self.dal.saved_queries_for_entities(&internal).await?;
		let by_entity: HashMap<&str, &ThreadEntity> = entities.iter().map(|te| (te.entity_id.as_str(), te)).collect();
		let notifications: HashMap<&str, SavedQueryId> = saved_queries
			.iter()
			.filter(|sq| sq.sq_type == SavedQueryType::Notifications)
			.map(|sq| (sq.entity_id.as_str(), sq.id))
			.collect();

		let mut rows: HashMap<(SavedQueryId, ThreadId), SavedQueryThread> = HashMap::new();
		for sq in &saved_queries {
			update.indexed_entities.insert(sq.entity_id.clone());
			if sq.sq_type != SavedQueryType::Normal {
				continue;
			}
			let te = by_entity.get(sq.entity_id.as_str()).copied();
			if !sq.query.matches(thread, te, false) {
				continue;
			}
			let unread = is_unread(thread, te, false);
			let row = index_row(sq.id, thread, unread);
			rows.insert(row.key(), row);
			if sq.notifications_enabled {
				update.should_notify.insert(sq.entity_id.clone());
				if let Some(nsq) = notifications.get(sq.entity_id.as_str()) {
					let row = index_row(*nsq, thread, unread);
					rows.insert(row.key(), row);
				}
			}
		}
		Ok((rows.into_values().collect(), update))
	}

	/// Clears and repopulates a saved query's index from the threads its
	/// owner can see, then refreshes the owner's notifications roll-up.
	#[tracing::instrument(skip(self, sq), fields(saved_query_id = %sq.id, entity_id = %sq.entity_id))]
	pub async fn rebuild_saved_query(&self, sq: &SavedQuery) -> Result<()> {
		if sq.sq_type == SavedQueryType::Notifications {
			self.dal.rebuild_notifications_saved_query(&sq.entity_id).await?;
			return Ok(());
		}
		let (entity, member_ids) = self.entity_and_memberships(&sq.entity_id).await?;
		let external = entity.entity_type.is_external();

		self.dal.remove_all_items_from_saved_query_index(sq.id).await?;
		let mut params = IterateThreadsParams {
			organization_id: None,
			member_entity_ids: member_ids,
			viewer_entity_id: sq.entity_id.clone(),
			for_external: external,
			query: Some(sq.query.clone()),
			iteration: Iteration::first(REBUILD_BATCH_SIZE),
		};
		let mut indexed = 0usize;
		loop {
			let page = self
				.dal
				.iterate_threads_with_count(&params, REBUILD_BATCH_SIZE)
				.await?;
			let rows: Vec<SavedQueryThread> = page
				.items()
				.filter(|item| !item.thread.deleted)
				.filter(|item| sq.query.matches(&item.thread, item.thread_entity.as_ref(), external))
				.map(|item| {
					let unread = is_unread(&item.thread, item.thread_entity.as_ref(), external);
					index_row(sq.id, &item.thread, unread)
				})
				.collect();
			indexed += rows.len();
			self.dal.add_items_to_saved_query_index(&rows).await?;

			match page.last_cursor() {
				Some(cursor) if page.has_more => {
					params.iteration = Iteration::after(cursor, REBUILD_BATCH_SIZE);
				}
				_ => break,
			}
		}
		tracing::debug!(indexed, "saved query rebuilt");

		self.dal.rebuild_notifications_saved_query(&sq.entity_id).await?;
		Ok(())
	}
}

fn index_row(saved_query_id: SavedQueryId, thread: &Thread, unread: bool) -> SavedQueryThread {
	SavedQueryThread {
		saved_query_id,
		thread_id: thread.id,
		unread,
		timestamp: thread.last_message_timestamp,
	}
}
