// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Per-entity thread state: membership, following and read markers.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{ThreadEntity, ThreadId};

use crate::dal::{placeholders, Dal, QueryOption};
use crate::error::Result;
use crate::time::{from_micros, opt_from_micros, to_micros};

const ENTITY_COLUMNS: &str =
	"thread_id, entity_id, member, following, joined, last_viewed, last_unread_notify, last_referenced";

/// Fields to set on a thread entity row. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ThreadEntityUpdate {
	pub member: Option<bool>,
	pub following: Option<bool>,
	/// Only ever moves forward; an earlier value is ignored.
	pub last_viewed: Option<DateTime<Utc>>,
	pub last_unread_notify: Option<DateTime<Utc>>,
	pub last_referenced: Option<DateTime<Utc>>,
}

impl ThreadEntityUpdate {
	pub fn is_empty(&self) -> bool {
		*self == Self::default()
	}
}

fn entity_from_row(row: &SqliteRow) -> Result<ThreadEntity> {
	Ok(ThreadEntity {
		thread_id: row.try_get("thread_id")?,
		entity_id: row.try_get("entity_id")?,
		member: row.try_get("member")?,
		following: row.try_get("following")?,
		joined: from_micros(row.try_get("joined")?),
		last_viewed: opt_from_micros(row.try_get("last_viewed")?),
		last_unread_notify: opt_from_micros(row.try_get("last_unread_notify")?),
		last_referenced: opt_from_micros(row.try_get("last_referenced")?),
	})
}

impl Dal {
	#[tracing::instrument(skip(self, opts), fields(thread_id = %thread_id))]
	pub async fn thread_entity(
		&self,
		thread_id: ThreadId,
		entity_id: &str,
		opts: &[QueryOption],
	) -> Result<Option<ThreadEntity>> {
		self.check_for_update(opts);
		let sql = format!("SELECT {ENTITY_COLUMNS} FROM thread_entities WHERE thread_id = ? AND entity_id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(thread_id).bind(entity_id))
			.await?;
		row.as_ref().map(entity_from_row).transpose()
	}

	/// The entity's rows for each of the given threads that it has one for.
	#[tracing::instrument(skip(self, thread_ids), fields(count = thread_ids.len()))]
	pub async fn thread_entities_for_threads(
		&self,
		thread_ids: &[ThreadId],
		entity_id: &str,
	) -> Result<HashMap<ThreadId, ThreadEntity>> {
		if thread_ids.is_empty() {
			return Ok(HashMap::new());
		}
		let sql = format!(
			"SELECT {ENTITY_COLUMNS} FROM thread_entities WHERE entity_id = ? AND thread_id IN ({})",
			placeholders(thread_ids.len())
		);
		let mut q = sqlx::query(&sql).bind(entity_id);
		for id in thread_ids {
			q = q.bind(*id);
		}
		let rows = self.fetch_all(q).await?;
		rows.iter()
			.map(|row| entity_from_row(row).map(|te| (te.thread_id, te)))
			.collect()
	}

	/// Every entity row of a thread, members or not.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn entities_for_thread(&self, thread_id: ThreadId) -> Result<Vec<ThreadEntity>> {
		let sql = format!("SELECT {ENTITY_COLUMNS} FROM thread_entities WHERE thread_id = ? ORDER BY entity_id");
		let rows = self.fetch_all(sqlx::query(&sql).bind(thread_id)).await?;
		rows.iter().map(entity_from_row).collect()
	}

	#[tracing::instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn thread_members(&self, thread_id: ThreadId) -> Result<Vec<ThreadEntity>> {
		let sql = format!(
			"SELECT {ENTITY_COLUMNS} FROM thread_entities WHERE thread_id = ? AND member = 1 ORDER BY entity_id"
		);
		let rows = self.fetch_all(sqlx::query(&sql).bind(thread_id)).await?;
		rows.iter().map(entity_from_row).collect()
	}

	/// Creates or updates an entity's row in a thread. With an empty update
	/// this only ensures the row exists.
	#[tracing::instrument(skip(self, update), fields(thread_id = %thread_id))]
	pub async fn update_thread_entity(
		&self,
		thread_id: ThreadId,
		entity_id: &str,
		update: &ThreadEntityUpdate,
	) -> Result<()> {
		let joined = to_micros(self.now());
		if update.is_empty() {
			self.execute(
				sqlx::query("INSERT OR IGNORE INTO thread_entities (thread_id, entity_id, joined) VALUES (?, ?, ?)")
					.bind(thread_id)
					.bind(entity_id)
					.bind(joined),
			)
			.await?;
			return Ok(());
		}

		let mut cols = vec!["thread_id", "entity_id", "joined"];
		let mut sets = Vec::new();
		if update.member.is_some() {
			cols.push("member");
			sets.push("member = excluded.member");
		}
		if update.following.is_some() {
			cols.push("following");
			sets.push("following = excluded.following");
		}
		if update.last_viewed.is_some() {
			cols.push("last_viewed");
			sets.push("last_viewed = MAX(COALESCE(thread_entities.last_viewed, 0), excluded.last_viewed)");
		}
		if update.last_unread_notify.is_some() {
			cols.push("last_unread_notify");
			sets.push("last_unread_notify = excluded.last_unread_notify");
		}
		if update.last_referenced.is_some() {
			cols.push("last_referenced");
			sets.push("last_referenced = excluded.last_referenced");
		}
		let sql = format!(
			"INSERT INTO thread_entities ({}) VALUES ({}) ON CONFLICT(thread_id, entity_id) DO UPDATE SET {}",
			cols.join(", "),
			placeholders(cols.len()),
			sets.join(", ")
		);
		let mut q = sqlx::query(&sql).bind(thread_id).bind(entity_id).bind(joined);
		if let Some(v) = update.member {
			q = q.bind(v);
		}
		if let Some(v) = update.following {
			q = q.bind(v);
		}
		if let Some(v) = update.last_viewed {
			q = q.bind(to_micros(v));
		}
		if let Some(v) = update.last_unread_notify {
			q = q.bind(to_micros(v));
		}
		if let Some(v) = update.last_referenced {
			q = q.bind(to_micros(v));
		}
		self.execute(q).await?;
		Ok(())
	}

	#[tracing::instrument(skip(self, entity_ids), fields(thread_id = %thread_id, count = entity_ids.len()))]
	pub async fn add_thread_members(&self, thread_id: ThreadId, entity_ids: &[String]) -> Result<()> {
		let update = ThreadEntityUpdate {
			member: Some(true),
			..Default::default()
		};
		for entity_id in entity_ids {
			self.update_thread_entity(thread_id, entity_id, &update).await?;
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, entity_ids), fields(thread_id = %thread_id, count = entity_ids.len()))]
	pub async fn remove_thread_members(&self, thread_id: ThreadId, entity_ids: &[String]) -> Result<()> {
		self.set_flag_for(thread_id, entity_ids, "member", false).await
	}

	#[tracing::instrument(skip(self, entity_ids), fields(thread_id = %thread_id, count = entity_ids.len()))]
	pub async fn add_thread_followers(&self, thread_id: ThreadId, entity_ids: &[String]) -> Result<()> {
		let update = ThreadEntityUpdate {
			following: Some(true),
			..Default::default()
		};
		for entity_id in entity_ids {
			self.update_thread_entity(thread_id, entity_id, &update).await?;
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, entity_ids), fields(thread_id = %thread_id, count = entity_ids.len()))]
	pub async fn remove_thread_followers(&self, thread_id: ThreadId, entity_ids: &[String]) -> Result<()> {
		self.set_flag_for(thread_id, entity_ids, "following", false).await
	}

	async fn set_flag_for(&self, thread_id: ThreadId, entity_ids: &[String], column: &str, value: bool) -> Result<()> {
		if entity_ids.is_empty() {
			return Ok(());
		}
		let sql = format!(
			"UPDATE thread_entities SET {column} = ? WHERE thread_id = ? AND entity_id IN ({})",
			placeholders(entity_ids.len())
		);
		let mut q = sqlx::query(&sql).bind(value).bind(thread_id);
		for id in entity_ids {
			q = q.bind(id.as_str());
		}
		self.execute(q).await?;
		Ok(())
	}
}
