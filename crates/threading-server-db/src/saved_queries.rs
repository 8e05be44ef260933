// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{Query, SavedQuery, SavedQueryId, SavedQueryType};

use crate::dal::{placeholders, Dal, QueryOption};
use crate::error::{DbError, Result};
use crate::time::{from_micros, to_micros};

const SQ_COLUMNS: &str = "id, ordinal, short_title, long_title, description, entity_id, query, unread, total, hidden, \
	notifications_enabled, type, template, created, modified";

/// Field mask for [`Dal::update_saved_query`].
#[derive(Debug, Clone, Default)]
pub struct SavedQueryUpdate {
	pub ordinal: Option<i64>,
	pub short_title: Option<String>,
	pub long_title: Option<String>,
	pub description: Option<String>,
	pub query: Option<Query>,
	pub hidden: Option<bool>,
	pub notifications_enabled: Option<bool>,
}

fn saved_query_from_row(row: &SqliteRow) -> Result<SavedQuery> {
	let query: String = row.try_get("query")?;
	let sq_type: String = row.try_get("type")?;
	Ok(SavedQuery {
		id: row.try_get("id")?,
		ordinal: row.try_get("ordinal")?,
		short_title: row.try_get("short_title")?,
		long_title: row.try_get("long_title")?,
		description: row.try_get("description")?,
		entity_id: row.try_get("entity_id")?,
		query: serde_json::from_str(&query)?,
		unread: row.try_get("unread")?,
		total: row.try_get("total")?,
		hidden: row.try_get("hidden")?,
		notifications_enabled: row.try_get("notifications_enabled")?,
		sq_type: sq_type.parse().map_err(DbError::Internal)?,
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
		template: row.try_get("template")?,
	})
}

impl Dal {
	/// Stores a saved query. An entity may own a single non-template
	/// notifications query; a second one is a conflict.
	#[tracing::instrument(skip(self, sq), fields(entity_id = %sq.entity_id, sq_type = sq.sq_type.as_str()))]
	pub async fn create_saved_query(&self, sq: &SavedQuery) -> Result<SavedQueryId> {
		let id = if sq.id.is_valid() { sq.id } else { SavedQueryId::new() };
		let now = to_micros(self.now());
		let query = serde_json::to_string(&sq.query)?;
		let result = self
			.execute(
				sqlx::query(
					r#"
                    INSERT INTO saved_queries (id, ordinal, short_title, long_title, description, entity_id, query,
                        unread, total, hidden, notifications_enabled, type, template, created, modified)
                    VALUES (?, ?, ?, ?, ?, ?, ?, 0, 0, ?, ?, ?, ?, ?, ?)
                    "#,
				)
				.bind(id)
				.bind(sq.ordinal)
				.bind(&sq.short_title)
				.bind(&sq.long_title)
				.bind(&sq.description)
				.bind(&sq.entity_id)
				.bind(query)
				.bind(sq.hidden)
				.bind(sq.notifications_enabled)
				.bind(sq.sq_type.as_str())
				.bind(sq.template)
				.bind(now)
				.bind(now),
			)
			.await;
		match result {
			Ok(_) => Ok(id),
			Err(e) if e.is_unique_violation() => Err(DbError::Conflict(format!(
				"entity {} already has a notifications saved query",
				sq.entity_id
			))),
			Err(e) => Err(e),
		}
	}

	#[tracing::instrument(skip(self, opts), fields(saved_query_id = %id))]
	pub async fn saved_query(&self, id: SavedQueryId, opts: &[QueryOption]) -> Result<SavedQuery> {
		self.check_for_update(opts);
		let sql = format!("SELECT {SQ_COLUMNS} FROM saved_queries WHERE id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(id))
			.await?
			.ok_or_else(|| DbError::NotFound(format!("saved query {id}")))?;
		saved_query_from_row(&row)
	}

	/// The entity's own saved queries ordered by ordinal. Templates are
	/// excluded.
	#[tracing::instrument(skip(self))]
	pub async fn saved_queries(&self, entity_id: &str) -> Result<Vec<SavedQuery>> {
		self.saved_queries_where(entity_id, false).await
	}

	#[tracing::instrument(skip(self))]
	pub async fn saved_query_templates(&self, entity_id: &str) -> Result<Vec<SavedQuery>> {
		self.saved_queries_where(entity_id, true).await
	}

	async fn saved_queries_where(&self, entity_id: &str, template: bool) -> Result<Vec<SavedQuery>> {
		let sql = format!(
			"SELECT {SQ_COLUMNS} FROM saved_queries WHERE entity_id = ? AND template = ? ORDER BY ordinal, id"
		);
		let rows = self
			.fetch_all(sqlx::query(&sql).bind(entity_id).bind(template))
			.await?;
		rows.iter().map(saved_query_from_row).collect()
	}

	/// Non-template saved queries of several entities at once.
	#[tracing::instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
	pub async fn saved_queries_for_entities(&self, entity_ids: &[String]) -> Result<Vec<SavedQuery>> {
		if entity_ids.is_empty() {
			return Ok(Vec::new());
		}
		let sql = format!(
			"SELECT {SQ_COLUMNS} FROM saved_queries WHERE template = 0 AND entity_id IN ({}) ORDER BY entity_id, ordinal, id",
			placeholders(entity_ids.len())
		);
		let mut q = sqlx::query(&sql);
		for id in entity_ids {
			q = q.bind(id.as_str());
		}
		let rows = self.fetch_all(q).await?;
		rows.iter().map(saved_query_from_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn notifications_saved_query(&self, entity_id: &str) -> Result<Option<SavedQuery>> {
		let sql = format!(
			"SELECT {SQ_COLUMNS} FROM saved_queries WHERE entity_id = ? AND type = ? AND template = 0"
		);
		let row = self
			.fetch_optional(
				sqlx::query(&sql)
					.bind(entity_id)
					.bind(SavedQueryType::Notifications.as_str()),
			)
			.await?;
		row.as_ref().map(saved_query_from_row).transpose()
	}

	#[tracing::instrument(skip(self, update), fields(saved_query_id = %id))]
	pub async fn update_saved_query(&self, id: SavedQueryId, update: &SavedQueryUpdate) -> Result<()> {
		let mut sets = vec!["modified = ?"];
		if update.ordinal.is_some() {
			sets.push("ordinal = ?");
		}
		if update.short_title.is_some() {
			sets.push("short_title = ?");
		}
		if update.long_title.is_some() {
			sets.push("long_title = ?");
		}
		if update.description.is_some() {
			sets.push("description = ?");
		}
		if update.query.is_some() {
			sets.push("query = ?");
		}
		if update.hidden.is_some() {
			sets.push("hidden = ?");
		}
		if update.notifications_enabled.is_some() {
			sets.push("notifications_enabled = ?");
		}
		let query = update.query.as_ref().map(serde_json::to_string).transpose()?;
		let sql = format!("UPDATE saved_queries SET {} WHERE id = ?", sets.join(", "));
		let mut q = sqlx::query(&sql).bind(to_micros(self.now()));
		if let Some(v) = update.ordinal {
			q = q.bind(v);
		}
		if let Some(v) = &update.short_title {
			q = q.bind(v.as_str());
		}
		if let Some(v) = &update.long_title {
			q = q.bind(v.as_str());
		}
		if let Some(v) = &update.description {
			q = q.bind(v.as_str());
		}
		if let Some(v) = query {
			q = q.bind(v);
		}
		if let Some(v) = update.hidden {
			q = q.bind(v);
		}
		if let Some(v) = update.notifications_enabled {
			q = q.bind(v);
		}
		let result = self.execute(q.bind(id)).await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("saved query {id}")));
		}
		Ok(())
	}

	/// Deletes saved queries along with their index rows. Returns the number
	/// of saved queries removed.
	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn delete_saved_queries(&self, ids: &[SavedQueryId]) -> Result<u64> {
		if ids.is_empty() {
			return Ok(0);
		}
		let ids = ids.to_vec();
		self.transact(|tx| async move {
			let list = placeholders(ids.len());
			let index_sql = format!("DELETE FROM saved_query_thread WHERE saved_query_id IN ({list})");
			let mut q = sqlx::query(&index_sql);
			for id in &ids {
				q = q.bind(*id);
			}
			tx.execute(q).await?;

			let sq_sql = format!("DELETE FROM saved_queries WHERE id IN ({list})");
			let mut q = sqlx::query(&sq_sql);
			for id in &ids {
				q = q.bind(*id);
			}
			let result = tx.execute(q).await?;
			Ok::<_, DbError>(result.rows_affected())
		})
		.await
	}
}
