// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Threads, thread tags and thread events.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{
	Endpoint, ExprFlag, ExprThreadType, ExprValue, Query, Tag, Thread, ThreadEntity, ThreadEvent, ThreadId,
	ThreadType,
};

use crate::dal::{placeholders, Dal, QueryOption, SqliteQuery};
use crate::error::{DbError, Result};
use crate::iteration::{Direction, Edge, Iteration, Page};
use crate::time::{format_time_cursor, from_micros, opt_from_micros, parse_time_cursor, to_micros};

pub(crate) const THREAD_COLUMNS: &str = "t.id, t.organization_id, t.primary_entity_id, t.last_message_timestamp, \
	t.last_external_message_timestamp, t.last_message_summary, t.last_external_message_summary, \
	t.last_primary_entity_endpoints, t.created, t.message_count, t.system_title, t.user_title, t.type, t.origin, \
	t.deleted";

/// Viewer membership columns, aliased so they can be selected alongside a
/// thread from an outer join on `thread_entities te`.
pub(crate) const VIEWER_COLUMNS: &str = "te.thread_id AS te_thread_id, te.entity_id AS te_entity_id, \
	te.member AS te_member, te.following AS te_following, te.joined AS te_joined, te.last_viewed AS te_last_viewed, \
	te.last_unread_notify AS te_last_unread_notify, te.last_referenced AS te_last_referenced";

/// A thread together with the viewer's membership row, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadListItem {
	pub thread: Thread,
	pub thread_entity: Option<ThreadEntity>,
}

/// Parameters of a raw thread scan.
#[derive(Debug, Clone, Default)]
pub struct IterateThreadsParams {
	/// Restricts the scan to one organization's threads.
	pub organization_id: Option<String>,
	/// Threads in which any of these entities is a member.
	pub member_entity_ids: Vec<String>,
	/// Entity whose read state is joined and used by flag atoms.
	pub viewer_entity_id: String,
	/// Order and filter by the patient-facing timestamp and summary.
	pub for_external: bool,
	pub query: Option<Query>,
	pub iteration: Iteration,
}

pub(crate) fn thread_from_row(row: &SqliteRow) -> Result<Thread> {
	let endpoints: String = row.try_get("last_primary_entity_endpoints")?;
	let last_primary_entity_endpoints: Vec<Endpoint> = if endpoints.is_empty() {
		Vec::new()
	} else {
		serde_json::from_str(&endpoints)?
	};
	let thread_type: String = row.try_get("type")?;
	let origin: String = row.try_get("origin")?;
	Ok(Thread {
		id: row.try_get("id")?,
		organization_id: row.try_get("organization_id")?,
		primary_entity_id: row.try_get("primary_entity_id")?,
		last_message_timestamp: from_micros(row.try_get("last_message_timestamp")?),
		last_external_message_timestamp: from_micros(row.try_get("last_external_message_timestamp")?),
		last_message_summary: row.try_get("last_message_summary")?,
		last_external_message_summary: row.try_get("last_external_message_summary")?,
		last_primary_entity_endpoints,
		created: from_micros(row.try_get("created")?),
		message_count: row.try_get("message_count")?,
		system_title: row.try_get("system_title")?,
		user_title: row.try_get("user_title")?,
		thread_type: thread_type.parse().map_err(DbError::Internal)?,
		origin: origin.parse().map_err(DbError::Internal)?,
		deleted: row.try_get("deleted")?,
		tags: Vec::new(),
	})
}

pub(crate) fn viewer_from_row(row: &SqliteRow) -> Result<Option<ThreadEntity>> {
	let entity_id: Option<String> = row.try_get("te_entity_id")?;
	let Some(entity_id) = entity_id else {
		return Ok(None);
	};
	Ok(Some(ThreadEntity {
		thread_id: row.try_get("te_thread_id")?,
		entity_id,
		member: row.try_get("te_member")?,
		following: row.try_get("te_following")?,
		joined: from_micros(row.try_get("te_joined")?),
		last_viewed: opt_from_micros(row.try_get("te_last_viewed")?),
		last_unread_notify: opt_from_micros(row.try_get("te_last_unread_notify")?),
		last_referenced: opt_from_micros(row.try_get("te_last_referenced")?),
	}))
}

/// A value bound into dynamically built SQL.
#[derive(Debug, Clone)]
pub(crate) enum Arg {
	Text(String),
	Int(i64),
}

pub(crate) fn bind_args<'q>(mut q: SqliteQuery<'q>, args: &'q [Arg]) -> SqliteQuery<'q> {
	for arg in args {
		q = match arg {
			Arg::Text(s) => q.bind(s.as_str()),
			Arg::Int(i) => q.bind(*i),
		};
	}
	q
}

fn thread_type_list(types: &[ThreadType]) -> String {
	types
		.iter()
		.map(|t| format!("'{}'", t.as_str()))
		.collect::<Vec<_>>()
		.join(", ")
}

/// Escapes LIKE wildcards; patterns use `ESCAPE '\\'`.
fn escape_like(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	for c in s.chars() {
		if matches!(c, '%' | '_' | '\\') {
			out.push('\\');
		}
		out.push(c);
	}
	out
}

/// Translates a saved-query expression into SQL over `threads t` joined with
/// the viewer's `thread_entities te`. Flag atoms compare read state at
/// second precision, as the in-memory matcher does.
pub(crate) fn query_conditions(query: &Query, for_external: bool, args: &mut Vec<Arg>) -> Vec<String> {
	let (ts_col, summary_col) = if for_external {
		("t.last_external_message_timestamp", "t.last_external_message_summary")
	} else {
		("t.last_message_timestamp", "t.last_message_summary")
	};
	query
		.expressions
		.iter()
		.map(|e| {
			let cond = match &e.value {
				ExprValue::Flag(ExprFlag::Unread) => format!(
					"(t.message_count > 0 AND (te.last_viewed IS NULL OR te.last_viewed / 1000000 < {ts_col} / 1000000))"
				),
				ExprValue::Flag(ExprFlag::UnreadReference) => "(te.last_referenced IS NOT NULL AND (te.last_viewed IS NULL OR te.last_viewed < te.last_referenced))".to_string(),
				ExprValue::Flag(ExprFlag::Following) => "(COALESCE(te.following, 0) = 1)".to_string(),
				ExprValue::ThreadType(tt) => {
					let types: &[ThreadType] = match tt {
						ExprThreadType::Patient => &[ThreadType::External, ThreadType::SecureExternal],
						ExprThreadType::PatientSecure => &[ThreadType::SecureExternal],
						ExprThreadType::PatientStandard => &[ThreadType::External],
						ExprThreadType::Team => &[ThreadType::Team, ThreadType::LegacyTeam],
						ExprThreadType::Support => &[ThreadType::Support, ThreadType::Setup],
					};
					format!("(t.type IN ({}))", thread_type_list(types))
				}
				ExprValue::Token(token) => {
					let pattern = format!("%{}%", escape_like(token));
					for _ in 0..3 {
						args.push(Arg::Text(pattern.clone()));
					}
					format!(
						"(t.system_title LIKE ? ESCAPE '\\' OR t.user_title LIKE ? ESCAPE '\\' OR {summary_col} LIKE ? ESCAPE '\\')"
					)
				}
				ExprValue::Tag(tag) => {
					args.push(Arg::Text(tag.clone()));
					"(EXISTS (SELECT 1 FROM thread_tags tt JOIN tags tg ON tg.id = tt.tag_id WHERE tt.thread_id = t.id AND tg.tag = ? COLLATE NOCASE))".to_string()
				}
			};
			if e.not {
				format!("(NOT {cond})")
			} else {
				cond
			}
		})
		.collect()
}

impl Dal {
	/// Inserts a thread. An invalid ID is replaced with a fresh one and unset
	/// timestamps default to now.
	#[tracing::instrument(skip(self, thread), fields(organization_id = %thread.organization_id, thread_type = thread.thread_type.as_str()))]
	pub async fn create_thread(&self, thread: &Thread) -> Result<ThreadId> {
		if thread.thread_type == ThreadType::Unknown {
			return Err(DbError::Internal("thread type is required".to_string()));
		}
		let id = if thread.id.is_valid() {
			thread.id
		} else {
			ThreadId::new()
		};
		let now = self.now();
		let epoch = DateTime::<Utc>::default();
		let or_now = |t: DateTime<Utc>| if t == epoch { now } else { t };
		let endpoints = serde_json::to_string(&thread.last_primary_entity_endpoints)?;
		let organization_id = thread.organization_id.clone();
		let tags: Vec<String> = thread.tags.iter().map(|t| t.name.clone()).collect();
		let insert = sqlx::query(
			r#"
            INSERT INTO threads (id, organization_id, primary_entity_id, last_message_timestamp,
                last_external_message_timestamp, last_message_summary, last_external_message_summary,
                last_primary_entity_endpoints, created, message_count, system_title, user_title, type, origin, deleted)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
		)
		.bind(id)
		.bind(&thread.organization_id)
		.bind(&thread.primary_entity_id)
		.bind(to_micros(or_now(thread.last_message_timestamp)))
		.bind(to_micros(or_now(thread.last_external_message_timestamp)))
		.bind(&thread.last_message_summary)
		.bind(&thread.last_external_message_summary)
		.bind(endpoints)
		.bind(to_micros(or_now(thread.created)))
		.bind(thread.message_count)
		.bind(&thread.system_title)
		.bind(&thread.user_title)
		.bind(thread.thread_type.as_str())
		.bind(thread.origin.as_str());

		self.transact(|tx| async move {
			tx.execute(insert).await?;
			if !tags.is_empty() {
				tx.add_thread_tags(&organization_id, id, &tags).await?;
			}
			Ok::<_, DbError>(())
		})
		.await?;

		tracing::debug!(thread_id = %id, "thread created");
		Ok(id)
	}

	/// A non-deleted thread with its tags.
	#[tracing::instrument(skip(self, opts), fields(thread_id = %id))]
	pub async fn thread(&self, id: ThreadId, opts: &[QueryOption]) -> Result<Thread> {
		self.check_for_update(opts);
		let mut threads = self.threads_by_ids(&[id], false).await?;
		threads
			.pop()
			.ok_or_else(|| DbError::NotFound(format!("thread {id}")))
	}

	/// Looks threads up by ID, preserving no particular order. Missing IDs
	/// are skipped.
	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn threads_by_ids(&self, ids: &[ThreadId], include_deleted: bool) -> Result<Vec<Thread>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let deleted = if include_deleted { "" } else { " AND t.deleted = 0" };
		let sql = format!(
			"SELECT {THREAD_COLUMNS} FROM threads t WHERE t.id IN ({}){deleted}",
			placeholders(ids.len())
		);
		let mut q = sqlx::query(&sql);
		for id in ids {
			q = q.bind(*id);
		}
		let rows = self.fetch_all(q).await?;
		let threads = rows.iter().map(thread_from_row).collect::<Result<Vec<_>>>()?;
		self.with_tags(threads).await
	}

	/// Threads the entity belongs to, newest activity first. With
	/// `primary_only` only threads where it is the primary entity.
	#[tracing::instrument(skip(self))]
	pub async fn threads_for_member(&self, entity_id: &str, primary_only: bool) -> Result<Vec<Thread>> {
		let rows = if primary_only {
			let sql = format!(
				"SELECT {THREAD_COLUMNS} FROM threads t WHERE t.primary_entity_id = ? AND t.deleted = 0 ORDER BY t.last_message_timestamp DESC"
			);
			self.fetch_all(sqlx::query(&sql).bind(entity_id)).await?
		} else {
			let sql = format!(
				"SELECT {THREAD_COLUMNS} FROM threads t
                 JOIN thread_entities m ON m.thread_id = t.id
                 WHERE m.entity_id = ? AND m.member = 1 AND t.deleted = 0
                 ORDER BY t.last_message_timestamp DESC"
			);
			self.fetch_all(sqlx::query(&sql).bind(entity_id)).await?
		};
		let threads = rows.iter().map(thread_from_row).collect::<Result<Vec<_>>>()?;
		self.with_tags(threads).await
	}

	#[tracing::instrument(skip(self))]
	pub async fn threads_for_org(
		&self,
		organization_id: &str,
		thread_type: Option<ThreadType>,
		limit: i64,
	) -> Result<Vec<Thread>> {
		let limit = if limit <= 0 { self.limits().max_threads } else { limit };
		let rows = match thread_type {
			Some(tt) => {
				let sql = format!(
					"SELECT {THREAD_COLUMNS} FROM threads t WHERE t.organization_id = ? AND t.type = ? AND t.deleted = 0 ORDER BY t.last_message_timestamp DESC LIMIT ?"
				);
				self.fetch_all(sqlx::query(&sql).bind(organization_id).bind(tt.as_str()).bind(limit))
					.await?
			}
			None => {
				let sql = format!(
					"SELECT {THREAD_COLUMNS} FROM threads t WHERE t.organization_id = ? AND t.deleted = 0 ORDER BY t.last_message_timestamp DESC LIMIT ?"
				);
				self.fetch_all(sqlx::query(&sql).bind(organization_id).bind(limit)).await?
			}
		};
		let threads = rows.iter().map(thread_from_row).collect::<Result<Vec<_>>>()?;
		self.with_tags(threads).await
	}

	/// Scans threads visible to a set of member entities, newest activity
	/// first, optionally filtered by a saved-query expression.
	#[tracing::instrument(skip(self, params), fields(viewer = %params.viewer_entity_id, members = params.member_entity_ids.len()))]
	pub async fn iterate_threads(&self, params: &IterateThreadsParams) -> Result<Page<ThreadListItem>> {
		let limits = self.limits();
		let count = params
			.iteration
			.clamped_count(limits.default_threads, limits.max_threads);
		self.iterate_threads_with_count(params, count).await
	}

	/// Like [`Dal::iterate_threads`] but with an explicit page size that is
	/// not capped, for bulk scans such as index rebuilds.
	pub async fn iterate_threads_with_count(
		&self,
		params: &IterateThreadsParams,
		count: i64,
	) -> Result<Page<ThreadListItem>> {
		if params.member_entity_ids.is_empty() && params.organization_id.is_none() {
			return Ok(Page::empty());
		}
		let col = if params.for_external {
			"t.last_external_message_timestamp"
		} else {
			"t.last_message_timestamp"
		};

		let mut args = vec![Arg::Text(params.viewer_entity_id.clone())];
		let mut conds = vec!["t.deleted = 0".to_string()];
		if let Some(org) = &params.organization_id {
			conds.push("t.organization_id = ?".to_string());
			args.push(Arg::Text(org.clone()));
		}
		if !params.member_entity_ids.is_empty() {
			conds.push(format!(
				"EXISTS (SELECT 1 FROM thread_entities m WHERE m.thread_id = t.id AND m.member = 1 AND m.entity_id IN ({}))",
				placeholders(params.member_entity_ids.len())
			));
			args.extend(params.member_entity_ids.iter().cloned().map(Arg::Text));
		}
		if let Some(start) = params.iteration.start() {
			conds.push(format!("{col} < ?"));
			args.push(Arg::Int(to_micros(parse_time_cursor(start)?)));
		}
		if let Some(end) = params.iteration.end() {
			conds.push(format!("{col} > ?"));
			args.push(Arg::Int(to_micros(parse_time_cursor(end)?)));
		}
		if let Some(query) = &params.query {
			conds.extend(query_conditions(query, params.for_external, &mut args));
		}
		let order = match params.iteration.direction {
			Direction::FromStart => "DESC",
			Direction::FromEnd => "ASC",
		};
		args.push(Arg::Int(count + 1));

		let sql = format!(
			"SELECT {THREAD_COLUMNS}, {VIEWER_COLUMNS}
             FROM threads t
             LEFT JOIN thread_entities te ON te.thread_id = t.id AND te.entity_id = ?
             WHERE {}
             ORDER BY {col} {order}, t.id {order}
             LIMIT ?",
			conds.join(" AND ")
		);
		let rows = self.fetch_all(bind_args(sqlx::query(&sql), &args)).await?;

		let mut threads = Vec::with_capacity(rows.len());
		let mut entities = Vec::with_capacity(rows.len());
		for row in &rows {
			threads.push(thread_from_row(row)?);
			entities.push(viewer_from_row(row)?);
		}
		let threads = self.with_tags(threads).await?;
		let edges = threads
			.into_iter()
			.zip(entities)
			.map(|(thread, thread_entity)| Edge {
				cursor: format_time_cursor(thread.last_timestamp(params.for_external)),
				item: ThreadListItem { thread, thread_entity },
			})
			.collect();
		Ok(Page::from_scan(edges, count, params.iteration.direction))
	}

	/// Marks a thread deleted and records the event. Returns false if it
	/// was already deleted. The thread is dropped from every saved-query
	/// index in the same transaction.
	#[tracing::instrument(skip(self), fields(thread_id = %id))]
	pub async fn delete_thread(&self, id: ThreadId, actor_entity_id: &str) -> Result<bool> {
		let actor = actor_entity_id.to_string();
		self.transact(|tx| async move {
			let result = tx
				.execute(sqlx::query("UPDATE threads SET deleted = 1 WHERE id = ? AND deleted = 0").bind(id))
				.await?;
			if result.rows_affected() == 0 {
				let exists = tx
					.fetch_optional(sqlx::query("SELECT id FROM threads WHERE id = ?").bind(id))
					.await?;
				if exists.is_none() {
					return Err(DbError::NotFound(format!("thread {id}")));
				}
				return Ok(false);
			}
			tx.record_thread_event(id, &actor, ThreadEvent::Delete).await?;
			tx.remove_thread_from_all_saved_query_indexes(id).await?;
			Ok(true)
		})
		.await
	}

	#[tracing::instrument(skip(self), fields(thread_id = %thread_id, event = event.as_str()))]
	pub async fn record_thread_event(&self, thread_id: ThreadId, actor_entity_id: &str, event: ThreadEvent) -> Result<()> {
		self.execute(
			sqlx::query("INSERT INTO thread_events (thread_id, actor_entity_id, event, created) VALUES (?, ?, ?, ?)")
				.bind(thread_id)
				.bind(actor_entity_id)
				.bind(event.as_str())
				.bind(to_micros(self.now())),
		)
		.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn thread_events(&self, thread_id: ThreadId) -> Result<Vec<(String, ThreadEvent, DateTime<Utc>)>> {
		let rows = self
			.fetch_all(
				sqlx::query("SELECT actor_entity_id, event, created FROM thread_events WHERE thread_id = ? ORDER BY id")
					.bind(thread_id),
			)
			.await?;
		rows.iter()
			.map(|row| {
				let event: String = row.try_get("event")?;
				let event = match event.as_str() {
					"DELETE" => ThreadEvent::Delete,
					other => return Err(DbError::Internal(format!("unknown thread event '{other}'"))),
				};
				Ok((row.try_get("actor_entity_id")?, event, from_micros(row.try_get("created")?)))
			})
			.collect()
	}

	/// Attaches tags to a thread, creating organization tags as needed.
	#[tracing::instrument(skip(self, tags), fields(thread_id = %thread_id, count = tags.len()))]
	pub async fn add_thread_tags(&self, organization_id: &str, thread_id: ThreadId, tags: &[String]) -> Result<()> {
		for name in tags {
			let tag = Tag::new(name.as_str());
			self.execute(
				sqlx::query("INSERT OR IGNORE INTO tags (organization_id, tag, hidden) VALUES (?, ?, ?)")
					.bind(organization_id)
					.bind(&tag.name)
					.bind(tag.hidden),
			)
			.await?;
			self.execute(
				sqlx::query(
					"INSERT OR IGNORE INTO thread_tags (thread_id, tag_id) SELECT ?, id FROM tags WHERE organization_id = ? AND tag = ?",
				)
				.bind(thread_id)
				.bind(organization_id)
				.bind(&tag.name),
			)
			.await?;
		}
		Ok(())
	}

	#[tracing::instrument(skip(self, tags), fields(thread_id = %thread_id, count = tags.len()))]
	pub async fn remove_thread_tags(&self, thread_id: ThreadId, tags: &[String]) -> Result<()> {
		if tags.is_empty() {
			return Ok(());
		}
		let sql = format!(
			"DELETE FROM thread_tags WHERE thread_id = ? AND tag_id IN (SELECT tg.id FROM tags tg JOIN threads t ON t.organization_id = tg.organization_id WHERE t.id = ? AND tg.tag IN ({}))",
			placeholders(tags.len())
		);
		let mut q = sqlx::query(&sql).bind(thread_id).bind(thread_id);
		for tag in tags {
			q = q.bind(tag.as_str());
		}
		self.execute(q).await?;
		Ok(())
	}

	/// Organization tags whose name starts with `prefix`, sorted by name.
	#[tracing::instrument(skip(self))]
	pub async fn tags_for_org(&self, organization_id: &str, prefix: &str) -> Result<Vec<Tag>> {
		let pattern = format!("{}%", escape_like(prefix));
		let rows = self
			.fetch_all(
				sqlx::query("SELECT tag, hidden FROM tags WHERE organization_id = ? AND tag LIKE ? ESCAPE '\\' ORDER BY tag")
					.bind(organization_id)
					.bind(pattern),
			)
			.await?;
		rows.iter()
			.map(|row| {
				Ok(Tag {
					name: row.try_get("tag")?,
					hidden: row.try_get("hidden")?,
				})
			})
			.collect()
	}

	pub(crate) async fn with_tags(&self, mut threads: Vec<Thread>) -> Result<Vec<Thread>> {
		if threads.is_empty() {
			return Ok(threads);
		}
		let sql = format!(
			"SELECT tt.thread_id, tg.tag, tg.hidden FROM thread_tags tt JOIN tags tg ON tg.id = tt.tag_id WHERE tt.thread_id IN ({}) ORDER BY tg.tag",
			placeholders(threads.len())
		);
		let mut q = sqlx::query(&sql);
		for t in &threads {
			q = q.bind(t.id);
		}
		let rows = self.fetch_all(q).await?;
		let mut by_thread: HashMap<ThreadId, Vec<Tag>> = HashMap::new();
		for row in &rows {
			by_thread.entry(row.try_get("thread_id")?).or_default().push(Tag {
				name: row.try_get("tag")?,
				hidden: row.try_get("hidden")?,
			});
		}
		for t in &mut threads {
			if let Some(tags) = by_thread.remove(&t.id) {
				t.tags = tags;
			}
		}
		Ok(threads)
	}
}
