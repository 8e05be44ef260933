// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{
	ItemBody, ScheduledMessage, ScheduledMessageId, ScheduledMessageStatus, ThreadId, ThreadItemId,
};

use crate::dal::{placeholders, Dal, QueryOption};
use crate::error::{DbError, Result};
use crate::time::{from_micros, opt_from_micros, to_micros};

const SCHEDULED_COLUMNS: &str = "id, thread_id, actor_entity_id, type, data, internal, scheduled_for, sent_at, \
	sent_thread_item_id, status, created, modified";

#[derive(Debug, Clone, Default)]
pub struct ScheduledMessageUpdate {
	pub status: Option<ScheduledMessageStatus>,
	pub sent_at: Option<DateTime<Utc>>,
	pub sent_thread_item_id: Option<ThreadItemId>,
}

fn scheduled_from_row(row: &SqliteRow) -> Result<ScheduledMessage> {
	let item_type: String = row.try_get("type")?;
	let data: Vec<u8> = row.try_get("data")?;
	let status: String = row.try_get("status")?;
	let content = ItemBody::decode(&item_type, &data)?;
	Ok(ScheduledMessage {
		id: row.try_get("id")?,
		thread_id: row.try_get("thread_id")?,
		actor_entity_id: row.try_get("actor_entity_id")?,
		item_type: content.item_type(),
		internal: row.try_get("internal")?,
		content,
		scheduled_for: from_micros(row.try_get("scheduled_for")?),
		sent_at: opt_from_micros(row.try_get("sent_at")?),
		sent_thread_item_id: row.try_get("sent_thread_item_id")?,
		status: status.parse().map_err(DbError::Internal)?,
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
	})
}

impl Dal {
	#[tracing::instrument(skip(self, sm), fields(thread_id = %sm.thread_id, scheduled_for = %sm.scheduled_for))]
	pub async fn create_scheduled_message(&self, sm: &ScheduledMessage) -> Result<ScheduledMessageId> {
		let id = if sm.id.is_valid() {
			sm.id
		} else {
			ScheduledMessageId::new()
		};
		let now = to_micros(self.now());
		self.execute(
			sqlx::query(
				r#"
                INSERT INTO scheduled_messages (id, thread_id, actor_entity_id, type, data, internal, scheduled_for,
                    sent_at, sent_thread_item_id, status, created, modified)
                VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL, ?, ?, ?)
                "#,
			)
			.bind(id)
			.bind(sm.thread_id)
			.bind(&sm.actor_entity_id)
			.bind(sm.content.item_type().as_str())
			.bind(sm.content.encode_data()?)
			.bind(sm.internal)
			.bind(to_micros(sm.scheduled_for))
			.bind(sm.status.as_str())
			.bind(now)
			.bind(now),
		)
		.await?;
		Ok(id)
	}

	#[tracing::instrument(skip(self, opts), fields(scheduled_message_id = %id))]
	pub async fn scheduled_message(&self, id: ScheduledMessageId, opts: &[QueryOption]) -> Result<ScheduledMessage> {
		self.check_for_update(opts);
		let sql = format!("SELECT {SCHEDULED_COLUMNS} FROM scheduled_messages WHERE id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(id))
			.await?
			.ok_or_else(|| DbError::NotFound(format!("scheduled message {id}")))?;
		scheduled_from_row(&row)
	}

	/// A thread's scheduled messages in send order. An empty status filter
	/// matches every status.
	#[tracing::instrument(skip(self, statuses), fields(thread_id = %thread_id))]
	pub async fn scheduled_messages_for_thread(
		&self,
		thread_id: ThreadId,
		statuses: &[ScheduledMessageStatus],
	) -> Result<Vec<ScheduledMessage>> {
		let status_filter = if statuses.is_empty() {
			String::new()
		} else {
			format!(" AND status IN ({})", placeholders(statuses.len()))
		};
		let sql = format!(
			"SELECT {SCHEDULED_COLUMNS} FROM scheduled_messages WHERE thread_id = ?{status_filter} ORDER BY scheduled_for, id"
		);
		let mut q = sqlx::query(&sql).bind(thread_id);
		for s in statuses {
			q = q.bind(s.as_str());
		}
		let rows = self.fetch_all(q).await?;
		rows.iter().map(scheduled_from_row).collect()
	}

	/// Pending messages whose time has come, oldest first.
	#[tracing::instrument(skip(self))]
	pub async fn due_scheduled_messages(&self, now: DateTime<Utc>) -> Result<Vec<ScheduledMessage>> {
		let sql = format!(
			"SELECT {SCHEDULED_COLUMNS} FROM scheduled_messages WHERE status = ? AND scheduled_for <= ? ORDER BY scheduled_for, id"
		);
		let rows = self
			.fetch_all(
				sqlx::query(&sql)
					.bind(ScheduledMessageStatus::Pending.as_str())
					.bind(to_micros(now)),
			)
			.await?;
		rows.iter().map(scheduled_from_row).collect()
	}

	#[tracing::instrument(skip(self, update), fields(scheduled_message_id = %id))]
	pub async fn update_scheduled_message(&self, id: ScheduledMessageId, update: &ScheduledMessageUpdate) -> Result<()> {
		let mut sets = vec!["modified = ?"];
		if update.status.is_some() {
			sets.push("status = ?");
		}
		if update.sent_at.is_some() {
			sets.push("sent_at = ?");
		}
		if update.sent_thread_item_id.is_some() {
			sets.push("sent_thread_item_id = ?");
		}
		let sql = format!("UPDATE scheduled_messages SET {} WHERE id = ?", sets.join(", "));
		let mut q = sqlx::query(&sql).bind(to_micros(self.now()));
		if let Some(status) = update.status {
			q = q.bind(status.as_str());
		}
		if let Some(sent_at) = update.sent_at {
			q = q.bind(to_micros(sent_at));
		}
		if let Some(item_id) = update.sent_thread_item_id {
			q = q.bind(item_id);
		}
		let result = self.execute(q.bind(id)).await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("scheduled message {id}")));
		}
		Ok(())
	}

	/// Marks a scheduled message deleted whatever its state.
	#[tracing::instrument(skip(self), fields(scheduled_message_id = %id))]
	pub async fn delete_scheduled_message(&self, id: ScheduledMessageId) -> Result<()> {
		self.update_scheduled_message(
			id,
			&ScheduledMessageUpdate {
				status: Some(ScheduledMessageStatus::Deleted),
				..Default::default()
			},
		)
		.await
	}
}
