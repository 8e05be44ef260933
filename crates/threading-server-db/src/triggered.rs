// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{
	ItemBody, TriggerKey, TriggeredMessage, TriggeredMessageId, TriggeredMessageItem, TriggeredMessageItemId,
};

use crate::dal::{Dal, QueryOption};
use crate::error::{DbError, Result};
use crate::time::{from_micros, to_micros};

const TM_COLUMNS: &str =
	"id, organization_entity_id, actor_entity_id, trigger_key, trigger_subkey, enabled, created, modified";

const TMI_COLUMNS: &str =
	"id, triggered_message_id, ordinal, internal, actor_entity_id, type, data, created, modified";

fn triggered_from_row(row: &SqliteRow) -> Result<TriggeredMessage> {
	let key: String = row.try_get("trigger_key")?;
	Ok(TriggeredMessage {
		id: row.try_get("id")?,
		organization_entity_id: row.try_get("organization_entity_id")?,
		actor_entity_id: row.try_get("actor_entity_id")?,
		trigger_key: key.parse().map_err(DbError::Internal)?,
		trigger_subkey: row.try_get("trigger_subkey")?,
		enabled: row.try_get("enabled")?,
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
	})
}

fn item_from_row(row: &SqliteRow) -> Result<TriggeredMessageItem> {
	let item_type: String = row.try_get("type")?;
	let data: Vec<u8> = row.try_get("data")?;
	Ok(TriggeredMessageItem {
		id: row.try_get("id")?,
		triggered_message_id: row.try_get("triggered_message_id")?,
		ordinal: row.try_get("ordinal")?,
		internal: row.try_get("internal")?,
		actor_entity_id: row.try_get("actor_entity_id")?,
		data: ItemBody::decode(&item_type, &data)?,
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
	})
}

impl Dal {
	/// Stores a triggered message with its items, replacing any existing one
	/// for the same organization, key and subkey.
	#[tracing::instrument(skip(self, tm, items), fields(org = %tm.organization_entity_id, key = tm.trigger_key.as_str(), subkey = %tm.trigger_subkey))]
	pub async fn create_triggered_message(
		&self,
		tm: &TriggeredMessage,
		items: &[TriggeredMessageItem],
	) -> Result<TriggeredMessageId> {
		let tm = tm.clone();
		let items = items.to_vec();
		self.transact(|tx| async move {
			if let Some(existing) = tx
				.triggered_message_for_keys(&tm.organization_entity_id, tm.trigger_key, &tm.trigger_subkey, &[
					QueryOption::ForUpdate,
				])
				.await?
			{
				tracing::debug!(replaced = %existing.id, "replacing triggered message");
				tx.delete_triggered_message(existing.id).await?;
			}

			let id = if tm.id.is_valid() { tm.id } else { TriggeredMessageId::new() };
			let now = to_micros(tx.now());
			tx.execute(
				sqlx::query(
					r#"
                    INSERT INTO triggered_messages (id, organization_entity_id, actor_entity_id, trigger_key, trigger_subkey, enabled, created, modified)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
				)
				.bind(id)
				.bind(&tm.organization_entity_id)
				.bind(&tm.actor_entity_id)
				.bind(tm.trigger_key.as_str())
				.bind(&tm.trigger_subkey)
				.bind(tm.enabled)
				.bind(now)
				.bind(now),
			)
			.await?;
			tx.create_triggered_message_items(id, &items).await?;
			Ok::<_, DbError>(id)
		})
		.await
	}

	/// Appends items to a triggered message. Items keep their ordinals.
	#[tracing::instrument(skip(self, items), fields(triggered_message_id = %id, count = items.len()))]
	pub async fn create_triggered_message_items(
		&self,
		id: TriggeredMessageId,
		items: &[TriggeredMessageItem],
	) -> Result<Vec<TriggeredMessageItemId>> {
		let now = to_micros(self.now());
		let mut ids = Vec::with_capacity(items.len());
		for item in items {
			let item_id = if item.id.is_valid() {
				item.id
			} else {
				TriggeredMessageItemId::new()
			};
			self.execute(
				sqlx::query(
					r#"
                    INSERT INTO triggered_message_items (id, triggered_message_id, ordinal, internal, actor_entity_id, type, data, created, modified)
                    VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                    "#,
				)
				.bind(item_id)
				.bind(id)
				.bind(item.ordinal)
				.bind(item.internal)
				.bind(&item.actor_entity_id)
				.bind(item.data.item_type().as_str())
				.bind(item.data.encode_data()?)
				.bind(now)
				.bind(now),
			)
			.await?;
			ids.push(item_id);
		}
		Ok(ids)
	}

	#[tracing::instrument(skip(self, opts), fields(triggered_message_id = %id))]
	pub async fn triggered_message(&self, id: TriggeredMessageId, opts: &[QueryOption]) -> Result<TriggeredMessage> {
		self.check_for_update(opts);
		let sql = format!("SELECT {TM_COLUMNS} FROM triggered_messages WHERE id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(id))
			.await?
			.ok_or_else(|| DbError::NotFound(format!("triggered message {id}")))?;
		triggered_from_row(&row)
	}

	#[tracing::instrument(skip(self, opts))]
	pub async fn triggered_message_for_keys(
		&self,
		organization_entity_id: &str,
		key: TriggerKey,
		subkey: &str,
		opts: &[QueryOption],
	) -> Result<Option<TriggeredMessage>> {
		self.check_for_update(opts);
		let sql = format!(
			"SELECT {TM_COLUMNS} FROM triggered_messages WHERE organization_entity_id = ? AND trigger_key = ? AND trigger_subkey = ?"
		);
		let row = self
			.fetch_optional(
				sqlx::query(&sql)
					.bind(organization_entity_id)
					.bind(key.as_str())
					.bind(subkey),
			)
			.await?;
		row.as_ref().map(triggered_from_row).transpose()
	}

	/// Items of a triggered message in ordinal order.
	#[tracing::instrument(skip(self), fields(triggered_message_id = %id))]
	pub async fn triggered_message_items(&self, id: TriggeredMessageId) -> Result<Vec<TriggeredMessageItem>> {
		let sql = format!(
			"SELECT {TMI_COLUMNS} FROM triggered_message_items WHERE triggered_message_id = ? ORDER BY ordinal, id"
		);
		let rows = self.fetch_all(sqlx::query(&sql).bind(id)).await?;
		rows.iter().map(item_from_row).collect()
	}

	#[tracing::instrument(skip(self), fields(triggered_message_id = %id))]
	pub async fn update_triggered_message_enabled(&self, id: TriggeredMessageId, enabled: bool) -> Result<()> {
		let result = self
			.execute(
				sqlx::query("UPDATE triggered_messages SET enabled = ?, modified = ? WHERE id = ?")
					.bind(enabled)
					.bind(to_micros(self.now()))
					.bind(id),
			)
			.await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("triggered message {id}")));
		}
		Ok(())
	}

	/// Deletes a triggered message and its items. Returns whether it existed.
	#[tracing::instrument(skip(self), fields(triggered_message_id = %id))]
	pub async fn delete_triggered_message(&self, id: TriggeredMessageId) -> Result<bool> {
		self.transact(|tx| async move {
			tx.execute(sqlx::query("DELETE FROM triggered_message_items WHERE triggered_message_id = ?").bind(id))
				.await?;
			let result = tx
				.execute(sqlx::query("DELETE FROM triggered_messages WHERE id = ?").bind(id))
				.await?;
			Ok::<_, DbError>(result.rows_affected() > 0)
		})
		.await
	}
}
