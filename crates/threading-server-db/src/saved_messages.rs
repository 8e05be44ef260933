// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{ItemBody, SavedMessage, SavedMessageId};

use crate::dal::{placeholders, Dal};
use crate::error::{DbError, Result};
use crate::time::{from_micros, to_micros};

const SM_COLUMNS: &str =
	"id, title, organization_id, creator_entity_id, owner_entity_id, internal, type, data, created, modified";

#[derive(Debug, Clone, Default)]
pub struct SavedMessageUpdate {
	pub title: Option<String>,
	pub internal: Option<bool>,
	pub content: Option<ItemBody>,
}

fn saved_message_from_row(row: &SqliteRow) -> Result<SavedMessage> {
	let item_type: String = row.try_get("type")?;
	let data: Vec<u8> = row.try_get("data")?;
	Ok(SavedMessage {
		id: row.try_get("id")?,
		title: row.try_get("title")?,
		organization_id: row.try_get("organization_id")?,
		creator_entity_id: row.try_get("creator_entity_id")?,
		owner_entity_id: row.try_get("owner_entity_id")?,
		internal: row.try_get("internal")?,
		content: ItemBody::decode(&item_type, &data)?,
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
	})
}

impl Dal {
	#[tracing::instrument(skip(self, sm), fields(owner = %sm.owner_entity_id))]
	pub async fn create_saved_message(&self, sm: &SavedMessage) -> Result<SavedMessageId> {
		let id = if sm.id.is_valid() { sm.id } else { SavedMessageId::new() };
		let now = to_micros(self.now());
		self.execute(
			sqlx::query(
				r#"
                INSERT INTO saved_messages (id, title, organization_id, creator_entity_id, owner_entity_id, internal, type, data, created, modified)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
			)
			.bind(id)
			.bind(&sm.title)
			.bind(&sm.organization_id)
			.bind(&sm.creator_entity_id)
			.bind(&sm.owner_entity_id)
			.bind(sm.internal)
			.bind(sm.content.item_type().as_str())
			.bind(sm.content.encode_data()?)
			.bind(now)
			.bind(now),
		)
		.await?;
		Ok(id)
	}

	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn saved_messages(&self, ids: &[SavedMessageId]) -> Result<Vec<SavedMessage>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let sql = format!(
			"SELECT {SM_COLUMNS} FROM saved_messages WHERE id IN ({}) ORDER BY id",
			placeholders(ids.len())
		);
		let mut q = sqlx::query(&sql);
		for id in ids {
			q = q.bind(*id);
		}
		let rows = self.fetch_all(q).await?;
		rows.iter().map(saved_message_from_row).collect()
	}

	/// Saved messages owned by any of the entities, sorted by title.
	#[tracing::instrument(skip(self, owner_entity_ids), fields(count = owner_entity_ids.len()))]
	pub async fn saved_messages_for_owners(&self, owner_entity_ids: &[String]) -> Result<Vec<SavedMessage>> {
		if owner_entity_ids.is_empty() {
			return Ok(Vec::new());
		}
		let sql = format!(
			"SELECT {SM_COLUMNS} FROM saved_messages WHERE owner_entity_id IN ({}) ORDER BY title, id",
			placeholders(owner_entity_ids.len())
		);
		let mut q = sqlx::query(&sql);
		for id in owner_entity_ids {
			q = q.bind(id.as_str());
		}
		let rows = self.fetch_all(q).await?;
		rows.iter().map(saved_message_from_row).collect()
	}

	#[tracing::instrument(skip(self, update), fields(saved_message_id = %id))]
	pub async fn update_saved_message(&self, id: SavedMessageId, update: &SavedMessageUpdate) -> Result<()> {
		let mut sets = vec!["modified = ?"];
		if update.title.is_some() {
			sets.push("title = ?");
		}
		if update.internal.is_some() {
			sets.push("internal = ?");
		}
		if update.content.is_some() {
			sets.push("type = ?");
			sets.push("data = ?");
		}
		let sql = format!("UPDATE saved_messages SET {} WHERE id = ?", sets.join(", "));
		let mut q = sqlx::query(&sql).bind(to_micros(self.now()));
		if let Some(title) = &update.title {
			q = q.bind(title.as_str());
		}
		if let Some(internal) = update.internal {
			q = q.bind(internal);
		}
		if let Some(content) = &update.content {
			q = q.bind(content.item_type().as_str()).bind(content.encode_data()?);
		}
		let result = self.execute(q.bind(id)).await?;
		if result.rows_affected() == 0 {
			return Err(DbError::NotFound(format!("saved message {id}")));
		}
		Ok(())
	}

	/// Returns whether a row was removed.
	#[tracing::instrument(skip(self), fields(saved_message_id = %id))]
	pub async fn delete_saved_message(&self, id: SavedMessageId) -> Result<bool> {
		let result = self
			.execute(sqlx::query("DELETE FROM saved_messages WHERE id = ?").bind(id))
			.await?;
		Ok(result.rows_affected() > 0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_dal;
	use chrono::Utc;
	use threading_common_thread::Message;

	fn saved(owner: &str, title: &str, text: &str) -> SavedMessage {
		SavedMessage {
			id: SavedMessageId::empty(),
			title: title.into(),
			organization_id: "org".into(),
			creator_entity_id: "doc".into(),
			owner_entity_id: owner.into(),
			internal: false,
			content: ItemBody::Message(Message {
				text: text.into(),
				..Default::default()
			}),
			created: Utc::now(),
			modified: Utc::now(),
		}
	}

	#[tokio::test]
	async fn saved_message_lifecycle() {
		let (dal, _dir) = create_test_dal().await;
		let b = dal.create_saved_message(&saved("doc", "b", "bye")).await.unwrap();
		let a = dal.create_saved_message(&saved("org", "a", "hello")).await.unwrap();
		dal.create_saved_message(&saved("other", "c", "x")).await.unwrap();

		let owned = dal
			.saved_messages_for_owners(&["doc".into(), "org".into()])
			.await
			.unwrap();
		assert_eq!(owned.iter().map(|m| m.id).collect::<Vec<_>>(), vec![a, b]);

		let new_body = ItemBody::Message(Message {
			text: "updated".into(),
			..Default::default()
		});
		dal.update_saved_message(
			a,
			&SavedMessageUpdate {
				title: Some("greeting".into()),
				content: Some(new_body.clone()),
				..Default::default()
			},
		)
		.await
		.unwrap();
		let got = dal.saved_messages(&[a]).await.unwrap();
		assert_eq!(got[0].title, "greeting");
		assert_eq!(got[0].content, new_body);

		assert!(dal.delete_saved_message(a).await.unwrap());
		assert!(!dal.delete_saved_message(a).await.unwrap());
		assert!(dal
			.update_saved_message(a, &SavedMessageUpdate::default())
			.await
			.unwrap_err()
			.is_not_found());
	}
}
