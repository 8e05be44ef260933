// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Thread items, the message write path and read receipts.

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{ItemBody, ItemType, ThreadId, ThreadItem, ThreadItemId, ThreadItemViewDetails};

use crate::dal::{Dal, QueryOption};
use crate::error::{DbError, Result};
use crate::iteration::{Direction, Edge, Iteration, Page};
use crate::threads::{bind_args, Arg};
use crate::time::{from_micros, opt_from_micros, to_micros};

const ITEM_COLUMNS: &str = "id, thread_id, created, modified, actor_entity_id, internal, deleted, type, data";

/// A new item to append to a thread.
#[derive(Debug, Clone)]
pub struct PostItemParams {
	pub thread_id: ThreadId,
	pub actor_entity_id: String,
	pub internal: bool,
	pub body: ItemBody,
	/// Retry key. A second post with the same key returns the first item.
	pub idempotency_key: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostedItem {
	pub item: ThreadItem,
	/// False when the idempotency key matched an existing item.
	pub created: bool,
}

fn item_from_row(row: &SqliteRow) -> Result<ThreadItem> {
	let item_type: String = row.try_get("type")?;
	let data: Vec<u8> = row.try_get("data")?;
	Ok(ThreadItem {
		id: row.try_get("id")?,
		thread_id: row.try_get("thread_id")?,
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
		actor_entity_id: row.try_get("actor_entity_id")?,
		internal: row.try_get("internal")?,
		deleted: row.try_get("deleted")?,
		body: ItemBody::decode(&item_type, &data)?,
	})
}

impl Dal {
	/// Appends an item and advances the thread's counters in one
	/// transaction.
	///
	/// The item's creation time never precedes the thread's last message, so
	/// items stay ordered per thread. External items also advance the
	/// patient-facing timestamp and summary.
	#[tracing::instrument(skip(self, params), fields(thread_id = %params.thread_id, actor = %params.actor_entity_id, internal = params.internal))]
	pub async fn post_item(&self, params: PostItemParams) -> Result<PostedItem> {
		self.transact(|tx| async move {
			if let Some(key) = &params.idempotency_key {
				if let Some(item) = tx.thread_item_by_idempotency_key(params.thread_id, key).await? {
					tracing::debug!(item_id = %item.id, "idempotent replay");
					return Ok(PostedItem { item, created: false });
				}
			}

			let thread = tx.thread(params.thread_id, &[QueryOption::ForUpdate]).await?;
			// Stored at microsecond precision; truncate so the returned item matches.
			let created = from_micros(to_micros(tx.now().max(thread.last_message_timestamp)));
			let item = ThreadItem {
				id: ThreadItemId::new(),
				thread_id: thread.id,
				created,
				modified: created,
				actor_entity_id: params.actor_entity_id,
				internal: params.internal,
				deleted: false,
				body: params.body,
			};
			let data = item.body.encode_data()?;
			tx.execute(
				sqlx::query(
					r#"
                    INSERT INTO thread_items (id, thread_id, created, modified, actor_entity_id, internal, deleted, type, data, idempotency_key)
                    VALUES (?, ?, ?, ?, ?, ?, 0, ?, ?, ?)
                    "#,
				)
				.bind(item.id)
				.bind(item.thread_id)
				.bind(to_micros(item.created))
				.bind(to_micros(item.modified))
				.bind(&item.actor_entity_id)
				.bind(item.internal)
				.bind(item.body.item_type().as_str())
				.bind(data)
				.bind(params.idempotency_key.as_deref()),
			)
			.await?;

			let ts = to_micros(created);
			match item.message() {
				Some(msg) => {
					let endpoints = if item.actor_entity_id == thread.primary_entity_id {
						msg.source.clone().map(|s| vec![s])
					} else if !item.internal && !msg.destinations.is_empty() {
						Some(msg.destinations.clone())
					} else {
						None
					};
					let endpoints = endpoints.map(|e| serde_json::to_string(&e)).transpose()?;
					let summary = msg.summary.clone();
					if item.internal {
						tx.execute(
							sqlx::query(
								"UPDATE threads SET message_count = message_count + 1, last_message_timestamp = MAX(last_message_timestamp, ?), last_message_summary = ?, last_primary_entity_endpoints = COALESCE(?, last_primary_entity_endpoints) WHERE id = ?",
							)
							.bind(ts)
							.bind(summary)
							.bind(endpoints)
							.bind(thread.id),
						)
						.await?;
					} else {
						tx.execute(
							sqlx::query(
								r#"
                                UPDATE threads SET message_count = message_count + 1,
                                    last_message_timestamp = MAX(last_message_timestamp, ?),
                                    last_external_message_timestamp = MAX(last_external_message_timestamp, ?),
                                    last_message_summary = ?, last_external_message_summary = ?,
                                    last_primary_entity_endpoints = COALESCE(?, last_primary_entity_endpoints)
                                WHERE id = ?
                                "#,
							)
							.bind(ts)
							.bind(ts)
							.bind(&summary)
							.bind(&summary)
							.bind(endpoints)
							.bind(thread.id),
						)
						.await?;
					}
				}
				None => {
					tx.execute(
						sqlx::query(
							"UPDATE threads SET message_count = message_count + 1, last_message_timestamp = MAX(last_message_timestamp, ?) WHERE id = ?",
						)
						.bind(ts)
						.bind(thread.id),
					)
					.await?;
				}
			}

			tracing::debug!(item_id = %item.id, "thread item posted");
			Ok::<_, DbError>(PostedItem { item, created: true })
		})
		.await
	}

	#[tracing::instrument(skip(self, opts), fields(item_id = %id))]
	pub async fn thread_item(&self, id: ThreadItemId, opts: &[QueryOption]) -> Result<ThreadItem> {
		self.check_for_update(opts);
		let sql = format!("SELECT {ITEM_COLUMNS} FROM thread_items WHERE id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(id))
			.await?
			.ok_or_else(|| DbError::NotFound(format!("thread item {id}")))?;
		item_from_row(&row)
	}

	#[tracing::instrument(skip(self, key), fields(thread_id = %thread_id))]
	pub async fn thread_item_by_idempotency_key(&self, thread_id: ThreadId, key: &str) -> Result<Option<ThreadItem>> {
		let sql = format!("SELECT {ITEM_COLUMNS} FROM thread_items WHERE thread_id = ? AND idempotency_key = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(thread_id).bind(key))
			.await?;
		row.as_ref().map(item_from_row).transpose()
	}

	/// Whether the actor posted a message in the thread before `before`.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id, actor = %actor_entity_id))]
	pub async fn has_message_from_before(
		&self,
		thread_id: ThreadId,
		actor_entity_id: &str,
		before: ThreadItemId,
	) -> Result<bool> {
		let row = self
			.fetch_optional(
				sqlx::query(
					"SELECT id FROM thread_items WHERE thread_id = ? AND actor_entity_id = ? AND type = ? AND id < ? LIMIT 1",
				)
				.bind(thread_id)
				.bind(actor_entity_id)
				.bind(ItemType::Message.as_str())
				.bind(before),
			)
			.await?;
		Ok(row.is_some())
	}

	/// Pages through a thread's items, oldest first. Cursors are item IDs.
	/// External viewers never see internal items.
	#[tracing::instrument(skip(self, it), fields(thread_id = %thread_id))]
	pub async fn iterate_thread_items(
		&self,
		thread_id: ThreadId,
		for_external: bool,
		it: &Iteration,
	) -> Result<Page<ThreadItem>> {
		let limits = self.limits();
		let count = it.clamped_count(limits.default_items, limits.max_items);
		let mut conds = vec!["thread_id = ?".to_string()];
		let mut args = vec![Arg::Int(thread_id.value() as i64)];
		if for_external {
			conds.push("internal = 0".to_string());
		}
		if let Some(start) = it.start() {
			conds.push("id > ?".to_string());
			args.push(Arg::Int(parse_item_cursor(start)?.value() as i64));
		}
		if let Some(end) = it.end() {
			conds.push("id < ?".to_string());
			args.push(Arg::Int(parse_item_cursor(end)?.value() as i64));
		}
		let order = match it.direction {
			Direction::FromStart => "ASC",
			Direction::FromEnd => "DESC",
		};
		args.push(Arg::Int(count + 1));
		let sql = format!(
			"SELECT {ITEM_COLUMNS} FROM thread_items WHERE {} ORDER BY id {order} LIMIT ?",
			conds.join(" AND ")
		);
		let rows = self.fetch_all(bind_args(sqlx::query(&sql), &args)).await?;
		let edges = rows
			.iter()
			.map(|row| {
				let item = item_from_row(row)?;
				Ok(Edge {
					cursor: item.id.to_string(),
					item,
				})
			})
			.collect::<Result<Vec<_>>>()?;
		Ok(Page::from_scan(edges, count, it.direction))
	}

	/// IDs of items created strictly after `after`, or all items when unset.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn thread_item_ids_created_after(
		&self,
		thread_id: ThreadId,
		after: Option<DateTime<Utc>>,
	) -> Result<Vec<ThreadItemId>> {
		let after = after.map(to_micros).unwrap_or(i64::MIN);
		let rows = self
			.fetch_all(
				sqlx::query("SELECT id FROM thread_items WHERE thread_id = ? AND created > ? ORDER BY id")
					.bind(thread_id)
					.bind(after),
			)
			.await?;
		rows.iter().map(|row| Ok(row.try_get("id")?)).collect()
	}

	/// Records read receipts. Existing receipts keep their original time.
	#[tracing::instrument(skip(self, item_ids), fields(count = item_ids.len()))]
	pub async fn create_thread_item_view_details(
		&self,
		item_ids: &[ThreadItemId],
		actor_entity_id: &str,
		view_time: DateTime<Utc>,
	) -> Result<()> {
		let view_time = to_micros(view_time);
		for id in item_ids {
			self.execute(
				sqlx::query(
					"INSERT OR IGNORE INTO thread_item_view_details (thread_item_id, actor_entity_id, view_time) VALUES (?, ?, ?)",
				)
				.bind(*id)
				.bind(actor_entity_id)
				.bind(view_time),
			)
			.await?;
		}
		Ok(())
	}

	#[tracing::instrument(skip(self), fields(item_id = %item_id))]
	pub async fn thread_item_view_details(&self, item_id: ThreadItemId) -> Result<Vec<ThreadItemViewDetails>> {
		let rows = self
			.fetch_all(
				sqlx::query(
					"SELECT thread_item_id, actor_entity_id, view_time FROM thread_item_view_details WHERE thread_item_id = ? ORDER BY view_time, actor_entity_id",
				)
				.bind(item_id),
			)
			.await?;
		rows.iter()
			.map(|row| {
				Ok(ThreadItemViewDetails {
					thread_item_id: row.try_get("thread_item_id")?,
					actor_entity_id: row.try_get("actor_entity_id")?,
					view_time: opt_from_micros(row.try_get("view_time")?),
				})
			})
			.collect()
	}

	/// Items in the thread the entity has not viewed yet.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn unread_messages_in_thread(&self, thread_id: ThreadId, entity_id: &str, external: bool) -> Result<i64> {
		let visibility = if external { " AND i.internal = 0" } else { "" };
		let sql = format!(
			"SELECT COUNT(*) FROM thread_items i
             LEFT JOIN thread_entities te ON te.thread_id = i.thread_id AND te.entity_id = ?
             WHERE i.thread_id = ? AND i.deleted = 0{visibility}
               AND (te.last_viewed IS NULL OR i.created > te.last_viewed)"
		);
		let row = self
			.fetch_one(sqlx::query(&sql).bind(entity_id).bind(thread_id))
			.await?;
		Ok(row.try_get(0)?)
	}
}

fn parse_item_cursor(s: &str) -> Result<ThreadItemId> {
	ThreadItemId::parse(s).map_err(|_| DbError::InvalidIterator(format!("invalid item cursor '{s}'")))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entities::ThreadEntityUpdate;
	use crate::testing::{create_test_dal, create_test_dal_with_clock};
	use chrono::Duration;
	use threading_common_thread::{Clock, Endpoint, EndpointChannel, Message, Thread, ThreadType};

	fn message(text: &str) -> ItemBody {
		ItemBody::Message(Message {
			text: text.into(),
			summary: text.into(),
			..Default::default()
		})
	}

	fn post(thread_id: ThreadId, actor: &str, internal: bool, text: &str) -> PostItemParams {
		PostItemParams {
			thread_id,
			actor_entity_id: actor.into(),
			internal,
			body: message(text),
			idempotency_key: None,
		}
	}

	async fn new_thread(dal: &Dal, primary: &str) -> ThreadId {
		let mut t = Thread::new("org", ThreadType::SecureExternal);
		t.primary_entity_id = primary.into();
		dal.create_thread(&t).await.unwrap()
	}

	#[tokio::test]
	async fn post_updates_thread_counters() {
		let (dal, clock, _dir) = create_test_dal_with_clock(Utc::now()).await;
		let t = new_thread(&dal, "patient").await;

		clock.advance(Duration::seconds(5));
		let ext = dal.post_item(post(t, "doc", false, "hello")).await.unwrap();
		assert!(ext.created);
		clock.advance(Duration::seconds(5));
		let int = dal.post_item(post(t, "doc", true, "internal note")).await.unwrap();

		let thread = dal.thread(t, &[]).await.unwrap();
		assert_eq!(thread.message_count, 2);
		assert_eq!(thread.last_message_summary, "internal note");
		assert_eq!(thread.last_external_message_summary, "hello");
		assert_eq!(to_micros(thread.last_message_timestamp), to_micros(int.item.created));
		assert_eq!(to_micros(thread.last_external_message_timestamp), to_micros(ext.item.created));
		assert!(thread.last_message_timestamp >= thread.last_external_message_timestamp);

		let got = dal.thread_item(ext.item.id, &[]).await.unwrap();
		assert_eq!(got.body, message("hello"));
		assert!(!got.internal);
	}

	#[tokio::test]
	async fn created_never_goes_backwards() {
		let (dal, clock, _dir) = create_test_dal_with_clock(Utc::now()).await;
		let t = new_thread(&dal, "patient").await;
		let first = dal.post_item(post(t, "doc", false, "a")).await.unwrap();
		clock.advance(Duration::seconds(-60));
		let second = dal.post_item(post(t, "doc", false, "b")).await.unwrap();
		assert!(second.item.created >= first.item.created);

		let stored = dal.thread_item(first.item.id, &[]).await.unwrap();
		assert_eq!(stored.created, first.item.created);
		assert_eq!(stored.modified, first.item.modified);
	}

	#[tokio::test]
	async fn idempotency_key_suppresses_duplicates() {
		let (dal, _dir) = create_test_dal().await;
		let t = new_thread(&dal, "patient").await;
		let mut p = post(t, "doc", false, "once");
		p.idempotency_key = Some("schm_1".into());
		let first = dal.post_item(p.clone()).await.unwrap();
		let again = dal.post_item(p).await.unwrap();
		assert!(first.created);
		assert!(!again.created);
		assert_eq!(first.item.id, again.item.id);
		assert_eq!(dal.thread(t, &[]).await.unwrap().message_count, 1);
	}

	#[tokio::test]
	async fn posting_to_missing_or_deleted_thread_fails() {
		let (dal, _dir) = create_test_dal().await;
		let err = dal
			.post_item(post(ThreadId::from_value(5), "doc", false, "x"))
			.await
			.unwrap_err();
		assert!(err.is_not_found());

		let t = new_thread(&dal, "patient").await;
		dal.delete_thread(t, "doc").await.unwrap();
		assert!(dal.post_item(post(t, "doc", false, "x")).await.unwrap_err().is_not_found());
	}

	#[tokio::test]
	async fn primary_entity_source_becomes_endpoint() {
		let (dal, _dir) = create_test_dal().await;
		let t = new_thread(&dal, "patient").await;
		let sms = Endpoint {
			channel: EndpointChannel::Sms,
			id: "+15555550100".into(),
		};
		let mut p = post(t, "patient", false, "hi");
		p.body = ItemBody::Message(Message {
			text: "hi".into(),
			source: Some(sms.clone()),
			..Default::default()
		});
		dal.post_item(p).await.unwrap();
		assert_eq!(dal.thread(t, &[]).await.unwrap().last_primary_entity_endpoints, vec![sms]);
	}

	#[tokio::test]
	async fn iterate_items_oldest_first() {
		let (dal, clock, _dir) = create_test_dal_with_clock(Utc::now()).await;
		let t = new_thread(&dal, "patient").await;
		let mut ids = Vec::new();
		for i in 0..5 {
			clock.advance(Duration::seconds(1));
			ids.push(dal.post_item(post(t, "doc", i == 2, &format!("m{i}"))).await.unwrap().item.id);
		}

		let page = dal.iterate_thread_items(t, false, &Iteration::first(2)).await.unwrap();
		assert!(page.has_more);
		assert_eq!(page.items().map(|i| i.id).collect::<Vec<_>>(), vec![ids[0], ids[1]]);
		let next = dal
			.iterate_thread_items(t, false, &Iteration::after(page.last_cursor().unwrap(), 10))
			.await
			.unwrap();
		assert!(!next.has_more);
		assert_eq!(next.items().map(|i| i.id).collect::<Vec<_>>(), vec![ids[2], ids[3], ids[4]]);

		let tail = dal
			.iterate_thread_items(
				t,
				true,
				&Iteration {
					direction: Direction::FromEnd,
					count: 2,
					..Default::default()
				},
			)
			.await
			.unwrap();
		assert!(tail.has_more);
		assert_eq!(tail.items().map(|i| i.id).collect::<Vec<_>>(), vec![ids[3], ids[4]]);
	}

	#[tokio::test]
	async fn bad_item_cursor_is_rejected() {
		let (dal, _dir) = create_test_dal().await;
		let t = new_thread(&dal, "patient").await;
		let err = dal
			.iterate_thread_items(t, false, &Iteration::after("t_0000000000001", 5))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::InvalidIterator(_)));
	}

	#[tokio::test]
	async fn view_details_and_unread_counts() {
		let (dal, clock, _dir) = create_test_dal_with_clock(Utc::now()).await;
		let t = new_thread(&dal, "patient").await;
		clock.advance(Duration::seconds(1));
		let a = dal.post_item(post(t, "doc", false, "a")).await.unwrap().item;
		clock.advance(Duration::seconds(1));
		let b = dal.post_item(post(t, "doc", true, "b")).await.unwrap().item;

		assert_eq!(dal.unread_messages_in_thread(t, "patient", true).await.unwrap(), 1);
		assert_eq!(dal.unread_messages_in_thread(t, "doc2", false).await.unwrap(), 2);

		dal.update_thread_entity(
			t,
			"doc2",
			&ThreadEntityUpdate {
				last_viewed: Some(a.created),
				..Default::default()
			},
		)
		.await
		.unwrap();
		assert_eq!(dal.unread_messages_in_thread(t, "doc2", false).await.unwrap(), 1);
		let after = dal.thread_item_ids_created_after(t, Some(a.created)).await.unwrap();
		assert_eq!(after, vec![b.id]);
		assert_eq!(dal.thread_item_ids_created_after(t, None).await.unwrap().len(), 2);

		let now = clock.now();
		dal.create_thread_item_view_details(&[a.id, b.id], "doc2", now).await.unwrap();
		dal.create_thread_item_view_details(&[a.id], "doc2", now + Duration::hours(1))
			.await
			.unwrap();
		let details = dal.thread_item_view_details(a.id).await.unwrap();
		assert_eq!(details.len(), 1);
		assert_eq!(to_micros(details[0].view_time.unwrap()), to_micros(now));
	}

	#[tokio::test]
	async fn earlier_messages_from_actor() {
		let (dal, _dir) = create_test_dal().await;
		let t = new_thread(&dal, "patient").await;
		let first = dal.post_item(post(t, "patient", false, "hi")).await.unwrap().item;
		let reply = dal.post_item(post(t, "doc", false, "hello")).await.unwrap().item;
		let second = dal.post_item(post(t, "patient", false, "again")).await.unwrap().item;

		assert!(!dal.has_message_from_before(t, "patient", first.id).await.unwrap());
		assert!(dal.has_message_from_before(t, "patient", second.id).await.unwrap());
		assert!(!dal.has_message_from_before(t, "doc", reply.id).await.unwrap());
	}
}
