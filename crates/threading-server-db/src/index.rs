// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The saved-query index: a materialized list of matching threads per saved
//! query, with unread and total counters kept on the saved query row.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::Row;
use threading_common_thread::{SavedQueryId, SavedQueryType, Thread, ThreadEntity, ThreadId};

use crate::dal::{placeholders, Dal};
use crate::error::Result;
use crate::iteration::{Direction, Edge, Iteration, Page};
use crate::threads::{bind_args, thread_from_row, viewer_from_row, Arg, THREAD_COLUMNS, VIEWER_COLUMNS};
use crate::time::{format_time_cursor, from_micros, parse_time_cursor, to_micros};

/// Rows written or deleted per statement.
pub const INDEX_BATCH_SIZE: usize = 200;

const MAX_BUSY_RETRIES: u32 = 3;

/// One row of a saved query's index.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedQueryThread {
	pub saved_query_id: SavedQueryId,
	pub thread_id: ThreadId,
	pub unread: bool,
	pub timestamp: DateTime<Utc>,
}

impl SavedQueryThread {
	pub fn key(&self) -> (SavedQueryId, ThreadId) {
		(self.saved_query_id, self.thread_id)
	}
}

/// A thread listed through a saved query.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedQueryThreadItem {
	pub thread: Thread,
	pub thread_entity: Option<ThreadEntity>,
	pub unread: bool,
}

/// Runs `f` again when SQLite reports lock contention, up to three retries
/// with 10 to 30ms of jitter.
async fn retry_busy<T, F, Fut>(mut f: F) -> Result<T>
where
	F: FnMut() -> Fut,
	Fut: Future<Output = Result<T>>,
{
	let mut attempt = 0;
	loop {
		match f().await {
			Err(e) if e.is_busy() && attempt < MAX_BUSY_RETRIES => {
				attempt += 1;
				tracing::warn!(attempt, error = %e, "saved query index contention, retrying");
				tokio::time::sleep(Duration::from_millis(fastrand::u64(10..=30))).await;
			}
			other => return other,
		}
	}
}

fn dedup_ids(mut ids: Vec<SavedQueryId>) -> Vec<SavedQueryId> {
	ids.sort();
	ids.dedup();
	ids
}

impl Dal {
	/// Upserts index rows. An existing row keeps the newer timestamp, and its
	/// unread flag is replaced unless the incoming row is older.
	#[tracing::instrument(skip(self, rows), fields(count = rows.len()))]
	pub async fn add_items_to_saved_query_index(&self, rows: &[SavedQueryThread]) -> Result<()> {
		if rows.is_empty() {
			return Ok(());
		}
		let rows = rows.to_vec();
		self.transact(|tx| async move {
			for batch in rows.chunks(INDEX_BATCH_SIZE) {
				tx.upsert_index_batch(batch).await?;
			}
			let ids = dedup_ids(rows.iter().map(|r| r.saved_query_id).collect());
			tx.update_saved_query_counts(&ids).await
		})
		.await
	}

	async fn upsert_index_batch(&self, batch: &[SavedQueryThread]) -> Result<()> {
		let sql = format!(
			"INSERT INTO saved_query_thread (saved_query_id, thread_id, unread, timestamp) VALUES {}
             ON CONFLICT(saved_query_id, thread_id) DO UPDATE SET
                 unread = CASE WHEN excluded.timestamp >= saved_query_thread.timestamp THEN excluded.unread ELSE saved_query_thread.unread END,
                 timestamp = MAX(saved_query_thread.timestamp, excluded.timestamp)",
			vec!["(?, ?, ?, ?)"; batch.len()].join(", ")
		);
		let sql = sql.as_str();
		let dal = self;
		retry_busy(move || {
			let mut q = sqlx::query(sql);
			for row in batch {
				q = q
					.bind(row.saved_query_id)
					.bind(row.thread_id)
					.bind(row.unread)
					.bind(to_micros(row.timestamp));
			}
			dal.execute(q)
		})
		.await?;
		Ok(())
	}

	#[tracing::instrument(skip(self, rows), fields(count = rows.len()))]
	pub async fn remove_items_from_saved_query_index(&self, rows: &[(SavedQueryId, ThreadId)]) -> Result<()> {
		if rows.is_empty() {
			return Ok(());
		}
		let rows = rows.to_vec();
		self.transact(|tx| async move {
			for batch in rows.chunks(INDEX_BATCH_SIZE) {
				let sql = format!(
					"DELETE FROM saved_query_thread WHERE {}",
					vec!["(saved_query_id = ? AND thread_id = ?)"; batch.len()].join(" OR ")
				);
				let sql = sql.as_str();
				let dal = &tx;
				retry_busy(move || {
					let mut q = sqlx::query(sql);
					for (sq, t) in batch {
						q = q.bind(*sq).bind(*t);
					}
					dal.execute(q)
				})
				.await?;
			}
			let ids = dedup_ids(rows.iter().map(|(sq, _)| *sq).collect());
			tx.update_saved_query_counts(&ids).await
		})
		.await
	}

	#[tracing::instrument(skip(self), fields(saved_query_id = %id))]
	pub async fn remove_all_items_from_saved_query_index(&self, id: SavedQueryId) -> Result<()> {
		self.transact(|tx| async move {
			tx.execute(sqlx::query("DELETE FROM saved_query_thread WHERE saved_query_id = ?").bind(id))
				.await?;
			tx.update_saved_query_counts(&[id]).await
		})
		.await
	}

	/// Drops a thread from every index it appears in and fixes the counters
	/// of the affected saved queries.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn remove_thread_from_all_saved_query_indexes(&self, thread_id: ThreadId) -> Result<()> {
		self.transact(|tx| async move {
			let rows = tx
				.fetch_all(
					sqlx::query("SELECT saved_query_id FROM saved_query_thread WHERE thread_id = ?").bind(thread_id),
				)
				.await?;
			let ids = rows
				.iter()
				.map(|row| row.try_get("saved_query_id"))
				.collect::<std::result::Result<Vec<SavedQueryId>, _>>()?;
			if ids.is_empty() {
				return Ok(());
			}
			tx.execute(sqlx::query("DELETE FROM saved_query_thread WHERE thread_id = ?").bind(thread_id))
				.await?;
			tx.update_saved_query_counts(&ids).await
		})
		.await
	}

	/// Recomputes unread and total from the index rows.
	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn update_saved_query_counts(&self, ids: &[SavedQueryId]) -> Result<()> {
		for batch in ids.chunks(INDEX_BATCH_SIZE) {
			let sql = format!(
				"UPDATE saved_queries SET
                     unread = (SELECT COUNT(*) FROM saved_query_thread s WHERE s.saved_query_id = saved_queries.id AND s.unread = 1),
                     total = (SELECT COUNT(*) FROM saved_query_thread s WHERE s.saved_query_id = saved_queries.id)
                 WHERE id IN ({})",
				placeholders(batch.len())
			);
			let mut q = sqlx::query(&sql);
			for id in batch {
				q = q.bind(*id);
			}
			self.execute(q).await?;
		}
		Ok(())
	}

	/// Pages through the threads indexed for a saved query, newest first.
	/// Cursors are the index timestamps in microseconds.
	#[tracing::instrument(skip(self, it), fields(saved_query_id = %id, viewer = %viewer_entity_id))]
	pub async fn iterate_threads_in_saved_query(
		&self,
		id: SavedQueryId,
		viewer_entity_id: &str,
		it: &Iteration,
	) -> Result<Page<SavedQueryThreadItem>> {
		let limits = self.limits();
		let count = it.clamped_count(limits.default_threads, limits.max_threads);
		let mut args = vec![Arg::Text(viewer_entity_id.to_string()), Arg::Int(id.value() as i64)];
		let mut conds = vec!["s.saved_query_id = ?".to_string(), "t.deleted = 0".to_string()];
		if let Some(start) = it.start() {
			conds.push("s.timestamp < ?".to_string());
			args.push(Arg::Int(to_micros(parse_time_cursor(start)?)));
		}
		if let Some(end) = it.end() {
			conds.push("s.timestamp > ?".to_string());
			args.push(Arg::Int(to_micros(parse_time_cursor(end)?)));
		}
		let order = match it.direction {
			Direction::FromStart => "DESC",
			Direction::FromEnd => "ASC",
		};
		args.push(Arg::Int(count + 1));
		let sql = format!(
			"SELECT {THREAD_COLUMNS}, {VIEWER_COLUMNS}, s.unread AS s_unread, s.timestamp AS s_timestamp
             FROM saved_query_thread s
             JOIN threads t ON t.id = s.thread_id
             LEFT JOIN thread_entities te ON te.thread_id = t.id AND te.entity_id = ?
             WHERE {}
             ORDER BY s.timestamp {order}, t.id {order}
             LIMIT ?",
			conds.join(" AND ")
		);
		let rows = self.fetch_all(bind_args(sqlx::query(&sql), &args)).await?;

		let mut threads = Vec::with_capacity(rows.len());
		let mut rest = Vec::with_capacity(rows.len());
		for row in &rows {
			threads.push(thread_from_row(row)?);
			let unread: bool = row.try_get("s_unread")?;
			let ts: i64 = row.try_get("s_timestamp")?;
			rest.push((viewer_from_row(row)?, unread, ts));
		}
		let threads = self.with_tags(threads).await?;
		let edges = threads
			.into_iter()
			.zip(rest)
			.map(|(thread, (thread_entity, unread, ts))| Edge {
				cursor: format_time_cursor(from_micros(ts)),
				item: SavedQueryThreadItem {
					thread,
					thread_entity,
					unread,
				},
			})
			.collect();
		Ok(Page::from_scan(edges, count, it.direction))
	}

	/// All rows of a saved query's index, newest first.
	#[tracing::instrument(skip(self), fields(saved_query_id = %id))]
	pub async fn saved_query_index(&self, id: SavedQueryId) -> Result<Vec<SavedQueryThread>> {
		let rows = self
			.fetch_all(
				sqlx::query(
					"SELECT saved_query_id, thread_id, unread, timestamp FROM saved_query_thread WHERE saved_query_id = ? ORDER BY timestamp DESC, thread_id DESC",
				)
				.bind(id),
			)
			.await?;
		rows.iter()
			.map(|row| {
				Ok(SavedQueryThread {
					saved_query_id: row.try_get("saved_query_id")?,
					thread_id: row.try_get("thread_id")?,
					unread: row.try_get("unread")?,
					timestamp: from_micros(row.try_get("timestamp")?),
				})
			})
			.collect()
	}

	/// Rebuilds an entity's notifications roll-up as the union of the
	/// indexes of its notifications-enabled saved queries. A thread is
	/// unread if it is unread in any of them. Does nothing for an entity
	/// without a notifications saved query.
	#[tracing::instrument(skip(self))]
	pub async fn rebuild_notifications_saved_query(&self, entity_id: &str) -> Result<()> {
		let entity_id = entity_id.to_string();
		self.transact(|tx| async move {
			let Some(nsq) = tx.notifications_saved_query(&entity_id).await? else {
				tracing::debug!(entity_id = %entity_id, "no notifications saved query");
				return Ok(());
			};
			tx.execute(sqlx::query("DELETE FROM saved_query_thread WHERE saved_query_id = ?").bind(nsq.id))
				.await?;
			tx.execute(
				sqlx::query(
					r#"
                    INSERT INTO saved_query_thread (saved_query_id, thread_id, unread, timestamp)
                    SELECT ?, s.thread_id, MAX(s.unread), MAX(s.timestamp)
                    FROM saved_query_thread s
                    JOIN saved_queries sq ON sq.id = s.saved_query_id
                    WHERE sq.entity_id = ? AND sq.notifications_enabled = 1 AND sq.template = 0 AND sq.type = ?
                    GROUP BY s.thread_id
                    "#,
				)
				.bind(nsq.id)
				.bind(&entity_id)
				.bind(SavedQueryType::Normal.as_str()),
			)
			.await?;
			tx.update_saved_query_counts(&[nsq.id]).await
		})
		.await
	}

	/// Badge counts per entity. Entities with a notifications saved query
	/// report its unread counter; others are counted as patients from the
	/// unread external messages in threads where they are the primary
	/// entity. Entities with neither get no entry. An empty input returns
	/// `None` without touching the database.
	#[tracing::instrument(skip(self, entity_ids), fields(count = entity_ids.len()))]
	pub async fn unread_notifications_counts(&self, entity_ids: &[String]) -> Result<Option<HashMap<String, i64>>> {
		if entity_ids.is_empty() {
			return Ok(None);
		}
		let sql = format!(
			"SELECT entity_id, unread FROM saved_queries WHERE type = ? AND template = 0 AND entity_id IN ({})",
			placeholders(entity_ids.len())
		);
		let mut q = sqlx::query(&sql).bind(SavedQueryType::Notifications.as_str());
		for id in entity_ids {
			q = q.bind(id.as_str());
		}
		let mut counts = HashMap::new();
		for row in self.fetch_all(q).await? {
			counts.insert(row.try_get::<String, _>("entity_id")?, row.try_get::<i64, _>("unread")?);
		}

		for entity_id in entity_ids {
			if counts.contains_key(entity_id) {
				continue;
			}
			let row = self
				.fetch_one(
					sqlx::query(
						r#"
                        SELECT
                            (SELECT COUNT(*) FROM threads WHERE primary_entity_id = ? AND deleted = 0) AS threads,
                            (SELECT COUNT(*) FROM thread_items i
                                JOIN threads t ON t.id = i.thread_id
                                LEFT JOIN thread_entities te ON te.thread_id = t.id AND te.entity_id = ?
                                WHERE t.primary_entity_id = ? AND t.deleted = 0
                                  AND i.deleted = 0 AND i.internal = 0 AND i.actor_entity_id != ?
                                  AND (te.last_viewed IS NULL OR i.created > te.last_viewed)) AS unread
                        "#,
					)
					.bind(entity_id.as_str())
					.bind(entity_id.as_str())
					.bind(entity_id.as_str())
					.bind(entity_id.as_str()),
				)
				.await?;
			let threads: i64 = row.try_get("threads")?;
			if threads > 0 {
				counts.insert(entity_id.clone(), row.try_get::<i64, _>("unread")?);
			}
		}
		Ok(Some(counts))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::entities::ThreadEntityUpdate;
	use crate::error::DbError;
	use crate::items::PostItemParams;
	use crate::testing::{create_test_dal, create_test_dal_with_clock};
	use chrono::Duration;
	use threading_common_thread::{
		default_saved_queries, Clock, ItemBody, Message, Query, SavedQuery, ThreadType,
	};

	fn normal_sq(entity_id: &str, notifications_enabled: bool) -> SavedQuery {
		let mut sq = default_saved_queries().remove(0);
		sq.entity_id = entity_id.into();
		sq.template = false;
		sq.notifications_enabled = notifications_enabled;
		sq.query = Query::default();
		sq
	}

	fn notifications_sq(entity_id: &str) -> SavedQuery {
		let mut sq = default_saved_queries().pop().unwrap();
		sq.entity_id = entity_id.into();
		sq.template = false;
		sq
	}

	async fn threads(dal: &Dal, n: usize) -> Vec<ThreadId> {
		let mut ids = Vec::new();
		for _ in 0..n {
			ids.push(dal.create_thread(&Thread::new("org", ThreadType::Team)).await.unwrap());
		}
		ids
	}

	fn row(sq: SavedQueryId, t: ThreadId, unread: bool, ts: DateTime<Utc>) -> SavedQueryThread {
		SavedQueryThread {
			saved_query_id: sq,
			thread_id: t,
			unread,
			timestamp: ts,
		}
	}

	#[tokio::test]
	async fn add_keeps_newer_timestamp_and_counts() {
		let (dal, _dir) = create_test_dal().await;
		let sq = dal.create_saved_query(&normal_sq("e1", false)).await.unwrap();
		let ts = threads(&dal, 2).await;
		let now = Utc::now();

		dal.add_items_to_saved_query_index(&[row(sq, ts[0], true, now), row(sq, ts[1], false, now)])
			.await
			.unwrap();
		let got = dal.saved_query(sq, &[]).await.unwrap();
		assert_eq!((got.unread, got.total), (1, 2));

		// an older update is ignored
		dal.add_items_to_saved_query_index(&[row(sq, ts[0], false, now - Duration::seconds(10))])
			.await
			.unwrap();
		let index = dal.saved_query_index(sq).await.unwrap();
		let r0 = index.iter().find(|r| r.thread_id == ts[0]).unwrap();
		assert!(r0.unread);
		assert_eq!(to_micros(r0.timestamp), to_micros(now));

		// same timestamp replaces unread
		dal.add_items_to_saved_query_index(&[row(sq, ts[0], false, now)])
			.await
			.unwrap();
		let got = dal.saved_query(sq, &[]).await.unwrap();
		assert_eq!((got.unread, got.total), (0, 2));
	}

	#[tokio::test]
	async fn large_batches_are_split() {
		let (dal, _dir) = create_test_dal().await;
		let sq = dal.create_saved_query(&normal_sq("e1", false)).await.unwrap();
		let ts = threads(&dal, INDEX_BATCH_SIZE + 5).await;
		let now = Utc::now();
		let rows: Vec<_> = ts.iter().map(|t| row(sq, *t, true, now)).collect();
		dal.add_items_to_saved_query_index(&rows).await.unwrap();
		assert_eq!(dal.saved_query(sq, &[]).await.unwrap().total, rows.len() as i64);

		let keys: Vec<(SavedQueryId, ThreadId)> = rows.iter().map(SavedQueryThread::key).collect();
		dal.remove_items_from_saved_query_index(&keys[..INDEX_BATCH_SIZE + 1])
			.await
			.unwrap();
		let got = dal.saved_query(sq, &[]).await.unwrap();
		assert_eq!((got.unread, got.total), (4, 4));

		dal.remove_all_items_from_saved_query_index(sq).await.unwrap();
		assert_eq!(dal.saved_query(sq, &[]).await.unwrap().total, 0);
	}

	#[tokio::test]
	async fn deleted_thread_leaves_every_index() {
		let (dal, _dir) = create_test_dal().await;
		let a = dal.create_saved_query(&normal_sq("e1", false)).await.unwrap();
		let b = dal.create_saved_query(&normal_sq("e2", false)).await.unwrap();
		let ts = threads(&dal, 2).await;
		let now = Utc::now();
		dal.add_items_to_saved_query_index(&[
			row(a, ts[0], true, now),
			row(b, ts[0], true, now),
			row(b, ts[1], true, now),
		])
		.await
		.unwrap();

		dal.delete_thread(ts[0], "e1").await.unwrap();
		assert!(dal.saved_query_index(a).await.unwrap().is_empty());
		assert_eq!(dal.saved_query(a, &[]).await.unwrap().total, 0);
		let got = dal.saved_query(b, &[]).await.unwrap();
		assert_eq!((got.unread, got.total), (1, 1));
	}

	#[tokio::test]
	async fn iterate_saved_query_newest_first() {
		let (dal, _dir) = create_test_dal().await;
		let sq = dal.create_saved_query(&normal_sq("e1", false)).await.unwrap();
		let ts = threads(&dal, 3).await;
		let base = Utc::now();
		let rows: Vec<_> = ts
			.iter()
			.enumerate()
			.map(|(i, t)| row(sq, *t, i == 1, base + Duration::seconds(i as i64)))
			.collect();
		dal.add_items_to_saved_query_index(&rows).await.unwrap();
		dal.add_thread_followers(ts[2], &["e1".into()]).await.unwrap();

		let page = dal
			.iterate_threads_in_saved_query(sq, "e1", &Iteration::first(2))
			.await
			.unwrap();
		assert!(page.has_more);
		let got: Vec<_> = page.items().map(|i| (i.thread.id, i.unread)).collect();
		assert_eq!(got, vec![(ts[2], false), (ts[1], true)]);
		assert!(page.edges[0].item.thread_entity.as_ref().unwrap().following);

		let next = dal
			.iterate_threads_in_saved_query(sq, "e1", &Iteration::after(page.last_cursor().unwrap(), 2))
			.await
			.unwrap();
		assert!(!next.has_more);
		assert_eq!(next.items().map(|i| i.thread.id).collect::<Vec<_>>(), vec![ts[0]]);

		let err = dal
			.iterate_threads_in_saved_query(sq, "e1", &Iteration::after("x", 2))
			.await
			.unwrap_err();
		assert!(matches!(err, DbError::InvalidIterator(_)));
	}

	#[tokio::test]
	async fn notifications_rollup_is_union_of_enabled_queries() {
		let (dal, _dir) = create_test_dal().await;
		let on = dal.create_saved_query(&normal_sq("e1", true)).await.unwrap();
		let also_on = dal.create_saved_query(&normal_sq("e1", true)).await.unwrap();
		let off = dal.create_saved_query(&normal_sq("e1", false)).await.unwrap();
		let n = dal.create_saved_query(&notifications_sq("e1")).await.unwrap();
		let ts = threads(&dal, 3).await;
		let now = Utc::now();
		dal.add_items_to_saved_query_index(&[
			row(on, ts[0], false, now),
			row(also_on, ts[0], true, now),
			row(also_on, ts[1], false, now),
			row(off, ts[2], true, now),
		])
		.await
		.unwrap();

		dal.rebuild_notifications_saved_query("e1").await.unwrap();
		let index = dal.saved_query_index(n).await.unwrap();
		let mut got: Vec<_> = index.iter().map(|r| (r.thread_id, r.unread)).collect();
		got.sort();
		assert_eq!(got, vec![(ts[0], true), (ts[1], false)]);
		let nsq = dal.saved_query(n, &[]).await.unwrap();
		assert_eq!((nsq.unread, nsq.total), (1, 2));

		// an entity without a notifications query is left alone
		dal.rebuild_notifications_saved_query("nobody").await.unwrap();
	}

	#[tokio::test]
	async fn unread_counts_with_patient_fallback() {
		let (dal, clock, _dir) = create_test_dal_with_clock(Utc::now()).await;
		assert_eq!(dal.unread_notifications_counts(&[]).await.unwrap(), None);

		let n = dal.create_saved_query(&notifications_sq("doc")).await.unwrap();
		let ts = threads(&dal, 2).await;
		dal.add_items_to_saved_query_index(&[row(n, ts[0], true, clock.now()), row(n, ts[1], true, clock.now())])
			.await
			.unwrap();

		let mut t = Thread::new("org", ThreadType::SecureExternal);
		t.primary_entity_id = "patient".into();
		let pt = dal.create_thread(&t).await.unwrap();
		let post = |actor: &str, internal: bool| PostItemParams {
			thread_id: pt,
			actor_entity_id: actor.into(),
			internal,
			body: ItemBody::Message(Message {
				text: "x".into(),
				..Default::default()
			}),
			idempotency_key: None,
		};
		clock.advance(Duration::seconds(1));
		dal.post_item(post("doc", false)).await.unwrap();
		dal.post_item(post("doc", true)).await.unwrap();
		dal.post_item(post("patient", false)).await.unwrap();
		clock.advance(Duration::seconds(1));
		dal.post_item(post("doc", false)).await.unwrap();

		let ids = vec!["doc".to_string(), "patient".to_string(), "stranger".to_string()];
		let counts = dal.unread_notifications_counts(&ids).await.unwrap().unwrap();
		assert_eq!(counts.get("doc"), Some(&2));
		assert_eq!(counts.get("patient"), Some(&2));
		assert!(!counts.contains_key("stranger"));

		dal.update_thread_entity(
			pt,
			"patient",
			&ThreadEntityUpdate {
				last_viewed: Some(clock.now()),
				..Default::default()
			},
		)
		.await
		.unwrap();
		let counts = dal.unread_notifications_counts(&ids).await.unwrap().unwrap();
		assert_eq!(counts.get("patient"), Some(&0));
	}
}
