// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{
	BatchJob, BatchJobId, BatchJobStatus, BatchTask, BatchTaskId, BatchTaskStatus, BatchTaskType,
};

use crate::dal::{placeholders, Dal, QueryOption};
use crate::error::{DbError, Result};
use crate::time::{from_micros, opt_from_micros, to_micros};

const JOB_COLUMNS: &str = "id, type, status, tasks_requested, tasks_completed, tasks_errored, requesting_entity, \
	completed, created, modified";

const TASK_COLUMNS: &str = "id, batch_job_id, type, status, data, error, available_after, completed, created, modified";

fn job_from_row(row: &SqliteRow) -> Result<BatchJob> {
	let job_type: String = row.try_get("type")?;
	let status: String = row.try_get("status")?;
	Ok(BatchJob {
		id: row.try_get("id")?,
		job_type: job_type.parse().map_err(DbError::Internal)?,
		status: status.parse().map_err(DbError::Internal)?,
		tasks_requested: row.try_get("tasks_requested")?,
		tasks_completed: row.try_get("tasks_completed")?,
		tasks_errored: row.try_get("tasks_errored")?,
		requesting_entity: row.try_get("requesting_entity")?,
		completed: opt_from_micros(row.try_get("completed")?),
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
	})
}

fn task_from_row(row: &SqliteRow) -> Result<BatchTask> {
	let task_type: String = row.try_get("type")?;
	let status: String = row.try_get("status")?;
	Ok(BatchTask {
		id: row.try_get("id")?,
		batch_job_id: row.try_get("batch_job_id")?,
		task_type: task_type.parse().map_err(DbError::Internal)?,
		status: status.parse().map_err(DbError::Internal)?,
		data: row.try_get("data")?,
		error: row.try_get("error")?,
		available_after: from_micros(row.try_get("available_after")?),
		completed: opt_from_micros(row.try_get("completed")?),
		created: from_micros(row.try_get("created")?),
		modified: from_micros(row.try_get("modified")?),
	})
}

impl Dal {
	/// Inserts a job and its tasks. `tasks_requested` is taken from the task
	/// count and the tasks become eligible immediately.
	#[tracing::instrument(skip(self, job, tasks), fields(job_type = job.job_type.as_str(), tasks = tasks.len()))]
	pub async fn create_batch_job(&self, job: &BatchJob, tasks: &[BatchTask]) -> Result<BatchJobId> {
		let job = job.clone();
		let tasks = tasks.to_vec();
		self.transact(|tx| async move {
			let id = if job.id.is_valid() { job.id } else { BatchJobId::new() };
			let now = to_micros(tx.now());
			tx.execute(
				sqlx::query(
					r#"
                    INSERT INTO batch_jobs (id, type, status, tasks_requested, tasks_completed, tasks_errored,
                        requesting_entity, completed, created, modified)
                    VALUES (?, ?, ?, ?, 0, 0, ?, NULL, ?, ?)
                    "#,
				)
				.bind(id)
				.bind(job.job_type.as_str())
				.bind(BatchJobStatus::Pending.as_str())
				.bind(tasks.len() as i64)
				.bind(&job.requesting_entity)
				.bind(now)
				.bind(now),
			)
			.await?;

			for task in &tasks {
				let task_id = if task.id.is_valid() { task.id } else { BatchTaskId::new() };
				tx.execute(
					sqlx::query(
						r#"
                        INSERT INTO batch_tasks (id, batch_job_id, type, status, data, error, available_after, completed, created, modified)
                        VALUES (?, ?, ?, ?, ?, NULL, ?, NULL, ?, ?)
                        "#,
					)
					.bind(task_id)
					.bind(id)
					.bind(task.task_type.as_str())
					.bind(BatchTaskStatus::Pending.as_str())
					.bind(&task.data)
					.bind(now - 1)
					.bind(now)
					.bind(now),
				)
				.await?;
			}
			Ok::<_, DbError>(id)
		})
		.await
	}

	#[tracing::instrument(skip(self, opts), fields(batch_job_id = %id))]
	pub async fn batch_job(&self, id: BatchJobId, opts: &[QueryOption]) -> Result<BatchJob> {
		self.check_for_update(opts);
		let sql = format!("SELECT {JOB_COLUMNS} FROM batch_jobs WHERE id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(id))
			.await?
			.ok_or_else(|| DbError::NotFound(format!("batch job {id}")))?;
		job_from_row(&row)
	}

	#[tracing::instrument(skip(self, ids), fields(count = ids.len()))]
	pub async fn batch_jobs(&self, ids: &[BatchJobId]) -> Result<Vec<BatchJob>> {
		if ids.is_empty() {
			return Ok(Vec::new());
		}
		let sql = format!(
			"SELECT {JOB_COLUMNS} FROM batch_jobs WHERE id IN ({}) ORDER BY id",
			placeholders(ids.len())
		);
		let mut q = sqlx::query(&sql);
		for id in ids {
			q = q.bind(*id);
		}
		let rows = self.fetch_all(q).await?;
		rows.iter().map(job_from_row).collect()
	}

	#[tracing::instrument(skip(self, opts), fields(batch_task_id = %id))]
	pub async fn batch_task(&self, id: BatchTaskId, opts: &[QueryOption]) -> Result<BatchTask> {
		self.check_for_update(opts);
		let sql = format!("SELECT {TASK_COLUMNS} FROM batch_tasks WHERE id = ?");
		let row = self
			.fetch_optional(sqlx::query(&sql).bind(id))
			.await?
			.ok_or_else(|| DbError::NotFound(format!("batch task {id}")))?;
		task_from_row(&row)
	}

	#[tracing::instrument(skip(self), fields(batch_job_id = %id))]
	pub async fn batch_tasks_for_job(&self, id: BatchJobId) -> Result<Vec<BatchTask>> {
		let sql = format!("SELECT {TASK_COLUMNS} FROM batch_tasks WHERE batch_job_id = ? ORDER BY id");
		let rows = self.fetch_all(sqlx::query(&sql).bind(id)).await?;
		rows.iter().map(task_from_row).collect()
	}

	/// Pending tasks of the given types whose lease has lapsed, oldest first.
	#[tracing::instrument(skip(self, task_types), fields(types = task_types.len()))]
	pub async fn available_batch_tasks(
		&self,
		task_types: &[BatchTaskType],
		now: DateTime<Utc>,
		limit: i64,
	) -> Result<Vec<BatchTask>> {
		if task_types.is_empty() || limit <= 0 {
			return Ok(Vec::new());
		}
		let sql = format!(
			"SELECT {TASK_COLUMNS} FROM batch_tasks WHERE status = ? AND available_after < ? AND type IN ({}) \
			 ORDER BY created, id LIMIT ?",
			placeholders(task_types.len())
		);
		let mut q = sqlx::query(&sql)
			.bind(BatchTaskStatus::Pending.as_str())
			.bind(to_micros(now));
		for t in task_types {
			q = q.bind(t.as_str());
		}
		let rows = self.fetch_all(q.bind(limit)).await?;
		rows.iter().map(task_from_row).collect()
	}

	/// Selects up to `limit` eligible tasks of one type and pushes their lease
	/// out by `lease`. Leasing never changes a task's status.
	#[tracing::instrument(skip(self), fields(task_type = task_type.as_str()))]
	pub async fn lease_batch_tasks(
		&self,
		task_type: BatchTaskType,
		limit: i64,
		lease: Duration,
	) -> Result<Vec<BatchTask>> {
		self.transact(|tx| async move {
			let now = tx.now();
			let mut tasks = tx.available_batch_tasks(&[task_type], now, limit).await?;
			if tasks.is_empty() {
				return Ok::<_, DbError>(tasks);
			}
			let until = now + lease;
			let sql = format!(
				"UPDATE batch_tasks SET available_after = ?, modified = ? WHERE id IN ({})",
				placeholders(tasks.len())
			);
			let mut q = sqlx::query(&sql).bind(to_micros(until)).bind(to_micros(now));
			for t in &tasks {
				q = q.bind(t.id);
			}
			tx.execute(q).await?;
			for t in &mut tasks {
				t.available_after = until;
				t.modified = now;
			}
			Ok(tasks)
		})
		.await
	}

	/// Marks a task complete and rolls the result into its job.
	#[tracing::instrument(skip(self), fields(batch_task_id = %id))]
	pub async fn complete_batch_task(&self, id: BatchTaskId) -> Result<BatchJob> {
		self.finish_batch_task(id, BatchTaskStatus::Complete, None).await
	}

	/// Marks a task errored with a user-facing message and rolls the result
	/// into its job.
	#[tracing::instrument(skip(self, error), fields(batch_task_id = %id))]
	pub async fn error_batch_task(&self, id: BatchTaskId, error: &str) -> Result<BatchJob> {
		self.finish_batch_task(id, BatchTaskStatus::Error, Some(error.to_string()))
			.await
	}

	async fn finish_batch_task(
		&self,
		id: BatchTaskId,
		status: BatchTaskStatus,
		error: Option<String>,
	) -> Result<BatchJob> {
		self.transact(|tx| async move {
			let task = tx.batch_task(id, &[QueryOption::ForUpdate]).await?;
			let job = tx.batch_job(task.batch_job_id, &[QueryOption::ForUpdate]).await?;
			if task.status.is_terminal() {
				tracing::debug!(status = task.status.as_str(), "batch task already finished");
				return Ok::<_, DbError>(job);
			}

			let now = to_micros(tx.now());
			tx.execute(
				sqlx::query("UPDATE batch_tasks SET status = ?, error = ?, completed = ?, modified = ? WHERE id = ?")
					.bind(status.as_str())
					.bind(error.as_deref())
					.bind(now)
					.bind(now)
					.bind(id),
			)
			.await?;

			let counter = match status {
				BatchTaskStatus::Error => "tasks_errored",
				_ => "tasks_completed",
			};
			let sql = format!("UPDATE batch_jobs SET {counter} = {counter} + 1, modified = ? WHERE id = ?");
			tx.execute(sqlx::query(&sql).bind(now).bind(job.id)).await?;

			let job = tx.batch_job(job.id, &[]).await?;
			if job.status == BatchJobStatus::Pending && job.tasks_completed == job.tasks_requested {
				tx.execute(
					sqlx::query("UPDATE batch_jobs SET status = ?, completed = ?, modified = ? WHERE id = ?")
						.bind(BatchJobStatus::Complete.as_str())
						.bind(now)
						.bind(now)
						.bind(job.id),
				)
				.await?;
				tracing::info!(batch_job_id = %job.id, "batch job complete");
				return tx.batch_job(job.id, &[]).await;
			}
			Ok(job)
		})
		.await
	}
}
