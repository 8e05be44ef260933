// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Definitions and run history of the periodic background jobs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::{DbError, Result};
use crate::time::{from_micros, opt_from_micros, to_micros};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
	Running,
	Succeeded,
	Failed,
	Cancelled,
}

impl JobStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			JobStatus::Running => "running",
			JobStatus::Succeeded => "succeeded",
			JobStatus::Failed => "failed",
			JobStatus::Cancelled => "cancelled",
		}
	}
}

impl std::str::FromStr for JobStatus {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"running" => Ok(JobStatus::Running),
			"succeeded" => Ok(JobStatus::Succeeded),
			"failed" => Ok(JobStatus::Failed),
			"cancelled" => Ok(JobStatus::Cancelled),
			_ => Err(format!("unknown job status: {s}")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
	Schedule,
	Manual,
	Retry,
}

impl TriggerSource {
	pub fn as_str(&self) -> &'static str {
		match self {
			TriggerSource::Schedule => "schedule",
			TriggerSource::Manual => "manual",
			TriggerSource::Retry => "retry",
		}
	}
}

impl std::str::FromStr for TriggerSource {
	type Err = String;

	fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
		match s {
			"schedule" => Ok(TriggerSource::Schedule),
			"manual" => Ok(TriggerSource::Manual),
			"retry" => Ok(TriggerSource::Retry),
			_ => Err(format!("unknown trigger source: {s}")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDefinition {
	pub id: String,
	pub name: String,
	pub description: String,
	pub job_type: String,
	pub interval_secs: Option<i64>,
	pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
	pub id: String,
	pub job_id: String,
	pub status: JobStatus,
	pub started_at: DateTime<Utc>,
	pub completed_at: Option<DateTime<Utc>>,
	pub duration_ms: Option<i64>,
	pub error_message: Option<String>,
	pub retry_count: u32,
	pub triggered_by: TriggerSource,
	pub metadata: Option<serde_json::Value>,
}

const DEFINITION_COLUMNS: &str = "id, name, description, job_type, interval_secs, enabled";

const RUN_COLUMNS: &str =
	"id, job_id, status, started_at, completed_at, duration_ms, error_message, retry_count, triggered_by, metadata";

fn definition_from_row(row: &SqliteRow) -> Result<JobDefinition> {
	Ok(JobDefinition {
		id: row.try_get("id")?,
		name: row.try_get("name")?,
		description: row.try_get("description")?,
		job_type: row.try_get("job_type")?,
		interval_secs: row.try_get("interval_secs")?,
		enabled: row.try_get("enabled")?,
	})
}

fn run_from_row(row: &SqliteRow) -> Result<JobRun> {
	let status: String = row.try_get("status")?;
	let triggered_by: String = row.try_get("triggered_by")?;
	let retry_count: i64 = row.try_get("retry_count")?;
	let metadata: Option<String> = row.try_get("metadata")?;
	Ok(JobRun {
		id: row.try_get("id")?,
		job_id: row.try_get("job_id")?,
		status: status.parse().map_err(DbError::Internal)?,
		started_at: from_micros(row.try_get("started_at")?),
		completed_at: opt_from_micros(row.try_get("completed_at")?),
		duration_ms: row.try_get("duration_ms")?,
		error_message: row.try_get("error_message")?,
		retry_count: retry_count as u32,
		triggered_by: triggered_by.parse().map_err(DbError::Internal)?,
		metadata: metadata.as_deref().and_then(|s| serde_json::from_str(s).ok()),
	})
}

#[derive(Clone)]
pub struct JobRepository {
	pool: SqlitePool,
}

impl JobRepository {
	pub fn new(pool: SqlitePool) -> Self {
		Self { pool }
	}

	#[tracing::instrument(skip(self, def), fields(job_id = %def.id))]
	pub async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		let now = to_micros(Utc::now());
		sqlx::query(
			r#"
            INSERT INTO job_definitions (id, name, description, job_type, interval_secs, enabled, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                description = excluded.description,
                job_type = excluded.job_type,
                interval_secs = excluded.interval_secs,
                enabled = excluded.enabled,
                updated_at = excluded.updated_at
            "#,
		)
		.bind(&def.id)
		.bind(&def.name)
		.bind(&def.description)
		.bind(&def.job_type)
		.bind(def.interval_secs)
		.bind(def.enabled)
		.bind(now)
		.bind(now)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>> {
		let sql = format!("SELECT {DEFINITION_COLUMNS} FROM job_definitions WHERE id = ?");
		let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
		row.as_ref().map(definition_from_row).transpose()
	}

	#[tracing::instrument(skip(self, run), fields(run_id = %run.id, job_id = %run.job_id))]
	pub async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		sqlx::query(
			r#"
            INSERT INTO job_runs (id, job_id, status, started_at, retry_count, triggered_by)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
		)
		.bind(&run.id)
		.bind(&run.job_id)
		.bind(run.status.as_str())
		.bind(to_micros(run.started_at))
		.bind(run.retry_count as i64)
		.bind(run.triggered_by.as_str())
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	/// Closes a run. The duration is measured from the recorded start.
	#[tracing::instrument(skip(self, metadata))]
	pub async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		let now = to_micros(Utc::now());
		let metadata_str = metadata.map(|m| m.to_string());

		sqlx::query(
			r#"
            UPDATE job_runs
            SET status = ?,
                completed_at = ?,
                duration_ms = (? - started_at) / 1000,
                error_message = ?,
                retry_count = ?,
                metadata = ?
            WHERE id = ?
            "#,
		)
		.bind(status.as_str())
		.bind(now)
		.bind(now)
		.bind(error)
		.bind(retry_count as i64)
		.bind(metadata_str)
		.bind(run_id)
		.execute(&self.pool)
		.await?;

		Ok(())
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>> {
		let sql = format!("SELECT {RUN_COLUMNS} FROM job_runs WHERE id = ?");
		let row = sqlx::query(&sql).bind(run_id).fetch_optional(&self.pool).await?;
		row.as_ref().map(run_from_row).transpose()
	}

	/// Runs of a job, newest first.
	#[tracing::instrument(skip(self))]
	pub async fn list_runs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobRun>> {
		let sql = format!(
			"SELECT {RUN_COLUMNS} FROM job_runs WHERE job_id = ? ORDER BY started_at DESC LIMIT ? OFFSET ?"
		);
		let rows = sqlx::query(&sql)
			.bind(job_id)
			.bind(limit as i64)
			.bind(offset as i64)
			.fetch_all(&self.pool)
			.await?;
		rows.iter().map(run_from_row).collect()
	}

	#[tracing::instrument(skip(self))]
	pub async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		Ok(self.list_runs(job_id, 1, 0).await?.into_iter().next())
	}

	/// Failed runs since the most recent run that did not fail.
	#[tracing::instrument(skip(self))]
	pub async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		let row = sqlx::query(
			r#"
            SELECT COUNT(*) AS count
            FROM job_runs
            WHERE job_id = ?
              AND status = 'failed'
              AND started_at > COALESCE(
                  (SELECT MAX(started_at) FROM job_runs WHERE job_id = ? AND status != 'failed'),
                  -1
              )
            "#,
		)
		.bind(job_id)
		.bind(job_id)
		.fetch_one(&self.pool)
		.await?;

		let count: i64 = row.try_get("count")?;
		Ok(count as u32)
	}

	#[tracing::instrument(skip(self))]
	pub async fn delete_old_runs(&self, before: DateTime<Utc>) -> Result<u64> {
		let result = sqlx::query("DELETE FROM job_runs WHERE completed_at < ?")
			.bind(to_micros(before))
			.execute(&self.pool)
			.await?;

		Ok(result.rows_affected())
	}

	#[tracing::instrument(skip(self))]
	pub async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64> {
		let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
		self.delete_old_runs(cutoff).await
	}
}

#[async_trait]
pub trait JobStore: Send + Sync {
	async fn upsert_definition(&self, def: &JobDefinition) -> Result<()>;
	async fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>>;
	async fn record_run_start(&self, run: &JobRun) -> Result<()>;
	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()>;
	async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>>;
	async fn list_runs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobRun>>;
	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>>;
	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32>;
	async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64>;
}

#[async_trait]
impl JobStore for JobRepository {
	async fn upsert_definition(&self, def: &JobDefinition) -> Result<()> {
		self.upsert_definition(def).await
	}

	async fn get_definition(&self, id: &str) -> Result<Option<JobDefinition>> {
		self.get_definition(id).await
	}

	async fn record_run_start(&self, run: &JobRun) -> Result<()> {
		self.record_run_start(run).await
	}

	async fn record_run_complete(
		&self,
		run_id: &str,
		status: JobStatus,
		retry_count: u32,
		error: Option<String>,
		metadata: Option<serde_json::Value>,
	) -> Result<()> {
		self
			.record_run_complete(run_id, status, retry_count, error, metadata)
			.await
	}

	async fn get_run(&self, run_id: &str) -> Result<Option<JobRun>> {
		self.get_run(run_id).await
	}

	async fn list_runs(&self, job_id: &str, limit: u32, offset: u32) -> Result<Vec<JobRun>> {
		self.list_runs(job_id, limit, offset).await
	}

	async fn get_last_run(&self, job_id: &str) -> Result<Option<JobRun>> {
		self.get_last_run(job_id).await
	}

	async fn count_consecutive_failures(&self, job_id: &str) -> Result<u32> {
		self.count_consecutive_failures(job_id).await
	}

	async fn cleanup_old_runs(&self, retention_days: u32) -> Result<u64> {
		self.cleanup_old_runs(retention_days).await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::create_test_pool;
	use chrono::Duration;

	fn make_definition(id: &str, name: &str) -> JobDefinition {
		JobDefinition {
			id: id.to_string(),
			name: name.to_string(),
			description: "Test description".to_string(),
			job_type: "periodic".to_string(),
			interval_secs: Some(60),
			enabled: true,
		}
	}

	fn make_run(id: &str, started_at: DateTime<Utc>) -> JobRun {
		JobRun {
			id: id.to_string(),
			job_id: "job-1".to_string(),
			status: JobStatus::Running,
			started_at,
			completed_at: None,
			duration_ms: None,
			error_message: None,
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		}
	}

	#[tokio::test]
	async fn test_upsert_and_get_definition() {
		let (pool, _dir) = create_test_pool().await;
		let repo = JobRepository::new(pool);

		let def = make_definition("job-1", "Test Job");
		repo.upsert_definition(&def).await.unwrap();
		assert_eq!(repo.get_definition("job-1").await.unwrap(), Some(def.clone()));

		let updated = JobDefinition {
			name: "Updated Job".to_string(),
			enabled: false,
			..def
		};
		repo.upsert_definition(&updated).await.unwrap();

		let retrieved = repo.get_definition("job-1").await.unwrap().unwrap();
		assert_eq!(retrieved.name, "Updated Job");
		assert!(!retrieved.enabled);
	}

	#[tokio::test]
	async fn test_record_run_lifecycle() {
		let (pool, _dir) = create_test_pool().await;
		let repo = JobRepository::new(pool);
		repo.upsert_definition(&make_definition("job-1", "Test Job")).await.unwrap();

		repo.record_run_start(&make_run("run-1", Utc::now())).await.unwrap();
		assert_eq!(repo.get_run("run-1").await.unwrap().unwrap().status, JobStatus::Running);

		repo
			.record_run_complete(
				"run-1",
				JobStatus::Failed,
				2,
				Some("Something went wrong".to_string()),
				Some(serde_json::json!({"sent": 0})),
			)
			.await
			.unwrap();

		let completed = repo.get_run("run-1").await.unwrap().unwrap();
		assert_eq!(completed.status, JobStatus::Failed);
		assert_eq!(completed.retry_count, 2);
		assert_eq!(completed.error_message.as_deref(), Some("Something went wrong"));
		assert!(completed.completed_at.is_some());
		assert!(completed.duration_ms.unwrap() >= 0);
		assert_eq!(completed.metadata, Some(serde_json::json!({"sent": 0})));
	}

	#[tokio::test]
	async fn test_consecutive_failures_reset_by_success() {
		let (pool, _dir) = create_test_pool().await;
		let repo = JobRepository::new(pool);
		repo.upsert_definition(&make_definition("job-1", "Test Job")).await.unwrap();
		assert_eq!(repo.count_consecutive_failures("job-1").await.unwrap(), 0);

		let now = Utc::now();
		let statuses = [JobStatus::Failed, JobStatus::Succeeded, JobStatus::Failed, JobStatus::Failed];
		for (i, status) in statuses.iter().enumerate() {
			let id = format!("run-{i}");
			repo
				.record_run_start(&make_run(&id, now - Duration::minutes(10 - i as i64)))
				.await
				.unwrap();
			repo.record_run_complete(&id, *status, 0, None, None).await.unwrap();
		}

		assert_eq!(repo.count_consecutive_failures("job-1").await.unwrap(), 2);
		assert_eq!(repo.get_last_run("job-1").await.unwrap().unwrap().id, "run-3");
	}

	#[tokio::test]
	async fn test_cleanup_old_runs() {
		let (pool, _dir) = create_test_pool().await;
		let repo = JobRepository::new(pool.clone());
		repo.upsert_definition(&make_definition("job-1", "Test Job")).await.unwrap();

		for id in ["old-run", "new-run"] {
			repo.record_run_start(&make_run(id, Utc::now())).await.unwrap();
			repo
				.record_run_complete(id, JobStatus::Succeeded, 0, None, None)
				.await
				.unwrap();
		}
		sqlx::query("UPDATE job_runs SET completed_at = ? WHERE id = ?")
			.bind(to_micros(Utc::now() - Duration::days(10)))
			.bind("old-run")
			.execute(&pool)
			.await
			.unwrap();

		assert_eq!(repo.cleanup_old_runs(7).await.unwrap(), 1);
		assert!(repo.get_run("old-run").await.unwrap().is_none());
		assert!(repo.get_run("new-run").await.unwrap().is_some());
	}
}
