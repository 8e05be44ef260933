// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use threading_common_thread::{SetupThreadState, ThreadId};

use crate::dal::{Dal, QueryOption};
use crate::error::{DbError, Result};
use crate::time::to_micros;

fn setup_from_row(row: &SqliteRow) -> Result<SetupThreadState> {
	Ok(SetupThreadState {
		thread_id: row.try_get("thread_id")?,
		entity_id: row.try_get("entity_id")?,
		step: row.try_get("step")?,
	})
}

impl Dal {
	#[tracing::instrument(skip(self, state), fields(thread_id = %state.thread_id, entity_id = %state.entity_id))]
	pub async fn create_setup_thread_state(&self, state: &SetupThreadState) -> Result<()> {
		let now = to_micros(self.now());
		let result = self
			.execute(
				sqlx::query(
					r#"
                    INSERT INTO onboarding_threads (thread_id, entity_id, step, created, modified)
                    VALUES (?, ?, ?, ?, ?)
                    "#,
				)
				.bind(state.thread_id)
				.bind(&state.entity_id)
				.bind(state.step)
				.bind(now)
				.bind(now),
			)
			.await;
		match result {
			Ok(_) => Ok(()),
			Err(e) if e.is_unique_violation() => Err(DbError::Conflict(
				format!("setup state for thread {}", state.thread_id),
			)),
			Err(e) => Err(e),
		}
	}

	#[tracing::instrument(skip(self, opts), fields(thread_id = %thread_id))]
	pub async fn setup_thread_state(&self, thread_id: ThreadId, opts: &[QueryOption]) -> Result<SetupThreadState> {
		self.check_for_update(opts);
		let row = self
			.fetch_optional(
				sqlx::query("SELECT thread_id, entity_id, step FROM onboarding_threads WHERE thread_id = ?")
					.bind(thread_id),
			)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("setup state for thread {thread_id}")))?;
		setup_from_row(&row)
	}

	/// The setup state of the entity's onboarding thread. When an entity has
	/// several the oldest thread wins.
	#[tracing::instrument(skip(self, opts))]
	pub async fn setup_thread_state_for_entity(
		&self,
		entity_id: &str,
		opts: &[QueryOption],
	) -> Result<SetupThreadState> {
		self.check_for_update(opts);
		let row = self
			.fetch_optional(
				sqlx::query(
					"SELECT thread_id, entity_id, step FROM onboarding_threads WHERE entity_id = ? ORDER BY thread_id LIMIT 1",
				)
				.bind(entity_id),
			)
			.await?
			.ok_or_else(|| DbError::NotFound(format!("setup state for entity {entity_id}")))?;
		setup_from_row(&row)
	}

	/// Moves the step forward. Steps never go backwards so a lower or equal
	/// step leaves the row unchanged.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id))]
	pub async fn update_setup_thread_state(&self, thread_id: ThreadId, step: i64) -> Result<()> {
		self.setup_thread_state(thread_id, &[]).await?;
		self.execute(
			sqlx::query("UPDATE onboarding_threads SET step = ?, modified = ? WHERE thread_id = ? AND step < ?")
				.bind(step)
				.bind(to_micros(self.now()))
				.bind(thread_id)
				.bind(step),
		)
		.await?;
		Ok(())
	}
}
