// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The data access handle and its transactional helper.
//!
//! A [`Dal`] either runs statements directly against the pool or, when handed
//! to a [`Dal::transact`] closure, against a single open transaction. Every
//! repository method is written once against [`Dal`] and works in both modes.
//!
//! SQLite has no row locks, so transactions are serialized with a
//! process-wide write lock that is also taken by every non-transactional
//! write. This makes `BEGIN` followed by read-then-write safe and is what the
//! [`QueryOption::ForUpdate`] marker relies on.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use sqlx::sqlite::{SqliteArguments, SqlitePool, SqliteQueryResult, SqliteRow};
use sqlx::{Sqlite, Transaction};
use threading_common_thread::{Clock, SystemClock};
use tokio::sync::Mutex;

use crate::error::{DbError, Result};

pub(crate) type SqliteQuery<'q> = sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>;

type TxHandle = Arc<Mutex<Option<Transaction<'static, Sqlite>>>>;

/// Options accepted by read methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOption {
	/// The caller intends to modify the rows it reads in the same transaction.
	ForUpdate,
}

pub(crate) fn for_update(opts: &[QueryOption]) -> bool {
	opts.contains(&QueryOption::ForUpdate)
}

/// Upper bounds and defaults for iteration page sizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterationLimits {
	pub default_threads: i64,
	pub max_threads: i64,
	pub default_items: i64,
	pub max_items: i64,
}

impl Default for IterationLimits {
	fn default() -> Self {
		Self {
			default_threads: 20,
			max_threads: 1000,
			default_items: 20,
			max_items: 1000,
		}
	}
}

#[derive(Clone)]
pub struct Dal {
	pool: SqlitePool,
	tx: Option<TxHandle>,
	write_lock: Arc<Mutex<()>>,
	clock: Arc<dyn Clock>,
	limits: IterationLimits,
}

impl std::fmt::Debug for Dal {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dal")
			.field("in_transaction", &self.tx.is_some())
			.field("limits", &self.limits)
			.finish()
	}
}

impl Dal {
	pub fn new(pool: SqlitePool, clock: Arc<dyn Clock>) -> Self {
		Self {
			pool,
			tx: None,
			write_lock: Arc::new(Mutex::new(())),
			clock,
			limits: IterationLimits::default(),
		}
	}

	pub fn with_system_clock(pool: SqlitePool) -> Self {
		Self::new(pool, Arc::new(SystemClock))
	}

	pub fn with_iteration_limits(mut self, limits: IterationLimits) -> Self {
		self.limits = limits;
		self
	}

	pub fn pool(&self) -> &SqlitePool {
		&self.pool
	}

	pub fn clock(&self) -> &Arc<dyn Clock> {
		&self.clock
	}

	pub fn limits(&self) -> IterationLimits {
		self.limits
	}

	pub fn in_transaction(&self) -> bool {
		self.tx.is_some()
	}

	pub(crate) fn now(&self) -> chrono::DateTime<chrono::Utc> {
		self.clock.now()
	}

	/// Runs `f` inside a transaction and commits if it returns `Ok`.
	///
	/// Any error or panic rolls the transaction back. A panic is logged and
	/// surfaced as [`DbError::Panic`]. Calling `transact` on a handle that is
	/// already inside a transaction runs `f` in that same transaction.
	pub async fn transact<T, E, F, Fut>(&self, f: F) -> std::result::Result<T, E>
	where
		F: FnOnce(Dal) -> Fut,
		Fut: Future<Output = std::result::Result<T, E>>,
		E: From<DbError>,
	{
		if self.tx.is_some() {
			return f(self.clone()).await;
		}

		let _write = self.write_lock.lock().await;
		let tx = self.pool.begin().await.map_err(DbError::from)?;
		let handle: TxHandle = Arc::new(Mutex::new(Some(tx)));
		let dal = Dal {
			pool: self.pool.clone(),
			tx: Some(handle.clone()),
			write_lock: self.write_lock.clone(),
			clock: self.clock.clone(),
			limits: self.limits,
		};

		let outcome = AssertUnwindSafe(async move { f(dal).await })
			.catch_unwind()
			.await;

		let Some(tx) = handle.lock().await.take() else {
			return Err(DbError::Internal("transaction was closed before completion".to_string()).into());
		};

		match outcome {
			Ok(Ok(value)) => {
				tx.commit().await.map_err(DbError::from)?;
				Ok(value)
			}
			Ok(Err(e)) => {
				if let Err(rb) = tx.rollback().await {
					tracing::warn!(error = %rb, "rollback failed");
				}
				Err(e)
			}
			Err(payload) => {
				let msg = panic_message(payload.as_ref());
				tracing::error!(panic = %msg, "panic inside transaction, rolled back");
				if let Err(rb) = tx.rollback().await {
					tracing::warn!(error = %rb, "rollback after panic failed");
				}
				Err(DbError::Panic(msg).into())
			}
		}
	}

	pub(crate) async fn execute<'q>(&self, query: SqliteQuery<'q>) -> Result<SqliteQueryResult> {
		match &self.tx {
			Some(handle) => {
				let mut guard = handle.lock().await;
				let tx = guard.as_mut().ok_or_else(closed)?;
				Ok(query.execute(&mut **tx).await?)
			}
			None => {
				let _write = self.write_lock.lock().await;
				Ok(query.execute(&self.pool).await?)
			}
		}
	}

	pub(crate) async fn fetch_all<'q>(&self, query: SqliteQuery<'q>) -> Result<Vec<SqliteRow>> {
		match &self.tx {
			Some(handle) => {
				let mut guard = handle.lock().await;
				let tx = guard.as_mut().ok_or_else(closed)?;
				Ok(query.fetch_all(&mut **tx).await?)
			}
			None => Ok(query.fetch_all(&self.pool).await?),
		}
	}

	pub(crate) async fn fetch_optional<'q>(&self, query: SqliteQuery<'q>) -> Result<Option<SqliteRow>> {
		match &self.tx {
			Some(handle) => {
				let mut guard = handle.lock().await;
				let tx = guard.as_mut().ok_or_else(closed)?;
				Ok(query.fetch_optional(&mut **tx).await?)
			}
			None => Ok(query.fetch_optional(&self.pool).await?),
		}
	}

	pub(crate) async fn fetch_one<'q>(&self, query: SqliteQuery<'q>) -> Result<SqliteRow> {
		match &self.tx {
			Some(handle) => {
				let mut guard = handle.lock().await;
				let tx = guard.as_mut().ok_or_else(closed)?;
				Ok(query.fetch_one(&mut **tx).await?)
			}
			None => Ok(query.fetch_one(&self.pool).await?),
		}
	}

	/// Round-trips a trivial query.
	pub async fn health_check(&self) -> Result<()> {
		self.fetch_one(sqlx::query("SELECT 1")).await?;
		Ok(())
	}

	/// Marks a read as locking. SQLite serializes writers already, so this
	/// only checks that the caller is inside a transaction.
	pub(crate) fn check_for_update(&self, opts: &[QueryOption]) {
		if for_update(opts) && self.tx.is_none() {
			tracing::warn!("FOR UPDATE read outside a transaction has no effect");
		}
	}
}

fn closed() -> DbError {
	DbError::Internal("transaction already finished".to_string())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
	if let Some(s) = payload.downcast_ref::<&str>() {
		(*s).to_string()
	} else if let Some(s) = payload.downcast_ref::<String>() {
		s.clone()
	} else {
		"unknown panic".to_string()
	}
}

/// `?, ?, ?` for `n` bind parameters.
pub(crate) fn placeholders(n: usize) -> String {
	vec!["?"; n].join(", ")
}
