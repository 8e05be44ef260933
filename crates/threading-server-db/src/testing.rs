// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test fixtures. Each database lives in its own temporary directory so
//! pooled connections share it; the directory is removed when the returned
//! guard is dropped.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use tempfile::TempDir;
use threading_common_thread::{Clock, ManualClock};

use crate::dal::Dal;
use crate::pool::{create_pool, run_migrations};

pub async fn create_test_pool() -> (SqlitePool, TempDir) {
	let dir = tempfile::tempdir().expect("create temp dir");
	let url = format!("sqlite:{}", dir.path().join("threading.db").display());
	let pool = create_pool(&url).await.expect("create pool");
	run_migrations(&pool).await.expect("run migrations");
	(pool, dir)
}

/// A migrated database behind a [`Dal`] on the system clock.
pub async fn create_test_dal() -> (Dal, TempDir) {
	let (pool, dir) = create_test_pool().await;
	(Dal::with_system_clock(pool), dir)
}

/// A migrated database behind a [`Dal`] whose clock the test controls.
pub async fn create_test_dal_with_clock(start: DateTime<Utc>) -> (Dal, ManualClock, TempDir) {
	let (pool, dir) = create_test_pool().await;
	let clock = ManualClock::new(start);
	let dal = Dal::new(pool, Arc::new(clock.clone()) as Arc<dyn Clock>);
	(dal, clock, dir)
}
