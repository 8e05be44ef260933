// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Storage layer for the threading service.
//!
//! Every table is reached through [`Dal`], a handle that is either bound to
//! the connection pool or to an open transaction. [`Dal::transact`] hands the
//! closure a transaction-bound handle so multi-table writes (posting an item
//! and updating the thread, swapping a thread's index rows, rolling a batch
//! task into its job) commit or roll back together.
//!
//! Timestamps are stored as integer microseconds and IDs as their 64-bit
//! integer form.

pub mod batch;
pub mod dal;
pub mod entities;
pub mod error;
pub mod index;
pub mod items;
pub mod iteration;
pub mod job;
pub mod pool;
pub mod saved_messages;
pub mod saved_queries;
pub mod scheduled;
pub mod setup;
pub mod threads;
pub mod time;
pub mod triggered;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use dal::{Dal, IterationLimits, QueryOption};
pub use entities::ThreadEntityUpdate;
pub use error::{DbError, Result};
pub use index::{SavedQueryThread, SavedQueryThreadItem, INDEX_BATCH_SIZE};
pub use items::{PostItemParams, PostedItem};
pub use iteration::{Direction, Edge, Iteration, Page};
pub use job::{JobDefinition, JobRepository, JobRun, JobStatus, JobStore, TriggerSource};
pub use pool::{create_pool, run_migrations};
pub use saved_messages::SavedMessageUpdate;
pub use saved_queries::SavedQueryUpdate;
pub use scheduled::ScheduledMessageUpdate;
pub use threads::{IterateThreadsParams, ThreadListItem};
pub use time::{format_time_cursor, parse_time_cursor};
