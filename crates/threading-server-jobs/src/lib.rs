// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Background job scheduler for the threading service.
//!
//! Periodic sweeps (due scheduled messages, leased batch tasks, run-history
//! cleanup) implement [`Job`] and are driven by a [`JobScheduler`] that
//! retries retryable failures with backoff, records every run and rolls run
//! history up into a health status.

pub mod context;
pub mod error;
pub mod health;
pub mod job;
pub mod scheduler;
pub mod types;

pub use context::{CancellationToken, JobContext};
pub use error::{JobError, Result};
pub use health::{HealthState, JobHealthStatus, JobsHealthStatus, LastRunInfo};
pub use job::Job;
pub use scheduler::JobScheduler;
pub use types::{JobDefinition, JobOutput, JobRepository, JobRun, JobStatus, JobStore, TriggerSource};
