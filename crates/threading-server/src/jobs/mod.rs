// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic background jobs.

mod batch_tasks;
mod job_history_cleanup;
mod scheduled_messages;

use std::sync::Arc;
use std::time::Duration;

use threading_server_config::JobsConfig;
use threading_server_jobs::{JobRepository, JobScheduler};

use crate::server::ThreadServer;

pub use batch_tasks::BatchTasksJob;
pub use job_history_cleanup::JobHistoryCleanupJob;
pub use scheduled_messages::ScheduledMessagesJob;

const JOB_HISTORY_CLEANUP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Registers every periodic job with `scheduler`.
pub fn register_jobs(
	scheduler: &mut JobScheduler,
	server: Arc<ThreadServer>,
	repository: Arc<JobRepository>,
	config: &JobsConfig,
) {
	scheduler.register_periodic(
		Arc::new(ScheduledMessagesJob::new(server.clone())),
		config.scheduled_messages_interval(),
	);
	scheduler.register_periodic(
		Arc::new(BatchTasksJob::new(
			server,
			config.batch_max_pending_tasks,
			config.batch_post_messages_lease(),
		)),
		config.batch_tasks_interval(),
	);
	scheduler.register_periodic(
		Arc::new(JobHistoryCleanupJob::new(repository, config.history_retention_days)),
		JOB_HISTORY_CLEANUP_INTERVAL,
	);
	tracing::info!(jobs = ?scheduler.job_ids(), "background jobs registered");
}
