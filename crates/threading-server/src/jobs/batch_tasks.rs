// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use threading_common_thread::BatchTaskType;
use threading_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

use crate::server::{TaskOutcome, ThreadServer};

const TASK_CONCURRENCY: usize = 8;

/// Leases pending post-messages tasks and works through them concurrently.
///
/// A leased task is invisible to other sweeps until the lease runs out, so a
/// task whose processing dies midway is leased again later.
pub struct BatchTasksJob {
	server: Arc<ThreadServer>,
	max_tasks: u32,
	lease: chrono::Duration,
}

impl BatchTasksJob {
	pub fn new(server: Arc<ThreadServer>, max_tasks: u32, lease: Duration) -> Self {
		Self {
			server,
			max_tasks,
			lease: chrono::Duration::seconds(lease.as_secs() as i64),
		}
	}
}

#[async_trait]
impl Job for BatchTasksJob {
	fn id(&self) -> &str {
		"batch-tasks"
	}

	fn name(&self) -> &str {
		"Batch Tasks"
	}

	fn description(&self) -> &str {
		"Processes pending batch post-messages tasks"
	}

	#[instrument(skip(self, ctx), fields(job_id = "batch-tasks", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let tasks = self
			.server
			.dal()
			.lease_batch_tasks(BatchTaskType::PostMessages, i64::from(self.max_tasks), self.lease)
			.await?;
		if tasks.is_empty() {
			return Ok(JobOutput {
				message: "No pending batch tasks".to_string(),
				metadata: Some(serde_json::json!({ "leased": 0 })),
			});
		}

		let leased = tasks.len();
		let results: Vec<_> = stream::iter(tasks)
			.map(|task| {
				let server = self.server.clone();
				async move { (task.id, server.process_batch_task(&task).await) }
			})
			.buffer_unordered(TASK_CONCURRENCY)
			.collect()
			.await;

		let (mut completed, mut errored, mut unrecorded) = (0u64, 0u64, 0u64);
		for (id, result) in results {
			match result {
				Ok(TaskOutcome::Completed) => completed += 1,
				Ok(TaskOutcome::Errored) => errored += 1,
				// The lease runs out and the task is tried again.
				Err(e) => {
					unrecorded += 1;
					tracing::warn!(batch_task_id = %id, error = %e, "batch task result not recorded");
				}
			}
		}

		tracing::info!(leased, completed, errored, unrecorded, "batch task sweep completed");
		Ok(JobOutput {
			message: format!("Processed {leased} batch tasks"),
			metadata: Some(serde_json::json!({
				"leased": leased,
				"completed": completed,
				"errored": errored,
				"unrecorded": unrecorded
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::{BatchJobStatus, ThreadId};
	use threading_server_jobs::{CancellationToken, TriggerSource};

	use crate::api::{BatchPostMessagesRequest, MessagePost, PostMessagesRequest};
	use crate::testing::{app_source, TestEnv};

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run-1".to_string(),
			triggered_by: TriggerSource::Schedule,
			attempt: 0,
			cancellation_token: CancellationToken::new(),
		}
	}

	fn post(thread_id: ThreadId, text: &str) -> PostMessagesRequest {
		PostMessagesRequest {
			uuid: None,
			thread_id,
			from_entity_id: "a1".to_string(),
			messages: vec![MessagePost {
				text: text.to_string(),
				source: app_source("a1"),
				..Default::default()
			}],
		}
	}

	#[tokio::test]
	async fn sweep_completes_the_job() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		let job = env
			.server
			.batch_post_messages(BatchPostMessagesRequest {
				requesting_entity: "a1".to_string(),
				post_messages_requests: (0..5).map(|i| post(thread.id, &format!("m{i}"))).collect(),
			})
			.await
			.unwrap()
			.batch_job;

		let sweep = BatchTasksJob::new(env.server.clone(), 200, Duration::from_secs(60));
		let output = sweep.run(&ctx()).await.unwrap();
		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["leased"], 5);
		assert_eq!(metadata["completed"], 5);

		let job = env.server.dal().batch_job(job.id, &[]).await.unwrap();
		assert_eq!(job.status, BatchJobStatus::Complete);
		assert_eq!(env.server.dal().thread(thread.id, &[]).await.unwrap().message_count, 5);

		let output = sweep.run(&ctx()).await.unwrap();
		assert_eq!(output.metadata.unwrap()["leased"], 0);
	}

	#[tokio::test]
	async fn sweep_leases_at_most_max_tasks() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		env.server
			.batch_post_messages(BatchPostMessagesRequest {
				requesting_entity: "a1".to_string(),
				post_messages_requests: (0..3).map(|i| post(thread.id, &format!("m{i}"))).collect(),
			})
			.await
			.unwrap();

		let sweep = BatchTasksJob::new(env.server.clone(), 2, Duration::from_secs(60));
		assert_eq!(sweep.run(&ctx()).await.unwrap().metadata.unwrap()["leased"], 2);
		assert_eq!(sweep.run(&ctx()).await.unwrap().metadata.unwrap()["leased"], 1);
	}
}
