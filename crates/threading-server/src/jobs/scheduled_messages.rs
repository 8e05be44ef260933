// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::sync::Arc;

use async_trait::async_trait;
use threading_server_jobs::{Job, JobContext, JobError, JobOutput};
use tracing::instrument;

use crate::server::ThreadServer;

/// Sends every scheduled message whose time has come.
pub struct ScheduledMessagesJob {
	server: Arc<ThreadServer>,
}

impl ScheduledMessagesJob {
	pub fn new(server: Arc<ThreadServer>) -> Self {
		Self { server }
	}
}

#[async_trait]
impl Job for ScheduledMessagesJob {
	fn id(&self) -> &str {
		"scheduled-messages"
	}

	fn name(&self) -> &str {
		"Scheduled Messages"
	}

	fn description(&self) -> &str {
		"Posts scheduled messages that are due"
	}

	#[instrument(skip(self, ctx), fields(job_id = "scheduled-messages", run_id = %ctx.run_id))]
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError> {
		if ctx.is_cancelled() {
			return Err(JobError::Cancelled);
		}

		let due = self
			.server
			.dal()
			.due_scheduled_messages(self.server.now())
			.await?;

		let mut sent = 0u64;
		let mut skipped = 0u64;
		let mut failed = 0u64;
		for sm in &due {
			if ctx.is_cancelled() {
				return Err(JobError::Cancelled);
			}
			// A failed send stays pending and is picked up by the next sweep.
			match self.server.send_scheduled_message(sm.id).await {
				Ok(Some(_)) => sent += 1,
				Ok(None) => skipped += 1,
				Err(e) => {
					failed += 1;
					tracing::warn!(scheduled_message_id = %sm.id, thread_id = %sm.thread_id, error = %e, "scheduled message send failed");
				}
			}
		}

		if !due.is_empty() {
			tracing::info!(due = due.len(), sent, skipped, failed, "scheduled message sweep completed");
		}
		Ok(JobOutput {
			message: format!("Sent {sent} of {} due scheduled messages", due.len()),
			metadata: Some(serde_json::json!({
				"due": due.len(),
				"sent": sent,
				"skipped": skipped,
				"failed": failed
			})),
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use threading_common_thread::{Clock, ScheduledMessageStatus};
	use threading_server_jobs::{CancellationToken, TriggerSource};

	use crate::api::{CreateScheduledMessageRequest, MessagePost};
	use crate::testing::{app_source, TestEnv};

	fn ctx() -> JobContext {
		JobContext {
			run_id: "run-1".to_string(),
			triggered_by: TriggerSource::Manual,
			attempt: 0,
			cancellation_token: CancellationToken::new(),
		}
	}

	async fn schedule(env: &TestEnv, thread_id: threading_common_thread::ThreadId, text: &str, in_secs: i64) -> threading_common_thread::ScheduledMessageId {
		env.server
			.create_scheduled_message(CreateScheduledMessageRequest {
				thread_id,
				actor_entity_id: "a1".to_string(),
				scheduled_for: env.clock.now() + Duration::seconds(in_secs),
				message: MessagePost {
					text: text.to_string(),
					source: app_source("a1"),
					..Default::default()
				},
			})
			.await
			.unwrap()
			.scheduled_message
			.id
	}

	#[tokio::test]
	async fn sends_only_due_messages() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		let soon = schedule(&env, thread.id, "soon", 10).await;
		let later = schedule(&env, thread.id, "later", 3600).await;

		env.clock.advance(Duration::seconds(30));
		let job = ScheduledMessagesJob::new(env.server.clone());
		let output = job.run(&ctx()).await.unwrap();
		assert_eq!(output.metadata.unwrap()["sent"], 1);

		let dal = env.server.dal();
		assert_eq!(dal.scheduled_message(soon, &[]).await.unwrap().status, ScheduledMessageStatus::Sent);
		assert_eq!(dal.scheduled_message(later, &[]).await.unwrap().status, ScheduledMessageStatus::Pending);
		assert_eq!(dal.thread(thread.id, &[]).await.unwrap().message_count, 1);

		let output = job.run(&ctx()).await.unwrap();
		assert_eq!(output.metadata.unwrap()["due"], 0);
	}

	#[tokio::test]
	async fn failed_sends_stay_pending() {
		let env = TestEnv::new().await;
		let thread = env.team_thread(&["a1"]).await;
		let id = schedule(&env, thread.id, "lost", 10).await;
		env.server.dal().delete_thread(thread.id, "a1").await.unwrap();

		env.clock.advance(Duration::seconds(30));
		let output = ScheduledMessagesJob::new(env.server.clone()).run(&ctx()).await.unwrap();
		let metadata = output.metadata.unwrap();
		assert_eq!(metadata["failed"], 1);
		assert_eq!(
			env.server.dal().scheduled_message(id, &[]).await.unwrap().status,
			ScheduledMessageStatus::Pending
		);
	}

	#[tokio::test]
	async fn cancelled_run_stops() {
		let env = TestEnv::new().await;
		let ctx = ctx();
		ctx.cancellation_token.cancel();
		let err = ScheduledMessagesJob::new(env.server.clone()).run(&ctx).await.unwrap_err();
		assert!(matches!(err, JobError::Cancelled));
	}
}
