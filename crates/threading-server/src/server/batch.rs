// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Batch jobs: many post requests accepted at once and worked through by
//! the batch-task job.

use threading_common_thread::{
	BatchJob, BatchJobId, BatchJobStatus, BatchJobType, BatchTask, BatchTaskId, BatchTaskStatus, BatchTaskType,
};

use super::{required, ThreadServer};
use crate::api::{BatchJobResponse, BatchJobsRequest, BatchJobsResponse, BatchPostMessagesRequest, PostMessagesRequest};
use crate::clients::OwnerType;
use crate::error::{Result, ServerError};

/// What became of a leased task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
	Completed,
	Errored,
}

impl ThreadServer {
	/// Queues one task per post request and returns the pending job.
	#[tracing::instrument(skip(self, req), fields(requesting_entity = %req.requesting_entity, count = req.post_messages_requests.len()))]
	pub async fn batch_post_messages(&self, req: BatchPostMessagesRequest) -> Result<BatchJobResponse> {
		required(&req.requesting_entity, "RequestingEntity")?;
		if req.post_messages_requests.is_empty() {
			return Err(ServerError::invalid("At least 1 PostMessagesRequest is required"));
		}
		let now = self.now();
		let mut tasks = Vec::with_capacity(req.post_messages_requests.len());
		for (i, post) in req.post_messages_requests.iter().enumerate() {
			if !post.thread_id.is_valid() {
				return Err(ServerError::invalid(format!("PostMessagesRequests[{i}]: ThreadID is required")));
			}
			if post.from_entity_id.trim().is_empty() {
				return Err(ServerError::invalid(format!("PostMessagesRequests[{i}]: FromEntityID is required")));
			}
			if post.messages.is_empty() {
				return Err(ServerError::invalid(format!(
					"PostMessagesRequests[{i}]: At least 1 Message is required"
				)));
			}
			tasks.push(BatchTask {
				id: BatchTaskId::empty(),
				batch_job_id: BatchJobId::empty(),
				task_type: BatchTaskType::PostMessages,
				status: BatchTaskStatus::Pending,
				data: serde_json::to_vec(post)?,
				error: None,
				available_after: now,
				completed: None,
				created: now,
				modified: now,
			});
		}

		let job = BatchJob {
			id: BatchJobId::empty(),
			job_type: BatchJobType::BatchPostMessages,
			status: BatchJobStatus::Pending,
			tasks_requested: tasks.len() as i64,
			tasks_completed: 0,
			tasks_errored: 0,
			requesting_entity: req.requesting_entity,
			completed: None,
			created: now,
			modified: now,
		};
		let id = self.dal.create_batch_job(&job, &tasks).await?;
		tracing::info!(batch_job_id = %id, tasks = tasks.len(), "batch job created");
		let batch_job = self.dal.batch_job(id, &[]).await?;
		Ok(BatchJobResponse { batch_job })
	}

	#[tracing::instrument(skip(self, req), fields(count = req.batch_job_ids.len()))]
	pub async fn batch_jobs(&self, req: BatchJobsRequest) -> Result<BatchJobsResponse> {
		if req.batch_job_ids.is_empty() {
			return Err(ServerError::invalid("BatchJobIDs are required"));
		}
		let batch_jobs = self.dal.batch_jobs(&req.batch_job_ids).await?;
		Ok(BatchJobsResponse { batch_jobs })
	}

	/// Runs one leased task and records its result on the task and its job.
	#[tracing::instrument(skip(self, task), fields(batch_task_id = %task.id, task_type = task.task_type.as_str()))]
	pub async fn process_batch_task(&self, task: &BatchTask) -> Result<TaskOutcome> {
		if task.status.is_terminal() {
			return Ok(TaskOutcome::Completed);
		}
		let result = match task.task_type {
			BatchTaskType::PostMessages => self.process_post_messages_task(task).await,
		};
		match result {
			Ok(()) => {
				self.dal.complete_batch_task(task.id).await?;
				Ok(TaskOutcome::Completed)
			}
			Err(e) => {
				tracing::warn!(error = %e, "batch task failed");
				self.dal.error_batch_task(task.id, e.user_message()).await?;
				Ok(TaskOutcome::Errored)
			}
		}
	}

	/// Posts the task's messages. Deleted threads are skipped; attachments
	/// are cloned under the target thread first. The task ID stands in for a
	/// missing UUID so a re-leased task never posts twice.
	async fn process_post_messages_task(&self, task: &BatchTask) -> Result<()> {
		let mut req: PostMessagesRequest = serde_json::from_slice(&task.data)?;
		let Some(thread) = self.dal.threads_by_ids(&[req.thread_id], true).await?.pop() else {
			return Err(ServerError::not_found(format!("thread {}", req.thread_id)));
		};
		if thread.deleted {
			tracing::info!(thread_id = %thread.id, "thread deleted, skipping batch post");
			return Ok(());
		}
		self.clone_message_attachments(OwnerType::Thread, &thread.id.to_string(), &mut req.messages)
			.await?;
		if req.uuid.as_deref().map_or(true, str::is_empty) {
			req.uuid = Some(task.id.to_string());
		}
		self.post_messages(req).await?;
		Ok(())
	}
}
