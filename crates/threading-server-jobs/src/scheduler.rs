// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::context::{CancellationToken, JobContext};
use crate::error::{JobError, Result};
use crate::health::{HealthState, JobHealthStatus, JobsHealthStatus};
use crate::job::Job;
use crate::types::{JobDefinition, JobRun, JobStatus, JobStore, TriggerSource};
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, instrument, warn};

const BASE_RETRY_DELAY: Duration = Duration::from_secs(1);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(60);
const RETRY_FACTOR: u32 = 2;
const MAX_RETRIES: u32 = 3;
const PERIODIC: &str = "periodic";

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
	cancellation_token: CancellationToken,
}

pub struct JobScheduler {
	jobs: BTreeMap<String, RegisteredJob>,
	store: Arc<dyn JobStore>,
	base_retry_delay: Duration,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new(store: Arc<dyn JobStore>) -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: BTreeMap::new(),
			store,
			base_retry_delay: BASE_RETRY_DELAY,
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	/// Overrides the first retry delay. Later retries double it.
	pub fn with_base_retry_delay(mut self, delay: Duration) -> Self {
		self.base_retry_delay = delay;
		self
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		let id = job.id().to_string();
		if self.jobs.contains_key(&id) {
			warn!(job_id = %id, "replacing registered job");
		}
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				interval,
				cancellation_token: CancellationToken::new(),
			},
		);
	}

	/// Persists every job definition and spawns one loop per job. A loop
	/// sleeps for its interval before each run.
	#[instrument(skip(self))]
	pub async fn start(&self) -> Result<()> {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let def = JobDefinition {
				id: job_id.clone(),
				name: registered.job.name().to_string(),
				description: registered.job.description().to_string(),
				job_type: PERIODIC.to_string(),
				interval_secs: Some(registered.interval.as_secs() as i64),
				enabled: true,
			};
			self.store.upsert_definition(&def).await?;

			let interval = registered.interval;
			let job = Arc::clone(&registered.job);
			let store = Arc::clone(&self.store);
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let cancellation_token = registered.cancellation_token.clone();
			let base_retry_delay = self.base_retry_delay;
			let job_id = job_id.clone();

			let handle = tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							if cancellation_token.is_cancelled() {
								continue;
							}
							let _ = run_job_with_retry(
								&job,
								store.as_ref(),
								TriggerSource::Schedule,
								&cancellation_token,
								base_retry_delay,
							).await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "Shutting down periodic job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
		Ok(())
	}

	/// Stops the periodic loops and waits for in-flight runs to finish.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		for registered in self.jobs.values() {
			registered.cancellation_token.cancel();
		}
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}

	#[instrument(skip(self))]
	pub async fn job_status(&self, job_id: &str) -> Option<JobHealthStatus> {
		let registered = self.jobs.get(job_id)?;

		let last_run = self.store.get_last_run(job_id).await.ok().flatten();
		let consecutive_failures = self
			.store
			.count_consecutive_failures(job_id)
			.await
			.unwrap_or(0);

		Some(JobHealthStatus {
			job_id: job_id.to_string(),
			name: registered.job.name().to_string(),
			status: HealthState::from_last_run(last_run.as_ref(), consecutive_failures),
			last_run: last_run.map(Into::into),
			consecutive_failures,
		})
	}

	#[instrument(skip(self))]
	pub async fn health_status(&self) -> JobsHealthStatus {
		let mut jobs = Vec::with_capacity(self.jobs.len());
		for job_id in self.jobs.keys() {
			if let Some(status) = self.job_status(job_id).await {
				jobs.push(status);
			}
		}
		JobsHealthStatus::from_jobs(jobs)
	}
}

async fn run_job_with_retry(
	job: &Arc<dyn Job>,
	store: &dyn JobStore,
	triggered_by: TriggerSource,
	cancellation_token: &CancellationToken,
	base_retry_delay: Duration,
) -> Result<String> {
	let mut retry_count = 0u32;
	let run_id = uuid::Uuid::new_v4().to_string();

	let run = JobRun {
		id: run_id.clone(),
		job_id: job.id().to_string(),
		status: JobStatus::Running,
		started_at: Utc::now(),
		completed_at: None,
		duration_ms: None,
		error_message: None,
		retry_count,
		triggered_by,
		metadata: None,
	};
	store.record_run_start(&run).await?;

	loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			triggered_by: if retry_count > 0 {
				TriggerSource::Retry
			} else {
				triggered_by
			},
			attempt: retry_count,
			cancellation_token: cancellation_token.clone(),
		};

		match job.run(&ctx).await {
			Ok(output) => {
				store
					.record_run_complete(&run_id, JobStatus::Succeeded, retry_count, None, output.metadata)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, message = %output.message, "Job completed successfully");
				return Ok(run_id);
			}
			Err(JobError::Cancelled) => {
				store
					.record_run_complete(&run_id, JobStatus::Cancelled, retry_count, None, None)
					.await?;
				info!(job_id = %job.id(), run_id = %run_id, "Job cancelled");
				return Err(JobError::Cancelled);
			}
			Err(JobError::Failed { message, retryable }) => {
				if retryable && retry_count < MAX_RETRIES && !cancellation_token.is_cancelled() {
					retry_count += 1;
					let delay = backoff_delay(base_retry_delay, retry_count);
					warn!(
						job_id = %job.id(),
						run_id = %run_id,
						retry_count,
						delay_ms = delay.as_millis() as u64,
						error = %message,
						"Job failed, retrying"
					);
					tokio::time::sleep(delay).await;
					continue;
				}

				store
					.record_run_complete(&run_id, JobStatus::Failed, retry_count, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed");
				return Err(JobError::Failed { message, retryable });
			}
			Err(e) => {
				let message = e.to_string();
				store
					.record_run_complete(&run_id, JobStatus::Failed, retry_count, Some(message.clone()), None)
					.await?;
				warn!(job_id = %job.id(), run_id = %run_id, error = %message, "Job failed with error");
				return Err(e);
			}
		}
	}
}

/// `base * 2^(retry-1)`, capped at a minute.
pub(crate) fn backoff_delay(base: Duration, retry_count: u32) -> Duration {
	let factor = RETRY_FACTOR.saturating_pow(retry_count.saturating_sub(1));
	base.saturating_mul(factor).min(MAX_RETRY_DELAY)
}
