// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::types::{JobRun, JobStatus};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct JobHealthStatus {
	pub job_id: String,
	pub name: String,
	pub status: HealthState,
	pub last_run: Option<LastRunInfo>,
	pub consecutive_failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastRunInfo {
	pub run_id: String,
	pub status: JobStatus,
	pub started_at: DateTime<Utc>,
	pub duration_ms: Option<i64>,
	pub error: Option<String>,
}

impl From<JobRun> for LastRunInfo {
	fn from(r: JobRun) -> Self {
		Self {
			run_id: r.id,
			status: r.status,
			started_at: r.started_at,
			duration_ms: r.duration_ms,
			error: r.error_message,
		}
	}
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

impl HealthState {
	/// Only a failed last run counts against a job: one or two failures in a
	/// row degrade it and three or more make it unhealthy.
	pub fn from_last_run(last_run: Option<&JobRun>, consecutive_failures: u32) -> Self {
		match last_run.map(|r| r.status) {
			Some(JobStatus::Failed) => match consecutive_failures {
				0 => HealthState::Healthy,
				1 | 2 => HealthState::Degraded,
				_ => HealthState::Unhealthy,
			},
			_ => HealthState::Healthy,
		}
	}
}

#[derive(Debug, Clone, Serialize)]
pub struct JobsHealthStatus {
	pub status: HealthState,
	pub jobs: Vec<JobHealthStatus>,
}

impl JobsHealthStatus {
	/// The overall state is the worst of the jobs' states.
	pub fn from_jobs(jobs: Vec<JobHealthStatus>) -> Self {
		let status = jobs
			.iter()
			.map(|j| j.status)
			.max()
			.unwrap_or(HealthState::Healthy);
		Self { status, jobs }
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::types::TriggerSource;

	fn run(status: JobStatus) -> JobRun {
		JobRun {
			id: "run-1".to_string(),
			job_id: "job-1".to_string(),
			status,
			started_at: Utc::now(),
			completed_at: Some(Utc::now()),
			duration_ms: Some(100),
			error_message: None,
			retry_count: 0,
			triggered_by: TriggerSource::Schedule,
			metadata: None,
		}
	}

	fn job(status: HealthState) -> JobHealthStatus {
		JobHealthStatus {
			job_id: "j".into(),
			name: "j".into(),
			status,
			last_run: None,
			consecutive_failures: 0,
		}
	}

	#[test]
	fn no_runs_is_healthy() {
		assert_eq!(HealthState::from_last_run(None, 0), HealthState::Healthy);
	}

	#[test]
	fn non_failed_runs_are_healthy() {
		for status in [JobStatus::Succeeded, JobStatus::Running, JobStatus::Cancelled] {
			assert_eq!(HealthState::from_last_run(Some(&run(status)), 4), HealthState::Healthy);
		}
	}

	#[test]
	fn failures_degrade_then_fail() {
		let failed = run(JobStatus::Failed);
		assert_eq!(HealthState::from_last_run(Some(&failed), 0), HealthState::Healthy);
		assert_eq!(HealthState::from_last_run(Some(&failed), 1), HealthState::Degraded);
		assert_eq!(HealthState::from_last_run(Some(&failed), 2), HealthState::Degraded);
		assert_eq!(HealthState::from_last_run(Some(&failed), 3), HealthState::Unhealthy);
		assert_eq!(HealthState::from_last_run(Some(&failed), 5), HealthState::Unhealthy);
	}

	#[test]
	fn overall_state_is_the_worst() {
		assert_eq!(JobsHealthStatus::from_jobs(vec![]).status, HealthState::Healthy);
		let all = JobsHealthStatus::from_jobs(vec![
			job(HealthState::Healthy),
			job(HealthState::Degraded),
			job(HealthState::Healthy),
		]);
		assert_eq!(all.status, HealthState::Degraded);
		let all = JobsHealthStatus::from_jobs(vec![job(HealthState::Unhealthy), job(HealthState::Degraded)]);
		assert_eq!(all.status, HealthState::Unhealthy);
	}
}
