// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Component health checks reported by `GET /health`.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use threading_server_db::Dal;
use threading_server_jobs::{HealthState, JobScheduler};
use tokio::time::{timeout, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
	Healthy,
	Degraded,
	Unhealthy,
}

impl From<HealthState> for HealthStatus {
	fn from(state: HealthState) -> Self {
		match state {
			HealthState::Healthy => HealthStatus::Healthy,
			HealthState::Degraded => HealthStatus::Degraded,
			HealthState::Unhealthy => HealthStatus::Unhealthy,
		}
	}
}

#[derive(Debug, Serialize)]
pub struct DatabaseHealth {
	pub status: HealthStatus,
	pub latency_ms: u64,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobsHealth {
	pub status: HealthStatus,
	pub jobs_total: usize,
	pub jobs_healthy: usize,
	pub jobs_failing: usize,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub failing_jobs: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct HealthComponents {
	pub database: DatabaseHealth,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub jobs: Option<JobsHealth>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
	pub status: HealthStatus,
	pub timestamp: String,
	pub duration_ms: u64,
	pub version: &'static str,
	pub components: HealthComponents,
}

const DB_CHECK_TIMEOUT: Duration = Duration::from_millis(500);

pub async fn check_database(dal: &Dal) -> DatabaseHealth {
	let start = Instant::now();
	let result = timeout(DB_CHECK_TIMEOUT, dal.health_check()).await;
	let latency_ms = start.elapsed().as_millis() as u64;

	match result {
		Ok(Ok(())) => DatabaseHealth {
			status: HealthStatus::Healthy,
			latency_ms,
			error: None,
		},
		Ok(Err(e)) => DatabaseHealth {
			status: HealthStatus::Unhealthy,
			latency_ms,
			error: Some(e.to_string()),
		},
		Err(_) => DatabaseHealth {
			status: HealthStatus::Unhealthy,
			latency_ms,
			error: Some("database health check timed out".to_string()),
		},
	}
}

pub async fn check_jobs(scheduler: Option<&Arc<JobScheduler>>) -> Option<JobsHealth> {
	let scheduler = scheduler?;
	let health = scheduler.health_status().await;

	let failing: Vec<String> = health
		.jobs
		.iter()
		.filter(|j| j.status == HealthState::Unhealthy)
		.map(|j| j.job_id.clone())
		.collect();

	Some(JobsHealth {
		status: health.status.into(),
		jobs_total: health.jobs.len(),
		jobs_healthy: health.jobs.iter().filter(|j| j.status == HealthState::Healthy).count(),
		jobs_failing: failing.len(),
		failing_jobs: (!failing.is_empty()).then_some(failing),
	})
}

/// The worst status across components.
pub fn aggregate_status(components: &HealthComponents) -> HealthStatus {
	let mut status = components.database.status;
	if let Some(jobs) = &components.jobs {
		status = status.max(jobs.status);
	}
	status
}
