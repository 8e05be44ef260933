// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use tokio::time::Instant;

use super::AppState;
use crate::health::{self, HealthComponents, HealthResponse, HealthStatus};

/// GET /health - database reachability and background job health.
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
	let start = Instant::now();

	let (database, jobs) = tokio::join!(
		health::check_database(state.server.dal()),
		health::check_jobs(state.job_scheduler.as_ref()),
	);
	let components = HealthComponents { database, jobs };
	let status = health::aggregate_status(&components);

	let response = HealthResponse {
		status,
		timestamp: chrono::Utc::now().to_rfc3339(),
		duration_ms: start.elapsed().as_millis() as u64,
		version: env!("CARGO_PKG_VERSION"),
		components,
	};

	let http_status = match status {
		HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
		HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
	};
	(http_status, Json(response))
}
