// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Threading server binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use threading_server::clients::memory::MemoryClients;
use threading_server::jobs::register_jobs;
use threading_server::workers::{subscribe_queues, Workers, ONBOARDING_QUEUE, TRIGGERED_QUEUE};
use threading_server::{create_router, AppState, ThreadServer};
use threading_server_config::{LogFormat, ServerConfig};
use threading_server_db::{Dal, JobRepository};
use threading_server_events::{EventPublisher, MemoryBroker};
use threading_server_jobs::JobScheduler;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Threading server - threads, saved queries and messaging automation.
#[derive(Parser, Debug)]
#[command(name = "threading-server", about = "Threading service", version)]
struct Args {
	/// TOML config file, layered over defaults and under environment variables
	#[arg(long, env = "THREADING_SERVER_CONFIG")]
	config: Option<PathBuf>,
}

fn init_tracing(config: &ServerConfig) {
	let filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| config.logging.level.clone().into());
	let registry = tracing_subscriber::registry().with(filter);
	match config.logging.format {
		LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
		LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
	}
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => threading_server_config::load_config_with_file(path),
		None => threading_server_config::load_config(),
	}
	.context("loading configuration")?;

	init_tracing(&config);

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		environment = %config.service.environment,
		"starting threading-server"
	);

	let pool = threading_server_db::create_pool(&config.database.url)
		.await
		.context("opening database")?;
	threading_server_db::run_migrations(&pool)
		.await
		.context("running migrations")?;

	let dal = Dal::with_system_clock(pool.clone());

	// Collaborating services are in-process when running standalone.
	let clients = MemoryClients::new();
	let broker = MemoryBroker::new(config.subscriber.visibility_timeout());
	let publisher = EventPublisher::new(
		config.service.environment.clone(),
		config.service.events_topic.clone(),
		Arc::new(broker.clone()),
	);

	let server = Arc::new(ThreadServer::new(
		dal,
		clients.clients(),
		Some(publisher.clone()),
		config.service.web_domain.clone(),
	));

	let job_repo = Arc::new(JobRepository::new(pool.clone()));
	let mut scheduler = JobScheduler::new(job_repo.clone());
	register_jobs(&mut scheduler, server.clone(), job_repo, &config.jobs);
	let scheduler = Arc::new(scheduler);
	if let Err(e) = scheduler.start().await {
		tracing::error!(error = %e, "failed to start job scheduler");
	}

	subscribe_queues(&broker, &publisher).await;
	let workers = Workers::start(
		server.clone(),
		&config.service.environment,
		Arc::new(broker.queue(TRIGGERED_QUEUE).await),
		Arc::new(broker.queue(ONBOARDING_QUEUE).await),
		&config.subscriber,
	);

	let app = create_router(AppState {
		server,
		job_scheduler: Some(scheduler.clone()),
	})
	.layer(
		CorsLayer::new()
			.allow_origin(Any)
			.allow_methods(Any)
			.allow_headers(Any),
	);

	let addr = config.socket_addr();
	let listener = tokio::net::TcpListener::bind(&addr)
		.await
		.with_context(|| format!("binding {addr}"))?;
	tracing::info!("listening on {}", addr);

	tokio::select! {
		result = axum::serve(listener, app) => {
			if let Err(e) = result {
				tracing::error!(error = %e, "server error");
			}
		}
		_ = tokio::signal::ctrl_c() => {
			tracing::info!("received shutdown signal");
		}
	}

	if !workers.stop(config.subscriber.stop_wait()).await {
		tracing::warn!("event workers did not drain before the stop deadline");
	}
	scheduler.shutdown().await;

	tracing::info!("server shutdown complete");
	Ok(())
}
