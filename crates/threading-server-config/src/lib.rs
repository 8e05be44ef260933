// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Centralized configuration management for the threading server.
//!
//! This crate provides:
//! - Layered configuration from multiple sources (defaults, TOML file, environment)
//! - Type-safe configuration with validation
//! - Consistent environment variable naming (`THREADING_SERVER_*`)
//!
//! # Usage
//!
//! ```ignore
//! use threading_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("Server listening on {}", config.socket_addr());
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

use std::path::PathBuf;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub logging: LoggingConfig,
	pub service: ServiceConfig,
	pub jobs: JobsConfig,
	pub subscriber: SubscriberConfig,
}

impl ServerConfig {
	/// Get the socket address string for binding.
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.http.host, self.http.port)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`THREADING_SERVER_*`)
/// 2. Config file (`/etc/threading/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource),
	])
}

/// Merge the given sources in precedence order and resolve the result.
pub fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		let layer = source.load()?;
		merged.merge(layer);
	}

	finalize(merged)
}

fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		http: layer.http.unwrap_or_default().finalize(),
		database: layer.database.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
		service: layer.service.unwrap_or_default().finalize(),
		jobs: layer.jobs.unwrap_or_default().finalize(),
		subscriber: layer.subscriber.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		host = %config.http.host,
		port = config.http.port,
		database = %config.database.url,
		environment = %config.service.environment,
		web_domain = %config.service.web_domain,
		batch_interval_secs = config.jobs.batch_tasks_interval_secs,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.service.web_domain.trim().is_empty() {
		return Err(ConfigError::Validation(
			"THREADING_SERVER_WEB_DOMAIN must not be empty".to_string(),
		));
	}

	// A lease shorter than the sweep lets a second sweep pick up a task the
	// first one is still posting.
	if config.jobs.batch_post_messages_lease_secs < config.jobs.batch_tasks_interval_secs {
		return Err(ConfigError::Validation(format!(
			"batch lease ({}s) must be at least the batch sweep interval ({}s)",
			config.jobs.batch_post_messages_lease_secs, config.jobs.batch_tasks_interval_secs
		)));
	}

	if config.jobs.batch_max_pending_tasks == 0 {
		return Err(ConfigError::Validation(
			"THREADING_SERVER_BATCH_MAX_PENDING_TASKS must be positive".to_string(),
		));
	}

	Ok(())
}
