// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::path::PathBuf;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	DatabaseConfigLayer, HttpConfigLayer, JobsConfigLayer, LogFormat, LoggingConfigLayer,
	ServiceConfigLayer, SubscriberConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source. A missing file is not an error.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/threading/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer =
			toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
				path: self.path.clone(),
				source: e,
			})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

/// Environment variable source.
///
/// Convention: THREADING_SERVER_<FIELD>
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			http: Some(load_http_from_env()?),
			database: Some(load_database_from_env()),
			logging: Some(load_logging_from_env()?),
			service: Some(load_service_from_env()),
			jobs: Some(load_jobs_from_env()?),
			subscriber: Some(load_subscriber_from_env()?),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, kind: &str) -> Result<Option<T>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid {kind} value '{v}'"),
		}),
		None => Ok(None),
	}
}

fn load_http_from_env() -> Result<HttpConfigLayer, ConfigError> {
	Ok(HttpConfigLayer {
		host: env_var("THREADING_SERVER_HOST"),
		port: env_parse("THREADING_SERVER_PORT", "u16")?,
	})
}

fn load_database_from_env() -> DatabaseConfigLayer {
	DatabaseConfigLayer {
		url: env_var("THREADING_SERVER_DATABASE_URL"),
	}
}

fn load_logging_from_env() -> Result<LoggingConfigLayer, ConfigError> {
	let format = match env_var("THREADING_SERVER_LOG_FORMAT") {
		Some(v) => Some(v.parse::<LogFormat>().map_err(|message| ConfigError::InvalidValue {
			key: "THREADING_SERVER_LOG_FORMAT".to_string(),
			message,
		})?),
		None => None,
	};
	Ok(LoggingConfigLayer {
		level: env_var("THREADING_SERVER_LOG_LEVEL"),
		format,
	})
}

fn load_service_from_env() -> ServiceConfigLayer {
	ServiceConfigLayer {
		web_domain: env_var("THREADING_SERVER_WEB_DOMAIN"),
		environment: env_var("THREADING_SERVER_ENV"),
		events_topic: env_var("THREADING_SERVER_EVENTS_TOPIC"),
	}
}

fn load_jobs_from_env() -> Result<JobsConfigLayer, ConfigError> {
	Ok(JobsConfigLayer {
		scheduled_messages_interval_secs: env_parse(
			"THREADING_SERVER_SCHEDULED_MESSAGES_INTERVAL_SECS",
			"u64",
		)?,
		batch_tasks_interval_secs: env_parse("THREADING_SERVER_BATCH_TASKS_INTERVAL_SECS", "u64")?,
		batch_max_pending_tasks: env_parse("THREADING_SERVER_BATCH_MAX_PENDING_TASKS", "u32")?,
		batch_post_messages_lease_secs: env_parse(
			"THREADING_SERVER_BATCH_POST_MESSAGES_LEASE_SECS",
			"u64",
		)?,
		history_retention_days: env_parse("THREADING_SERVER_JOB_HISTORY_RETENTION_DAYS", "u32")?,
	})
}

fn load_subscriber_from_env() -> Result<SubscriberConfigLayer, ConfigError> {
	Ok(SubscriberConfigLayer {
		queue_wait_secs: env_parse("THREADING_SERVER_QUEUE_WAIT_SECS", "u64")?,
		visibility_timeout_secs: env_parse("THREADING_SERVER_QUEUE_VISIBILITY_TIMEOUT_SECS", "u64")?,
		stop_wait_secs: env_parse("THREADING_SERVER_SUBSCRIBER_STOP_WAIT_SECS", "u64")?,
	})
}
