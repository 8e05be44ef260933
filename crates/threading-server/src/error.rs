// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Server error types and HTTP response conversions.

use axum::{
	http::StatusCode,
	response::{IntoResponse, Response},
	Json,
};
use serde::Serialize;
use threading_common_thread::{BmlError, ModelError};
use threading_server_db::DbError;
use threading_server_events::EventError;

use crate::clients::ClientError;

/// Error classifications returned by every thread server operation.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
	/// A required field is missing or a value is malformed.
	#[error("Invalid argument: {0}")]
	InvalidArgument(String),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Already exists: {0}")]
	AlreadyExists(String),

	/// The request is valid but the system is not in a state to serve it.
	#[error("Failed precondition: {0}")]
	FailedPrecondition(String),

	#[error("Internal error: {0}")]
	Internal(String),

	#[error("Not implemented: {0}")]
	Unimplemented(String),
}

pub type Result<T> = std::result::Result<T, ServerError>;

impl ServerError {
	pub fn invalid(msg: impl Into<String>) -> Self {
		ServerError::InvalidArgument(msg.into())
	}

	pub fn not_found(msg: impl Into<String>) -> Self {
		ServerError::NotFound(msg.into())
	}

	pub fn is_not_found(&self) -> bool {
		matches!(self, ServerError::NotFound(_))
	}

	/// The message shown to callers, without the classification prefix.
	/// Internal details are never exposed.
	pub fn user_message(&self) -> &str {
		match self {
			ServerError::InvalidArgument(msg)
			| ServerError::NotFound(msg)
			| ServerError::AlreadyExists(msg)
			| ServerError::FailedPrecondition(msg)
			| ServerError::Unimplemented(msg) => msg,
			ServerError::Internal(_) => INTERNAL_MESSAGE,
		}
	}
}

const INTERNAL_MESSAGE: &str = "An internal error occurred";

impl From<DbError> for ServerError {
	fn from(e: DbError) -> Self {
		match e {
			DbError::NotFound(what) => ServerError::NotFound(what),
			DbError::InvalidIterator(msg) => ServerError::InvalidArgument(format!("invalid iterator: {msg}")),
			DbError::Conflict(what) => ServerError::AlreadyExists(what),
			other => ServerError::Internal(other.to_string()),
		}
	}
}

impl From<ClientError> for ServerError {
	fn from(e: ClientError) -> Self {
		match e {
			ClientError::NotFound(what) => ServerError::NotFound(what),
			other => ServerError::Internal(other.to_string()),
		}
	}
}

impl From<EventError> for ServerError {
	fn from(e: EventError) -> Self {
		ServerError::Internal(e.to_string())
	}
}

impl From<ModelError> for ServerError {
	fn from(e: ModelError) -> Self {
		ServerError::Internal(e.to_string())
	}
}

impl From<BmlError> for ServerError {
	fn from(e: BmlError) -> Self {
		ServerError::InvalidArgument(format!("text is not valid markup: {e}"))
	}
}

impl From<serde_json::Error> for ServerError {
	fn from(e: serde_json::Error) -> Self {
		ServerError::Internal(format!("serialization: {e}"))
	}
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
	pub error: String,
	pub message: String,
}

impl IntoResponse for ServerError {
	fn into_response(self) -> Response {
		let (status, error_response) = match &self {
			ServerError::InvalidArgument(msg) => (
				StatusCode::BAD_REQUEST,
				ErrorResponse {
					error: "invalid_argument".to_string(),
					message: msg.clone(),
				},
			),
			ServerError::NotFound(msg) => (
				StatusCode::NOT_FOUND,
				ErrorResponse {
					error: "not_found".to_string(),
					message: msg.clone(),
				},
			),
			ServerError::AlreadyExists(msg) => (
				StatusCode::CONFLICT,
				ErrorResponse {
					error: "already_exists".to_string(),
					message: msg.clone(),
				},
			),
			ServerError::FailedPrecondition(msg) => (
				StatusCode::PRECONDITION_FAILED,
				ErrorResponse {
					error: "failed_precondition".to_string(),
					message: msg.clone(),
				},
			),
			ServerError::Internal(msg) => {
				tracing::error!(error = %msg, "internal error");
				(
					StatusCode::INTERNAL_SERVER_ERROR,
					ErrorResponse {
						error: "internal_error".to_string(),
						message: INTERNAL_MESSAGE.to_string(),
					},
				)
			}
			ServerError::Unimplemented(msg) => (
				StatusCode::NOT_IMPLEMENTED,
				ErrorResponse {
					error: "unimplemented".to_string(),
					message: msg.clone(),
				},
			),
		};

		(status, Json(error_response)).into_response()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn db_errors_map_to_classifications() {
		assert!(matches!(
			ServerError::from(DbError::NotFound("thread t_1".into())),
			ServerError::NotFound(_)
		));
		assert!(matches!(
			ServerError::from(DbError::InvalidIterator("bad cursor".into())),
			ServerError::InvalidArgument(_)
		));
		assert!(matches!(
			ServerError::from(DbError::Conflict("setup state".into())),
			ServerError::AlreadyExists(_)
		));
		assert!(matches!(
			ServerError::from(DbError::Internal("boom".into())),
			ServerError::Internal(_)
		));
	}

	#[test]
	fn directory_not_found_stays_not_found() {
		assert!(ServerError::from(ClientError::NotFound("entity e1".into())).is_not_found());
		assert!(matches!(
			ServerError::from(ClientError::Unavailable("directory".into())),
			ServerError::Internal(_)
		));
	}

	#[test]
	fn user_messages_drop_the_classification() {
		assert_eq!(ServerError::not_found("thread t_1").user_message(), "thread t_1");
		assert_eq!(ServerError::invalid("ThreadID is required").user_message(), "ThreadID is required");
		assert_eq!(
			ServerError::Internal("db exploded".into()).user_message(),
			"An internal error occurred"
		);
	}

	#[test]
	fn statuses() {
		let cases = [
			(ServerError::invalid("x"), StatusCode::BAD_REQUEST),
			(ServerError::not_found("x"), StatusCode::NOT_FOUND),
			(ServerError::AlreadyExists("x".into()), StatusCode::CONFLICT),
			(ServerError::FailedPrecondition("x".into()), StatusCode::PRECONDITION_FAILED),
			(ServerError::Internal("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
			(ServerError::Unimplemented("x".into()), StatusCode::NOT_IMPLEMENTED),
		];
		for (err, status) in cases {
			assert_eq!(err.into_response().status(), status);
		}
	}
}
