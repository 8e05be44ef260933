// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EventError {
	#[error("malformed envelope: {0}")]
	Envelope(String),

	#[error("invalid base64 payload: {0}")]
	Base64(#[from] base64::DecodeError),

	#[error("json error: {0}")]
	Json(#[from] serde_json::Error),

	#[error("no handler registered for {0}")]
	UnknownEvent(String),

	#[error("queue error: {0}")]
	Queue(String),

	#[error("handler failed: {0}")]
	Handler(String),
}

impl EventError {
	/// Errors that redelivery cannot fix. The subscriber drops these messages
	/// instead of leaving them on the queue.
	pub fn is_permanent(&self) -> bool {
		matches!(
			self,
			EventError::Envelope(_)
				| EventError::Base64(_)
				| EventError::Json(_)
				| EventError::UnknownEvent(_)
		)
	}
}

pub type Result<T> = std::result::Result<T, EventError>;
