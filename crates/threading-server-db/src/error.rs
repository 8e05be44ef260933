// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#[derive(Debug, thiserror::Error)]
pub enum DbError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Invalid iterator: {0}")]
	InvalidIterator(String),

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Internal: {0}")]
	Internal(String),

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Transaction panicked: {0}")]
	Panic(String),
}

impl DbError {
	pub fn is_not_found(&self) -> bool {
		matches!(self, DbError::NotFound(_))
	}

	pub fn is_unique_violation(&self) -> bool {
		matches!(self, DbError::Sqlx(sqlx::Error::Database(e)) if e.is_unique_violation())
	}

	/// SQLite reported lock contention (`SQLITE_BUSY` / `SQLITE_LOCKED`).
	pub fn is_busy(&self) -> bool {
		match self {
			DbError::Sqlx(sqlx::Error::Database(e)) => {
				let code = e.code();
				let code = code.as_deref().unwrap_or_default();
				// extended result codes keep the primary code in the low byte
				let primary = code.parse::<i64>().map(|c| c & 0xff).unwrap_or(-1);
				primary == 5 || primary == 6
			}
			_ => false,
		}
	}
}

impl From<threading_common_thread::ModelError> for DbError {
	fn from(e: threading_common_thread::ModelError) -> Self {
		DbError::Internal(e.to_string())
	}
}

impl From<threading_common_id::IdError> for DbError {
	fn from(e: threading_common_id::IdError) -> Self {
		DbError::Internal(e.to_string())
	}
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn not_found_is_classified() {
		assert!(DbError::NotFound("thread t_1".into()).is_not_found());
		assert!(!DbError::Internal("x".into()).is_not_found());
		assert!(!DbError::Internal("x".into()).is_busy());
	}
}
