// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threading_common_id::{BatchJobId, BatchTaskId};

macro_rules! string_enum {
	($name:ident { $($variant:ident => $s:literal),+ $(,)? }) => {
		impl $name {
			pub fn as_str(&self) -> &'static str {
				match self {
					$($name::$variant => $s,)+
				}
			}
		}

		impl std::str::FromStr for $name {
			type Err = String;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				match s {
					$($s => Ok($name::$variant),)+
					_ => Err(format!(concat!("unknown ", stringify!($name), " '{}'"), s)),
				}
			}
		}
	};
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobStatus {
	#[default]
	Pending,
	Complete,
}
string_enum!(BatchJobStatus { Pending => "PENDING", Complete => "COMPLETE" });

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchTaskStatus {
	#[default]
	Pending,
	Complete,
	Error,
}
string_enum!(BatchTaskStatus { Pending => "PENDING", Complete => "COMPLETE", Error => "ERROR" });

impl BatchTaskStatus {
	pub fn is_terminal(&self) -> bool {
		!matches!(self, BatchTaskStatus::Pending)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchJobType {
	BatchPostMessages,
}
string_enum!(BatchJobType { BatchPostMessages => "BATCH_POST_MESSAGES" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchTaskType {
	PostMessages,
}
string_enum!(BatchTaskType { PostMessages => "POST_MESSAGES" });

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
	pub id: BatchJobId,
	pub job_type: BatchJobType,
	pub status: BatchJobStatus,
	pub tasks_requested: i64,
	pub tasks_completed: i64,
	pub tasks_errored: i64,
	pub requesting_entity: String,
	pub completed: Option<DateTime<Utc>>,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
}

impl BatchJob {
	/// Every task has reached a terminal state.
	pub fn all_tasks_terminal(&self) -> bool {
		self.tasks_completed + self.tasks_errored >= self.tasks_requested
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchTask {
	pub id: BatchTaskId,
	pub batch_job_id: BatchJobId,
	pub task_type: BatchTaskType,
	pub status: BatchTaskStatus,
	/// Serialized request the task executes.
	pub data: Vec<u8>,
	pub error: Option<String>,
	/// Lease expiry. A pending task is only eligible once this has passed.
	pub available_after: DateTime<Utc>,
	pub completed: Option<DateTime<Utc>>,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
}
