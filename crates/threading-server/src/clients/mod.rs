// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Services the thread server depends on but does not own.
//!
//! Each collaborator is a trait so the server can run against remote
//! services in production and against the in-memory fakes in [`memory`]
//! in tests and standalone mode.

pub mod memory;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use threading_common_thread::{ThreadId, ThreadItemId};

#[derive(Debug, Clone, thiserror::Error)]
pub enum ClientError {
	#[error("not found: {0}")]
	NotFound(String),

	#[error("invalid argument: {0}")]
	InvalidArgument(String),

	#[error("service unavailable: {0}")]
	Unavailable(String),

	#[error("internal error: {0}")]
	Internal(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityType {
	Internal,
	Patient,
	External,
	Organization,
	System,
}

impl EntityType {
	pub fn as_str(&self) -> &'static str {
		match self {
			EntityType::Internal => "INTERNAL",
			EntityType::Patient => "PATIENT",
			EntityType::External => "EXTERNAL",
			EntityType::Organization => "ORGANIZATION",
			EntityType::System => "SYSTEM",
		}
	}

	/// Entities that see threads from the patient side.
	pub fn is_external(&self) -> bool {
		matches!(self, EntityType::Patient | EntityType::External)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityStatus {
	#[default]
	Active,
	Deleted,
}

/// How a patient entity came to exist, for example an invite or an
/// organization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySource {
	pub source_type: String,
	pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
	pub id: String,
	pub entity_type: EntityType,
	#[serde(default)]
	pub status: EntityStatus,
	#[serde(default)]
	pub display_name: String,
	#[serde(default)]
	pub source: Option<EntitySource>,
	/// Organizations this entity belongs to.
	#[serde(default)]
	pub memberships: Vec<String>,
	/// For organizations, the entities that belong to it.
	#[serde(default)]
	pub members: Vec<String>,
}

impl Entity {
	pub fn new(id: impl Into<String>, entity_type: EntityType) -> Self {
		Self {
			id: id.into(),
			entity_type,
			status: EntityStatus::Active,
			display_name: String::new(),
			source: None,
			memberships: Vec::new(),
			members: Vec::new(),
		}
	}
}

/// The entity graph: people, patients and organizations.
#[async_trait]
pub trait Directory: Send + Sync {
	/// Looks up entities by ID. Unknown IDs are skipped.
	async fn lookup_entities(&self, ids: &[String]) -> ClientResult<Vec<Entity>>;

	async fn delete_entity(&self, id: &str) -> ClientResult<()>;

	async fn entity(&self, id: &str) -> ClientResult<Entity> {
		self.lookup_entities(&[id.to_string()])
			.await?
			.into_iter()
			.next()
			.ok_or_else(|| ClientError::NotFound(format!("entity {id}")))
	}
}

/// Kind of record that owns a claimed piece of media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OwnerType {
	Thread,
	SavedMessage,
	TriggeredMessage,
}

impl OwnerType {
	pub fn as_str(&self) -> &'static str {
		match self {
			OwnerType::Thread => "THREAD",
			OwnerType::SavedMessage => "SAVED_MESSAGE",
			OwnerType::TriggeredMessage => "TRIGGERED_MESSAGE",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaInfo {
	pub id: String,
	pub url: String,
	pub mimetype: String,
	pub name: String,
}

#[async_trait]
pub trait Media: Send + Sync {
	async fn claim_media(&self, media_ids: &[String], owner_type: OwnerType, owner_id: &str) -> ClientResult<()>;

	/// Copies a media object under a new owner and returns the copy.
	async fn clone_media(&self, owner_type: OwnerType, owner_id: &str, media_id: &str) -> ClientResult<MediaInfo>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
	pub id: String,
	pub requesting_entity_id: String,
	pub amount: u64,
	pub currency: String,
}

#[async_trait]
pub trait Payments: Send + Sync {
	async fn payment(&self, id: &str) -> ClientResult<Payment>;

	async fn create_payment(&self, requesting_entity_id: &str, amount: u64, currency: &str) -> ClientResult<Payment>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CarePlan {
	pub id: String,
	pub name: String,
	pub creator_id: String,
	pub instructions: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Visit {
	pub id: String,
	pub name: String,
	pub layout_version_id: String,
}

#[async_trait]
pub trait Care: Send + Sync {
	async fn care_plan(&self, id: &str) -> ClientResult<CarePlan>;

	/// Stores a copy of the plan under a fresh ID.
	async fn create_care_plan(&self, plan: &CarePlan) -> ClientResult<CarePlan>;

	async fn visit(&self, id: &str) -> ClientResult<Visit>;

	/// Starts a new visit from a layout version.
	async fn create_visit(&self, layout_version_id: &str, name: &str) -> ClientResult<Visit>;
}

/// Per-entity or per-organization configuration values.
#[async_trait]
pub trait Settings: Send + Sync {
	async fn bool_value(&self, node_id: &str, key: &str) -> ClientResult<Option<bool>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
	NewMessage,
	BadgeUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
	pub kind: NotificationKind,
	pub organization_id: String,
	pub thread_id: Option<ThreadId>,
	pub item_id: Option<ThreadItemId>,
	pub entities_to_notify: Vec<String>,
	/// Visible text per entity. A missing or empty entry is a silent push.
	pub short_messages: HashMap<String, String>,
	pub unread_counts: HashMap<String, i64>,
	pub dedupe_key: String,
	pub collapse_key: String,
}

#[async_trait]
pub trait Notifications: Send + Sync {
	async fn send(&self, notification: &Notification) -> ClientResult<()>;
}

/// Every collaborator the server talks to.
#[derive(Clone)]
pub struct Clients {
	pub directory: Arc<dyn Directory>,
	pub media: Arc<dyn Media>,
	pub payments: Arc<dyn Payments>,
	pub care: Arc<dyn Care>,
	pub settings: Arc<dyn Settings>,
	pub notifications: Arc<dyn Notifications>,
}
