// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threading_common_id::{SavedMessageId, ThreadId, ThreadItemId};

use crate::error::ModelError;

/// Prefix marking a tag as hidden from thread listings.
pub const HIDDEN_TAG_PREFIX: &str = "$";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadType {
	#[default]
	#[serde(rename = "")]
	Unknown,
	External,
	Team,
	Setup,
	Support,
	LegacyTeam,
	SecureExternal,
}

impl ThreadType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ThreadType::Unknown => "",
			ThreadType::External => "EXTERNAL",
			ThreadType::Team => "TEAM",
			ThreadType::Setup => "SETUP",
			ThreadType::Support => "SUPPORT",
			ThreadType::LegacyTeam => "LEGACY_TEAM",
			ThreadType::SecureExternal => "SECURE_EXTERNAL",
		}
	}

	/// Threads whose counter-party is a patient.
	pub fn is_patient(&self) -> bool {
		matches!(self, ThreadType::External | ThreadType::SecureExternal)
	}

	pub fn is_team(&self) -> bool {
		matches!(self, ThreadType::Team | ThreadType::LegacyTeam)
	}

	/// Thread types whose membership always includes the organization.
	pub fn requires_org_membership(&self) -> bool {
		matches!(
			self,
			ThreadType::External | ThreadType::SecureExternal | ThreadType::Support | ThreadType::Setup
		)
	}
}

impl std::str::FromStr for ThreadType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"" => Ok(ThreadType::Unknown),
			"EXTERNAL" => Ok(ThreadType::External),
			"TEAM" => Ok(ThreadType::Team),
			"SETUP" => Ok(ThreadType::Setup),
			"SUPPORT" => Ok(ThreadType::Support),
			"LEGACY_TEAM" => Ok(ThreadType::LegacyTeam),
			"SECURE_EXTERNAL" => Ok(ThreadType::SecureExternal),
			_ => Err(format!("unknown thread type '{s}'")),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadOrigin {
	#[default]
	#[serde(rename = "")]
	Unknown,
	PatientInvite,
	OrganizationCode,
	Sync,
}

impl ThreadOrigin {
	pub fn as_str(&self) -> &'static str {
		match self {
			ThreadOrigin::Unknown => "",
			ThreadOrigin::PatientInvite => "PATIENT_INVITE",
			ThreadOrigin::OrganizationCode => "ORGANIZATION_CODE",
			ThreadOrigin::Sync => "SYNC",
		}
	}
}

impl std::str::FromStr for ThreadOrigin {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"" => Ok(ThreadOrigin::Unknown),
			"PATIENT_INVITE" => Ok(ThreadOrigin::PatientInvite),
			"ORGANIZATION_CODE" => Ok(ThreadOrigin::OrganizationCode),
			"SYNC" => Ok(ThreadOrigin::Sync),
			_ => Err(format!("unknown thread origin '{s}'")),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointChannel {
	App,
	Sms,
	Voice,
	Email,
}

impl EndpointChannel {
	pub fn as_str(&self) -> &'static str {
		match self {
			EndpointChannel::App => "APP",
			EndpointChannel::Sms => "SMS",
			EndpointChannel::Voice => "VOICE",
			EndpointChannel::Email => "EMAIL",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Endpoint {
	pub channel: EndpointChannel,
	pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
	pub name: String,
	#[serde(default)]
	pub hidden: bool,
}

impl Tag {
	pub fn new(name: impl Into<String>) -> Self {
		let name = name.into();
		let hidden = name.starts_with(HIDDEN_TAG_PREFIX);
		Self { name, hidden }
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Thread {
	pub id: ThreadId,
	pub organization_id: String,
	pub primary_entity_id: String,
	pub last_message_timestamp: DateTime<Utc>,
	pub last_external_message_timestamp: DateTime<Utc>,
	pub last_message_summary: String,
	pub last_external_message_summary: String,
	pub last_primary_entity_endpoints: Vec<Endpoint>,
	pub created: DateTime<Utc>,
	pub message_count: i64,
	pub system_title: String,
	pub user_title: String,
	#[serde(rename = "type")]
	pub thread_type: ThreadType,
	pub origin: ThreadOrigin,
	pub deleted: bool,
	pub tags: Vec<Tag>,
}

impl Thread {
	/// A thread shell with the given organization and type. Timestamps are
	/// filled in by the storage layer on create.
	pub fn new(organization_id: impl Into<String>, thread_type: ThreadType) -> Self {
		let epoch = DateTime::<Utc>::default();
		Self {
			id: ThreadId::empty(),
			organization_id: organization_id.into(),
			primary_entity_id: String::new(),
			last_message_timestamp: epoch,
			last_external_message_timestamp: epoch,
			last_message_summary: String::new(),
			last_external_message_summary: String::new(),
			last_primary_entity_endpoints: Vec::new(),
			created: epoch,
			message_count: 0,
			system_title: String::new(),
			user_title: String::new(),
			thread_type,
			origin: ThreadOrigin::Unknown,
			deleted: false,
			tags: Vec::new(),
		}
	}

	/// Last message time as seen by an internal or external viewer.
	pub fn last_timestamp(&self, external: bool) -> DateTime<Utc> {
		if external {
			self.last_external_message_timestamp
		} else {
			self.last_message_timestamp
		}
	}

	pub fn last_summary(&self, external: bool) -> &str {
		if external {
			&self.last_external_message_summary
		} else {
			&self.last_message_summary
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadEntity {
	pub thread_id: ThreadId,
	pub entity_id: String,
	pub member: bool,
	pub following: bool,
	pub joined: DateTime<Utc>,
	pub last_viewed: Option<DateTime<Utc>>,
	pub last_unread_notify: Option<DateTime<Utc>>,
	pub last_referenced: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemType {
	Message,
	MessageUpdate,
	MessageDelete,
}

impl ItemType {
	pub fn as_str(&self) -> &'static str {
		match self {
			ItemType::Message => "MESSAGE",
			ItemType::MessageUpdate => "MESSAGE_UPDATE",
			ItemType::MessageDelete => "MESSAGE_DELETE",
		}
	}
}

impl std::str::FromStr for ItemType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s {
			"MESSAGE" => Ok(ItemType::Message),
			"MESSAGE_UPDATE" => Ok(ItemType::MessageUpdate),
			"MESSAGE_DELETE" => Ok(ItemType::MessageDelete),
			_ => Err(format!("unknown item type '{s}'")),
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
	#[default]
	Normal,
	Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReferenceType {
	Entity,
}

impl ReferenceType {
	pub fn markup_name(&self) -> &'static str {
		match self {
			ReferenceType::Entity => "entity",
		}
	}

	pub fn from_markup(s: &str) -> Option<Self> {
		if s.eq_ignore_ascii_case("entity") {
			Some(ReferenceType::Entity)
		} else {
			None
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
	#[serde(rename = "type")]
	pub ref_type: ReferenceType,
	pub id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentType {
	Image,
	Video,
	Audio,
	Document,
	Visit,
	PaymentRequest,
	CarePlan,
}

/// Type-specific payload of an attachment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AttachmentData {
	Image {
		media_id: String,
		#[serde(default)]
		mimetype: String,
	},
	Video {
		media_id: String,
		#[serde(default)]
		mimetype: String,
	},
	Audio {
		media_id: String,
		#[serde(default)]
		mimetype: String,
	},
	Document {
		media_id: String,
		#[serde(default)]
		mimetype: String,
		#[serde(default)]
		name: String,
	},
	Visit {
		visit_id: String,
		#[serde(default)]
		visit_name: String,
	},
	PaymentRequest {
		payment_id: String,
	},
	CarePlan {
		care_plan_id: String,
		#[serde(default)]
		care_plan_name: String,
	},
}

impl AttachmentData {
	pub fn attachment_type(&self) -> AttachmentType {
		match self {
			AttachmentData::Image { .. } => AttachmentType::Image,
			AttachmentData::Video { .. } => AttachmentType::Video,
			AttachmentData::Audio { .. } => AttachmentType::Audio,
			AttachmentData::Document { .. } => AttachmentType::Document,
			AttachmentData::Visit { .. } => AttachmentType::Visit,
			AttachmentData::PaymentRequest { .. } => AttachmentType::PaymentRequest,
			AttachmentData::CarePlan { .. } => AttachmentType::CarePlan,
		}
	}

	/// Media stored in the media service, if this attachment references any.
	pub fn media_id(&self) -> Option<&str> {
		match self {
			AttachmentData::Image { media_id, .. }
			| AttachmentData::Video { media_id, .. }
			| AttachmentData::Audio { media_id, .. }
			| AttachmentData::Document { media_id, .. } => Some(media_id),
			_ => None,
		}
	}

	pub fn set_media_id(&mut self, id: String) {
		match self {
			AttachmentData::Image { media_id, .. }
			| AttachmentData::Video { media_id, .. }
			| AttachmentData::Audio { media_id, .. }
			| AttachmentData::Document { media_id, .. } => *media_id = id,
			_ => {}
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub url: String,
	#[serde(default)]
	pub user_title: String,
	#[serde(default)]
	pub content_id: String,
	pub data: AttachmentData,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub summary: String,
	#[serde(default)]
	pub status: MessageStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub source: Option<Endpoint>,
	#[serde(default)]
	pub destinations: Vec<Endpoint>,
	#[serde(default)]
	pub attachments: Vec<Attachment>,
	#[serde(default)]
	pub text_refs: Vec<Reference>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub edited: Option<DateTime<Utc>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub editor_entity_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageUpdate {
	pub thread_item_id: ThreadItemId,
	pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDelete {
	pub thread_item_id: ThreadItemId,
}

/// Body of a thread item, stored as an item-type tag plus a JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemBody {
	Message(Message),
	MessageUpdate(MessageUpdate),
	MessageDelete(MessageDelete),
}

impl ItemBody {
	pub fn item_type(&self) -> ItemType {
		match self {
			ItemBody::Message(_) => ItemType::Message,
			ItemBody::MessageUpdate(_) => ItemType::MessageUpdate,
			ItemBody::MessageDelete(_) => ItemType::MessageDelete,
		}
	}

	pub fn as_message(&self) -> Option<&Message> {
		match self {
			ItemBody::Message(m) => Some(m),
			_ => None,
		}
	}

	/// Serializes only the payload; the type is stored alongside it.
	pub fn encode_data(&self) -> Result<Vec<u8>, ModelError> {
		Ok(match self {
			ItemBody::Message(m) => serde_json::to_vec(m)?,
			ItemBody::MessageUpdate(m) => serde_json::to_vec(m)?,
			ItemBody::MessageDelete(m) => serde_json::to_vec(m)?,
		})
	}

	pub fn decode(item_type: &str, data: &[u8]) -> Result<Self, ModelError> {
		let item_type: ItemType = item_type
			.parse()
			.map_err(|_| ModelError::UnknownItemType(item_type.to_string()))?;
		Ok(match item_type {
			ItemType::Message => ItemBody::Message(serde_json::from_slice(data)?),
			ItemType::MessageUpdate => ItemBody::MessageUpdate(serde_json::from_slice(data)?),
			ItemType::MessageDelete => ItemBody::MessageDelete(serde_json::from_slice(data)?),
		})
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadItem {
	pub id: ThreadItemId,
	pub thread_id: ThreadId,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
	pub actor_entity_id: String,
	pub internal: bool,
	pub deleted: bool,
	pub body: ItemBody,
}

impl ThreadItem {
	pub fn message(&self) -> Option<&Message> {
		self.body.as_message()
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadItemViewDetails {
	pub thread_item_id: ThreadItemId,
	pub actor_entity_id: String,
	pub view_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThreadEvent {
	Delete,
}

impl ThreadEvent {
	pub fn as_str(&self) -> &'static str {
		match self {
			ThreadEvent::Delete => "DELETE",
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedMessage {
	pub id: SavedMessageId,
	pub title: String,
	pub organization_id: String,
	pub creator_entity_id: String,
	pub owner_entity_id: String,
	pub internal: bool,
	pub content: ItemBody,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
}

/// Progress through an onboarding thread. Step 0 is the initial state and
/// the step never decreases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetupThreadState {
	pub thread_id: ThreadId,
	pub entity_id: String,
	pub step: i64,
}
