// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Typed events carried inside envelopes. Bodies are JSON.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use threading_common_id::{ThreadId, ThreadItemId};

use crate::envelope::Service;
use crate::sns::resource_name;

/// An event type that can be published and subscribed to.
pub trait Event: Serialize + DeserializeOwned + Send + Sync + 'static {
	const SERVICE: Service;
	const NAME: &'static str;

	/// Routing key for this event in the given environment.
	fn resource_name(env: &str) -> String {
		resource_name(env, Self::SERVICE.as_str(), Self::NAME)
	}
}

/// Emitted after an item is committed to a thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedThreadItem {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub uuid: Option<String>,
	pub organization_id: String,
	pub thread_id: ThreadId,
	pub item_id: ThreadItemId,
	pub actor_entity_id: String,
	#[serde(default)]
	pub primary_entity_id: String,
	#[serde(default)]
	pub internal: bool,
}

impl Event for PublishedThreadItem {
	const SERVICE: Service = Service::Threading;
	const NAME: &'static str = "PublishedThreadItem";
}

/// Emitted once when a thread is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewThreadEvent {
	pub thread_id: ThreadId,
}

impl Event for NewThreadEvent {
	const SERVICE: Service = Service::Threading;
	const NAME: &'static str = "NewThreadEvent";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EndpointType {
	Phone,
	Email,
}

/// Events from the external communications service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExcommsEvent {
	ProvisionedEndpoint {
		for_entity_id: String,
		endpoint_type: EndpointType,
		endpoint: String,
	},
}

impl Event for ExcommsEvent {
	const SERVICE: Service = Service::Excomms;
	const NAME: &'static str = "Event";
}

/// Events from the invite service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteEvent {
	InvitedColleagues {
		organization_entity_id: String,
		inviter_entity_id: String,
	},
}

impl Event for InviteEvent {
	const SERVICE: Service = Service::Invite;
	const NAME: &'static str = "Event";
}
