// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Request and response bodies of the thread server operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use threading_common_thread::{
	Attachment, BatchJob, BatchJobId, Endpoint, Query, SavedMessage, SavedMessageId, SavedQuery, SavedQueryId,
	SavedQueryType, ScheduledMessage, ScheduledMessageId, ScheduledMessageStatus, Thread, ThreadId, ThreadItem,
	ThreadItemId, ThreadItemViewDetails, ThreadOrigin, ThreadType, TriggerKey, TriggeredMessage, TriggeredMessageId,
	TriggeredMessageItem,
};
use threading_server_db::Iteration;

use crate::clients::OwnerType;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyResponse {}

/// A thread as seen by a particular viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadView {
	#[serde(flatten)]
	pub thread: Thread,
	pub unread: bool,
	pub unread_reference: bool,
}

/// The content of one message to post or store.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagePost {
	#[serde(default)]
	pub internal: bool,
	#[serde(default)]
	pub source: Option<Endpoint>,
	#[serde(default)]
	pub destinations: Vec<Endpoint>,
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub summary: String,
	#[serde(default)]
	pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateEmptyThreadRequest {
	pub organization_id: String,
	#[serde(default)]
	pub from_entity_id: String,
	#[serde(default)]
	pub primary_entity_id: String,
	#[serde(default)]
	pub member_entity_ids: Vec<String>,
	#[serde(rename = "type")]
	pub thread_type: ThreadType,
	#[serde(default)]
	pub origin: ThreadOrigin,
	#[serde(default)]
	pub summary: String,
	#[serde(default)]
	pub system_title: String,
	#[serde(default)]
	pub user_title: String,
	#[serde(default)]
	pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateEmptyThreadResponse {
	pub thread: ThreadView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateThreadRequest {
	#[serde(default)]
	pub uuid: Option<String>,
	pub organization_id: String,
	pub from_entity_id: String,
	#[serde(default)]
	pub primary_entity_id: String,
	#[serde(default)]
	pub member_entity_ids: Vec<String>,
	#[serde(rename = "type")]
	pub thread_type: ThreadType,
	#[serde(default)]
	pub origin: ThreadOrigin,
	#[serde(default)]
	pub system_title: String,
	#[serde(default)]
	pub user_title: String,
	#[serde(default)]
	pub tags: Vec<String>,
	pub message: MessagePost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateThreadResponse {
	pub thread: ThreadView,
	pub item: ThreadItem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PostMessageRequest {
	/// Retry key. Posting twice with the same key yields one item.
	#[serde(default)]
	pub uuid: Option<String>,
	pub thread_id: ThreadId,
	pub from_entity_id: String,
	pub message: MessagePost,
	#[serde(default)]
	pub dont_notify: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageResponse {
	pub item: ThreadItem,
	pub thread: ThreadView,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostMessagesRequest {
	#[serde(default)]
	pub uuid: Option<String>,
	pub thread_id: ThreadId,
	pub from_entity_id: String,
	pub messages: Vec<MessagePost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessagesResponse {
	pub items: Vec<ThreadItem>,
	pub thread: ThreadView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkThreadAsReadRequest {
	pub thread_id: ThreadId,
	pub actor_entity_id: String,
	#[serde(default)]
	pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadWatermark {
	pub thread_id: ThreadId,
	/// Newest message the client has shown. Missing means everything.
	#[serde(default)]
	pub last_message_timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarkThreadsAsReadRequest {
	pub entity_id: String,
	pub thread_watermarks: Vec<ThreadWatermark>,
	/// Also record read receipts for the items covered by the watermark.
	#[serde(default)]
	pub seen: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadRequest {
	pub thread_id: ThreadId,
	#[serde(default)]
	pub viewer_entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadResponse {
	pub thread: ThreadView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadsRequest {
	pub thread_ids: Vec<ThreadId>,
	#[serde(default)]
	pub viewer_entity_id: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadsResponse {
	pub threads: Vec<ThreadView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadsForMemberRequest {
	pub entity_id: String,
	#[serde(default)]
	pub primary_only: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadsForOrgRequest {
	pub organization_id: String,
	#[serde(default, rename = "type")]
	pub thread_type: Option<ThreadType>,
	#[serde(default)]
	pub limit: i64,
	#[serde(default)]
	pub viewer_entity_id: Option<String>,
}

/// Which threads a query runs over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QueryThreadsKind {
	Adhoc { query: Query },
	Saved { saved_query_id: SavedQueryId },
	AllForViewer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryThreadsRequest {
	#[serde(default)]
	pub organization_id: Option<String>,
	pub viewer_entity_id: String,
	pub kind: QueryThreadsKind,
	#[serde(default)]
	pub iterator: Iteration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TotalType {
	Exact,
	Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadEdge {
	pub thread: ThreadView,
	pub cursor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryThreadsResponse {
	pub edges: Vec<ThreadEdge>,
	pub has_more: bool,
	pub total: i64,
	pub total_type: TotalType,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadItemRequest {
	pub item_id: ThreadItemId,
	#[serde(default)]
	pub viewer_entity_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadItemResponse {
	pub item: ThreadItem,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadItemsRequest {
	pub thread_id: ThreadId,
	#[serde(default)]
	pub viewer_entity_id: Option<String>,
	#[serde(default)]
	pub iterator: Iteration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadItemEdge {
	pub item: ThreadItem,
	pub cursor: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadItemsResponse {
	pub edges: Vec<ThreadItemEdge>,
	pub has_more: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ThreadItemViewDetailsRequest {
	pub item_id: ThreadItemId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadItemViewDetailsResponse {
	pub details: Vec<ThreadItemViewDetails>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteThreadRequest {
	pub thread_id: ThreadId,
	pub actor_entity_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateMemberRequest {
	pub thread_id: ThreadId,
	pub entity_id: String,
	#[serde(default)]
	pub following: Option<bool>,
}

/// A saved query as returned to clients. Built-in templates carry a
/// synthetic `default-<short title>` ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQueryView {
	pub id: String,
	pub ordinal: i64,
	pub short_title: String,
	pub long_title: String,
	pub description: String,
	pub entity_id: String,
	pub query: Query,
	pub unread: i64,
	pub total: i64,
	pub hidden: bool,
	pub notifications_enabled: bool,
	#[serde(rename = "type")]
	pub sq_type: SavedQueryType,
	pub template: bool,
	pub default_template: bool,
}

impl From<SavedQuery> for SavedQueryView {
	fn from(sq: SavedQuery) -> Self {
		Self {
			id: sq.id.to_string(),
			ordinal: sq.ordinal,
			short_title: sq.short_title,
			long_title: sq.long_title,
			description: sq.description,
			entity_id: sq.entity_id,
			query: sq.query,
			unread: sq.unread,
			total: sq.total,
			hidden: sq.hidden,
			notifications_enabled: sq.notifications_enabled,
			sq_type: sq.sq_type,
			template: sq.template,
			default_template: false,
		}
	}
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedQueryRequest {
	pub saved_query_id: SavedQueryId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedQueryResponse {
	pub saved_query: SavedQueryView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedQueriesRequest {
	pub entity_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedQueriesResponse {
	pub saved_queries: Vec<SavedQueryView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSavedQueryRequest {
	pub entity_id: String,
	#[serde(default)]
	pub query: Option<Query>,
	pub short_title: String,
	#[serde(default)]
	pub long_title: String,
	#[serde(default)]
	pub description: String,
	#[serde(default)]
	pub ordinal: i64,
	#[serde(default)]
	pub hidden: bool,
	#[serde(default)]
	pub notifications_enabled: bool,
	#[serde(default, rename = "type")]
	pub sq_type: SavedQueryType,
	#[serde(default)]
	pub template: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSavedQueryRequest {
	pub saved_query_id: SavedQueryId,
	#[serde(default)]
	pub ordinal: Option<i64>,
	#[serde(default)]
	pub short_title: Option<String>,
	#[serde(default)]
	pub long_title: Option<String>,
	#[serde(default)]
	pub description: Option<String>,
	#[serde(default)]
	pub query: Option<Query>,
	#[serde(default)]
	pub hidden: Option<bool>,
	#[serde(default)]
	pub notifications_enabled: Option<bool>,
	/// Rebuild the index even when the query is unchanged.
	#[serde(default)]
	pub force_rebuild: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteSavedQueryRequest {
	pub saved_query_ids: Vec<SavedQueryId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedQueryTemplatesRequest {
	pub entity_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedMessagesRequest {
	#[serde(default)]
	pub saved_message_ids: Vec<SavedMessageId>,
	#[serde(default)]
	pub owner_entity_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SavedMessagesResponse {
	pub saved_messages: Vec<SavedMessage>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSavedMessageRequest {
	pub title: String,
	pub organization_id: String,
	pub creator_entity_id: String,
	pub owner_entity_id: String,
	pub message: MessagePost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedMessageResponse {
	pub saved_message: SavedMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateSavedMessageRequest {
	pub saved_message_id: SavedMessageId,
	#[serde(default)]
	pub title: Option<String>,
	#[serde(default)]
	pub message: Option<MessagePost>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteSavedMessageRequest {
	pub saved_message_id: SavedMessageId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloneAttachmentsRequest {
	pub owner_type: OwnerType,
	pub owner_id: String,
	pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloneAttachmentsResponse {
	pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateOnboardingThreadRequest {
	pub organization_id: String,
	/// Entity the onboarding messages are posted as.
	pub primary_entity_id: String,
	#[serde(default)]
	pub user_title: String,
}

/// Something happened that may move an onboarding thread forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnboardingEvent {
	ProvisionedPhone { phone_number: String },
	GenericSetup { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnboardingThreadEventRequest {
	#[serde(default)]
	pub thread_id: Option<ThreadId>,
	#[serde(default)]
	pub entity_id: Option<String>,
	pub event: OnboardingEvent,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateScheduledMessageRequest {
	pub thread_id: ThreadId,
	pub actor_entity_id: String,
	pub scheduled_for: DateTime<Utc>,
	pub message: MessagePost,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledMessageResponse {
	pub scheduled_message: ScheduledMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteScheduledMessageRequest {
	pub scheduled_message_id: ScheduledMessageId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledMessagesRequest {
	#[serde(default)]
	pub scheduled_message_id: Option<ScheduledMessageId>,
	#[serde(default)]
	pub thread_id: Option<ThreadId>,
	#[serde(default)]
	pub status: Vec<ScheduledMessageStatus>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduledMessagesResponse {
	pub scheduled_messages: Vec<ScheduledMessage>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggeredMessageView {
	#[serde(flatten)]
	pub triggered_message: TriggeredMessage,
	pub items: Vec<TriggeredMessageItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTriggeredMessageRequest {
	pub organization_entity_id: String,
	pub actor_entity_id: String,
	pub trigger_key: TriggerKey,
	#[serde(default)]
	pub trigger_subkey: String,
	#[serde(default)]
	pub enabled: bool,
	pub messages: Vec<MessagePost>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggeredMessageResponse {
	pub triggered_message: TriggeredMessageView,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggeredMessagesRequest {
	#[serde(default)]
	pub triggered_message_id: Option<TriggeredMessageId>,
	#[serde(default)]
	pub organization_entity_id: Option<String>,
	#[serde(default)]
	pub trigger_key: Option<TriggerKey>,
	#[serde(default)]
	pub trigger_subkey: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TriggeredMessagesResponse {
	pub triggered_messages: Vec<TriggeredMessageView>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTriggeredMessageRequest {
	pub triggered_message_id: TriggeredMessageId,
	#[serde(default)]
	pub enabled: Option<bool>,
	/// Replaces every item when present.
	#[serde(default)]
	pub messages: Option<Vec<MessagePost>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeleteTriggeredMessageRequest {
	pub triggered_message_id: TriggeredMessageId,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchPostMessagesRequest {
	pub requesting_entity: String,
	pub post_messages_requests: Vec<PostMessagesRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchJobResponse {
	pub batch_job: BatchJob,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchJobsRequest {
	pub batch_job_ids: Vec<BatchJobId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchJobsResponse {
	pub batch_jobs: Vec<BatchJob>,
}
