// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! JSON handlers, one per server operation. Each takes the operation's
//! request as the body and returns its response.

use axum::{extract::State, Json};

use super::AppState;
use crate::api::*;
use crate::error::ServerError;

macro_rules! rpc_handlers {
	($($method:ident($req:ty) -> $resp:ty;)*) => {
		$(
			pub async fn $method(
				State(state): State<AppState>,
				Json(req): Json<$req>,
			) -> Result<Json<$resp>, ServerError> {
				Ok(Json(state.server.$method(req).await?))
			}
		)*
	};
}

rpc_handlers! {
	create_empty_thread(CreateEmptyThreadRequest) -> CreateEmptyThreadResponse;
	create_thread(CreateThreadRequest) -> CreateThreadResponse;
	post_message(PostMessageRequest) -> PostMessageResponse;
	post_messages(PostMessagesRequest) -> PostMessagesResponse;
	mark_thread_as_read(MarkThreadAsReadRequest) -> EmptyResponse;
	mark_threads_as_read(MarkThreadsAsReadRequest) -> EmptyResponse;
	thread(ThreadRequest) -> ThreadResponse;
	threads(ThreadsRequest) -> ThreadsResponse;
	threads_for_member(ThreadsForMemberRequest) -> ThreadsResponse;
	threads_for_org(ThreadsForOrgRequest) -> ThreadsResponse;
	query_threads(QueryThreadsRequest) -> QueryThreadsResponse;
	thread_item(ThreadItemRequest) -> ThreadItemResponse;
	thread_items(ThreadItemsRequest) -> ThreadItemsResponse;
	thread_item_view_details(ThreadItemViewDetailsRequest) -> ThreadItemViewDetailsResponse;
	delete_thread(DeleteThreadRequest) -> EmptyResponse;
	update_member(UpdateMemberRequest) -> EmptyResponse;
	saved_query(SavedQueryRequest) -> SavedQueryResponse;
	saved_queries(SavedQueriesRequest) -> SavedQueriesResponse;
	create_saved_query(CreateSavedQueryRequest) -> SavedQueryResponse;
	update_saved_query(UpdateSavedQueryRequest) -> SavedQueryResponse;
	delete_saved_query(DeleteSavedQueryRequest) -> EmptyResponse;
	saved_query_templates(SavedQueryTemplatesRequest) -> SavedQueriesResponse;
	create_saved_message(CreateSavedMessageRequest) -> SavedMessageResponse;
	update_saved_message(UpdateSavedMessageRequest) -> SavedMessageResponse;
	delete_saved_message(DeleteSavedMessageRequest) -> EmptyResponse;
	saved_messages(SavedMessagesRequest) -> SavedMessagesResponse;
	clone_attachments(CloneAttachmentsRequest) -> CloneAttachmentsResponse;
	create_onboarding_thread(CreateOnboardingThreadRequest) -> ThreadResponse;
	onboarding_thread_event(OnboardingThreadEventRequest) -> ThreadResponse;
	create_scheduled_message(CreateScheduledMessageRequest) -> ScheduledMessageResponse;
	delete_scheduled_message(DeleteScheduledMessageRequest) -> EmptyResponse;
	scheduled_messages(ScheduledMessagesRequest) -> ScheduledMessagesResponse;
	create_triggered_message(CreateTriggeredMessageRequest) -> TriggeredMessageResponse;
	triggered_messages(TriggeredMessagesRequest) -> TriggeredMessagesResponse;
	update_triggered_message(UpdateTriggeredMessageRequest) -> TriggeredMessageResponse;
	delete_triggered_message(DeleteTriggeredMessageRequest) -> EmptyResponse;
	batch_jobs(BatchJobsRequest) -> BatchJobsResponse;
	batch_post_messages(BatchPostMessagesRequest) -> BatchJobResponse;
}
