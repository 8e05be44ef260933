// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HTTP surface: `POST /rpc/<Method>` for every server operation plus
//! `GET /health`.

pub mod health;
pub mod rpc;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use threading_server_jobs::JobScheduler;
use tower_http::trace::TraceLayer;

use crate::server::ThreadServer;

#[derive(Clone)]
pub struct AppState {
	pub server: Arc<ThreadServer>,
	pub job_scheduler: Option<Arc<JobScheduler>>,
}

pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/health", get(health::health_check))
		.route("/rpc/CreateEmptyThread", post(rpc::create_empty_thread))
		.route("/rpc/CreateThread", post(rpc::create_thread))
		.route("/rpc/PostMessage", post(rpc::post_message))
		.route("/rpc/PostMessages", post(rpc::post_messages))
		.route("/rpc/MarkThreadAsRead", post(rpc::mark_thread_as_read))
		.route("/rpc/MarkThreadsAsRead", post(rpc::mark_threads_as_read))
		.route("/rpc/Thread", post(rpc::thread))
		.route("/rpc/Threads", post(rpc::threads))
		.route("/rpc/ThreadsForMember", post(rpc::threads_for_member))
		.route("/rpc/ThreadsForOrg", post(rpc::threads_for_org))
		.route("/rpc/QueryThreads", post(rpc::query_threads))
		.route("/rpc/ThreadItem", post(rpc::thread_item))
		.route("/rpc/ThreadItems", post(rpc::thread_items))
		.route("/rpc/ThreadItemViewDetails", post(rpc::thread_item_view_details))
		.route("/rpc/DeleteThread", post(rpc::delete_thread))
		.route("/rpc/UpdateMember", post(rpc::update_member))
		.route("/rpc/SavedQuery", post(rpc::saved_query))
		.route("/rpc/SavedQueries", post(rpc::saved_queries))
		.route("/rpc/CreateSavedQuery", post(rpc::create_saved_query))
		.route("/rpc/UpdateSavedQuery", post(rpc::update_saved_query))
		.route("/rpc/DeleteSavedQuery", post(rpc::delete_saved_query))
		.route("/rpc/SavedQueryTemplates", post(rpc::saved_query_templates))
		.route("/rpc/CreateSavedMessage", post(rpc::create_saved_message))
		.route("/rpc/UpdateSavedMessage", post(rpc::update_saved_message))
		.route("/rpc/DeleteSavedMessage", post(rpc::delete_saved_message))
		.route("/rpc/SavedMessages", post(rpc::saved_messages))
		.route("/rpc/CloneAttachments", post(rpc::clone_attachments))
		.route("/rpc/CreateOnboardingThread", post(rpc::create_onboarding_thread))
		.route("/rpc/OnboardingThreadEvent", post(rpc::onboarding_thread_event))
		.route("/rpc/CreateScheduledMessage", post(rpc::create_scheduled_message))
		.route("/rpc/DeleteScheduledMessage", post(rpc::delete_scheduled_message))
		.route("/rpc/ScheduledMessages", post(rpc::scheduled_messages))
		.route("/rpc/CreateTriggeredMessage", post(rpc::create_triggered_message))
		.route("/rpc/TriggeredMessages", post(rpc::triggered_messages))
		.route("/rpc/UpdateTriggeredMessage", post(rpc::update_triggered_message))
		.route("/rpc/DeleteTriggeredMessage", post(rpc::delete_triggered_message))
		.route("/rpc/BatchJobs", post(rpc::batch_jobs))
		.route("/rpc/BatchPostMessages", post(rpc::batch_post_messages))
		.layer(TraceLayer::new_for_http())
		.with_state(state)
}
