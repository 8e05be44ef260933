// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The thread server: every read and write operation on threads, saved
//! queries, saved / scheduled / triggered messages, batch jobs and
//! onboarding threads.
//!
//! Writes commit through the [`Dal`] first. Index maintenance, event
//! publishing and notifications run after the commit; their failures are
//! logged and never fail the operation.

mod attachments;
mod batch;
mod messages;
mod onboarding;
mod saved_messages;
mod saved_queries;
mod scheduled;
mod threads;
mod triggered;

pub use batch::TaskOutcome;
pub use onboarding::{SetupStep, SETUP_STEP_DONE};

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use threading_common_thread::{has_unread_reference, is_unread, Thread, ThreadEntity, ThreadId};
use threading_server_db::Dal;
use threading_server_events::{Event, EventPublisher};

use crate::api::ThreadView;
use crate::clients::Clients;
use crate::error::{Result, ServerError};
use crate::indexer::SavedQueryIndexer;

pub struct ThreadServer {
	pub(crate) dal: Dal,
	pub(crate) clients: Clients,
	publisher: Option<EventPublisher>,
	web_domain: String,
	pub(crate) indexer: SavedQueryIndexer,
}

impl ThreadServer {
	pub fn new(dal: Dal, clients: Clients, publisher: Option<EventPublisher>, web_domain: impl Into<String>) -> Self {
		let indexer = SavedQueryIndexer::new(dal.clone(), clients.directory.clone());
		Self {
			dal,
			clients,
			publisher,
			web_domain: web_domain.into(),
			indexer,
		}
	}

	pub fn dal(&self) -> &Dal {
		&self.dal
	}

	pub fn clients(&self) -> &Clients {
		&self.clients
	}

	pub fn indexer(&self) -> &SavedQueryIndexer {
		&self.indexer
	}

	pub fn web_domain(&self) -> &str {
		&self.web_domain
	}

	pub(crate) fn now(&self) -> DateTime<Utc> {
		self.dal.clock().now()
	}

	/// Publishes an event if a publisher is configured. Failures are logged.
	pub(crate) async fn publish<E: Event>(&self, event: &E) {
		let Some(publisher) = &self.publisher else {
			return;
		};
		if let Err(e) = publisher.publish(event).await {
			tracing::error!(error = %e, event = E::NAME, "failed to publish event");
		}
	}

	/// Re-indexes a thread after a committed change. Failures are logged.
	pub(crate) async fn reindex_thread(&self, thread_id: ThreadId) -> crate::indexer::IndexUpdate {
		let thread = match self.dal.threads_by_ids(&[thread_id], true).await {
			Ok(mut threads) => match threads.pop() {
				Some(t) => t,
				None => return Default::default(),
			},
			Err(e) => {
				tracing::error!(error = %e, thread_id = %thread_id, "failed to load thread for indexing");
				return Default::default();
			}
		};
		match self.indexer.update_thread(&thread).await {
			Ok(update) => update,
			Err(e) => {
				tracing::error!(error = %e, thread_id = %thread_id, "failed to update saved query index");
				Default::default()
			}
		}
	}

	/// True when the viewer sees threads from the patient side. An unknown
	/// viewer is `NotFound`.
	pub(crate) async fn is_external_viewer(&self, entity_id: &str) -> Result<bool> {
		let entity = self.clients.directory.entity(entity_id).await?;
		Ok(entity.entity_type.is_external())
	}

	/// Threads as seen by `viewer`. Team threads the viewer is not a member
	/// of are left out.
	pub(crate) async fn views_for_viewer(&self, threads: Vec<Thread>, viewer: Option<&str>) -> Result<Vec<ThreadView>> {
		let Some(viewer) = viewer.filter(|v| !v.is_empty()) else {
			return Ok(threads.into_iter().map(|t| thread_view(t, None, false)).collect());
		};
		let external = self.is_external_viewer(viewer).await?;
		let ids: Vec<ThreadId> = threads.iter().map(|t| t.id).collect();
		let mut entities: HashMap<ThreadId, ThreadEntity> = self.dal.thread_entities_for_threads(&ids, viewer).await?;
		Ok(threads
			.into_iter()
			.filter_map(|thread| {
				let te = entities.remove(&thread.id);
				if thread.thread_type.is_team() && !te.as_ref().is_some_and(|te| te.member) {
					return None;
				}
				Some(thread_view(thread, te.as_ref(), external))
			})
			.collect())
	}

	/// A single thread for an optional viewer.
	pub(crate) async fn view_for_viewer(&self, thread: Thread, viewer: Option<&str>) -> Result<ThreadView> {
		let id = thread.id;
		self.views_for_viewer(vec![thread], viewer)
			.await?
			.pop()
			.ok_or_else(|| ServerError::not_found(format!("thread {id}")))
	}
}

/// Shapes a thread for a viewer: external viewers see the patient-facing
/// timestamp and summary.
pub(crate) fn thread_view(mut thread: Thread, te: Option<&ThreadEntity>, external: bool) -> ThreadView {
	let unread = is_unread(&thread, te, external);
	let unread_reference = has_unread_reference(te);
	if external {
		thread.last_message_timestamp = thread.last_external_message_timestamp;
		thread.last_message_summary = thread.last_external_message_summary.clone();
	}
	ThreadView {
		thread,
		unread,
		unread_reference,
	}
}

pub(crate) fn required(value: &str, name: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(ServerError::invalid(format!("{name} is required")));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::ThreadType;

	#[test]
	fn external_view_swaps_in_patient_fields() {
		let mut thread = Thread::new("o1", ThreadType::SecureExternal);
		thread.last_message_summary = "internal note".into();
		thread.last_external_message_summary = "hello".into();
		thread.message_count = 1;

		let view = thread_view(thread.clone(), None, true);
		assert_eq!(view.thread.last_message_summary, "hello");
		assert!(view.unread);

		let view = thread_view(thread, None, false);
		assert_eq!(view.thread.last_message_summary, "internal note");
	}

	#[test]
	fn empty_thread_is_never_unread() {
		let thread = Thread::new("o1", ThreadType::Team);
		assert!(!thread_view(thread, None, false).unread);
	}

	#[test]
	fn required_rejects_blank() {
		assert!(required("  ", "thread id").is_err());
		assert!(required("t", "thread id").is_ok());
	}
}
