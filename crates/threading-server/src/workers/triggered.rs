// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Posts welcome messages into new patient threads and away messages after
//! an actor's first message in a thread.

use std::sync::Arc;

use async_trait::async_trait;
use threading_common_thread::{away_message_subkey, new_patient_subkey, TriggerKey};
use threading_server_events::{EventHandler, NewThreadEvent, PublishedThreadItem, Result};

use super::handler_error;
use crate::clients::ClientError;
use crate::server::ThreadServer;

pub struct TriggeredMessageWorker {
	server: Arc<ThreadServer>,
}

impl TriggeredMessageWorker {
	pub fn new(server: Arc<ThreadServer>) -> Self {
		Self { server }
	}

	async fn welcome(&self, event: &NewThreadEvent) -> crate::Result<()> {
		let thread = match self.server.dal().thread(event.thread_id, &[]).await {
			Ok(thread) => thread,
			Err(e) if e.is_not_found() => {
				tracing::debug!("thread gone before welcome");
				return Ok(());
			}
			Err(e) => return Err(e.into()),
		};
		if !thread.thread_type.is_patient() || thread.primary_entity_id.is_empty() {
			return Ok(());
		}
		let patient = match self.server.clients().directory.entity(&thread.primary_entity_id).await {
			Ok(entity) => entity,
			Err(ClientError::NotFound(_)) => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		let Some(source) = patient.source else {
			tracing::debug!(entity_id = %patient.id, "patient has no source, no welcome message");
			return Ok(());
		};
		let subkey = new_patient_subkey(&source.source_type, &source.data);
		self.server
			.post_triggered_message(&thread, TriggerKey::NewPatient, &subkey)
			.await?;
		Ok(())
	}

	async fn away(&self, event: &PublishedThreadItem) -> crate::Result<()> {
		if event.internal {
			return Ok(());
		}
		let dal = self.server.dal();
		let item = dal.thread_item(event.item_id, &[]).await?;
		let Some(channel) = item.message().and_then(|m| m.source.as_ref()).map(|s| s.channel) else {
			return Ok(());
		};
		if dal
			.has_message_from_before(event.thread_id, &event.actor_entity_id, event.item_id)
			.await?
		{
			return Ok(());
		}
		let thread = dal.thread(event.thread_id, &[]).await?;
		let actor = match self.server.clients().directory.entity(&event.actor_entity_id).await {
			Ok(entity) => entity,
			Err(ClientError::NotFound(_)) => return Ok(()),
			Err(e) => return Err(e.into()),
		};
		let subkey = away_message_subkey(actor.entity_type.as_str(), thread.thread_type, channel);
		self.server
			.post_triggered_message(&thread, TriggerKey::AwayMessage, &subkey)
			.await?;
		Ok(())
	}
}

#[async_trait]
impl EventHandler<NewThreadEvent> for TriggeredMessageWorker {
	#[tracing::instrument(skip(self, event), fields(thread_id = %event.thread_id))]
	async fn handle(&self, event: NewThreadEvent) -> Result<()> {
		self.welcome(&event).await.map_err(handler_error)
	}
}

#[async_trait]
impl EventHandler<PublishedThreadItem> for TriggeredMessageWorker {
	#[tracing::instrument(skip(self, event), fields(thread_id = %event.thread_id, item_id = %event.item_id))]
	async fn handle(&self, event: PublishedThreadItem) -> Result<()> {
		self.away(&event).await.map_err(handler_error)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::{ThreadId, ThreadItem};

	use crate::api::{CreateTriggeredMessageRequest, MessagePost, PostMessagesRequest};
	use crate::clients::{Entity, EntitySource, EntityType};
	use crate::testing::{app_source, TestEnv};

	async fn trigger(env: &TestEnv, key: TriggerKey, subkey: &str, text: &str) {
		env.server
			.create_triggered_message(CreateTriggeredMessageRequest {
				organization_entity_id: "o1".to_string(),
				actor_entity_id: "a1".to_string(),
				trigger_key: key,
				trigger_subkey: subkey.to_string(),
				enabled: true,
				messages: vec![MessagePost {
					text: text.to_string(),
					source: app_source("a1"),
					..Default::default()
				}],
			})
			.await
			.unwrap();
	}

	async fn post_from(env: &TestEnv, thread_id: ThreadId, from: &str, text: &str) -> ThreadItem {
		env.server
			.post_messages(PostMessagesRequest {
				uuid: None,
				thread_id,
				from_entity_id: from.to_string(),
				messages: vec![MessagePost {
					text: text.to_string(),
					source: app_source(from),
					..Default::default()
				}],
			})
			.await
			.unwrap()
			.items
			.remove(0)
	}

	fn published(item: &ThreadItem) -> PublishedThreadItem {
		PublishedThreadItem {
			uuid: None,
			organization_id: "o1".to_string(),
			thread_id: item.thread_id,
			item_id: item.id,
			actor_entity_id: item.actor_entity_id.clone(),
			primary_entity_id: "p1".to_string(),
			internal: item.internal,
		}
	}

	async fn message_count(env: &TestEnv, thread_id: ThreadId) -> i64 {
		env.server.dal().thread(thread_id, &[]).await.unwrap().message_count
	}

	#[tokio::test]
	async fn new_patient_thread_gets_welcome_once() {
		let env = TestEnv::new().await;
		let mut patient = Entity::new("p1", EntityType::Patient);
		patient.source = Some(EntitySource {
			source_type: "PRACTICE_CODE".to_string(),
			data: "123".to_string(),
		});
		env.clients.directory.insert(patient).await;
		trigger(&env, TriggerKey::NewPatient, "PRACTICE_CODE:123", "Welcome").await;

		let thread = env.patient_thread().await;
		let worker = TriggeredMessageWorker::new(env.server.clone());
		let event = NewThreadEvent { thread_id: thread.id };
		EventHandler::<NewThreadEvent>::handle(&worker, event.clone()).await.unwrap();
		EventHandler::<NewThreadEvent>::handle(&worker, event).await.unwrap();
		assert_eq!(message_count(&env, thread.id).await, 1);
	}

	#[tokio::test]
	async fn team_threads_and_unsourced_patients_get_nothing() {
		let env = TestEnv::new().await;
		trigger(&env, TriggerKey::NewPatient, "PRACTICE_CODE:123", "Welcome").await;
		let worker = TriggeredMessageWorker::new(env.server.clone());

		let team = env.team_thread(&["a1"]).await;
		let patient = env.patient_thread().await;
		for thread_id in [team.id, patient.id] {
			EventHandler::<NewThreadEvent>::handle(&worker, NewThreadEvent { thread_id })
				.await
				.unwrap();
			assert_eq!(message_count(&env, thread_id).await, 0);
		}
	}

	#[tokio::test]
	async fn away_message_follows_first_patient_message_only() {
		let env = TestEnv::new().await;
		trigger(&env, TriggerKey::AwayMessage, "PATIENT:SECURE_EXTERNAL:APP", "We are away").await;
		let thread = env.patient_thread().await;
		let worker = TriggeredMessageWorker::new(env.server.clone());

		let first = post_from(&env, thread.id, "p1", "hello").await;
		EventHandler::<PublishedThreadItem>::handle(&worker, published(&first)).await.unwrap();
		assert_eq!(message_count(&env, thread.id).await, 2);

		let second = post_from(&env, thread.id, "p1", "anyone?").await;
		EventHandler::<PublishedThreadItem>::handle(&worker, published(&second)).await.unwrap();
		assert_eq!(message_count(&env, thread.id).await, 3);
	}

	#[tokio::test]
	async fn missing_away_message_is_a_no_op() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;
		let worker = TriggeredMessageWorker::new(env.server.clone());
		let first = post_from(&env, thread.id, "p1", "hello").await;
		EventHandler::<PublishedThreadItem>::handle(&worker, published(&first)).await.unwrap();
		assert_eq!(message_count(&env, thread.id).await, 1);
	}
}
