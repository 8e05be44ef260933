// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Moves onboarding threads forward on provisioning and invite events, and
//! on "skip" replies posted into setup threads.

use std::sync::Arc;

use async_trait::async_trait;
use threading_common_thread::{Bml, ThreadType};
use threading_server_events::{
	EndpointType, EventHandler, ExcommsEvent, InviteEvent, PublishedThreadItem, Result,
};

use super::handler_error;
use crate::error::ServerError;
use crate::server::{SetupStep, ThreadServer};

pub struct OnboardingWorker {
	server: Arc<ThreadServer>,
}

/// Organizations without a setup thread are expected, so a missing state
/// is not an error.
fn ignore_missing(result: crate::Result<bool>) -> crate::Result<()> {
	match result {
		Ok(advanced) => {
			tracing::debug!(advanced, "setup event handled");
			Ok(())
		}
		Err(ServerError::NotFound(what)) => {
			tracing::debug!(%what, "no setup thread");
			Ok(())
		}
		Err(e) => Err(e),
	}
}

fn is_skip(text: &str) -> bool {
	let plain = Bml::parse(text).map(|b| b.plain_text()).unwrap_or_else(|_| text.to_string());
	plain.to_lowercase().contains("skip")
}

impl OnboardingWorker {
	pub fn new(server: Arc<ThreadServer>) -> Self {
		Self { server }
	}

	async fn skip_reply(&self, event: &PublishedThreadItem) -> crate::Result<()> {
		if event.actor_entity_id == event.primary_entity_id {
			return Ok(());
		}
		let dal = self.server.dal();
		let thread = dal.thread(event.thread_id, &[]).await?;
		if thread.thread_type != ThreadType::Setup || thread.primary_entity_id == event.actor_entity_id {
			return Ok(());
		}
		let item = dal.thread_item(event.item_id, &[]).await?;
		if !item.message().is_some_and(|m| is_skip(&m.text)) {
			return Ok(());
		}
		ignore_missing(self.server.skip_setup_step(thread.id, item.id).await)
	}
}

#[async_trait]
impl EventHandler<ExcommsEvent> for OnboardingWorker {
	async fn handle(&self, event: ExcommsEvent) -> Result<()> {
		let ExcommsEvent::ProvisionedEndpoint {
			for_entity_id,
			endpoint_type,
			endpoint,
		} = event;
		let step = match endpoint_type {
			EndpointType::Phone => SetupStep::Phone,
			EndpointType::Email => SetupStep::Email,
		};
		tracing::info!(entity_id = %for_entity_id, step = step.as_str(), "endpoint provisioned");
		ignore_missing(self.server.complete_setup_step(&for_entity_id, step, &endpoint).await).map_err(handler_error)
	}
}

#[async_trait]
impl EventHandler<InviteEvent> for OnboardingWorker {
	async fn handle(&self, event: InviteEvent) -> Result<()> {
		let InviteEvent::InvitedColleagues {
			organization_entity_id,
			inviter_entity_id,
		} = event;
		tracing::info!(organization_id = %organization_entity_id, inviter = %inviter_entity_id, "colleagues invited");
		ignore_missing(
			self.server
				.complete_setup_step(&organization_entity_id, SetupStep::Invite, "")
				.await,
		)
		.map_err(handler_error)
	}
}

#[async_trait]
impl EventHandler<PublishedThreadItem> for OnboardingWorker {
	#[tracing::instrument(skip(self, event), fields(thread_id = %event.thread_id, item_id = %event.item_id))]
	async fn handle(&self, event: PublishedThreadItem) -> Result<()> {
		self.skip_reply(&event).await.map_err(handler_error)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::{Thread, ThreadItem};

	use crate::api::{CreateEmptyThreadRequest, CreateOnboardingThreadRequest, MessagePost, PostMessagesRequest};
	use crate::server::SETUP_STEP_DONE;
	use crate::testing::{app_source, TestEnv};

	async fn setup_thread(env: &TestEnv) -> Thread {
		env.server
			.create_empty_thread(CreateEmptyThreadRequest {
				organization_id: "o1".to_string(),
				thread_type: ThreadType::Support,
				system_title: "Support".to_string(),
				..Default::default()
			})
			.await
			.unwrap();
		env.server
			.create_onboarding_thread(CreateOnboardingThreadRequest {
				organization_id: "o1".to_string(),
				primary_entity_id: "bot".to_string(),
				user_title: String::new(),
			})
			.await
			.unwrap()
			.thread
			.thread
	}

	async fn reply(env: &TestEnv, thread: &Thread, text: &str) -> PublishedThreadItem {
		let item: ThreadItem = env
			.server
			.post_messages(PostMessagesRequest {
				uuid: None,
				thread_id: thread.id,
				from_entity_id: "a1".to_string(),
				messages: vec![MessagePost {
					text: text.to_string(),
					source: app_source("a1"),
					..Default::default()
				}],
			})
			.await
			.unwrap()
			.items
			.remove(0);
		PublishedThreadItem {
			uuid: None,
			organization_id: "o1".to_string(),
			thread_id: thread.id,
			item_id: item.id,
			actor_entity_id: "a1".to_string(),
			primary_entity_id: thread.primary_entity_id.clone(),
			internal: false,
		}
	}

	async fn step(env: &TestEnv, thread: &Thread) -> i64 {
		env.server.dal().setup_thread_state(thread.id, &[]).await.unwrap().step
	}

	#[test]
	fn skip_detection() {
		assert!(is_skip("Skip"));
		assert!(is_skip("let's SKIP this one"));
		assert!(!is_skip("done"));
	}

	#[tokio::test]
	async fn provisioning_and_invites_walk_the_steps() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;
		let worker = OnboardingWorker::new(env.server.clone());

		let email = ExcommsEvent::ProvisionedEndpoint {
			for_entity_id: "o1".to_string(),
			endpoint_type: EndpointType::Email,
			endpoint: "care@example.com".to_string(),
		};
		EventHandler::<ExcommsEvent>::handle(&worker, email.clone()).await.unwrap();
		assert_eq!(step(&env, &thread).await, 0);

		EventHandler::<ExcommsEvent>::handle(
			&worker,
			ExcommsEvent::ProvisionedEndpoint {
				for_entity_id: "o1".to_string(),
				endpoint_type: EndpointType::Phone,
				endpoint: "+15551112222".to_string(),
			},
		)
		.await
		.unwrap();
		assert_eq!(step(&env, &thread).await, 1);

		EventHandler::<ExcommsEvent>::handle(&worker, email).await.unwrap();
		assert_eq!(step(&env, &thread).await, 2);

		let invite = InviteEvent::InvitedColleagues {
			organization_entity_id: "o1".to_string(),
			inviter_entity_id: "a1".to_string(),
		};
		EventHandler::<InviteEvent>::handle(&worker, invite.clone()).await.unwrap();
		EventHandler::<InviteEvent>::handle(&worker, invite).await.unwrap();
		assert_eq!(step(&env, &thread).await, SETUP_STEP_DONE);
		assert_eq!(env.server.dal().thread(thread.id, &[]).await.unwrap().message_count, 4);
	}

	#[tokio::test]
	async fn skip_replies_advance_one_step() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;
		let worker = OnboardingWorker::new(env.server.clone());

		let chatter = reply(&env, &thread, "what is this?").await;
		EventHandler::<PublishedThreadItem>::handle(&worker, chatter).await.unwrap();
		assert_eq!(step(&env, &thread).await, 0);

		let skip = reply(&env, &thread, "Skip").await;
		EventHandler::<PublishedThreadItem>::handle(&worker, skip.clone()).await.unwrap();
		EventHandler::<PublishedThreadItem>::handle(&worker, skip).await.unwrap();
		assert_eq!(step(&env, &thread).await, 1);
	}

	#[tokio::test]
	async fn organizations_without_setup_are_ignored() {
		let env = TestEnv::new().await;
		let worker = OnboardingWorker::new(env.server.clone());
		EventHandler::<InviteEvent>::handle(
			&worker,
			InviteEvent::InvitedColleagues {
				organization_entity_id: "o1".to_string(),
				inviter_entity_id: "a1".to_string(),
			},
		)
		.await
		.unwrap();

		let team = env.team_thread(&["a1"]).await;
		let skip = reply(&env, &team, "skip").await;
		EventHandler::<PublishedThreadItem>::handle(&worker, skip).await.unwrap();
	}
}
