// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event-driven workers.
//!
//! Each worker polls its own queue. The triggered-message queue receives new
//! threads and published items; the onboarding queue receives published
//! items plus provisioning and invite events from other services.

mod onboarding;
mod triggered;

use std::sync::Arc;
use std::time::Duration;

use threading_server_config::SubscriberConfig;
use threading_server_events::{
	Dispatcher, EventError, EventPublisher, ExcommsEvent, InviteEvent, MemoryBroker, MessageQueue, NewThreadEvent,
	PublishedThreadItem, Subscriber, SubscriptionHandle,
};

use crate::error::ServerError;
use crate::server::ThreadServer;

pub use onboarding::OnboardingWorker;
pub use triggered::TriggeredMessageWorker;

pub const TRIGGERED_QUEUE: &str = "threading-triggered-messages";
pub const ONBOARDING_QUEUE: &str = "threading-onboarding";

/// Handler failures are redelivered. Bad requests never succeed on retry,
/// so those are logged and dropped instead.
pub(crate) fn handler_error(e: ServerError) -> EventError {
	match e {
		ServerError::InvalidArgument(msg) => {
			tracing::warn!(error = %msg, "dropping event that cannot be handled");
			EventError::Envelope(msg)
		}
		other => EventError::Handler(other.to_string()),
	}
}

pub fn triggered_dispatcher(env: &str, server: Arc<ThreadServer>) -> Dispatcher {
	let worker = Arc::new(TriggeredMessageWorker::new(server));
	Dispatcher::new(env)
		.on::<NewThreadEvent>(worker.clone())
		.on::<PublishedThreadItem>(worker)
}

pub fn onboarding_dispatcher(env: &str, server: Arc<ThreadServer>) -> Dispatcher {
	let worker = Arc::new(OnboardingWorker::new(server));
	Dispatcher::new(env)
		.on::<PublishedThreadItem>(worker.clone())
		.on::<ExcommsEvent>(worker.clone())
		.on::<InviteEvent>(worker)
}

/// Routes every topic the workers listen to into their queues on an
/// in-process broker.
pub async fn subscribe_queues(broker: &MemoryBroker, publisher: &EventPublisher) {
	for topic in [publisher.topic_arn::<NewThreadEvent>(), publisher.topic_arn::<PublishedThreadItem>()] {
		broker.subscribe(&topic, TRIGGERED_QUEUE).await;
	}
	for topic in [
		publisher.topic_arn::<PublishedThreadItem>(),
		publisher.topic_arn::<ExcommsEvent>(),
		publisher.topic_arn::<InviteEvent>(),
	] {
		broker.subscribe(&topic, ONBOARDING_QUEUE).await;
	}
}

/// The running worker subscriptions.
pub struct Workers {
	handles: Vec<SubscriptionHandle>,
}

impl Workers {
	pub fn start(
		server: Arc<ThreadServer>,
		env: &str,
		triggered_queue: Arc<dyn MessageQueue>,
		onboarding_queue: Arc<dyn MessageQueue>,
		config: &SubscriberConfig,
	) -> Self {
		let handles = vec![
			Subscriber::new(triggered_queue, triggered_dispatcher(env, server.clone()), config.queue_wait()).start(),
			Subscriber::new(onboarding_queue, onboarding_dispatcher(env, server), config.queue_wait()).start(),
		];
		Self { handles }
	}

	/// Stops every subscription, giving each up to `wait` to finish its
	/// in-flight messages. Returns false if any had to be abandoned.
	pub async fn stop(self, wait: Duration) -> bool {
		let mut clean = true;
		for handle in self.handles {
			clean &= handle.stop(wait).await;
		}
		clean
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::TriggerKey;

	use crate::api::{CreateTriggeredMessageRequest, MessagePost};
	use crate::clients::{Entity, EntitySource, EntityType};
	use crate::testing::{app_source, TestEnv};

	#[tokio::test]
	async fn welcome_flows_through_the_broker() {
		let env = TestEnv::new().await;
		subscribe_queues(&env.broker, &env.publisher).await;
		let mut patient = Entity::new("p1", EntityType::Patient);
		patient.source = Some(EntitySource {
			source_type: "PATIENT_INVITE".to_string(),
			data: "o1".to_string(),
		});
		env.clients.directory.insert(patient).await;
		env.server
			.create_triggered_message(CreateTriggeredMessageRequest {
				organization_entity_id: "o1".to_string(),
				actor_entity_id: "a1".to_string(),
				trigger_key: TriggerKey::NewPatient,
				trigger_subkey: "PATIENT_INVITE:o1".to_string(),
				enabled: true,
				messages: vec![MessagePost {
					text: "Welcome to the practice".to_string(),
					source: app_source("a1"),
					..Default::default()
				}],
			})
			.await
			.unwrap();

		let config = SubscriberConfig {
			queue_wait_secs: 1,
			..Default::default()
		};
		let workers = Workers::start(
			env.server.clone(),
			"test",
			Arc::new(env.broker.queue(TRIGGERED_QUEUE).await),
			Arc::new(env.broker.queue(ONBOARDING_QUEUE).await),
			&config,
		);

		let thread = env.patient_thread().await;
		let mut count = 0;
		for _ in 0..100 {
			count = env.server.dal().thread(thread.id, &[]).await.unwrap().message_count;
			if count > 0 {
				break;
			}
			tokio::time::sleep(Duration::from_millis(20)).await;
		}
		assert_eq!(count, 1);

		assert!(workers.stop(Duration::from_secs(5)).await);
	}

	#[test]
	fn bad_requests_are_dropped() {
		assert!(handler_error(ServerError::invalid("bad phone")).is_permanent());
		assert!(!handler_error(ServerError::Internal("db".to_string())).is_permanent());
	}
}
