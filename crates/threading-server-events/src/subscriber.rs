// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Queue polling workers.
//!
//! A [`Dispatcher`] maps resource names to typed handlers. A [`Subscriber`]
//! polls one queue, decodes each message and hands it to the dispatcher.
//! Successfully handled messages and messages that can never be handled are
//! deleted; a handler error leaves the message on the queue so the visibility
//! timeout redelivers it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::envelope::Service;
use crate::error::{EventError, Result};
use crate::event::Event;
use crate::queue::{MessageQueue, QueueMessage};
use crate::sns::SnsMessage;

const DEFAULT_MAX_MESSAGES: usize = 10;
const RECEIVE_ERROR_BACKOFF: Duration = Duration::from_secs(1);

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync {
	async fn handle(&self, event: E) -> Result<()>;
}

type BoxedHandler = Arc<dyn Fn(Bytes) -> BoxFuture<'static, Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Route {
	service: Service,
	handler: BoxedHandler,
}

/// Routes decoded envelopes to the handler registered for their resource name.
#[derive(Clone)]
pub struct Dispatcher {
	env: String,
	routes: HashMap<String, Route>,
}

impl Dispatcher {
	pub fn new(env: impl Into<String>) -> Self {
		Self {
			env: env.into(),
			routes: HashMap::new(),
		}
	}

	/// Registers `handler` for events of type `E`. A later registration for
	/// the same type replaces the earlier one.
	pub fn on<E: Event>(mut self, handler: Arc<dyn EventHandler<E>>) -> Self {
		let boxed: BoxedHandler = Arc::new(move |body: Bytes| -> BoxFuture<'static, Result<()>> {
			let handler = handler.clone();
			Box::pin(async move {
				let event: E = serde_json::from_slice(&body)?;
				handler.handle(event).await
			})
		});
		self.routes.insert(
			E::resource_name(&self.env),
			Route {
				service: E::SERVICE,
				handler: boxed,
			},
		);
		self
	}

	pub fn resource_names(&self) -> impl Iterator<Item = &str> {
		self.routes.keys().map(String::as_str)
	}

	/// Decodes a queue message body and runs the matching handler.
	pub async fn dispatch(&self, body: &str) -> Result<()> {
		let wrapper = SnsMessage::parse(body)?;
		let envelope = wrapper.envelope()?;
		let name = wrapper.resource_name();
		let route = self
			.routes
			.get(name)
			.ok_or_else(|| EventError::UnknownEvent(name.to_string()))?;
		if envelope.service != route.service {
			return Err(EventError::Envelope(format!(
				"{name} published by {} but expected {}",
				envelope.service.as_str(),
				route.service.as_str()
			)));
		}
		(route.handler)(envelope.event).await
	}
}

/// Polls one queue and feeds a dispatcher.
pub struct Subscriber {
	queue: Arc<dyn MessageQueue>,
	dispatcher: Arc<Dispatcher>,
	wait: Duration,
	max_messages: usize,
}

impl Subscriber {
	pub fn new(queue: Arc<dyn MessageQueue>, dispatcher: Dispatcher, wait: Duration) -> Self {
		Self {
			queue,
			dispatcher: Arc::new(dispatcher),
			wait,
			max_messages: DEFAULT_MAX_MESSAGES,
		}
	}

	pub fn with_max_messages(mut self, max_messages: usize) -> Self {
		self.max_messages = max_messages.max(1);
		self
	}

	pub fn start(self) -> SubscriptionHandle {
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let queue_name = self.queue.name().to_string();
		info!(queue = %queue_name, "subscriber started");
		let task = tokio::spawn(self.run(shutdown_rx));
		SubscriptionHandle {
			queue_name,
			shutdown_tx,
			task,
		}
	}

	async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
		let mut in_flight = JoinSet::new();
		loop {
			tokio::select! {
				_ = shutdown_rx.changed() => break,
				Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
				received = self.queue.receive(self.max_messages, self.wait) => match received {
					Ok(messages) => {
						for message in messages {
							in_flight.spawn(process(self.queue.clone(), self.dispatcher.clone(), message));
						}
					}
					Err(e) => {
						warn!(queue = self.queue.name(), error = %e, "failed to receive messages");
						tokio::select! {
							_ = shutdown_rx.changed() => break,
							_ = tokio::time::sleep(RECEIVE_ERROR_BACKOFF) => {}
						}
					}
				},
			}
		}
		debug!(queue = self.queue.name(), in_flight = in_flight.len(), "subscriber draining");
		while in_flight.join_next().await.is_some() {}
	}
}

async fn process(queue: Arc<dyn MessageQueue>, dispatcher: Arc<Dispatcher>, message: QueueMessage) {
	let delete = match dispatcher.dispatch(&message.body).await {
		Ok(()) => true,
		Err(EventError::UnknownEvent(name)) => {
			info!(queue = queue.name(), resource = %name, "ignoring event with no handler");
			true
		}
		Err(e) if e.is_permanent() => {
			warn!(queue = queue.name(), error = %e, "dropping undeliverable message");
			true
		}
		Err(e) => {
			warn!(
				queue = queue.name(),
				receive_count = message.receive_count,
				error = %e,
				"event handler failed, leaving message for redelivery"
			);
			false
		}
	};
	if delete {
		if let Err(e) = queue.delete(&message.receipt_handle).await {
			warn!(queue = queue.name(), error = %e, "failed to delete message");
		}
	}
}

/// Handle to a running subscriber.
pub struct SubscriptionHandle {
	queue_name: String,
	shutdown_tx: watch::Sender<bool>,
	task: JoinHandle<()>,
}

impl SubscriptionHandle {
	/// Signals the subscriber to stop and waits up to `wait` for in-flight
	/// handlers. Returns false when the wait ran out and the work was aborted.
	pub async fn stop(mut self, wait: Duration) -> bool {
		let _ = self.shutdown_tx.send(true);
		match tokio::time::timeout(wait, &mut self.task).await {
			Ok(_) => {
				info!(queue = %self.queue_name, "subscriber stopped");
				true
			}
			Err(_) => {
				warn!(queue = %self.queue_name, "subscriber did not stop in time, aborting");
				self.task.abort();
				false
			}
		}
	}
}
