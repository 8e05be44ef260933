// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Topic and queue transports.
//!
//! [`TopicPublisher`] and [`MessageQueue`] are the seams to a real pub/sub
//! backend. [`MemoryBroker`] implements both in process: publishing to a
//! topic fans the wrapped message out to every queue subscribed to it, and a
//! received message stays hidden for the visibility timeout unless it is
//! deleted, after which it is delivered again.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{EventError, Result};

const POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
	pub receipt_handle: String,
	pub body: String,
	pub receive_count: u32,
}

#[async_trait]
pub trait TopicPublisher: Send + Sync {
	/// Publishes a base64 envelope to the topic.
	async fn publish(&self, topic_arn: &str, message: &str) -> Result<()>;
}

#[async_trait]
pub trait MessageQueue: Send + Sync {
	fn name(&self) -> &str;

	/// Waits up to `wait` for at least one visible message.
	async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>>;

	async fn delete(&self, receipt_handle: &str) -> Result<()>;
}

struct StoredMessage {
	body: String,
	visible_at: Instant,
	receipt_handle: Option<String>,
	receive_count: u32,
}

#[derive(Default)]
struct QueueState {
	messages: VecDeque<StoredMessage>,
	notify: Arc<Notify>,
}

#[derive(Default)]
struct BrokerState {
	subscriptions: HashMap<String, Vec<String>>,
	queues: HashMap<String, QueueState>,
}

/// In-process topics and queues.
#[derive(Clone)]
pub struct MemoryBroker {
	state: Arc<Mutex<BrokerState>>,
	visibility_timeout: Duration,
}

impl MemoryBroker {
	pub fn new(visibility_timeout: Duration) -> Self {
		Self {
			state: Arc::new(Mutex::new(BrokerState::default())),
			visibility_timeout,
		}
	}

	/// Returns a handle to the named queue, creating it on first use.
	pub async fn queue(&self, name: &str) -> MemoryQueue {
		self.state
			.lock()
			.await
			.queues
			.entry(name.to_string())
			.or_default();
		MemoryQueue {
			broker: self.clone(),
			name: name.to_string(),
		}
	}

	/// Delivers every later publish to `topic_arn` into the named queue.
	pub async fn subscribe(&self, topic_arn: &str, queue_name: &str) {
		let mut state = self.state.lock().await;
		state.queues.entry(queue_name.to_string()).or_default();
		let queues = state.subscriptions.entry(topic_arn.to_string()).or_default();
		if !queues.iter().any(|q| q == queue_name) {
			queues.push(queue_name.to_string());
		}
		debug!(topic_arn, queue = queue_name, "queue subscribed to topic");
	}

	/// Messages in the queue, visible or in flight.
	pub async fn depth(&self, queue_name: &str) -> usize {
		self.state
			.lock()
			.await
			.queues
			.get(queue_name)
			.map_or(0, |q| q.messages.len())
	}
}

#[async_trait]
impl TopicPublisher for MemoryBroker {
	async fn publish(&self, topic_arn: &str, message: &str) -> Result<()> {
		let body = serde_json::to_string(&crate::sns::SnsMessage {
			message: message.to_string(),
			topic_arn: topic_arn.to_string(),
		})?;

		let mut state = self.state.lock().await;
		let targets = state.subscriptions.get(topic_arn).cloned().unwrap_or_default();
		if targets.is_empty() {
			trace!(topic_arn, "publish with no subscribed queues");
		}
		let now = Instant::now();
		for name in targets {
			if let Some(queue) = state.queues.get_mut(&name) {
				queue.messages.push_back(StoredMessage {
					body: body.clone(),
					visible_at: now,
					receipt_handle: None,
					receive_count: 0,
				});
				queue.notify.notify_waiters();
			}
		}
		Ok(())
	}
}

#[derive(Clone)]
pub struct MemoryQueue {
	broker: MemoryBroker,
	name: String,
}

impl MemoryQueue {
	async fn take_visible(&self, max: usize) -> Result<(Vec<QueueMessage>, Arc<Notify>)> {
		let mut state = self.broker.state.lock().await;
		let queue = state
			.queues
			.get_mut(&self.name)
			.ok_or_else(|| EventError::Queue(format!("queue {} does not exist", self.name)))?;

		let now = Instant::now();
		let mut out = Vec::new();
		for msg in queue.messages.iter_mut() {
			if out.len() >= max {
				break;
			}
			if msg.visible_at > now {
				continue;
			}
			let handle = uuid::Uuid::new_v4().to_string();
			msg.visible_at = now + self.broker.visibility_timeout;
			msg.receipt_handle = Some(handle.clone());
			msg.receive_count += 1;
			out.push(QueueMessage {
				receipt_handle: handle,
				body: msg.body.clone(),
				receive_count: msg.receive_count,
			});
		}
		Ok((out, queue.notify.clone()))
	}
}

#[async_trait]
impl MessageQueue for MemoryQueue {
	fn name(&self) -> &str {
		&self.name
	}

	async fn receive(&self, max_messages: usize, wait: Duration) -> Result<Vec<QueueMessage>> {
		let deadline = Instant::now() + wait;
		loop {
			let (messages, notify) = self.take_visible(max_messages.max(1)).await?;
			if !messages.is_empty() {
				return Ok(messages);
			}
			let now = Instant::now();
			if now >= deadline {
				return Ok(Vec::new());
			}
			// Sleep in slices so redeliveries become visible without a publish.
			let slice = (deadline - now).min(POLL_SLICE);
			let _ = tokio::time::timeout(slice, notify.notified()).await;
		}
	}

	async fn delete(&self, receipt_handle: &str) -> Result<()> {
		let mut state = self.broker.state.lock().await;
		if let Some(queue) = state.queues.get_mut(&self.name) {
			queue
				.messages
				.retain(|m| m.receipt_handle.as_deref() != Some(receipt_handle));
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn publish_fans_out_to_subscribed_queues() {
		let broker = MemoryBroker::new(Duration::from_secs(30));
		broker.subscribe("arn:t", "a").await;
		broker.subscribe("arn:t", "b").await;
		broker.subscribe("arn:t", "b").await;
		let a = broker.queue("a").await;
		let other = broker.queue("other").await;

		broker.publish("arn:t", "payload").await.unwrap();

		assert_eq!(broker.depth("a").await, 1);
		assert_eq!(broker.depth("b").await, 1);
		assert_eq!(broker.depth("other").await, 0);

		let got = a.receive(10, Duration::from_millis(10)).await.unwrap();
		assert_eq!(got.len(), 1);
		let wrapper = crate::sns::SnsMessage::parse(&got[0].body).unwrap();
		assert_eq!(wrapper.message, "payload");
		assert_eq!(wrapper.topic_arn, "arn:t");
		assert!(other.receive(10, Duration::ZERO).await.unwrap().is_empty());
	}

	#[tokio::test(start_paused = true)]
	async fn undeleted_message_is_redelivered_after_visibility_timeout() {
		let broker = MemoryBroker::new(Duration::from_secs(30));
		broker.subscribe("arn:t", "q").await;
		let q = broker.queue("q").await;
		broker.publish("arn:t", "m").await.unwrap();

		let first = q.receive(1, Duration::ZERO).await.unwrap();
		assert_eq!(first[0].receive_count, 1);
		assert!(q.receive(1, Duration::from_secs(5)).await.unwrap().is_empty());

		tokio::time::advance(Duration::from_secs(30)).await;
		let second = q.receive(1, Duration::ZERO).await.unwrap();
		assert_eq!(second.len(), 1);
		assert_eq!(second[0].receive_count, 2);

		// the stale receipt no longer matches
		q.delete(&first[0].receipt_handle).await.unwrap();
		assert_eq!(broker.depth("q").await, 1);
		q.delete(&second[0].receipt_handle).await.unwrap();
		assert_eq!(broker.depth("q").await, 0);
	}

	#[tokio::test]
	async fn receive_wakes_on_publish() {
		let broker = MemoryBroker::new(Duration::from_secs(30));
		broker.subscribe("arn:t", "q").await;
		let q = broker.queue("q").await;

		let waiter = tokio::spawn(async move { q.receive(1, Duration::from_secs(5)).await });
		tokio::time::sleep(Duration::from_millis(20)).await;
		broker.publish("arn:t", "late").await.unwrap();

		let got = waiter.await.unwrap().unwrap();
		assert_eq!(got.len(), 1);
	}
}
