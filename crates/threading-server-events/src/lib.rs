// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Event plumbing for the threading service.
//!
//! Events travel as a binary [`Envelope`] (publishing service plus a JSON
//! body), base64-encoded inside an [`SnsMessage`] whose topic ARN names the
//! event. [`EventPublisher`] sends typed events, and [`Subscriber`] polls a
//! queue and routes each message through a [`Dispatcher`] to the handler
//! registered for its resource name.

pub mod envelope;
pub mod error;
pub mod event;
pub mod publisher;
pub mod queue;
pub mod sns;
pub mod subscriber;

pub use envelope::{Envelope, Service};
pub use error::{EventError, Result};
pub use event::{
	EndpointType, Event, ExcommsEvent, InviteEvent, NewThreadEvent, PublishedThreadItem,
};
pub use publisher::EventPublisher;
pub use queue::{MemoryBroker, MemoryQueue, MessageQueue, QueueMessage, TopicPublisher};
pub use sns::{resource_name, resource_name_from_arn, topic_arn, SnsMessage};
pub use subscriber::{Dispatcher, EventHandler, Subscriber, SubscriptionHandle};
