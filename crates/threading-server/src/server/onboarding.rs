// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Onboarding threads.
//!
//! A setup thread walks a new organization through three steps: claiming a
//! phone number, connecting email and inviting colleagues. The thread's
//! [`SetupThreadState`] records how far it got. Each step is finished either
//! by the matching external event or by a "skip" reply, and either way the
//! next canned message is posted from the thread's primary entity. The step
//! is re-read under the transaction that posts, so an event that arrives
//! twice advances the thread once.

use threading_common_thread::{
	summary_from_text, Bml, Node, SetupThreadState, Thread, ThreadId, ThreadItemId, ThreadType,
};
use threading_server_db::QueryOption;
use threading_server_events::NewThreadEvent;

use super::messages::{build_message, post_in_tx, with_app_source, Post};
use super::{required, thread_view, ThreadServer};
use crate::api::{
	CreateOnboardingThreadRequest, MessagePost, OnboardingEvent, OnboardingThreadEventRequest, ThreadResponse,
};
use crate::deeplink;
use crate::error::{Result, ServerError};

/// The step a setup thread is on once every step is finished.
pub const SETUP_STEP_DONE: i64 = 3;

const SUMMARY_PREFIX: &str = "Setup: ";

const EVENT_SETUP_PHONE_LINE: &str = "setup_phone_line";
const EVENT_SETUP_PATIENT_MESSAGING: &str = "setup_patient_messaging";
const EVENT_SETUP_TEAM_MESSAGING: &str = "setup_team_messaging";
const EVENT_SETUP_TELEMEDICINE: &str = "setup_telemedicine";
const EVENT_SETUP_ANSWERING_SERVICE: &str = "setup_answering_service";

/// A step of the guided flow. The discriminant is the stored step value
/// while the step is the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupStep {
	Phone = 0,
	Email = 1,
	Invite = 2,
}

impl SetupStep {
	pub fn from_state(step: i64) -> Option<Self> {
		match step {
			0 => Some(SetupStep::Phone),
			1 => Some(SetupStep::Email),
			2 => Some(SetupStep::Invite),
			_ => None,
		}
	}

	pub fn value(self) -> i64 {
		self as i64
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			SetupStep::Phone => "phone",
			SetupStep::Email => "email",
			SetupStep::Invite => "invite",
		}
	}
}

/// A canned message and the step the thread moves to once it is posted.
#[derive(Debug, Clone)]
struct SetupReply {
	bml: Bml,
	to_step: i64,
	/// Idempotency key of the post within the thread.
	key: String,
}

fn text(s: impl Into<String>) -> Node {
	Node::Text(s.into())
}

fn link(href: String, s: &str) -> Node {
	Node::Anchor {
		href,
		text: s.to_string(),
	}
}

/// Formats a North American E.164 number as `(555) 111-2222`. Other valid
/// E.164 numbers are returned unchanged; anything else is `None`.
fn format_phone(number: &str) -> Option<String> {
	let digits = number.strip_prefix('+')?;
	if digits.len() < 8 || digits.len() > 15 || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return None;
	}
	match digits.strip_prefix('1') {
		Some(national) if national.len() == 10 => Some(format!(
			"({}) {}-{}",
			&national[..3],
			&national[3..6],
			&national[6..]
		)),
		_ => Some(number.to_string()),
	}
}

const SIGN_OFF: &str = "That’s all for now. You can keep trying things out in this conversation, and if you’re unsure about anything or need some help, message us on the support thread and a real human will respond.";

/// The message that follows finishing or skipping `step`.
fn step_reply(web_domain: &str, organization_id: &str, step: SetupStep, skipped: bool, detail: &str) -> Vec<Node> {
	let email_link = || {
		vec![
			link(deeplink::org_settings_email_url(web_domain, organization_id), "Set up email support"),
			text("\nor type \"Skip\" to set it up later"),
		]
	};
	let invite_link = || {
		vec![
			link(
				deeplink::org_colleague_invite_url(web_domain, organization_id),
				"Add a colleague to your organization",
			),
			text("\nor type \"Skip\" to send invites later"),
		]
	};
	let mut nodes = Vec::new();
	match (step, skipped) {
		(SetupStep::Phone, false) => {
			let phone = format_phone(detail).unwrap_or_else(|| detail.to_string());
			nodes.push(text(format!(
				"Success! Your patients can now reach you at {phone}. Next let’s set you up to send and receive email.\n\n"
			)));
			nodes.extend(email_link());
		}
		(SetupStep::Phone, true) => {
			nodes.push(text(
				"You can set up your number at any time from the settings menu. Would you like to set up your account to send and receive email?\n\n",
			));
			nodes.extend(email_link());
		}
		(SetupStep::Email, false) => {
			nodes.push(text(format!(
				"Great! Your patients can now reach you at {detail}. Would you like to collaborate with colleagues around patient communication?\n\n"
			)));
			nodes.extend(invite_link());
		}
		(SetupStep::Email, true) => {
			nodes.push(text(
				"You can set up email at any time from the settings menu. Would you like to collaborate with colleagues around patient communication?\n\n",
			));
			nodes.extend(invite_link());
		}
		(SetupStep::Invite, false) => {
			nodes.push(text(format!(
				"We’ve sent your invite. Once your colleagues have joined, you can talk with them about care right from a patient’s conversation thread.\n\nTo send an internal note in a patient thread, tap the lock icon while writing a message. You can test it out right here.\n\n{SIGN_OFF}"
			)));
		}
		(SetupStep::Invite, true) => {
			nodes.push(text(format!(
				"You can invite a colleague any time from the settings menu. Until then, internal notes on a patient thread are visible only to you.\n\nYou can test internal messaging by writing a message in this conversation and tapping the lock icon before sending it.\n\n{SIGN_OFF}"
			)));
		}
	}
	nodes
}

impl ThreadServer {
	/// Creates an organization's setup thread with its welcome message and a
	/// setup state at step 0. The organization must already have a support
	/// thread to link to.
	#[tracing::instrument(skip(self, req), fields(organization_id = %req.organization_id, primary_entity_id = %req.primary_entity_id))]
	pub async fn create_onboarding_thread(&self, req: CreateOnboardingThreadRequest) -> Result<ThreadResponse> {
		required(&req.organization_id, "OrganizationID")?;
		required(&req.primary_entity_id, "PrimaryEntityID")?;
		let support_url = self.support_thread_url(&req.organization_id).await?;

		let event_link = |event: &str, s: &str| link(deeplink::post_event_url(&self.web_domain, &req.organization_id, event), s);
		let welcome = Bml(vec![
			text("Hi! There is a lot we can do to help you provide great care. Tap any item below and we’ll guide you through it.\n\n"),
			event_link(EVENT_SETUP_PHONE_LINE, "Second phone line"),
			text("\n\n"),
			event_link(EVENT_SETUP_PATIENT_MESSAGING, "Patient messaging"),
			text("\n\n"),
			event_link(EVENT_SETUP_TEAM_MESSAGING, "Team chat & care coordination"),
			text("\n\n"),
			event_link(EVENT_SETUP_TELEMEDICINE, "Telemedicine"),
			text("\n\nIf you have questions at any time, just "),
			link(support_url, "message us"),
			text("."),
		]);
		let post = self.setup_post(&req.primary_entity_id, &welcome)?;
		let message = build_message(&post)?;

		let mut thread = Thread::new(&req.organization_id, ThreadType::Setup);
		thread.id = ThreadId::new();
		thread.primary_entity_id = req.primary_entity_id.clone();
		thread.system_title = "Setup".to_string();
		thread.user_title = req.user_title.clone();
		thread.last_message_summary = message.summary.clone();
		thread.last_external_message_summary = message.summary.clone();

		let post = Post {
			thread_id: thread.id,
			actor_entity_id: req.primary_entity_id.clone(),
			messages: vec![post],
			uuid: None,
			single: true,
			notify: false,
		};
		let state = SetupThreadState {
			thread_id: thread.id,
			entity_id: req.organization_id.clone(),
			step: 0,
		};
		let (_, created) = self
			.dal
			.transact(|tx| {
				let (thread, post, state) = (&thread, &post, &state);
				async move {
					tx.create_thread(thread).await?;
					tx.add_thread_members(thread.id, &[thread.organization_id.clone()]).await?;
					let posted = post_in_tx(&tx, post, vec![message]).await?;
					tx.create_setup_thread_state(state).await?;
					Ok::<_, ServerError>(posted)
				}
			})
			.await?;

		let thread = self.dal.thread(thread.id, &[]).await?;
		self.publish(&NewThreadEvent { thread_id: thread.id }).await;
		self.after_post(&thread, &created, &req.primary_entity_id, false, None).await;
		tracing::info!(thread_id = %thread.id, "onboarding thread created");
		Ok(ThreadResponse {
			thread: thread_view(thread, None, false),
		})
	}

	/// Reacts to an onboarding event while the setup thread is still on its
	/// first step. Events for a thread that has moved on change nothing and
	/// still return the thread.
	#[tracing::instrument(skip(self, req))]
	pub async fn onboarding_thread_event(&self, req: OnboardingThreadEventRequest) -> Result<ThreadResponse> {
		let state = match (req.thread_id, req.entity_id.as_deref()) {
			(Some(thread_id), _) => self.dal.setup_thread_state(thread_id, &[]).await?,
			(None, Some(entity_id)) if !entity_id.is_empty() => {
				self.dal.setup_thread_state_for_entity(entity_id, &[]).await?
			}
			_ => return Err(ServerError::invalid("ThreadID or EntityID is required")),
		};
		let thread = self.dal.thread(state.thread_id, &[]).await?;
		if state.step != 0 {
			tracing::debug!(thread_id = %thread.id, step = state.step, "setup thread past first step");
			return Ok(ThreadResponse {
				thread: thread_view(thread, None, false),
			});
		}

		let reply = match &req.event {
			OnboardingEvent::ProvisionedPhone { phone_number } => {
				if format_phone(phone_number).is_none() {
					return Err(ServerError::invalid(format!(
						"Invalid phone number '{phone_number}' for org {}",
						thread.organization_id
					)));
				}
				Some(SetupReply {
					bml: Bml(step_reply(
						&self.web_domain,
						&thread.organization_id,
						SetupStep::Phone,
						false,
						phone_number,
					)),
					to_step: SetupStep::Email.value(),
					key: format!("step:{}", SetupStep::Email.value()),
				})
			}
			OnboardingEvent::GenericSetup { name } => self.generic_setup_reply(&thread, name).await?,
		};
		let Some(reply) = reply else {
			return Ok(ThreadResponse {
				thread: thread_view(thread, None, false),
			});
		};
		self.advance_setup(&thread, 0, reply).await?;
		let thread = self.dal.thread(thread.id, &[]).await?;
		Ok(ThreadResponse {
			thread: thread_view(thread, None, false),
		})
	}

	/// Finishes `step` for the organization's setup thread if it is the
	/// current one. `detail` is the phone number or email address that was
	/// set up. Returns whether the thread advanced.
	#[tracing::instrument(skip(self), fields(step = step.as_str()))]
	pub async fn complete_setup_step(&self, organization_id: &str, step: SetupStep, detail: &str) -> Result<bool> {
		let state = self.dal.setup_thread_state_for_entity(organization_id, &[]).await?;
		if state.step != step.value() {
			tracing::debug!(thread_id = %state.thread_id, current = state.step, "setup step already passed");
			return Ok(false);
		}
		let thread = self.dal.thread(state.thread_id, &[]).await?;
		let to_step = step.value() + 1;
		let reply = SetupReply {
			bml: Bml(step_reply(&self.web_domain, &thread.organization_id, step, false, detail)),
			to_step,
			key: format!("step:{to_step}"),
		};
		self.advance_setup(&thread, step.value(), reply).await
	}

	/// Skips the current step in response to the reply `trigger`. Replaying
	/// the same trigger changes nothing. Returns whether the thread advanced.
	#[tracing::instrument(skip(self), fields(thread_id = %thread_id, trigger = %trigger))]
	pub async fn skip_setup_step(&self, thread_id: ThreadId, trigger: ThreadItemId) -> Result<bool> {
		let state = self.dal.setup_thread_state(thread_id, &[]).await?;
		let Some(step) = SetupStep::from_state(state.step) else {
			return Ok(false);
		};
		let thread = self.dal.thread(thread_id, &[]).await?;
		let reply = SetupReply {
			bml: Bml(step_reply(&self.web_domain, &thread.organization_id, step, true, "")),
			to_step: step.value() + 1,
			key: format!("skip:{trigger}"),
		};
		self.advance_setup(&thread, step.value(), reply).await
	}

	/// Guidance for a link tapped in the welcome message. Unknown names are
	/// logged and ignored.
	async fn generic_setup_reply(&self, thread: &Thread, name: &str) -> Result<Option<SetupReply>> {
		let org = thread.organization_id.as_str();
		let phone_url = || deeplink::org_settings_phone_url(&self.web_domain, org);
		let nodes = match name {
			EVENT_SETUP_PHONE_LINE => vec![
				text("A second phone line lets patients call and text you without ever seeing your personal number.\n\n"),
				link(phone_url(), "Claim your number now"),
			],
			EVENT_SETUP_PATIENT_MESSAGING => vec![text(
				"To message a patient, start a new conversation from the home screen. Patients can reply by text message, email or secure messaging in the app.",
			)],
			EVENT_SETUP_TEAM_MESSAGING => vec![
				text("To invite a teammate to join your practice, open settings and select "),
				link(deeplink::org_colleague_invite_url(&self.web_domain, org), "Invite Teammates"),
				text("."),
			],
			EVENT_SETUP_TELEMEDICINE => vec![
				text("Visits can be attached to any patient conversation so patients can be seen without coming in. If you’d like a walkthrough, "),
				link(self.support_thread_url(org).await?, "message us"),
				text("."),
			],
			EVENT_SETUP_ANSWERING_SERVICE => vec![
				text("To use an answering service, first "),
				link(phone_url(), "set up your number"),
				text(" if you haven’t already. Then tell us in "),
				link(self.support_thread_url(org).await?, "support"),
				text(" and we’ll connect it."),
			],
			other => {
				tracing::warn!(thread_id = %thread.id, event = other, "unknown setup event");
				return Ok(None);
			}
		};
		Ok(Some(SetupReply {
			bml: Bml(nodes),
			to_step: 0,
			key: format!("event:{name}"),
		}))
	}

	/// Posts `reply` and moves the state to `reply.to_step` if the thread is
	/// still on `expected` and the post is new. Both happen in one
	/// transaction.
	async fn advance_setup(&self, thread: &Thread, expected: i64, reply: SetupReply) -> Result<bool> {
		let post = self.setup_post(&thread.primary_entity_id, &reply.bml)?;
		let message = build_message(&post)?;
		let post = Post {
			thread_id: thread.id,
			actor_entity_id: thread.primary_entity_id.clone(),
			messages: vec![post],
			uuid: Some(format!("setup:{}", reply.key)),
			single: true,
			notify: true,
		};
		let thread_id = thread.id;
		let created = self
			.dal
			.transact(|tx| {
				let post = &post;
				async move {
					let state = tx.setup_thread_state(thread_id, &[QueryOption::ForUpdate]).await?;
					if state.step != expected {
						return Ok::<_, ServerError>(None);
					}
					let (_, created) = post_in_tx(&tx, post, vec![message]).await?;
					if created.is_empty() {
						return Ok(None);
					}
					if reply.to_step > expected {
						tx.update_setup_thread_state(thread_id, reply.to_step).await?;
					}
					Ok(Some(created))
				}
			})
			.await?;
		let Some(created) = created else {
			tracing::debug!(thread_id = %thread_id, "setup step already handled");
			return Ok(false);
		};

		let thread = self.dal.thread(thread_id, &[]).await?;
		self.after_post(&thread, &created, &thread.primary_entity_id, true, None).await;
		tracing::info!(thread_id = %thread_id, step = reply.to_step, "setup thread advanced");
		Ok(true)
	}

	/// A post of canned markup from `actor`, with the setup summary.
	fn setup_post(&self, actor: &str, bml: &Bml) -> Result<MessagePost> {
		let text = bml.format();
		let summary = summary_from_text(&format!("{SUMMARY_PREFIX}{text}"))?;
		Ok(with_app_source(
			MessagePost {
				text,
				summary,
				..Default::default()
			},
			actor,
		))
	}

	async fn support_thread_url(&self, organization_id: &str) -> Result<String> {
		let support = self
			.dal
			.threads_for_org(organization_id, Some(ThreadType::Support), 1)
			.await?
			.pop()
			.ok_or_else(|| {
				ServerError::FailedPrecondition(format!("Expected at least 1 support thread for org {organization_id}"))
			})?;
		Ok(deeplink::thread_url(&self.web_domain, organization_id, support.id))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use threading_common_thread::ThreadItem;
	use threading_server_db::Iteration;

	use crate::api::CreateEmptyThreadRequest;
	use crate::testing::TestEnv;

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

	async fn items(env: &TestEnv, thread_id: ThreadId) -> Vec<ThreadItem> {
		env.server
			.dal()
			.iterate_thread_items(thread_id, false, &Iteration::default())
			.await
			.unwrap()
			.into_items()
	}

	async fn step(env: &TestEnv, thread_id: ThreadId) -> i64 {
		env.server.dal().setup_thread_state(thread_id, &[]).await.unwrap().step
	}

	fn last_text(items: &[ThreadItem]) -> String {
		items.last().unwrap().message().unwrap().text.clone()
	}

	#[test]
	fn phone_numbers() {
		assert_eq!(format_phone("+15551112222").as_deref(), Some("(555) 111-2222"));
		assert_eq!(format_phone("+447700900123").as_deref(), Some("+447700900123"));
		assert_eq!(format_phone("5551112222"), None);
		assert_eq!(format_phone("+1555abc2222"), None);
	}

	#[tokio::test]
	async fn creates_setup_thread_with_welcome() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;
		assert_eq!(thread.thread_type, ThreadType::Setup);
		assert_eq!(thread.message_count, 1);
		assert!(thread.last_message_summary.starts_with("Setup: Hi!"));

		let items = items(&env, thread.id).await;
		let welcome = last_text(&items);
		assert!(welcome.contains(&deeplink::post_event_url(env.server.web_domain(), "o1", EVENT_SETUP_TELEMEDICINE).replace('&', "&amp;")));
		assert_eq!(items[0].actor_entity_id, "bot");

		let state = env.server.dal().setup_thread_state(thread.id, &[]).await.unwrap();
		assert_eq!((state.entity_id.as_str(), state.step), ("o1", 0));
		let members = env.server.dal().thread_members(thread.id).await.unwrap();
		assert!(members.iter().any(|te| te.entity_id == "o1"));
	}

	#[tokio::test]
	async fn onboarding_requires_a_support_thread() {
		let env = TestEnv::new().await;
		let err = env
			.server
			.create_onboarding_thread(CreateOnboardingThreadRequest {
				organization_id: "o1".to_string(),
				primary_entity_id: "bot".to_string(),
				user_title: String::new(),
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::FailedPrecondition(_)));
	}

	#[tokio::test]
	async fn skip_advances_once_per_reply() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;
		let reply = ThreadItemId::new();

		assert!(env.server.skip_setup_step(thread.id, reply).await.unwrap());
		assert_eq!(step(&env, thread.id).await, 1);
		let after_skip = items(&env, thread.id).await;
		assert_eq!(after_skip.len(), 2);
		assert!(last_text(&after_skip).contains("/settings/email"));
		assert!(after_skip[1].message().unwrap().summary.starts_with("Setup: You can set up your number"));

		assert!(!env.server.skip_setup_step(thread.id, reply).await.unwrap());
		assert_eq!(step(&env, thread.id).await, 1);
		assert_eq!(items(&env, thread.id).await.len(), 2);
	}

	#[tokio::test]
	async fn provisioned_phone_acts_only_on_first_step() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;
		let req = OnboardingThreadEventRequest {
			thread_id: None,
			entity_id: Some("o1".to_string()),
			event: OnboardingEvent::ProvisionedPhone {
				phone_number: "+15551112222".to_string(),
			},
		};
		let resp = env.server.onboarding_thread_event(req.clone()).await.unwrap();
		assert_eq!(resp.thread.thread.message_count, 2);
		assert_eq!(step(&env, thread.id).await, 1);
		assert!(last_text(&items(&env, thread.id).await).contains("(555) 111-2222"));

		let resp = env.server.onboarding_thread_event(req).await.unwrap();
		assert_eq!(resp.thread.thread.id, thread.id);
		assert_eq!(resp.thread.thread.message_count, 2);
	}

	#[tokio::test]
	async fn generic_setup_guides_without_advancing() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;
		let event = |name: &str| OnboardingThreadEventRequest {
			thread_id: Some(thread.id),
			entity_id: None,
			event: OnboardingEvent::GenericSetup { name: name.to_string() },
		};

		env.server
			.onboarding_thread_event(event(EVENT_SETUP_ANSWERING_SERVICE))
			.await
			.unwrap();
		env.server
			.onboarding_thread_event(event(EVENT_SETUP_ANSWERING_SERVICE))
			.await
			.unwrap();
		env.server.onboarding_thread_event(event("setup_unknown")).await.unwrap();

		let items = items(&env, thread.id).await;
		assert_eq!(items.len(), 2);
		assert!(last_text(&items).contains("/settings/phone"));
		assert_eq!(step(&env, thread.id).await, 0);
	}

	#[tokio::test]
	async fn invalid_phone_and_missing_state_fail() {
		let env = TestEnv::new().await;
		setup_thread(&env).await;
		let err = env
			.server
			.onboarding_thread_event(OnboardingThreadEventRequest {
				thread_id: None,
				entity_id: Some("o1".to_string()),
				event: OnboardingEvent::ProvisionedPhone {
					phone_number: "call me".to_string(),
				},
			})
			.await
			.unwrap_err();
		assert!(matches!(err, ServerError::InvalidArgument(_)));

		let err = env
			.server
			.onboarding_thread_event(OnboardingThreadEventRequest {
				thread_id: None,
				entity_id: Some("o2".to_string()),
				event: OnboardingEvent::GenericSetup {
					name: EVENT_SETUP_TELEMEDICINE.to_string(),
				},
			})
			.await
			.unwrap_err();
		assert!(err.is_not_found());
	}

	#[tokio::test]
	async fn full_flow_reaches_done() {
		let env = TestEnv::new().await;
		let thread = setup_thread(&env).await;

		assert!(env.server.complete_setup_step("o1", SetupStep::Phone, "+15551112222").await.unwrap());
		assert!(!env.server.complete_setup_step("o1", SetupStep::Phone, "+15551112222").await.unwrap());
		assert!(env.server.complete_setup_step("o1", SetupStep::Email, "doc@clinic.test").await.unwrap());
		assert!(last_text(&items(&env, thread.id).await).contains("doc@clinic.test"));
		assert!(env.server.skip_setup_step(thread.id, ThreadItemId::new()).await.unwrap());
		assert_eq!(step(&env, thread.id).await, SETUP_STEP_DONE);

		assert!(!env.server.skip_setup_step(thread.id, ThreadItemId::new()).await.unwrap());
		assert!(!env.server.complete_setup_step("o1", SetupStep::Invite, "").await.unwrap());
		assert_eq!(items(&env, thread.id).await.len(), 4);
	}
}
