// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Saved-query expressions and their evaluation against a thread.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use threading_common_id::SavedQueryId;

use crate::model::{Thread, ThreadEntity, ThreadType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExprFlag {
	Unread,
	UnreadReference,
	Following,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExprThreadType {
	Patient,
	PatientSecure,
	PatientStandard,
	Team,
	Support,
}

impl ExprThreadType {
	pub fn matches(&self, t: ThreadType) -> bool {
		match self {
			ExprThreadType::Patient => t.is_patient(),
			ExprThreadType::PatientSecure => t == ThreadType::SecureExternal,
			ExprThreadType::PatientStandard => t == ThreadType::External,
			ExprThreadType::Team => t.is_team(),
			ExprThreadType::Support => matches!(t, ThreadType::Support | ThreadType::Setup),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExprValue {
	Flag(ExprFlag),
	ThreadType(ExprThreadType),
	Token(String),
	Tag(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
	#[serde(default)]
	pub not: bool,
	pub value: ExprValue,
}

impl Expr {
	pub fn new(value: ExprValue) -> Self {
		Self { not: false, value }
	}

	pub fn negated(value: ExprValue) -> Self {
		Self { not: true, value }
	}
}

/// A conjunction of expressions. The empty query matches every thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
	#[serde(default)]
	pub expressions: Vec<Expr>,
}

impl Query {
	pub fn new(expressions: Vec<Expr>) -> Self {
		Self { expressions }
	}

	/// Evaluates the query for a viewer. `te` is the viewer's membership row in
	/// the thread if one exists; `external` selects the patient-facing
	/// timestamps and summary.
	pub fn matches(&self, thread: &Thread, te: Option<&ThreadEntity>, external: bool) -> bool {
		self.expressions.iter().all(|e| {
			let m = match &e.value {
				ExprValue::Flag(ExprFlag::Unread) => is_unread(thread, te, external),
				ExprValue::Flag(ExprFlag::UnreadReference) => has_unread_reference(te),
				ExprValue::Flag(ExprFlag::Following) => te.map(|te| te.following).unwrap_or(false),
				ExprValue::ThreadType(tt) => tt.matches(thread.thread_type),
				ExprValue::Token(token) => {
					let token = token.to_lowercase();
					[
						thread.system_title.as_str(),
						thread.user_title.as_str(),
						thread.last_summary(external),
					]
					.iter()
					.any(|field| field.to_lowercase().contains(&token))
				}
				ExprValue::Tag(tag) => thread.tags.iter().any(|t| t.name.eq_ignore_ascii_case(tag)),
			};
			m != e.not
		})
	}
}

/// Truncates to whole seconds. Read state is compared at second precision
/// because clients report view times with that resolution.
pub fn truncate_to_second(t: DateTime<Utc>) -> DateTime<Utc> {
	t.duration_trunc(TimeDelta::seconds(1)).unwrap_or(t)
}

/// A thread is unread for a viewer if it has messages and the viewer has not
/// viewed it since the last one.
pub fn is_unread(thread: &Thread, te: Option<&ThreadEntity>, external: bool) -> bool {
	if thread.message_count == 0 {
		return false;
	}
	let Some(last_viewed) = te.and_then(|te| te.last_viewed) else {
		return true;
	};
	truncate_to_second(last_viewed) < truncate_to_second(thread.last_timestamp(external))
}

pub fn has_unread_reference(te: Option<&ThreadEntity>) -> bool {
	match te {
		Some(ThreadEntity {
			last_referenced: Some(referenced),
			last_viewed,
			..
		}) => last_viewed.map(|v| v < *referenced).unwrap_or(true),
		_ => false,
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SavedQueryType {
	#[default]
	Normal,
	Notifications,
}

impl SavedQueryType {
	pub fn as_str(&self) -> &'static str {
		match self {
			SavedQueryType::Normal => "NORMAL",
			SavedQueryType::Notifications => "NOTIFICATIONS",
		}
	}
}

impl std::str::FromStr for SavedQueryType {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"NORMAL" => Ok(SavedQueryType::Normal),
			"NOTIFICATIONS" => Ok(SavedQueryType::Notifications),
			_ => Err(format!("unknown saved query type '{s}'")),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedQuery {
	pub id: SavedQueryId,
	pub ordinal: i64,
	pub short_title: String,
	pub long_title: String,
	pub description: String,
	pub entity_id: String,
	pub query: Query,
	pub unread: i64,
	pub total: i64,
	pub hidden: bool,
	pub notifications_enabled: bool,
	#[serde(rename = "type")]
	pub sq_type: SavedQueryType,
	pub created: DateTime<Utc>,
	pub modified: DateTime<Utc>,
	pub template: bool,
}

impl SavedQuery {
	#[allow(clippy::too_many_arguments)]
	fn template(
		sq_type: SavedQueryType,
		short_title: &str,
		long_title: &str,
		description: &str,
		ordinal: i64,
		notifications_enabled: bool,
		hidden: bool,
		query: Query,
	) -> Self {
		let epoch = DateTime::<Utc>::default();
		Self {
			id: SavedQueryId::empty(),
			ordinal,
			short_title: short_title.to_string(),
			long_title: long_title.to_string(),
			description: description.to_string(),
			entity_id: String::new(),
			query,
			unread: 0,
			total: 0,
			hidden,
			notifications_enabled,
			sq_type,
			created: epoch,
			modified: epoch,
			template: true,
		}
	}
}

/// The saved queries every internal entity starts with unless its
/// organization defines its own templates.
pub fn default_saved_queries() -> Vec<SavedQuery> {
	use SavedQueryType::{Normal, Notifications};
	let thread_type = |t| Query::new(vec![Expr::new(ExprValue::ThreadType(t))]);
	let flag = |f| Query::new(vec![Expr::new(ExprValue::Flag(f))]);
	vec![
		SavedQuery::template(
			Normal,
			"All",
			"All Conversations",
			"Any new activity in any conversation",
			1000,
			false,
			false,
			Query::default(),
		),
		SavedQuery::template(
			Normal,
			"Patient",
			"All Patient Conversations",
			"Any new activity in a patient conversation",
			2000,
			true,
			false,
			thread_type(ExprThreadType::Patient),
		),
		SavedQuery::template(
			Normal,
			"Team",
			"Team Conversations",
			"New messages in team conversations",
			3000,
			true,
			false,
			thread_type(ExprThreadType::Team),
		),
		SavedQuery::template(
			Normal,
			"@Pages",
			"@ Pages",
			"When you're @ paged in a message",
			4000,
			true,
			false,
			flag(ExprFlag::UnreadReference),
		),
		SavedQuery::template(
			Normal,
			"Following",
			"Patient Conversations You Follow",
			"New activity in patient conversations you are currently following",
			5000,
			true,
			false,
			flag(ExprFlag::Following),
		),
		SavedQuery::template(
			Normal,
			"Support",
			"Spruce Support",
			"New messages in the Spruce Support conversation",
			6000,
			true,
			true,
			thread_type(ExprThreadType::Support),
		),
		SavedQuery::template(
			Notifications,
			"Notifications",
			"Notifications",
			"Hidden query to populate an accurate count of notifications",
			1_000_000_000,
			false,
			true,
			Query::default(),
		),
	]
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::model::Tag;
	use chrono::Duration;
	use threading_common_id::ThreadId;

	fn entity(last_viewed: Option<DateTime<Utc>>) -> ThreadEntity {
		ThreadEntity {
			thread_id: ThreadId::from_value(1),
			entity_id: "e1".into(),
			member: true,
			following: false,
			joined: Utc::now(),
			last_viewed,
			last_unread_notify: None,
			last_referenced: None,
		}
	}

	fn q(value: ExprValue) -> Query {
		Query::new(vec![Expr::new(value)])
	}

	fn not(value: ExprValue) -> Query {
		Query::new(vec![Expr::negated(value)])
	}

	fn with_messages(at: DateTime<Utc>) -> Thread {
		let mut t = Thread::new("org", ThreadType::External);
		t.message_count = 1;
		t.last_message_timestamp = at;
		t
	}

	#[test]
	fn token_matches_titles_and_summary_case_insensitively() {
		let mut t = Thread::new("org", ThreadType::Team);
		t.system_title = "Joe".into();
		assert!(q(ExprValue::Token("jo".into())).matches(&t, None, false));
		let mut t = Thread::new("org", ThreadType::Team);
		t.last_message_summary = "Joe".into();
		assert!(q(ExprValue::Token("OE".into())).matches(&t, None, false));
		let mut t = Thread::new("org", ThreadType::Team);
		t.last_external_message_summary = "Joe".into();
		assert!(q(ExprValue::Token("oe".into())).matches(&t, None, true));
		assert!(!q(ExprValue::Token("oe".into())).matches(&t, None, false));
	}

	#[test]
	fn negated_token() {
		let mut t = Thread::new("org", ThreadType::Team);
		t.system_title = "Bob".into();
		assert!(not(ExprValue::Token("Jo".into())).matches(&t, None, false));
		t.system_title = "Joe".into();
		assert!(!not(ExprValue::Token("Jo".into())).matches(&t, None, false));
	}

	#[test]
	fn tag_match_is_case_insensitive() {
		let mut t = Thread::new("org", ThreadType::Team);
		t.tags = vec![Tag::new("FOO")];
		assert!(q(ExprValue::Tag("foo".into())).matches(&t, None, false));
		assert!(!q(ExprValue::Tag("bar".into())).matches(&t, None, false));
	}

	#[test]
	fn unread_semantics() {
		let now = Utc::now();
		let t = with_messages(now);
		assert!(is_unread(&t, None, false));
		assert!(is_unread(&t, Some(&entity(None)), false));
		assert!(is_unread(&t, Some(&entity(Some(now - Duration::seconds(1)))), false));
		assert!(!is_unread(&t, Some(&entity(Some(now))), false));
		let empty = Thread::new("org", ThreadType::External);
		assert!(!is_unread(&empty, None, false));
		assert!(not(ExprValue::Flag(ExprFlag::Unread)).matches(&empty, None, false));
	}

	#[test]
	fn unread_ignores_sub_second_differences() {
		let base = DateTime::<Utc>::from_timestamp(50, 0).unwrap();
		let t = with_messages(DateTime::<Utc>::from_timestamp(50, 100).unwrap());
		assert!(!is_unread(&t, Some(&entity(Some(base))), false));
	}

	#[test]
	fn unread_reference_and_following() {
		let now = Utc::now();
		let t = with_messages(now);
		let mut te = entity(None);
		te.last_referenced = Some(now);
		assert!(q(ExprValue::Flag(ExprFlag::UnreadReference)).matches(&t, Some(&te), false));
		te.last_viewed = Some(now - Duration::seconds(1));
		assert!(q(ExprValue::Flag(ExprFlag::UnreadReference)).matches(&t, Some(&te), false));
		te.last_viewed = Some(now);
		assert!(!q(ExprValue::Flag(ExprFlag::UnreadReference)).matches(&t, Some(&te), false));
		assert!(!q(ExprValue::Flag(ExprFlag::UnreadReference)).matches(&t, None, false));

		assert!(!q(ExprValue::Flag(ExprFlag::Following)).matches(&t, None, false));
		te.following = true;
		assert!(q(ExprValue::Flag(ExprFlag::Following)).matches(&t, Some(&te), false));
	}

	#[test]
	fn thread_type_atoms() {
		let t = |tt| Thread::new("org", tt);
		let patient = q(ExprValue::ThreadType(ExprThreadType::Patient));
		assert!(patient.matches(&t(ThreadType::SecureExternal), None, false));
		assert!(patient.matches(&t(ThreadType::External), None, false));
		assert!(!patient.matches(&t(ThreadType::Team), None, false));
		let team = q(ExprValue::ThreadType(ExprThreadType::Team));
		assert!(team.matches(&t(ThreadType::Team), None, false));
		assert!(team.matches(&t(ThreadType::LegacyTeam), None, false));
		let support = q(ExprValue::ThreadType(ExprThreadType::Support));
		assert!(support.matches(&t(ThreadType::Support), None, false));
		assert!(support.matches(&t(ThreadType::Setup), None, false));
		assert!(!support.matches(&t(ThreadType::External), None, false));
		let secure = q(ExprValue::ThreadType(ExprThreadType::PatientSecure));
		assert!(secure.matches(&t(ThreadType::SecureExternal), None, false));
		assert!(!secure.matches(&t(ThreadType::External), None, false));
	}

	#[test]
	fn empty_query_matches_everything() {
		assert!(Query::default().matches(&Thread::new("org", ThreadType::Team), None, false));
	}

	#[test]
	fn default_templates() {
		let defaults = default_saved_queries();
		assert_eq!(defaults.len(), 7);
		let notifications: Vec<_> = defaults
			.iter()
			.filter(|sq| sq.sq_type == SavedQueryType::Notifications)
			.collect();
		assert_eq!(notifications.len(), 1);
		assert_eq!(notifications[0].ordinal, 1_000_000_000);
		assert!(notifications[0].hidden);
		let ordinals: Vec<_> = defaults.iter().map(|sq| sq.ordinal).collect();
		let mut sorted = ordinals.clone();
		sorted.sort();
		assert_eq!(ordinals, sorted);
		assert!(defaults.iter().all(|sq| sq.template));
	}

	#[test]
	fn query_serializes_as_tagged_values() {
		let query = Query::new(vec![
			Expr::new(ExprValue::Flag(ExprFlag::Unread)),
			Expr::negated(ExprValue::ThreadType(ExprThreadType::Team)),
		]);
		let json = serde_json::to_value(&query).unwrap();
		assert_eq!(json["expressions"][0]["value"]["flag"], "UNREAD");
		assert_eq!(json["expressions"][1]["not"], true);
		let back: Query = serde_json::from_value(json).unwrap();
		assert_eq!(back, query);
	}
}
