// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Links into the web app, embedded in onboarding messages.

use threading_common_thread::ThreadId;

pub fn thread_url(web_domain: &str, organization_id: &str, thread_id: ThreadId) -> String {
	format!("https://{web_domain}/org/{organization_id}/thread/{thread_id}")
}

pub fn org_settings_phone_url(web_domain: &str, organization_id: &str) -> String {
	format!("https://{web_domain}/org/{organization_id}/settings/phone")
}

pub fn org_settings_email_url(web_domain: &str, organization_id: &str) -> String {
	format!("https://{web_domain}/org/{organization_id}/settings/email")
}

pub fn org_colleague_invite_url(web_domain: &str, organization_id: &str) -> String {
	format!("https://{web_domain}/org/{organization_id}/invite")
}

/// Link that makes the app report `event` and reload the thread it was
/// tapped in.
pub fn post_event_url(web_domain: &str, organization_id: &str, event: &str) -> String {
	format!("https://{web_domain}/post_event?name={event}&org_id={organization_id}&refresh_thread=1")
}
