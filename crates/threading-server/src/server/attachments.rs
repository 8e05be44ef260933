// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Copying attachments to a new owner.

use futures::future::try_join_all;
use threading_common_thread::{Attachment, AttachmentData};

use super::{required, ThreadServer};
use crate::api::{CloneAttachmentsRequest, CloneAttachmentsResponse, MessagePost};
use crate::clients::OwnerType;
use crate::error::{Result, ServerError};

impl ThreadServer {
	/// Clones every attachment concurrently. The first failure fails the call.
	#[tracing::instrument(skip(self, req), fields(owner_type = req.owner_type.as_str(), owner_id = %req.owner_id, count = req.attachments.len()))]
	pub async fn clone_attachments(&self, req: CloneAttachmentsRequest) -> Result<CloneAttachmentsResponse> {
		required(&req.owner_id, "OwnerID")?;
		if req.attachments.is_empty() {
			return Err(ServerError::invalid("Attachments are required"));
		}
		let attachments = self
			.clone_all(req.owner_type, &req.owner_id, req.attachments)
			.await?;
		Ok(CloneAttachmentsResponse { attachments })
	}

	pub(crate) async fn clone_all(
		&self,
		owner_type: OwnerType,
		owner_id: &str,
		attachments: Vec<Attachment>,
	) -> Result<Vec<Attachment>> {
		try_join_all(
			attachments
				.into_iter()
				.map(|a| self.clone_attachment(owner_type, owner_id, a)),
		)
		.await
	}

	/// Clones the attachments of each message in place under `owner_id`.
	pub(crate) async fn clone_message_attachments(
		&self,
		owner_type: OwnerType,
		owner_id: &str,
		messages: &mut [MessagePost],
	) -> Result<()> {
		let clones = try_join_all(messages.iter_mut().filter(|m| !m.attachments.is_empty()).map(|m| async move {
			let attachments = std::mem::take(&mut m.attachments);
			m.attachments = self.clone_all(owner_type, owner_id, attachments).await?;
			Ok::<_, ServerError>(())
		}));
		clones.await?;
		Ok(())
	}

	async fn clone_attachment(&self, owner_type: OwnerType, owner_id: &str, mut a: Attachment) -> Result<Attachment> {
		match &mut a.data {
			AttachmentData::Image { media_id, .. }
			| AttachmentData::Video { media_id, .. }
			| AttachmentData::Audio { media_id, .. } => {
				let info = self.clients.media.clone_media(owner_type, owner_id, media_id).await?;
				*media_id = info.id.clone();
				a.content_id = info.id;
				a.url = info.url;
			}
			AttachmentData::Document { media_id, name, .. } => {
				let info = self.clients.media.clone_media(owner_type, owner_id, media_id).await?;
				*media_id = info.id.clone();
				*name = info.name.clone();
				a.title = info.name;
				a.content_id = info.id;
				a.url = info.url;
			}
			AttachmentData::Visit { visit_id, visit_name } => {
				let visit = self.clients.care.visit(visit_id).await?;
				let copy = self.clients.care.create_visit(&visit.layout_version_id, &visit.name).await?;
				*visit_id = copy.id;
				*visit_name = copy.name;
			}
			AttachmentData::PaymentRequest { payment_id } => {
				let payment = self.clients.payments.payment(payment_id).await?;
				let copy = self
					.clients
					.payments
					.create_payment(&payment.requesting_entity_id, payment.amount, &payment.currency)
					.await?;
				*payment_id = copy.id;
			}
			AttachmentData::CarePlan {
				care_plan_id,
				care_plan_name,
			} => {
				let plan = self.clients.care.care_plan(care_plan_id).await?;
				let copy = self.clients.care.create_care_plan(&plan).await?;
				*care_plan_id = copy.id;
				*care_plan_name = copy.name;
			}
		}
		Ok(a)
	}
}
