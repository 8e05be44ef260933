// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! In-process collaborators. They keep state in memory and record the calls
//! made against them so tests can assert on side effects.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::{
	CarePlan, Care, ClientError, ClientResult, Clients, Directory, Entity, EntityStatus, Media, MediaInfo, Notification,
	Notifications, OwnerType, Payment, Payments, Settings, Visit,
};

fn new_id(prefix: &str) -> String {
	format!("{prefix}_{}", Uuid::new_v4().simple())
}

#[derive(Default)]
pub struct MemoryDirectory {
	entities: RwLock<HashMap<String, Entity>>,
	deleted: Mutex<Vec<String>>,
}

impl MemoryDirectory {
	pub async fn insert(&self, entity: Entity) {
		self.entities.write().await.insert(entity.id.clone(), entity);
	}

	/// Entities removed through [`Directory::delete_entity`], in call order.
	pub async fn deleted(&self) -> Vec<String> {
		self.deleted.lock().await.clone()
	}
}

#[async_trait]
impl Directory for MemoryDirectory {
	async fn lookup_entities(&self, ids: &[String]) -> ClientResult<Vec<Entity>> {
		let entities = self.entities.read().await;
		Ok(ids.iter().filter_map(|id| entities.get(id).cloned()).collect())
	}

	async fn delete_entity(&self, id: &str) -> ClientResult<()> {
		let mut entities = self.entities.write().await;
		let entity = entities
			.get_mut(id)
			.ok_or_else(|| ClientError::NotFound(format!("entity {id}")))?;
		entity.status = EntityStatus::Deleted;
		self.deleted.lock().await.push(id.to_string());
		Ok(())
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaClaim {
	pub media_ids: Vec<String>,
	pub owner_type: OwnerType,
	pub owner_id: String,
}

#[derive(Default)]
pub struct MemoryMedia {
	claims: Mutex<Vec<MediaClaim>>,
	clones: Mutex<Vec<(OwnerType, String, String)>>,
}

impl MemoryMedia {
	pub async fn claims(&self) -> Vec<MediaClaim> {
		self.claims.lock().await.clone()
	}

	/// `(owner type, owner id, source media id)` per clone.
	pub async fn clones(&self) -> Vec<(OwnerType, String, String)> {
		self.clones.lock().await.clone()
	}
}

#[async_trait]
impl Media for MemoryMedia {
	async fn claim_media(&self, media_ids: &[String], owner_type: OwnerType, owner_id: &str) -> ClientResult<()> {
		self.claims.lock().await.push(MediaClaim {
			media_ids: media_ids.to_vec(),
			owner_type,
			owner_id: owner_id.to_string(),
		});
		Ok(())
	}

	async fn clone_media(&self, owner_type: OwnerType, owner_id: &str, media_id: &str) -> ClientResult<MediaInfo> {
		if media_id.is_empty() {
			return Err(ClientError::InvalidArgument("media id is required".to_string()));
		}
		self.clones
			.lock()
			.await
			.push((owner_type, owner_id.to_string(), media_id.to_string()));
		let id = new_id("media");
		Ok(MediaInfo {
			url: format!("https://media.local/{id}"),
			mimetype: "application/octet-stream".to_string(),
			name: format!("copy of {media_id}"),
			id,
		})
	}
}

#[derive(Default)]
pub struct MemoryPayments {
	payments: RwLock<HashMap<String, Payment>>,
}

impl MemoryPayments {
	pub async fn insert(&self, payment: Payment) {
		self.payments.write().await.insert(payment.id.clone(), payment);
	}
}

#[async_trait]
impl Payments for MemoryPayments {
	async fn payment(&self, id: &str) -> ClientResult<Payment> {
		self.payments
			.read()
			.await
			.get(id)
			.cloned()
			.ok_or_else(|| ClientError::NotFound(format!("payment {id}")))
	}

	async fn create_payment(&self, requesting_entity_id: &str, amount: u64, currency: &str) -> ClientResult<Payment> {
		let payment = Payment {
			id: new_id("payment"),
			requesting_entity_id: requesting_entity_id.to_string(),
			amount,
			currency: currency.to_string(),
		};
		self.insert(payment.clone()).await;
		Ok(payment)
	}
}

#[derive(Default)]
pub struct MemoryCare {
	care_plans: RwLock<HashMap<String, CarePlan>>,
	visits: RwLock<HashMap<String, Visit>>,
}

impl MemoryCare {
	pub async fn insert_care_plan(&self, plan: CarePlan) {
		self.care_plans.write().await.insert(plan.id.clone(), plan);
	}

	pub async fn insert_visit(&self, visit: Visit) {
		self.visits.write().await.insert(visit.id.clone(), visit);
	}
}

#[async_trait]
impl Care for MemoryCare {
	async fn care_plan(&self, id: &str) -> ClientResult<CarePlan> {
		self.care_plans
			.read()
			.await
			.get(id)
			.cloned()
			.ok_or_else(|| ClientError::NotFound(format!("care plan {id}")))
	}

	async fn create_care_plan(&self, plan: &CarePlan) -> ClientResult<CarePlan> {
		let plan = CarePlan {
			id: new_id("careplan"),
			..plan.clone()
		};
		self.insert_care_plan(plan.clone()).await;
		Ok(plan)
	}

	async fn visit(&self, id: &str) -> ClientResult<Visit> {
		self.visits
			.read()
			.await
			.get(id)
			.cloned()
			.ok_or_else(|| ClientError::NotFound(format!("visit {id}")))
	}

	async fn create_visit(&self, layout_version_id: &str, name: &str) -> ClientResult<Visit> {
		let visit = Visit {
			id: new_id("visit"),
			name: name.to_string(),
			layout_version_id: layout_version_id.to_string(),
		};
		self.insert_visit(visit.clone()).await;
		Ok(visit)
	}
}

#[derive(Default)]
pub struct MemorySettings {
	values: RwLock<HashMap<(String, String), bool>>,
}

impl MemorySettings {
	pub async fn set_bool(&self, node_id: &str, key: &str, value: bool) {
		self.values
			.write()
			.await
			.insert((node_id.to_string(), key.to_string()), value);
	}
}

#[async_trait]
impl Settings for MemorySettings {
	async fn bool_value(&self, node_id: &str, key: &str) -> ClientResult<Option<bool>> {
		Ok(self
			.values
			.read()
			.await
			.get(&(node_id.to_string(), key.to_string()))
			.copied())
	}
}

#[derive(Default)]
pub struct MemoryNotifications {
	sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifications {
	pub async fn sent(&self) -> Vec<Notification> {
		self.sent.lock().await.clone()
	}
}

#[async_trait]
impl Notifications for MemoryNotifications {
	async fn send(&self, notification: &Notification) -> ClientResult<()> {
		self.sent.lock().await.push(notification.clone());
		Ok(())
	}
}

/// A full set of in-memory collaborators with handles kept for inspection.
#[derive(Default, Clone)]
pub struct MemoryClients {
	pub directory: Arc<MemoryDirectory>,
	pub media: Arc<MemoryMedia>,
	pub payments: Arc<MemoryPayments>,
	pub care: Arc<MemoryCare>,
	pub settings: Arc<MemorySettings>,
	pub notifications: Arc<MemoryNotifications>,
}

impl MemoryClients {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn clients(&self) -> Clients {
		Clients {
			directory: self.directory.clone(),
			media: self.media.clone(),
			payments: self.payments.clone(),
			care: self.care.clone(),
			settings: self.settings.clone(),
			notifications: self.notifications.clone(),
		}
	}
}
