// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use threading_common_thread::{default_saved_queries, Query, SavedQuery, SavedQueryId};
use threading_server_db::SavedQueryUpdate;

use super::{required, ThreadServer};
use crate::api::{
	CreateSavedQueryRequest, DeleteSavedQueryRequest, EmptyResponse, SavedQueriesRequest, SavedQueriesResponse,
	SavedQueryRequest, SavedQueryResponse, SavedQueryTemplatesRequest, SavedQueryView, UpdateSavedQueryRequest,
};
use crate::error::{Result, ServerError};

impl ThreadServer {
	#[tracing::instrument(skip(self, req), fields(saved_query_id = %req.saved_query_id))]
	pub async fn saved_query(&self, req: SavedQueryRequest) -> Result<SavedQueryResponse> {
		let sq = self.dal.saved_query(req.saved_query_id, &[]).await?;
		Ok(SavedQueryResponse { saved_query: sq.into() })
	}

	#[tracing::instrument(skip(self, req), fields(entity_id = %req.entity_id))]
	pub async fn saved_queries(&self, req: SavedQueriesRequest) -> Result<SavedQueriesResponse> {
		required(&req.entity_id, "EntityID")?;
		let saved_queries = self.dal.saved_queries(&req.entity_id).await?;
		Ok(SavedQueriesResponse {
			saved_queries: saved_queries.into_iter().map(Into::into).collect(),
		})
	}

	/// The entity's own template rows, or the built-in defaults when it has
	/// none.
	#[tracing::instrument(skip(self, req), fields(entity_id = %req.entity_id))]
	pub async fn saved_query_templates(&self, req: SavedQueryTemplatesRequest) -> Result<SavedQueriesResponse> {
		required(&req.entity_id, "EntityID")?;
		let templates = self.dal.saved_query_templates(&req.entity_id).await?;
		if !templates.is_empty() {
			return Ok(SavedQueriesResponse {
				saved_queries: templates.into_iter().map(Into::into).collect(),
			});
		}
		let saved_queries = default_saved_queries()
			.into_iter()
			.map(|sq| {
				let mut view = SavedQueryView::from(sq);
				view.id = format!("default-{}", view.short_title);
				view.entity_id = req.entity_id.clone();
				view.template = true;
				view.default_template = true;
				view
			})
			.collect();
		Ok(SavedQueriesResponse { saved_queries })
	}

	/// Creates a saved query and builds its index. An entity has at most one
	/// notifications query.
	#[tracing::instrument(skip(self, req), fields(entity_id = %req.entity_id, sq_type = req.sq_type.as_str()))]
	pub async fn create_saved_query(&self, req: CreateSavedQueryRequest) -> Result<SavedQueryResponse> {
		required(&req.entity_id, "EntityID")?;
		required(&req.short_title, "ShortTitle")?;
		let now = self.now();
		let sq = SavedQuery {
			id: SavedQueryId::empty(),
			ordinal: req.ordinal,
			short_title: req.short_title,
			long_title: req.long_title,
			description: req.description,
			entity_id: req.entity_id,
			query: req.query.unwrap_or_else(|| Query::new(Vec::new())),
			unread: 0,
			total: 0,
			hidden: req.hidden,
			notifications_enabled: req.notifications_enabled,
			sq_type: req.sq_type,
			created: now,
			modified: now,
			template: req.template,
		};
		let id = self.dal.create_saved_query(&sq).await.map_err(|e| match e {
			threading_server_db::DbError::Conflict(msg) => ServerError::AlreadyExists(msg),
			e => e.into(),
		})?;
		let sq = self.dal.saved_query(id, &[]).await?;
		if !sq.template {
			self.indexer.rebuild_saved_query(&sq).await?;
			self.refresh_badges("", &[sq.entity_id.clone()]).await;
		}
		tracing::info!(saved_query_id = %id, "saved query created");

		let sq = self.dal.saved_query(id, &[]).await?;
		Ok(SavedQueryResponse { saved_query: sq.into() })
	}

	/// Applies the changed fields. A new query, a notifications toggle or an
	/// explicit request rebuilds the index.
	#[tracing::instrument(skip(self, req), fields(saved_query_id = %req.saved_query_id))]
	pub async fn update_saved_query(&self, req: UpdateSavedQueryRequest) -> Result<SavedQueryResponse> {
		let existing = self.dal.saved_query(req.saved_query_id, &[]).await?;
		if let Some(title) = &req.short_title {
			required(title, "ShortTitle")?;
		}
		let query_changed = req.query.as_ref().is_some_and(|q| *q != existing.query);
		let notifications_changed = req
			.notifications_enabled
			.is_some_and(|n| n != existing.notifications_enabled);

		let update = SavedQueryUpdate {
			ordinal: req.ordinal,
			short_title: req.short_title,
			long_title: req.long_title,
			description: req.description,
			query: req.query,
			hidden: req.hidden,
			notifications_enabled: req.notifications_enabled,
		};
		self.dal.update_saved_query(existing.id, &update).await?;
		let sq = self.dal.saved_query(existing.id, &[]).await?;

		if !sq.template {
			if query_changed || req.force_rebuild {
				self.indexer.rebuild_saved_query(&sq).await?;
				self.refresh_badges("", &[sq.entity_id.clone()]).await;
			} else if notifications_changed {
				self.dal.rebuild_notifications_saved_query(&sq.entity_id).await?;
				self.refresh_badges("", &[sq.entity_id.clone()]).await;
			}
		}

		let sq = self.dal.saved_query(existing.id, &[]).await?;
		Ok(SavedQueryResponse { saved_query: sq.into() })
	}

	#[tracing::instrument(skip(self, req), fields(count = req.saved_query_ids.len()))]
	pub async fn delete_saved_query(&self, req: DeleteSavedQueryRequest) -> Result<EmptyResponse> {
		if req.saved_query_ids.is_empty() {
			return Err(ServerError::invalid("SavedQueryIDs are required"));
		}
		let mut owners = Vec::new();
		for id in &req.saved_query_ids {
			match self.dal.saved_query(*id, &[]).await {
				Ok(sq) if !owners.contains(&sq.entity_id) => owners.push(sq.entity_id),
				Ok(_) => {}
				Err(e) if e.is_not_found() => {}
				Err(e) => return Err(e.into()),
			}
		}
		let deleted = self.dal.delete_saved_queries(&req.saved_query_ids).await?;
		tracing::info!(deleted, "saved queries deleted");

		for entity_id in &owners {
			if self.dal.notifications_saved_query(entity_id).await?.is_some() {
				self.dal.rebuild_notifications_saved_query(entity_id).await?;
			}
		}
		if !owners.is_empty() {
			self.refresh_badges("", &owners).await;
		}
		Ok(EmptyResponse::default())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Duration;
	use threading_common_thread::{Expr, ExprFlag, ExprThreadType, ExprValue, SavedQueryType};
	use threading_server_db::Iteration;

	use crate::api::{MarkThreadAsReadRequest, MessagePost, PostMessageRequest};
	use crate::testing::{app_source, TestEnv};

	fn saved_query(entity_id: &str, title: &str, query: Query) -> CreateSavedQueryRequest {
		CreateSavedQueryRequest {
			entity_id: entity_id.to_string(),
			short_title: title.to_string(),
			query: Some(query),
			..Default::default()
		}
	}

	fn patient_query() -> Vec<Expr> {
		vec![Expr::new(ExprValue::ThreadType(ExprThreadType::Patient))]
	}

	async fn post_from_patient(env: &TestEnv, thread_id: threading_common_thread::ThreadId) {
		env.server
			.post_message(PostMessageRequest {
				thread_id,
				from_entity_id: "p1".to_string(),
				message: MessagePost {
					text: "hello".to_string(),
					source: app_source("p1"),
					..Default::default()
				},
				..Default::default()
			})
			.await
			.unwrap();
	}

	#[tokio::test]
	async fn posted_thread_appears_unread_in_matching_query() {
		let env = TestEnv::new().await;
		let mut exprs = patient_query();
		exprs.push(Expr::new(ExprValue::Flag(ExprFlag::Unread)));
		let sq = env
			.server
			.create_saved_query(saved_query("a1", "Unread patients", Query::new(exprs)))
			.await
			.unwrap()
			.saved_query;
		let sq_id: SavedQueryId = sq.id.parse().unwrap();

		let thread = env.patient_thread().await;
		post_from_patient(&env, thread.id).await;

		let page = env
			.server
			.dal()
			.iterate_threads_in_saved_query(sq_id, "a1", &Iteration::default())
			.await
			.unwrap();
		let items = page.into_items();
		assert_eq!(items.len(), 1);
		assert_eq!(items[0].thread.id, thread.id);
		assert!(items[0].unread);

		let sq = env.server.dal().saved_query(sq_id, &[]).await.unwrap();
		assert_eq!((sq.unread, sq.total), (1, 1));
	}

	#[tokio::test]
	async fn reading_clears_unread_but_keeps_thread_indexed() {
		let env = TestEnv::new().await;
		let sq = env
			.server
			.create_saved_query(saved_query("a1", "Patients", Query::new(patient_query())))
			.await
			.unwrap()
			.saved_query;
		let sq_id: SavedQueryId = sq.id.parse().unwrap();
		let thread = env.patient_thread().await;
		post_from_patient(&env, thread.id).await;

		env.clock.advance(Duration::seconds(1));
		env.server
			.mark_thread_as_read(MarkThreadAsReadRequest {
				thread_id: thread.id,
				actor_entity_id: "a1".to_string(),
				timestamp: None,
			})
			.await
			.unwrap();

		let items = env
			.server
			.dal()
			.iterate_threads_in_saved_query(sq_id, "a1", &Iteration::default())
			.await
			.unwrap()
			.into_items();
		assert_eq!(items.len(), 1);
		assert!(!items[0].unread);
		let sq = env.server.dal().saved_query(sq_id, &[]).await.unwrap();
		assert_eq!((sq.unread, sq.total), (0, 1));
	}

	#[tokio::test]
	async fn new_query_is_built_from_existing_threads() {
		let env = TestEnv::new().await;
		let thread = env.patient_thread().await;
		post_from_patient(&env, thread.id).await;
		env.team_thread(&["a1"]).await;

		let sq = env
			.server
			.create_saved_query(saved_query("a1", "Patients", Query::new(patient_query())))
			.await
			.unwrap()
			.saved_query;
		assert_eq!(sq.total, 1);

		let sq_id: SavedQueryId = sq.id.parse().unwrap();
		let updated = env
			.server
			.update_saved_query(UpdateSavedQueryRequest {
				saved_query_id: sq_id,
				query: Some(Query::new(Vec::new())),
				..Default::default()
			})
			.await
			.unwrap()
			.saved_query;
		assert_eq!(updated.total, 2);
	}

	#[tokio::test]
	async fn second_notifications_query_is_rejected() {
		let env = TestEnv::new().await;
		let req = CreateSavedQueryRequest {
			sq_type: SavedQueryType::Notifications,
			..saved_query("a1", "Notifications", Query::new(Vec::new()))
		};
		env.server.create_saved_query(req.clone()).await.unwrap();
		let err = env.server.create_saved_query(req).await.unwrap_err();
		assert!(matches!(err, ServerError::AlreadyExists(_)));
	}

	#[tokio::test]
	async fn templates_fall_back_to_defaults() {
		let env = TestEnv::new().await;
		let resp = env
			.server
			.saved_query_templates(SavedQueryTemplatesRequest {
				entity_id: "a1".to_string(),
			})
			.await
			.unwrap();
		assert!(!resp.saved_queries.is_empty());
		let all = &resp.saved_queries[0];
		assert_eq!(all.id, "default-All");
		assert!(all.template && all.default_template);

		env.server
			.create_saved_query(CreateSavedQueryRequest {
				template: true,
				..saved_query("a1", "Mine", Query::new(Vec::new()))
			})
			.await
			.unwrap();
		let resp = env
			.server
			.saved_query_templates(SavedQueryTemplatesRequest {
				entity_id: "a1".to_string(),
			})
			.await
			.unwrap();
		assert_eq!(resp.saved_queries.len(), 1);
		assert_eq!(resp.saved_queries[0].short_title, "Mine");
		assert!(!resp.saved_queries[0].default_template);
	}

	#[tokio::test]
	async fn delete_removes_queries() {
		let env = TestEnv::new().await;
		let sq = env
			.server
			.create_saved_query(saved_query("a1", "Patients", Query::new(patient_query())))
			.await
			.unwrap()
			.saved_query;
		let sq_id: SavedQueryId = sq.id.parse().unwrap();
		env.server
			.delete_saved_query(DeleteSavedQueryRequest {
				saved_query_ids: vec![sq_id],
			})
			.await
			.unwrap();
		let err = env
			.server
			.saved_query(SavedQueryRequest { saved_query_id: sq_id })
			.await
			.unwrap_err();
		assert!(err.is_not_found());
	}
}
