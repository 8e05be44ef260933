// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Threading service.
//!
//! The [`ThreadServer`] owns every read and write on threads and the records
//! hanging off them. Around it sit the background jobs that send scheduled
//! messages and work through batch tasks, the event workers that post
//! triggered messages and drive onboarding threads, and an HTTP surface that
//! exposes each server operation as `POST /rpc/<Method>`.

pub mod api;
pub mod clients;
pub mod deeplink;
pub mod error;
pub mod health;
pub mod indexer;
pub mod jobs;
pub mod notify;
pub mod routes;
pub mod server;
pub mod workers;

pub use error::{Result, ServerError};
pub use routes::{create_router, AppState};
pub use server::ThreadServer;
pub use threading_server_config::ServerConfig;
