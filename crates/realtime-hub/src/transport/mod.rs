// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP + WebSocket transport for the messaging fabric.

pub mod http;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::manager::Manager;
use crate::upgrader::ws_upgrade;

/// Build the axum `Router`: the upgrade endpoint, the ambient health
/// surface, and the internal topic-publish endpoint.
pub fn build_router(manager: Arc<Manager>) -> Router {
    Router::new()
        .route("/healthz", get(http::health))
        .route("/ws", get(ws_upgrade))
        .route("/internal/topics/{topic}/publish", post(http::publish_to_topic))
        .layer(CorsLayer::permissive())
        .with_state(manager)
}
