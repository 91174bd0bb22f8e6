// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the messaging fabric: the ambient health surface plus
//! the internal topic-publish endpoint upstream services use to push events
//! into the fabric without holding a client connection open.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::manager::Manager;
use crate::model::OutboundEnvelope;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub connected_clients: usize,
    pub online_users: usize,
}

/// `GET /healthz`. Not part of the client wire protocol; gives load
/// balancers and orchestrators a liveness probe, plus the online-user and
/// connected-device counts operators watch for fleet-wide capacity.
pub async fn health(State(manager): State<Arc<Manager>>) -> impl IntoResponse {
    let connected_clients = manager.hub.connected_client_count().await;
    let online_users = manager.hub.online_user_count().await;
    Json(HealthResponse { status: "ok", connected_clients, online_users })
}

#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Skip this connection, the way the Hub's own typing/receipt fan-out
    /// excludes the originating client. Lets a publishing service avoid
    /// echoing an event back to the connection that caused it.
    #[serde(default)]
    pub exclude_client_id: Option<uuid::Uuid>,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    pub topic: String,
    pub delivered_to: usize,
}

/// `POST /internal/topics/{topic}/publish`. Fans `body` out to every client
/// currently subscribed to `topic`. Used by services that hold no WebSocket
/// connection of their own (a message store notifying conversation
/// participants of a new message, for example).
pub async fn publish_to_topic(
    State(manager): State<Arc<Manager>>,
    Path(topic): Path<String>,
    Json(body): Json<PublishRequest>,
) -> impl IntoResponse {
    let envelope = OutboundEnvelope::new(body.kind, body.payload);
    let delivered_to = manager.publish_to_topic(&topic, envelope, body.exclude_client_id).await;
    Json(PublishResponse { topic, delivered_to })
}
