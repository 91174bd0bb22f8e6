// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP -> WebSocket transition: extract user id, call the
//! validator, check the origin allow-list, construct the `Client`, hand it
//! to the Hub, then send the welcome frame.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::client::{self, ClientParams};
use crate::connection;
use crate::error::HubError;
use crate::manager::Manager;
use crate::model::{epoch_ms, now_rfc3339, ClientMetadata, OutboundEnvelope};

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    pub user_id: String,
    pub device_id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub device_type: Option<String>,
}

/// `GET /ws?user_id=<uuid>&device_id=<string>`.
pub async fn ws_upgrade(
    State(manager): State<Arc<Manager>>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let user_id = match Uuid::parse_str(&query.user_id) {
        Ok(id) => id,
        Err(_) => {
            let (status, body) = HubError::InvalidUserId.to_http_response("invalid user_id");
            return (status, body).into_response();
        }
    };

    match manager.validator.user_exists(user_id).await {
        Ok(true) => {}
        Ok(false) => {
            let (status, body) = HubError::UserNotFound.to_http_response("unknown user");
            return (status, body).into_response();
        }
        Err(_) => {
            let (status, body) = HubError::UpstreamError.to_http_response("user validation failed");
            return (status, body).into_response();
        }
    }

    let origin = headers.get(axum::http::header::ORIGIN).and_then(|v| v.to_str().ok());
    if !origin_allowed(origin, &manager.config.allowed_origins, manager.config.check_origin) {
        let (status, body) = HubError::Unauthorized.to_http_response("origin not allowed");
        return (status, body).into_response();
    }

    let metadata = ClientMetadata {
        ip: headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()).map(String::from),
        user_agent: headers.get(axum::http::header::USER_AGENT).and_then(|v| v.to_str().ok()).map(String::from),
        platform: headers.get("x-platform").and_then(|v| v.to_str().ok()).map(String::from),
        app_version: headers.get("x-app-version").and_then(|v| v.to_str().ok()).map(String::from),
        device_name: query.device_name.clone(),
        device_type: query.device_type.clone(),
    };

    let device_id = query.device_id.clone();
    let max_message_size = manager.config.max_message_size;

    ws.max_message_size(max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, manager, user_id, device_id, metadata))
}

/// Exact match, or suffix match when the allow-list entry begins with `*`.
/// An empty allow-list with `check_origin = true` denies everything.
fn origin_allowed(origin: Option<&str>, allowed: &[String], check_origin: bool) -> bool {
    if !check_origin {
        return true;
    }
    let Some(origin) = origin else { return false };
    allowed.iter().any(|entry| match entry.strip_prefix('*') {
        Some(suffix) => origin.ends_with(suffix),
        None => origin == entry,
    })
}

async fn handle_socket(
    socket: axum::extract::ws::WebSocket,
    manager: Arc<Manager>,
    user_id: Uuid,
    device_id: String,
    metadata: ClientMetadata,
) {
    let (reader, writer) = connection::split(socket);
    let params = ClientParams {
        user_id,
        device_id,
        metadata,
        connected_at_ms: epoch_ms(),
        outbound_queue_capacity: manager.config.outbound_queue_capacity,
        ping_period: manager.config.ping_period(),
        pong_wait: manager.config.pong_wait(),
        write_wait: manager.config.write_wait(),
        close_grace_period: manager.config.close_grace_period(),
    };

    let (client, pumps) =
        client::new(reader, writer, params, manager.hub.unregister_sender(), Arc::clone(&manager.router));
    // Register before the pumps start: the read pump is the only thing that
    // can enqueue an unregister for this client, so this ordering guarantees
    // the Hub never applies an unregister before the matching register.
    manager.hub.register(Arc::clone(&client)).await;
    pumps.start(Arc::clone(&client));

    let welcome = OutboundEnvelope::new(
        "connected",
        serde_json::json!({ "client_id": client.id, "timestamp": now_rfc3339() }),
    );
    let _ = client.send_message(welcome).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_origin_match() {
        let allowed = vec!["https://app.example.com".to_owned()];
        assert!(origin_allowed(Some("https://app.example.com"), &allowed, true));
        assert!(!origin_allowed(Some("https://evil.example.com"), &allowed, true));
    }

    #[test]
    fn suffix_origin_match() {
        let allowed = vec!["*.example.com".to_owned()];
        assert!(origin_allowed(Some("https://app.example.com"), &allowed, true));
        assert!(!origin_allowed(Some("https://example.org"), &allowed, true));
    }

    #[test]
    fn check_disabled_allows_everything() {
        assert!(origin_allowed(None, &[], false));
    }

    #[test]
    fn empty_allow_list_with_check_enabled_denies_all() {
        assert!(!origin_allowed(Some("https://app.example.com"), &[], true));
    }
}
