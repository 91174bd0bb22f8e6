// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Type-dispatched inbound envelope handling. Messages whose
//! `type` has no registered handler are logged and dropped, never surfaced
//! to the client as an error.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

use crate::client::Client;
use crate::collaborators::{ContactResolver, ConversationResolver, PresenceStore};
use crate::hub::Hub;
use crate::model::{
    now_rfc3339, parse_uuid_list, split_csv, InboundEnvelope, OutboundEnvelope, PresenceStatus,
    PresenceView, UserId,
};
use crate::presence::{apply_privacy, PresenceTracker};
use crate::subscription::{conversation_topic, SubscriptionIndex};
use crate::typing::TypingManager;

/// Handles one parsed inbound envelope for one client. Implemented by
/// [`Dispatcher`]; kept as a trait so `Client` doesn't need to know about the
/// hub, subscriptions, presence, or typing concretely.
#[async_trait]
pub trait MessageRouter: Send + Sync {
    async fn route(&self, client: Arc<Client>, envelope: InboundEnvelope);
}

/// Wires the reserved message types to the Hub, Subscription index, Presence
/// tracker, and Typing manager.
pub struct Dispatcher {
    pub hub: Arc<Hub>,
    pub subscriptions: Arc<SubscriptionIndex>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingManager>,
    pub presence_store: Arc<dyn PresenceStore>,
    pub contacts: Arc<dyn ContactResolver>,
    pub conversations: Arc<dyn ConversationResolver>,
}

impl Dispatcher {
    async fn reply(&self, client: &Arc<Client>, envelope: OutboundEnvelope) {
        let _ = client.send_message(envelope).await;
    }

    async fn reply_error(&self, client: &Arc<Client>, code: &str, message: &str, request_id: Option<String>) {
        self.reply(client, OutboundEnvelope::error(code, message, request_id)).await;
    }

    /// Resolve a set of users to the client ids of their active devices,
    /// used for conversation-scoped fan-out (typing, read/delivery receipts).
    async fn participant_client_ids(&self, user_ids: &[UserId]) -> Vec<uuid::Uuid> {
        let mut ids = Vec::new();
        for user_id in user_ids {
            for device in self.hub.active_devices(*user_id).await {
                ids.push(device.client_id);
            }
        }
        ids
    }

    async fn handle_ping(&self, client: &Arc<Client>, request_id: Option<String>) {
        let env = OutboundEnvelope::new("pong", serde_json::json!({ "timestamp": now_rfc3339() }))
            .with_request_id(request_id);
        self.reply(client, env).await;
    }

    async fn handle_subscribe(&self, client: &Arc<Client>, envelope: &InboundEnvelope) {
        let topics = topics_from_payload(&envelope.payload);
        for topic in &topics {
            self.subscriptions.subscribe(client.id, topic.clone());
        }
        let env = OutboundEnvelope::new("subscribed", serde_json::json!({ "topics": topics }))
            .with_request_id(envelope.id.clone());
        self.reply(client, env).await;
    }

    async fn handle_unsubscribe(&self, client: &Arc<Client>, envelope: &InboundEnvelope) {
        let topics = topics_from_payload(&envelope.payload);
        for topic in &topics {
            self.subscriptions.unsubscribe(client.id, topic);
        }
        let env = OutboundEnvelope::new("unsubscribed", serde_json::json!({ "topics": topics }))
            .with_request_id(envelope.id.clone());
        self.reply(client, env).await;
    }

    async fn handle_presence_update(&self, client: &Arc<Client>, envelope: &InboundEnvelope) {
        #[derive(Deserialize)]
        struct Payload {
            online_status: String,
            #[serde(default)]
            custom_status: Option<String>,
        }

        let payload: Payload = match serde_json::from_value(envelope.payload.clone()) {
            Ok(p) => p,
            Err(_) => {
                self.reply_error(client, "INVALID_PAYLOAD", "malformed presence.update payload", envelope.id.clone())
                    .await;
                return;
            }
        };

        let Some(status) = PresenceStatus::parse(&payload.online_status) else {
            self.reply_error(
                client,
                "INVALID_STATUS",
                "online_status must be one of online, offline, away, busy, invisible",
                envelope.id.clone(),
            )
            .await;
            return;
        };

        let info = self.presence.set_status(client.user_id, status, payload.custom_status);

        if let Err(e) = self.presence_store.update_presence(&info).await {
            tracing::error!(user_id = %client.user_id, err = %e, "presence persistence failed");
        }

        let env = OutboundEnvelope::new(
            "presence_changed",
            serde_json::json!({
                "user_id": info.user_id,
                "status": info.status.as_str(),
                "custom_status": info.custom_status,
            }),
        );

        match self.contacts.get_contacts(client.user_id).await {
            Ok(contacts) => {
                for contact in contacts {
                    self.hub.queue_presence_broadcast(contact, env.clone());
                }
            }
            Err(e) => tracing::warn!(user_id = %client.user_id, err = %e, "contact resolution failed"),
        }
    }

    async fn handle_presence_query(&self, client: &Arc<Client>, envelope: &InboundEnvelope) {
        let user_ids = parse_uuid_list(&envelope.payload, "user_ids");

        // The live tracker is authoritative for anyone currently connected;
        // only the remainder needs a single batched round-trip to the store.
        let mut by_user = self.presence.get_bulk(&user_ids);
        let missing: Vec<UserId> = user_ids.iter().copied().filter(|id| !by_user.contains_key(id)).collect();
        if !missing.is_empty() {
            match self.presence_store.get_bulk_presence(&missing).await {
                Ok(found) => by_user.extend(found),
                Err(e) => tracing::warn!(err = %e, "bulk presence lookup failed"),
            }
        }

        let mut views = std::collections::HashMap::new();
        for (user_id, info) in by_user {
            let settings = self.presence_store.get_privacy_settings(user_id).await.unwrap_or_default();
            let view = apply_privacy(&info, client.user_id, settings);
            views.insert(user_id.to_string(), view);
        }

        let env = OutboundEnvelope::new("presence.query_result", serde_json::json!({ "presences": views }))
            .with_request_id(envelope.id.clone());
        self.reply(client, env).await;
    }

    async fn handle_typing(&self, client: &Arc<Client>, envelope: &InboundEnvelope, starting: bool) {
        let Some(conversation_id) = envelope.payload.get("conversation_id").and_then(|v| v.as_str()) else {
            self.reply_error(client, "INVALID_PAYLOAD", "conversation_id is required", envelope.id.clone())
                .await;
            return;
        };

        if starting {
            self.typing.start(conversation_id, client.user_id);
        } else {
            self.typing.stop(conversation_id, client.user_id);
        }

        let participants = match self.conversations.get_participants(conversation_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(conversation_id, err = %e, "participant resolution failed");
                return;
            }
        };

        let targets = self.participant_client_ids(&participants).await;
        let env = OutboundEnvelope::new(
            "typing_indicator",
            serde_json::json!({
                "conversation_id": conversation_id,
                "user_id": client.user_id,
                "is_typing": starting,
            }),
        );
        self.hub.queue_typing_broadcast(targets, env, Some(client.id));
    }

    async fn handle_mark(&self, client: &Arc<Client>, envelope: &InboundEnvelope, kind: &'static str) {
        let Some(conversation_id) = envelope.payload.get("conversation_id").and_then(|v| v.as_str()) else {
            self.reply_error(client, "INVALID_PAYLOAD", "conversation_id is required", envelope.id.clone())
                .await;
            return;
        };
        let message_ids = parse_uuid_list(&envelope.payload, "message_ids");

        let participants = match self.conversations.get_participants(conversation_id).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(conversation_id, err = %e, "participant resolution failed");
                return;
            }
        };
        let targets = self.participant_client_ids(&participants).await;

        let env = OutboundEnvelope::new(
            kind,
            serde_json::json!({
                "conversation_id": conversation_id,
                "message_ids": message_ids,
                "user_id": client.user_id,
            }),
        );
        self.hub.queue_typing_broadcast(targets, env, Some(client.id));
    }

    async fn handle_heartbeat(&self, client: &Arc<Client>) {
        if let Err(e) = self.presence_store.update_heartbeat(client.user_id, &client.device_id).await {
            tracing::error!(user_id = %client.user_id, err = %e, "heartbeat persistence failed");
        }
    }
}

#[async_trait]
impl MessageRouter for Dispatcher {
    async fn route(&self, client: Arc<Client>, envelope: InboundEnvelope) {
        match envelope.kind.as_str() {
            "ping" => self.handle_ping(&client, envelope.id.clone()).await,
            "subscribe" => self.handle_subscribe(&client, &envelope).await,
            "unsubscribe" => self.handle_unsubscribe(&client, &envelope).await,
            "presence.update" => self.handle_presence_update(&client, &envelope).await,
            "presence.query" => self.handle_presence_query(&client, &envelope).await,
            "typing.start" => self.handle_typing(&client, &envelope, true).await,
            "typing.stop" => self.handle_typing(&client, &envelope, false).await,
            "mark.read" => self.handle_mark(&client, &envelope, "read_receipt").await,
            "mark.delivered" => self.handle_mark(&client, &envelope, "delivery_receipt").await,
            "heartbeat" => self.handle_heartbeat(&client).await,
            other => {
                tracing::warn!(client_id = %client.id, kind = other, "unknown message type, dropping");
            }
        }
    }
}

fn topics_from_payload(payload: &serde_json::Value) -> Vec<String> {
    if let Some(arr) = payload.get("topics").and_then(|v| v.as_array()) {
        return arr.iter().filter_map(|v| v.as_str()).map(|s| conversation_topic_or_raw(s)).collect();
    }
    if let Some(s) = payload.get("topics").and_then(|v| v.as_str()) {
        return split_csv(s).into_iter().map(|t| conversation_topic_or_raw(&t)).collect();
    }
    Vec::new()
}

/// Topics are opaque strings; if the caller already passed a fully-qualified
/// topic (containing `:`) pass it through, otherwise treat it as a bare
/// conversation id for convenience.
fn conversation_topic_or_raw(s: &str) -> String {
    if s.contains(':') {
        s.to_owned()
    } else {
        conversation_topic(s)
    }
}

/// `PresenceView` instances carry enough context to serialize standalone;
/// re-exported here so the query-result payload type is easy to find.
pub type PresenceQueryResult = std::collections::HashMap<String, PresenceView>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topics_from_payload_qualifies_bare_ids() {
        let payload = serde_json::json!({ "topics": ["abc", "conversation:def"] });
        let topics = topics_from_payload(&payload);
        assert_eq!(topics, vec!["conversation:abc".to_owned(), "conversation:def".to_owned()]);
    }

    #[test]
    fn topics_from_payload_accepts_csv_string() {
        let payload = serde_json::json!({ "topics": "abc, def" });
        let topics = topics_from_payload(&payload);
        assert_eq!(topics, vec!["conversation:abc".to_owned(), "conversation:def".to_owned()]);
    }
}
