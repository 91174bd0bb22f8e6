// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The facade wiring Connection, Client, Hub, Router, Subscription,
//! Presence, and Typing together, plus the external collaborator handles
//!. Connect/disconnect side effects (marking a user online or
//! offline in the durable store, invalidating the cache, fanning out to
//! contacts) are driven reactively off the Hub's lifecycle broadcast so they
//! happen exactly once per register/unregister the Hub actually applies.

use std::sync::Arc;
use std::time::Duration;

use crate::collaborators::{
    AllowAllValidator, CachedUserValidator, ContactResolver, ConversationResolver,
    EmptyContactResolver, EmptyConversationResolver, HttpPersistenceClient, InMemoryCache,
    InMemoryPresenceStore, PresenceStore, UserValidator,
};
use crate::config::HubConfig;
use crate::hub::{Hub, LifecycleEvent};
use crate::model::OutboundEnvelope;
use crate::presence::PresenceTracker;
use crate::router::{Dispatcher, MessageRouter};
use crate::subscription::SubscriptionIndex;
use crate::typing::TypingManager;

/// Owns the Hub and every collaborator the rest of the fabric depends on.
pub struct Manager {
    pub config: HubConfig,
    pub hub: Arc<Hub>,
    pub subscriptions: Arc<SubscriptionIndex>,
    pub presence: Arc<PresenceTracker>,
    pub typing: Arc<TypingManager>,
    pub validator: Arc<dyn UserValidator>,
    pub router: Arc<dyn MessageRouter>,
}

impl Manager {
    /// Build every component, wire the reactive connect/disconnect pipeline,
    /// and spawn the typing-state cleanup ticker.
    pub fn spawn(config: HubConfig) -> Arc<Manager> {
        let hub = Hub::spawn(config.clone());
        let subscriptions = Arc::new(SubscriptionIndex::new());
        let presence = Arc::new(PresenceTracker::new());
        let typing = Arc::new(TypingManager::new(config.typing_ttl()));

        let (presence_store, contacts, conversations, base_validator): (
            Arc<dyn PresenceStore>,
            Arc<dyn ContactResolver>,
            Arc<dyn ConversationResolver>,
            Arc<dyn UserValidator>,
        ) = match &config.persistence_url {
            Some(url) => {
                let client = Arc::new(HttpPersistenceClient::new(url.clone()));
                (client.clone(), client.clone(), client.clone(), client)
            }
            None => (
                Arc::new(InMemoryPresenceStore::default()),
                Arc::new(EmptyContactResolver),
                Arc::new(EmptyConversationResolver),
                Arc::new(AllowAllValidator),
            ),
        };

        let validator: Arc<dyn UserValidator> = Arc::new(CachedUserValidator::new(
            HttpOrStubValidator(base_validator),
            InMemoryCache::default(),
            config.user_exists_cache_positive_ttl(),
            config.user_exists_cache_negative_ttl(),
        ));

        let router: Arc<dyn MessageRouter> = Arc::new(Dispatcher {
            hub: Arc::clone(&hub),
            subscriptions: Arc::clone(&subscriptions),
            presence: Arc::clone(&presence),
            typing: Arc::clone(&typing),
            presence_store: Arc::clone(&presence_store),
            contacts: Arc::clone(&contacts),
            conversations: Arc::clone(&conversations),
        });

        let manager = Arc::new(Manager {
            config: config.clone(),
            hub: Arc::clone(&hub),
            subscriptions: Arc::clone(&subscriptions),
            presence: Arc::clone(&presence),
            typing: Arc::clone(&typing),
            validator,
            router,
        });

        tokio::spawn(run_lifecycle_pipeline(
            Arc::clone(&hub),
            Arc::clone(&presence),
            Arc::clone(&subscriptions),
            presence_store,
            contacts,
        ));
        tokio::spawn(run_typing_cleanup(Arc::clone(&typing), config.typing_cleanup_interval()));

        manager
    }

    /// Broadcast an arbitrary envelope to every client subscribed to `topic`,
    /// optionally excluding one connection. The conventional entry point for
    /// upstream services (a message store, a notification fan-out job) to
    /// push an event into the fabric without going through a client socket.
    /// Returns the number of clients the envelope was enqueued to.
    pub async fn publish_to_topic(
        &self,
        topic: &str,
        envelope: OutboundEnvelope,
        exclude: Option<crate::model::ClientId>,
    ) -> usize {
        let subscribers = self.subscriptions.subscribers(topic);
        let delivered_to = subscribers.iter().filter(|id| Some(**id) != exclude).count();
        self.hub.broadcast_to_clients(&subscribers, envelope, exclude).await;
        delivered_to
    }
}

/// Adapts an owned `Arc<dyn UserValidator>` so it can itself implement
/// `UserValidator`, letting `CachedUserValidator` wrap a trait object instead
/// of requiring a concrete type.
struct HttpOrStubValidator(Arc<dyn UserValidator>);

#[async_trait::async_trait]
impl UserValidator for HttpOrStubValidator {
    async fn user_exists(&self, user_id: crate::model::UserId) -> Result<bool, crate::error::HubError> {
        self.0.user_exists(user_id).await
    }
}

/// Consumes the Hub's lifecycle broadcast and performs the connect/disconnect
/// side effects: mark the user online/offline in the durable store, clean up
/// subscriptions, and fan presence changes out to contacts.
async fn run_lifecycle_pipeline(
    hub: Arc<Hub>,
    presence: Arc<PresenceTracker>,
    subscriptions: Arc<SubscriptionIndex>,
    presence_store: Arc<dyn PresenceStore>,
    contacts: Arc<dyn ContactResolver>,
) {
    let mut rx = hub.subscribe_lifecycle();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                tracing::warn!(skipped = n, "lifecycle pipeline lagged, events dropped");
                continue;
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        };

        match event {
            LifecycleEvent::Connected { user_id, .. } => {
                let info = presence.on_connect(user_id);
                if let Err(e) = presence_store.update_presence(&info).await {
                    tracing::error!(%user_id, err = %e, "presence persistence failed on connect");
                }
                fan_out_presence(&hub, &contacts, user_id, &info).await;
            }
            LifecycleEvent::Disconnected { user_id, client_id, remaining_devices, .. } => {
                subscriptions.unsubscribe_all(client_id);
                let info = presence.on_disconnect(user_id, remaining_devices);
                // Only marks offline (persists/fans out) if the hub reports
                // no remaining devices for this user.
                if remaining_devices == 0 {
                    if let Err(e) = presence_store.update_presence(&info).await {
                        tracing::error!(%user_id, err = %e, "presence persistence failed on disconnect");
                    }
                    fan_out_presence(&hub, &contacts, user_id, &info).await;
                }
            }
        }
    }
}

async fn fan_out_presence(
    hub: &Arc<Hub>,
    contacts: &Arc<dyn ContactResolver>,
    user_id: crate::model::UserId,
    info: &crate::model::PresenceInfo,
) {
    let env = OutboundEnvelope::new(
        "presence_changed",
        serde_json::json!({
            "user_id": info.user_id,
            "status": info.status.as_str(),
            "custom_status": info.custom_status,
        }),
    );
    match contacts.get_contacts(user_id).await {
        Ok(ids) => {
            for contact in ids {
                hub.queue_presence_broadcast(contact, env.clone());
            }
        }
        Err(e) => tracing::warn!(%user_id, err = %e, "contact resolution failed"),
    }
}

async fn run_typing_cleanup(typing: Arc<TypingManager>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        typing.cleanup();
    }
}
