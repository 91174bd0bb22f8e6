// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bidirectional topic <-> client index used for conversation-scoped
//! broadcast. Subscriptions are soft state: clients rebuild them
//! on reconnect, so losing them is never a correctness problem, only a
//! missed-message-until-resubscribe one.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use crate::model::{ClientId, Topic};

#[derive(Default)]
struct Inner {
    topic_to_clients: HashMap<Topic, HashSet<ClientId>>,
    client_to_topics: HashMap<ClientId, HashSet<Topic>>,
}

/// Guarded by a single mutex; every operation here is short.
pub struct SubscriptionIndex {
    inner: Mutex<Inner>,
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SubscriptionIndex {
    pub fn new() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }

    pub fn subscribe(&self, client_id: ClientId, topic: Topic) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.topic_to_clients.entry(topic.clone()).or_default().insert(client_id);
        inner.client_to_topics.entry(client_id).or_default().insert(topic);
    }

    pub fn unsubscribe(&self, client_id: ClientId, topic: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(clients) = inner.topic_to_clients.get_mut(topic) {
            clients.remove(&client_id);
            if clients.is_empty() {
                inner.topic_to_clients.remove(topic);
            }
        }
        if let Some(topics) = inner.client_to_topics.get_mut(&client_id) {
            topics.remove(topic);
            if topics.is_empty() {
                inner.client_to_topics.remove(&client_id);
            }
        }
    }

    /// O(topics-held), not O(all-topics), thanks to the inverse index.
    /// Called on client disconnect.
    pub fn unsubscribe_all(&self, client_id: ClientId) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let Some(topics) = inner.client_to_topics.remove(&client_id) else { return };
        for topic in topics {
            if let Some(clients) = inner.topic_to_clients.get_mut(&topic) {
                clients.remove(&client_id);
                if clients.is_empty() {
                    inner.topic_to_clients.remove(&topic);
                }
            }
        }
    }

    pub fn subscribers(&self, topic: &str) -> Vec<ClientId> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.topic_to_clients.get(topic).map(|s| s.iter().copied().collect()).unwrap_or_default()
    }

    pub fn topics_for(&self, client_id: ClientId) -> Vec<Topic> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.client_to_topics.get(&client_id).map(|s| s.iter().cloned().collect()).unwrap_or_default()
    }
}

/// Build the conventional conversation topic key.
pub fn conversation_topic(conversation_id: &str) -> Topic {
    format!("conversation:{conversation_id}")
}

/// Build the conventional per-user topic key.
pub fn user_topic(user_id: &str) -> Topic {
    format!("user:{user_id}")
}
