// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! External collaborator interfaces consumed by the core and their
//! HTTP-backed implementations. The core never assumes a particular
//! persistence technology; it only depends on these traits.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::error::HubError;
use crate::model::{PresenceInfo, PrivacySettings, UserId};

/// `UserExists(user_id) -> bool`.
#[async_trait]
pub trait UserValidator: Send + Sync {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, HubError>;
}

/// Durable presence persistence. Called off the hot path where
/// possible; the real-time `PresenceTracker` remains authoritative for
/// online users regardless of what this store reports.
#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn update_presence(&self, info: &PresenceInfo) -> Result<(), HubError>;
    async fn update_heartbeat(&self, user_id: UserId, device_id: &str) -> Result<(), HubError>;
    async fn get_presence(&self, user_id: UserId) -> Result<Option<PresenceInfo>, HubError>;
    async fn get_bulk_presence(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, PresenceInfo>, HubError>;
    async fn get_privacy_settings(&self, user_id: UserId) -> Result<PrivacySettings, HubError>;
}

/// Opaque KV cache. Errors are non-fatal; callers fall through to
/// the source of truth.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get_bool(&self, key: &str) -> Result<Option<bool>, HubError>;
    async fn set_bool(&self, key: &str, value: bool, ttl: Duration) -> Result<(), HubError>;
    async fn delete(&self, key: &str) -> Result<(), HubError>;
}

/// `GetContacts(user_id) -> [user_id]`. A degenerate
/// implementation returning an empty list is acceptable and produces
/// correct, if un-fanned-out, behavior.
#[async_trait]
pub trait ContactResolver: Send + Sync {
    async fn get_contacts(&self, user_id: UserId) -> Result<Vec<UserId>, HubError>;
}

/// `GetParticipants(conversation_id) -> [user_id]`.
#[async_trait]
pub trait ConversationResolver: Send + Sync {
    async fn get_participants(&self, conversation_id: &str) -> Result<Vec<UserId>, HubError>;
}

// -- HTTP-backed implementations ----------------------------------------------

/// Shared HTTP collaborator backed by a persistence service's REST API.
/// Implements every collaborator trait so a single instance covers the
/// whole `Manager` unless the deployment wires in something more exotic.
pub struct HttpPersistenceClient {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPersistenceClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self { client: reqwest::Client::new(), base_url: base_url.into() }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[async_trait]
impl UserValidator for HttpPersistenceClient {
    async fn user_exists(&self, user_id: UserId) -> Result<bool, HubError> {
        let resp = self
            .client
            .get(self.url(&format!("/users/{user_id}/exists")))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(false);
        }
        #[derive(serde::Deserialize)]
        struct Body {
            exists: bool,
        }
        let body: Body = resp.json().await.map_err(|_| HubError::UpstreamError)?;
        Ok(body.exists)
    }
}

#[async_trait]
impl PresenceStore for HttpPersistenceClient {
    async fn update_presence(&self, info: &PresenceInfo) -> Result<(), HubError> {
        self.client
            .put(self.url(&format!("/presence/{}", info.user_id)))
            .json(info)
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        Ok(())
    }

    async fn update_heartbeat(&self, user_id: UserId, device_id: &str) -> Result<(), HubError> {
        self.client
            .post(self.url(&format!("/presence/{user_id}/heartbeat")))
            .json(&serde_json::json!({ "device_id": device_id }))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        Ok(())
    }

    async fn get_presence(&self, user_id: UserId) -> Result<Option<PresenceInfo>, HubError> {
        let resp = self
            .client
            .get(self.url(&format!("/presence/{user_id}")))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        resp.json().await.map(Some).map_err(|_| HubError::UpstreamError)
    }

    async fn get_bulk_presence(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, PresenceInfo>, HubError> {
        let resp = self
            .client
            .post(self.url("/presence/bulk"))
            .json(&serde_json::json!({ "user_ids": user_ids }))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        resp.json().await.map_err(|_| HubError::UpstreamError)
    }

    async fn get_privacy_settings(&self, user_id: UserId) -> Result<PrivacySettings, HubError> {
        let resp = self
            .client
            .get(self.url(&format!("/users/{user_id}/privacy")))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(PrivacySettings::default());
        }
        resp.json().await.map_err(|_| HubError::UpstreamError)
    }
}

#[async_trait]
impl ContactResolver for HttpPersistenceClient {
    async fn get_contacts(&self, user_id: UserId) -> Result<Vec<UserId>, HubError> {
        let resp = self
            .client
            .get(self.url(&format!("/users/{user_id}/contacts")))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        resp.json().await.map_err(|_| HubError::UpstreamError)
    }
}

#[async_trait]
impl ConversationResolver for HttpPersistenceClient {
    async fn get_participants(&self, conversation_id: &str) -> Result<Vec<UserId>, HubError> {
        let resp = self
            .client
            .get(self.url(&format!("/conversations/{conversation_id}/participants")))
            .send()
            .await
            .map_err(|_| HubError::UpstreamError)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        resp.json().await.map_err(|_| HubError::UpstreamError)
    }
}

// -- In-memory stubs, used when no persistence URL is configured -------------

/// Validates every user id: suited to local development and the integration
/// test harness, where there is no real user directory to check against.
#[derive(Default)]
pub struct AllowAllValidator;

#[async_trait]
impl UserValidator for AllowAllValidator {
    async fn user_exists(&self, _user_id: UserId) -> Result<bool, HubError> {
        Ok(true)
    }
}

/// In-memory presence store, for tests and standalone demos.
#[derive(Default)]
pub struct InMemoryPresenceStore {
    records: Mutex<HashMap<UserId, PresenceInfo>>,
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn update_presence(&self, info: &PresenceInfo) -> Result<(), HubError> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).insert(info.user_id, info.clone());
        Ok(())
    }

    async fn update_heartbeat(&self, _user_id: UserId, _device_id: &str) -> Result<(), HubError> {
        Ok(())
    }

    async fn get_presence(&self, user_id: UserId) -> Result<Option<PresenceInfo>, HubError> {
        Ok(self.records.lock().unwrap_or_else(|e| e.into_inner()).get(&user_id).cloned())
    }

    async fn get_bulk_presence(
        &self,
        user_ids: &[UserId],
    ) -> Result<HashMap<UserId, PresenceInfo>, HubError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(user_ids.iter().filter_map(|id| records.get(id).cloned().map(|v| (*id, v))).collect())
    }

    async fn get_privacy_settings(&self, _user_id: UserId) -> Result<PrivacySettings, HubError> {
        Ok(PrivacySettings::default())
    }
}

/// Degenerate contact/conversation resolvers returning an empty list, an
/// acceptable stand-in until a real directory service is wired up.
#[derive(Default)]
pub struct EmptyContactResolver;

#[async_trait]
impl ContactResolver for EmptyContactResolver {
    async fn get_contacts(&self, _user_id: UserId) -> Result<Vec<UserId>, HubError> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
pub struct EmptyConversationResolver;

#[async_trait]
impl ConversationResolver for EmptyConversationResolver {
    async fn get_participants(&self, _conversation_id: &str) -> Result<Vec<UserId>, HubError> {
        Ok(Vec::new())
    }
}

/// In-process cache, for tests and single-node deployments without a shared
/// cache tier.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Mutex<HashMap<String, (bool, Instant)>>,
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_bool(&self, key: &str) -> Result<Option<bool>, HubError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some((value, expires_at)) if *expires_at > Instant::now() => Ok(Some(*value)),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_bool(&self, key: &str, value: bool, ttl: Duration) -> Result<(), HubError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_owned(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), HubError> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).remove(key);
        Ok(())
    }
}

/// Wraps a `UserValidator` with a positive/negative TTL cache policy: cache
/// positive results for `positive_ttl`, negative for `negative_ttl`. Cache
/// errors are non-fatal and fall through to the inner validator.
pub struct CachedUserValidator<V, C> {
    inner: V,
    cache: C,
    positive_ttl: Duration,
    negative_ttl: Duration,
}

impl<V, C> CachedUserValidator<V, C> {
    pub fn new(inner: V, cache: C, positive_ttl: Duration, negative_ttl: Duration) -> Self {
        Self { inner, cache, positive_ttl, negative_ttl }
    }

    fn cache_key(user_id: UserId) -> String {
        format!("user_exists:{user_id}")
    }
}

#[async_trait]
impl<V, C> UserValidator for CachedUserValidator<V, C>
where
    V: UserValidator,
    C: Cache,
{
    async fn user_exists(&self, user_id: UserId) -> Result<bool, HubError> {
        let key = Self::cache_key(user_id);
        match self.cache.get_bool(&key).await {
            Ok(Some(cached)) => return Ok(cached),
            Ok(None) => {}
            Err(e) => tracing::warn!(err = %e, "cache read failed, falling through"),
        }

        let exists = self.inner.user_exists(user_id).await?;
        let ttl = if exists { self.positive_ttl } else { self.negative_ttl };
        if let Err(e) = self.cache.set_bool(&key, exists, ttl).await {
            tracing::warn!(err = %e, "cache write failed, continuing");
        }
        Ok(exists)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_all_validator_always_true() {
        assert!(AllowAllValidator.user_exists(UserId::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn cached_validator_serves_second_lookup_from_cache() {
        struct CountingValidator(std::sync::atomic::AtomicUsize);
        #[async_trait]
        impl UserValidator for CountingValidator {
            async fn user_exists(&self, _user_id: UserId) -> Result<bool, HubError> {
                self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                Ok(true)
            }
        }

        let validator = CachedUserValidator::new(
            CountingValidator(std::sync::atomic::AtomicUsize::new(0)),
            InMemoryCache::default(),
            Duration::from_secs(300),
            Duration::from_secs(30),
        );

        let user = UserId::new_v4();
        assert!(validator.user_exists(user).await.unwrap());
        assert!(validator.user_exists(user).await.unwrap());
        assert_eq!(validator.inner.0.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_resolvers_return_empty() {
        assert!(EmptyContactResolver.get_contacts(UserId::new_v4()).await.unwrap().is_empty());
        assert!(EmptyConversationResolver.get_participants("c1").await.unwrap().is_empty());
    }
}
