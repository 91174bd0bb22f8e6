// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-conversation ephemeral typing state with TTL-based expiry. The TTL is
//! authoritative truth; the background cleanup pass is
//! purely an optimization to bound memory, never a correctness mechanism.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use crate::model::epoch_ms;
use crate::model::UserId;

type ConversationId = String;

#[derive(Default)]
struct Inner {
    buckets: HashMap<ConversationId, HashMap<UserId, u64>>,
}

pub struct TypingManager {
    inner: Mutex<Inner>,
    ttl: Duration,
}

impl TypingManager {
    pub fn new(ttl: Duration) -> Self {
        Self { inner: Mutex::new(Inner::default()), ttl }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(&self, conversation_id: &str, user_id: UserId) {
        let mut inner = self.lock();
        inner.buckets.entry(conversation_id.to_owned()).or_default().insert(user_id, epoch_ms());
    }

    pub fn stop(&self, conversation_id: &str, user_id: UserId) {
        let mut inner = self.lock();
        if let Some(bucket) = inner.buckets.get_mut(conversation_id) {
            bucket.remove(&user_id);
            if bucket.is_empty() {
                inner.buckets.remove(conversation_id);
            }
        }
    }

    /// Users whose entry is within the TTL window at the instant of the
    /// call. Never returns a user whose `last_typed_at < now - ttl`,
    /// regardless of whether `cleanup` has run recently.
    pub fn typing_users(&self, conversation_id: &str) -> Vec<UserId> {
        let now = epoch_ms();
        let ttl_ms = self.ttl.as_millis() as u64;
        let inner = self.lock();
        inner
            .buckets
            .get(conversation_id)
            .map(|bucket| {
                bucket
                    .iter()
                    .filter(|(_, last)| now.saturating_sub(**last) <= ttl_ms)
                    .map(|(user, _)| *user)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove entries older than `2 * ttl`. Called from a
    /// background ticker, default every 10s.
    pub fn cleanup(&self) {
        let now = epoch_ms();
        let cutoff_ms = self.ttl.as_millis() as u64 * 2;
        let mut inner = self.lock();
        inner.buckets.retain(|_, bucket| {
            bucket.retain(|_, last| now.saturating_sub(*last) <= cutoff_ms);
            !bucket.is_empty()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_then_query_reports_typing() {
        let mgr = TypingManager::new(Duration::from_secs(5));
        let user = UserId::new_v4();
        mgr.start("conv-1", user);
        assert_eq!(mgr.typing_users("conv-1"), vec![user]);
    }

    #[test]
    fn stop_removes_immediately() {
        let mgr = TypingManager::new(Duration::from_secs(5));
        let user = UserId::new_v4();
        mgr.start("conv-1", user);
        mgr.stop("conv-1", user);
        assert!(mgr.typing_users("conv-1").is_empty());
    }

    #[test]
    fn ttl_window_excludes_expired_entries() {
        let mgr = TypingManager::new(Duration::from_millis(0));
        let user = UserId::new_v4();
        mgr.start("conv-1", user);
        std::thread::sleep(Duration::from_millis(5));
        assert!(mgr.typing_users("conv-1").is_empty());
    }

    #[test]
    fn cleanup_drops_old_entries_and_empty_buckets() {
        let mgr = TypingManager::new(Duration::from_millis(0));
        let user = UserId::new_v4();
        mgr.start("conv-1", user);
        std::thread::sleep(Duration::from_millis(5));
        mgr.cleanup();
        assert!(mgr.lock().buckets.is_empty());
    }
}
