// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory presence aggregation across a user's devices. This
//! tracker is the real-time source of truth: it overrides any stale
//! durable-persistence state for users currently known to the hub.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::model::{epoch_ms, PresenceInfo, PresenceStatus, PresenceView, PrivacySettings, UserId};

pub struct PresenceTracker {
    inner: Mutex<HashMap<UserId, PresenceInfo>>,
}

impl Default for PresenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self { inner: Mutex::new(HashMap::new()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<UserId, PresenceInfo>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn default_entry(user_id: UserId) -> PresenceInfo {
        PresenceInfo {
            user_id,
            status: PresenceStatus::Offline,
            custom_status: None,
            last_seen_ms: None,
            device_count: 0,
        }
    }

    /// Increment `device_count` and mark the user online, unless an explicit
    /// `presence.update` left a stickier status in place: a user who set
    /// themselves to busy/away/invisible stays that way across a second
    /// device connecting. Only a transition out of `offline` (first device,
    /// or reconnecting after every device dropped) flips the status back to
    /// online. Returns the updated snapshot for callers that need to
    /// broadcast the transition.
    pub fn on_connect(&self, user_id: UserId) -> PresenceInfo {
        let mut map = self.lock();
        let entry = map.entry(user_id).or_insert_with(|| Self::default_entry(user_id));
        entry.device_count += 1;
        if entry.status == PresenceStatus::Offline {
            entry.status = PresenceStatus::Online;
        }
        entry.last_seen_ms = Some(epoch_ms());
        entry.clone()
    }

    /// Set `device_count` to the hub's authoritative remaining count.
    /// Transitions to `offline` only when it reaches zero, and
    /// only emits that transition once per contiguous offline interval
    /// because a second disconnect call with `remaining_devices == 0` finds
    /// the status already `offline`.
    pub fn on_disconnect(&self, user_id: UserId, remaining_devices: usize) -> PresenceInfo {
        let mut map = self.lock();
        let entry = map.entry(user_id).or_insert_with(|| Self::default_entry(user_id));
        entry.device_count = remaining_devices as u32;
        if remaining_devices == 0 {
            entry.status = PresenceStatus::Offline;
            entry.last_seen_ms = Some(epoch_ms());
        }
        entry.clone()
    }

    /// Explicit `presence.update`: sets status directly, `device_count` is
    /// left untouched.
    pub fn set_status(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        custom_status: Option<String>,
    ) -> PresenceInfo {
        let mut map = self.lock();
        let entry = map.entry(user_id).or_insert_with(|| Self::default_entry(user_id));
        entry.status = status;
        entry.custom_status = custom_status;
        entry.clone()
    }

    pub fn get(&self, user_id: UserId) -> Option<PresenceInfo> {
        self.lock().get(&user_id).cloned()
    }

    pub fn get_bulk(&self, user_ids: &[UserId]) -> HashMap<UserId, PresenceInfo> {
        let map = self.lock();
        user_ids.iter().filter_map(|id| map.get(id).cloned().map(|info| (*id, info))).collect()
    }
}

/// Privacy filter. The requester-equals-target
/// case bypasses the filter entirely.
pub fn apply_privacy(info: &PresenceInfo, requester: UserId, settings: PrivacySettings) -> PresenceView {
    if requester == info.user_id {
        return PresenceView {
            user_id: info.user_id,
            status: info.status,
            custom_status: info.custom_status.clone(),
            last_seen_ms: info.last_seen_ms,
        };
    }

    let status = if settings.hide_online_status { PresenceStatus::Offline } else { info.status };
    let last_seen_ms = if settings.hide_last_seen { None } else { info.last_seen_ms };

    PresenceView { user_id: info.user_id, status, custom_status: info.custom_status.clone(), last_seen_ms }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_then_disconnect_drives_status() {
        let tracker = PresenceTracker::new();
        let user = UserId::new_v4();

        let info = tracker.on_connect(user);
        assert_eq!(info.device_count, 1);
        assert_eq!(info.status, PresenceStatus::Online);

        let info = tracker.on_connect(user);
        assert_eq!(info.device_count, 2);

        let info = tracker.on_disconnect(user, 1);
        assert_eq!(info.device_count, 1);
        assert_eq!(info.status, PresenceStatus::Online);

        let info = tracker.on_disconnect(user, 0);
        assert_eq!(info.device_count, 0);
        assert_eq!(info.status, PresenceStatus::Offline);
    }

    #[test]
    fn second_device_connecting_does_not_clobber_a_sticky_status() {
        let tracker = PresenceTracker::new();
        let user = UserId::new_v4();

        tracker.on_connect(user);
        tracker.set_status(user, PresenceStatus::Busy, Some("in a meeting".to_owned()));

        let info = tracker.on_connect(user);
        assert_eq!(info.device_count, 2);
        assert_eq!(info.status, PresenceStatus::Busy);
        assert_eq!(info.custom_status.as_deref(), Some("in a meeting"));
    }

    #[test]
    fn reconnecting_after_going_fully_offline_resets_to_online() {
        let tracker = PresenceTracker::new();
        let user = UserId::new_v4();

        tracker.on_connect(user);
        tracker.set_status(user, PresenceStatus::Away, None);
        tracker.on_disconnect(user, 0);

        let info = tracker.on_connect(user);
        assert_eq!(info.status, PresenceStatus::Online);
    }

    #[test]
    fn explicit_update_leaves_device_count_untouched() {
        let tracker = PresenceTracker::new();
        let user = UserId::new_v4();
        tracker.on_connect(user);
        let info = tracker.set_status(user, PresenceStatus::Away, Some("lunch".to_owned()));
        assert_eq!(info.device_count, 1);
        assert_eq!(info.status, PresenceStatus::Away);
        assert_eq!(info.custom_status.as_deref(), Some("lunch"));
    }

    #[test]
    fn privacy_filter_hides_status_and_last_seen_for_others() {
        let user = UserId::new_v4();
        let requester = UserId::new_v4();
        let info = PresenceInfo {
            user_id: user,
            status: PresenceStatus::Online,
            custom_status: None,
            last_seen_ms: Some(1234),
            device_count: 1,
        };

        let settings = PrivacySettings { hide_online_status: true, hide_last_seen: true };
        let view = apply_privacy(&info, requester, settings);
        assert_eq!(view.status, PresenceStatus::Offline);
        assert!(view.last_seen_ms.is_none());
    }

    #[test]
    fn privacy_filter_bypassed_for_self() {
        let user = UserId::new_v4();
        let info = PresenceInfo {
            user_id: user,
            status: PresenceStatus::Online,
            custom_status: None,
            last_seen_ms: Some(1234),
            device_count: 1,
        };
        let settings = PrivacySettings { hide_online_status: true, hide_last_seen: true };
        let view = apply_privacy(&info, user, settings);
        assert_eq!(view.status, PresenceStatus::Online);
        assert_eq!(view.last_seen_ms, Some(1234));
    }
}
