// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire types and identifiers shared across the connection, hub, presence
//! and typing layers.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identifier for a user, shared across all of a user's devices.
pub type UserId = Uuid;

/// Stable identifier for one installation of the client application.
/// Device ids are opaque strings supplied by the client at upgrade time.
pub type DeviceId = String;

/// Opaque identifier for a single open connection, unique per connection.
pub type ClientId = Uuid;

/// A fan-out key used by the subscription index, e.g. `conversation:<uuid>`.
pub type Topic = String;

/// Per-connection metadata captured at upgrade time.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientMetadata {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub app_version: Option<String>,
    pub device_name: Option<String>,
    pub device_type: Option<String>,
}

/// Snapshot of one connected device, returned by `Hub::active_devices`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceInfo {
    pub device_id: DeviceId,
    pub client_id: ClientId,
    pub connected_at_ms: u64,
    pub metadata: ClientMetadata,
}

/// Aggregated online/away/busy/offline status for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Online,
    Offline,
    Away,
    Busy,
    Invisible,
}

impl PresenceStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "online" => Some(Self::Online),
            "offline" => Some(Self::Offline),
            "away" => Some(Self::Away),
            "busy" => Some(Self::Busy),
            "invisible" => Some(Self::Invisible),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
            Self::Away => "away",
            Self::Busy => "busy",
            Self::Invisible => "invisible",
        }
    }
}

/// Aggregated presence record for a single user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceInfo {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
    pub device_count: u32,
}

/// A user's visibility preferences, as returned by `PresenceStore::get_privacy_settings`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PrivacySettings {
    pub hide_online_status: bool,
    pub hide_last_seen: bool,
}

// -- Wire envelopes -----------------------------------------------------------

/// Raw client→server envelope. `payload` is left as `serde_json::Value` so the
/// router can dispatch on `type` before committing to a concrete payload shape.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Server→client envelope.
#[derive(Debug, Clone, Serialize)]
pub struct OutboundEnvelope {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub payload: serde_json::Value,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl OutboundEnvelope {
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            payload,
            timestamp: now_rfc3339(),
            request_id: None,
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }

    pub fn error(code: &str, message: impl Into<String>, request_id: Option<String>) -> Self {
        Self::new(
            "error",
            serde_json::json!({ "code": code, "message": message.into() }),
        )
        .with_request_id(request_id)
    }
}

/// Format the current time as RFC3339, for the wire envelope's `timestamp` field.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Current time in epoch milliseconds, used for `last_seen`/`connected_at` fields.
pub fn epoch_ms() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}

/// Comma-separated list helper shared by query-parameter parsing (subscribe
/// flags, session filters, etc).
pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',').map(|tok| tok.trim().to_owned()).filter(|tok| !tok.is_empty()).collect()
}

/// Extract the `user_ids` array from a JSON payload as parsed `Uuid`s,
/// silently skipping entries that don't parse.
pub fn parse_uuid_list(value: &serde_json::Value, field: &str) -> Vec<Uuid> {
    value
        .get(field)
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str())
                .filter_map(|s| Uuid::parse_str(s).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Filtered, privacy-aware presence payload sent in reply to `presence.query`.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceView {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub custom_status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen_ms: Option<u64>,
}

/// Bulk presence reply payload: `user_id -> PresenceView`.
pub type PresenceViewMap = HashMap<UserId, PresenceView>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presence_status_round_trips_through_str() {
        for s in ["online", "offline", "away", "busy", "invisible"] {
            let parsed = PresenceStatus::parse(s).expect("known status string");
            assert_eq!(parsed.as_str(), s);
        }
    }

    #[test]
    fn presence_status_rejects_unknown() {
        assert!(PresenceStatus::parse("zombie").is_none());
    }

    #[test]
    fn split_csv_trims_and_drops_empty() {
        assert_eq!(split_csv(" a, b ,,c"), vec!["a", "b", "c"]);
    }

    #[test]
    fn now_rfc3339_has_expected_shape() {
        let ts = now_rfc3339();
        assert_eq!(ts.len(), 24);
        assert!(ts.ends_with('Z'));
        assert_eq!(ts.as_bytes()[4], b'-');
        assert_eq!(ts.as_bytes()[10], b'T');
    }

    #[test]
    fn outbound_error_envelope_has_code_and_message() {
        let env = OutboundEnvelope::error("BAD_REQUEST", "nope", Some("rid-1".to_owned()));
        assert_eq!(env.kind, "error");
        assert_eq!(env.payload["code"], "BAD_REQUEST");
        assert_eq!(env.payload["message"], "nope");
        assert_eq!(env.request_id.as_deref(), Some("rid-1"));
    }
}
