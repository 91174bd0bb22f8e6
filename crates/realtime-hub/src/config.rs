// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

/// Configuration for the real-time messaging fabric.
#[derive(Debug, Clone, clap::Parser)]
pub struct HubConfig {
    /// Host to bind on.
    #[arg(long, default_value = "127.0.0.1", env = "HUB_HOST")]
    pub host: String,

    /// Port to listen on.
    #[arg(long, default_value_t = 8900, env = "HUB_PORT")]
    pub port: u16,

    /// Allowed `Origin` values for the WS upgrade. Entries starting with `*`
    /// match any origin ending in the rest of the string. Empty + check
    /// enabled denies everything.
    #[arg(long = "allowed-origin", env = "HUB_ALLOWED_ORIGINS", value_delimiter = ',')]
    pub allowed_origins: Vec<String>,

    /// Whether to enforce the origin allow-list at all. Disabled by default
    /// for local development.
    #[arg(long, default_value_t = false, env = "HUB_CHECK_ORIGIN")]
    pub check_origin: bool,

    /// Maximum inbound frame size in bytes.
    #[arg(long, default_value_t = 512 * 1024, env = "HUB_MAX_MESSAGE_SIZE")]
    pub max_message_size: usize,

    /// Capacity of each client's bounded outbound queue.
    #[arg(long, default_value_t = 256, env = "HUB_OUTBOUND_QUEUE_CAPACITY")]
    pub outbound_queue_capacity: usize,

    /// Server ping interval in milliseconds. Must be less than `pong_wait_ms`.
    #[arg(long, default_value_t = 54_000, env = "HUB_PING_PERIOD_MS")]
    pub ping_period_ms: u64,

    /// Read-deadline reset on every pong, in milliseconds.
    #[arg(long, default_value_t = 60_000, env = "HUB_PONG_WAIT_MS")]
    pub pong_wait_ms: u64,

    /// Per-write deadline in milliseconds; also the grace period a full
    /// outbound queue gets before the client is disconnected.
    #[arg(long, default_value_t = 10_000, env = "HUB_WRITE_WAIT_MS")]
    pub write_wait_ms: u64,

    /// How long `Client::close` waits for a clean close handshake before
    /// force-closing the transport, in milliseconds.
    #[arg(long, default_value_t = 1_000, env = "HUB_CLOSE_GRACE_PERIOD_MS")]
    pub close_grace_period_ms: u64,

    /// Capacity of the hub's register/unregister channels.
    #[arg(long, default_value_t = 256, env = "HUB_LIFECYCLE_CHANNEL_CAPACITY")]
    pub lifecycle_channel_capacity: usize,

    /// Capacity of the hub's presence/typing broadcast channels.
    #[arg(long, default_value_t = 1024, env = "HUB_BROADCAST_CHANNEL_CAPACITY")]
    pub broadcast_channel_capacity: usize,

    /// Interval between stale-connection sweeps, in milliseconds.
    #[arg(long, default_value_t = 30_000, env = "HUB_STALE_SWEEP_INTERVAL_MS")]
    pub stale_sweep_interval_ms: u64,

    /// A client is stale once `now - last_pong` exceeds this, in milliseconds.
    #[arg(long, default_value_t = 90_000, env = "HUB_STALE_TIMEOUT_MS")]
    pub stale_timeout_ms: u64,

    /// Typing-indicator TTL in milliseconds.
    #[arg(long, default_value_t = 5_000, env = "HUB_TYPING_TTL_MS")]
    pub typing_ttl_ms: u64,

    /// Interval between typing-state cleanup passes, in milliseconds.
    #[arg(long, default_value_t = 10_000, env = "HUB_TYPING_CLEANUP_INTERVAL_MS")]
    pub typing_cleanup_interval_ms: u64,

    /// Positive user-existence cache TTL, in seconds.
    #[arg(long, default_value_t = 300, env = "HUB_USER_EXISTS_CACHE_POSITIVE_TTL_SECS")]
    pub user_exists_cache_positive_ttl_secs: u64,

    /// Negative user-existence cache TTL, in seconds.
    #[arg(long, default_value_t = 30, env = "HUB_USER_EXISTS_CACHE_NEGATIVE_TTL_SECS")]
    pub user_exists_cache_negative_ttl_secs: u64,

    /// Base URL of the persistence service backing `PresenceStore`/`UserValidator`.
    /// If unset, in-memory stub collaborators are used (suitable for tests and
    /// standalone demos, not production).
    #[arg(long, env = "HUB_PERSISTENCE_URL")]
    pub persistence_url: Option<String>,
}

impl HubConfig {
    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(self.ping_period_ms)
    }

    pub fn pong_wait(&self) -> Duration {
        Duration::from_millis(self.pong_wait_ms)
    }

    pub fn write_wait(&self) -> Duration {
        Duration::from_millis(self.write_wait_ms)
    }

    pub fn close_grace_period(&self) -> Duration {
        Duration::from_millis(self.close_grace_period_ms)
    }

    pub fn stale_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.stale_sweep_interval_ms)
    }

    pub fn stale_timeout(&self) -> Duration {
        Duration::from_millis(self.stale_timeout_ms)
    }

    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }

    pub fn typing_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.typing_cleanup_interval_ms)
    }

    pub fn user_exists_cache_positive_ttl(&self) -> Duration {
        Duration::from_secs(self.user_exists_cache_positive_ttl_secs)
    }

    pub fn user_exists_cache_negative_ttl(&self) -> Duration {
        Duration::from_secs(self.user_exists_cache_negative_ttl_secs)
    }
}
