// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `realtime-hubd` binary as a subprocess and exercises it
//! over HTTP and WebSocket.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `realtime-hubd` binary.
pub fn hub_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs -> tests -> workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("realtime-hubd")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// Overrides for the hub's tunable timings, expressed as the `HUB_*` env
/// vars `realtime-hubd` reads. Left `None` to use the binary's defaults.
#[derive(Default)]
pub struct HubTuning {
    pub stale_sweep_interval_ms: Option<u64>,
    pub stale_timeout_ms: Option<u64>,
    pub outbound_queue_capacity: Option<usize>,
    pub write_wait_ms: Option<u64>,
    pub typing_ttl_ms: Option<u64>,
}

/// A running `realtime-hubd` process that is killed on drop.
pub struct HubProcess {
    child: Child,
    port: u16,
}

impl HubProcess {
    /// Spawn the hub on a free port with default tuning.
    pub fn start() -> anyhow::Result<Self> {
        Self::start_with(HubTuning::default())
    }

    /// Spawn the hub on a free port, overriding the given tunables.
    pub fn start_with(tuning: HubTuning) -> anyhow::Result<Self> {
        let binary = hub_binary();
        anyhow::ensure!(binary.exists(), "realtime-hubd binary not found at {}", binary.display());

        let port = free_port()?;

        let mut cmd = Command::new(&binary);
        cmd.args(["--host", "127.0.0.1", "--port"])
            .arg(port.to_string())
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        if let Some(ms) = tuning.stale_sweep_interval_ms {
            cmd.env("HUB_STALE_SWEEP_INTERVAL_MS", ms.to_string());
        }
        if let Some(ms) = tuning.stale_timeout_ms {
            cmd.env("HUB_STALE_TIMEOUT_MS", ms.to_string());
        }
        if let Some(n) = tuning.outbound_queue_capacity {
            cmd.env("HUB_OUTBOUND_QUEUE_CAPACITY", n.to_string());
        }
        if let Some(ms) = tuning.write_wait_ms {
            cmd.env("HUB_WRITE_WAIT_MS", ms.to_string());
        }
        if let Some(ms) = tuning.typing_ttl_ms {
            cmd.env("HUB_TYPING_TTL_MS", ms.to_string());
        }

        let child = cmd.spawn()?;

        Ok(Self { child, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Base URL for HTTP requests.
    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// WebSocket upgrade URL for the given user/device.
    pub fn ws_url(&self, user_id: &str, device_id: &str) -> String {
        format!("ws://127.0.0.1:{}/ws?user_id={user_id}&device_id={device_id}", self.port)
    }

    /// Poll `/healthz` until it responds successfully.
    pub async fn wait_healthy(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        let client = reqwest::Client::new();
        let url = format!("{}/healthz", self.base_url());
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("realtime-hubd did not become healthy within {timeout:?}");
            }
            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return Ok(());
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Current `connected_clients` count reported by `/healthz`.
    pub async fn connected_clients(&self) -> anyhow::Result<u64> {
        let url = format!("{}/healthz", self.base_url());
        let body: serde_json::Value = reqwest::get(&url).await?.json().await?;
        body.get("connected_clients")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow::anyhow!("missing connected_clients in health response"))
    }
}

impl Drop for HubProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
