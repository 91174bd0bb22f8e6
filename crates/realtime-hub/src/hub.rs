// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authoritative in-memory registry of connected clients. A
//! single event-loop task owns all mutations to the `user -> device -> Client`
//! map; queries run concurrently under a read-lock on the same map. This
//! hybrid is the ordering-guarantee primitive the rest of the fabric leans on.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, RwLock};

use crate::client::Client;
use crate::config::HubConfig;
use crate::model::{ClientId, DeviceId, DeviceInfo, OutboundEnvelope, UserId};

/// Emitted whenever the client population for a user changes, so the
/// presence tracker and manager can react without polling the hub.
#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Connected { user_id: UserId, device_id: DeviceId, client_id: ClientId },
    Disconnected { user_id: UserId, device_id: DeviceId, client_id: ClientId, remaining_devices: usize },
}

/// Who a queued broadcast job should reach.
#[derive(Debug, Clone)]
pub enum BroadcastTarget {
    User(UserId),
    Clients(Vec<ClientId>),
}

/// A unit of work on the `presence_broadcast` / `typing_broadcast` channels
///. Kept as one type since both channels carry the same
/// shape of work and differ only in who's allowed to enqueue onto them.
#[derive(Debug, Clone)]
pub struct BroadcastJob {
    pub target: BroadcastTarget,
    pub envelope: OutboundEnvelope,
    pub exclude: Option<ClientId>,
}

type UserMap = HashMap<UserId, HashMap<DeviceId, Arc<Client>>>;
type IdMap = HashMap<ClientId, Arc<Client>>;

/// The hub itself. Cheaply cloned via `Arc`; the event loop holds its own
/// clone and runs for the lifetime of the process.
pub struct Hub {
    by_user: RwLock<UserMap>,
    by_id: RwLock<IdMap>,

    register_tx: mpsc::Sender<Arc<Client>>,
    unregister_tx: mpsc::Sender<ClientId>,
    presence_broadcast_tx: mpsc::Sender<BroadcastJob>,
    typing_broadcast_tx: mpsc::Sender<BroadcastJob>,
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,

    config: HubConfig,
}

impl Hub {
    /// Build the hub and spawn its event loop plus stale-connection sweeper.
    pub fn spawn(config: HubConfig) -> Arc<Hub> {
        let (register_tx, register_rx) = mpsc::channel(config.lifecycle_channel_capacity);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.lifecycle_channel_capacity);
        let (presence_broadcast_tx, presence_broadcast_rx) =
            mpsc::channel(config.broadcast_channel_capacity);
        let (typing_broadcast_tx, typing_broadcast_rx) = mpsc::channel(config.broadcast_channel_capacity);
        let (lifecycle_tx, _) = broadcast::channel(config.broadcast_channel_capacity);

        let hub = Arc::new(Hub {
            by_user: RwLock::new(HashMap::new()),
            by_id: RwLock::new(HashMap::new()),
            register_tx,
            unregister_tx,
            presence_broadcast_tx,
            typing_broadcast_tx,
            lifecycle_tx,
            config: config.clone(),
        });

        tokio::spawn(Arc::clone(&hub).run_event_loop(
            register_rx,
            unregister_rx,
            presence_broadcast_rx,
            typing_broadcast_rx,
        ));
        tokio::spawn(Arc::clone(&hub).run_stale_sweeper());

        hub
    }

    /// The per-client register channel. A full channel indicates backpressure
    /// at the connection tier and must not block the upgrader: a full
    /// channel spills the connection with a logged warning.
    pub async fn register(&self, client: Arc<Client>) {
        if let Err(e) = self.register_tx.try_send(client) {
            tracing::warn!(err = %e, "register channel full, dropping connection");
            if let mpsc::error::TrySendError::Full(client) = e {
                client.handle_disconnect().await;
            }
        }
    }

    /// Enqueue an unregister. Unlike `register`, this blocks rather than
    /// spills: losing an unregister would leak a map entry forever, whereas
    /// losing a register only drops one connection attempt.
    pub async fn unregister(&self, client_id: ClientId) {
        let _ = self.unregister_tx.send(client_id).await;
    }

    pub fn unregister_sender(&self) -> mpsc::Sender<ClientId> {
        self.unregister_tx.clone()
    }

    pub fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    /// O(1) read under read-lock.
    pub async fn is_online(&self, user_id: UserId) -> bool {
        self.by_user.read().await.get(&user_id).is_some_and(|devices| !devices.is_empty())
    }

    /// Snapshot under read-lock.
    pub async fn active_devices(&self, user_id: UserId) -> Vec<DeviceInfo> {
        self.by_user
            .read()
            .await
            .get(&user_id)
            .map(|devices| {
                devices
                    .values()
                    .map(|c| DeviceInfo {
                        device_id: c.device_id.clone(),
                        client_id: c.id,
                        connected_at_ms: c.connected_at_ms,
                        metadata: c.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn connected_client_count(&self) -> usize {
        self.by_id.read().await.len()
    }

    /// Distinct users with at least one connected device, as opposed to
    /// [`Self::connected_client_count`]'s flat device count.
    pub async fn online_user_count(&self) -> usize {
        self.by_user.read().await.len()
    }

    pub async fn device_count(&self, user_id: UserId) -> usize {
        self.by_user.read().await.get(&user_id).map(|d| d.len()).unwrap_or(0)
    }

    /// Enqueue to every client for `user_id` via `SendMessage`; a failing
    /// send disconnects only that client.
    pub async fn broadcast_to_user(&self, user_id: UserId, envelope: OutboundEnvelope) {
        let clients: Vec<Arc<Client>> =
            self.by_user.read().await.get(&user_id).map(|d| d.values().cloned().collect()).unwrap_or_default();
        for client in clients {
            if client.send_message(envelope.clone()).await.is_err() {
                tracing::debug!(client_id = %client.id, "broadcast send failed, client disconnecting");
            }
        }
    }

    /// Enqueue to an explicit set of clients, optionally excluding one (used
    /// for topic fan-out and typing notifications that must exclude the
    /// sender.
    pub async fn broadcast_to_clients(
        &self,
        client_ids: &[ClientId],
        envelope: OutboundEnvelope,
        exclude: Option<ClientId>,
    ) {
        let by_id = self.by_id.read().await;
        let clients: Vec<Arc<Client>> = client_ids
            .iter()
            .filter(|id| Some(**id) != exclude)
            .filter_map(|id| by_id.get(id).cloned())
            .collect();
        drop(by_id);
        for client in clients {
            if client.send_message(envelope.clone()).await.is_err() {
                tracing::debug!(client_id = %client.id, "broadcast send failed, client disconnecting");
            }
        }
    }

    /// Non-blocking enqueue onto the presence broadcast channel. Presence is
    /// soft state: on a full channel the broadcast is dropped with a warning
    /// rather than applying backpressure.
    pub fn queue_presence_broadcast(&self, user_id: UserId, envelope: OutboundEnvelope) {
        let job = BroadcastJob { target: BroadcastTarget::User(user_id), envelope, exclude: None };
        if self.presence_broadcast_tx.try_send(job).is_err() {
            tracing::warn!(%user_id, "presence broadcast channel full, dropping");
        }
    }

    /// Non-blocking enqueue onto the typing broadcast channel.
    pub fn queue_typing_broadcast(
        &self,
        client_ids: Vec<ClientId>,
        envelope: OutboundEnvelope,
        exclude: Option<ClientId>,
    ) {
        let job = BroadcastJob { target: BroadcastTarget::Clients(client_ids), envelope, exclude };
        if self.typing_broadcast_tx.try_send(job).is_err() {
            tracing::warn!("typing broadcast channel full, dropping");
        }
    }

    /// Drain all clients on shutdown. Idempotent by
    /// virtue of `Client::close` being idempotent.
    pub async fn shutdown(&self) {
        let clients: Vec<Arc<Client>> = self.by_id.read().await.values().cloned().collect();
        for client in clients {
            client.close().await;
        }
        self.by_user.write().await.clear();
        self.by_id.write().await.clear();
    }

    async fn apply_register(&self, client: Arc<Client>) {
        let mut by_user = self.by_user.write().await;
        let mut by_id = self.by_id.write().await;

        let devices = by_user.entry(client.user_id).or_default();
        if let Some(old) = devices.insert(client.device_id.clone(), Arc::clone(&client)) {
            if old.id != client.id {
                tracing::info!(client_id = %old.id, "superseded by new connection on same device");
                let old = Arc::clone(&old);
                tokio::spawn(async move { old.handle_disconnect().await });
            }
        }
        by_id.insert(client.id, Arc::clone(&client));

        let _ = self.lifecycle_tx.send(LifecycleEvent::Connected {
            user_id: client.user_id,
            device_id: client.device_id.clone(),
            client_id: client.id,
        });
    }

    async fn apply_unregister(&self, client_id: ClientId) {
        let mut by_id = self.by_id.write().await;
        let Some(client) = by_id.remove(&client_id) else { return };
        drop(by_id);

        let mut by_user = self.by_user.write().await;
        let remaining = if let Some(devices) = by_user.get_mut(&client.user_id) {
            // Only remove the device entry if it still points at this exact
            // client: a newer connection on the same device may have already
            // replaced it (see `apply_register`).
            if devices.get(&client.device_id).is_some_and(|c| c.id == client_id) {
                devices.remove(&client.device_id);
            }
            let remaining = devices.len();
            if devices.is_empty() {
                by_user.remove(&client.user_id);
            }
            remaining
        } else {
            0
        };
        drop(by_user);

        let _ = self.lifecycle_tx.send(LifecycleEvent::Disconnected {
            user_id: client.user_id,
            device_id: client.device_id.clone(),
            client_id,
            remaining_devices: remaining,
        });
    }

    async fn run_event_loop(
        self: Arc<Self>,
        mut register_rx: mpsc::Receiver<Arc<Client>>,
        mut unregister_rx: mpsc::Receiver<ClientId>,
        mut presence_broadcast_rx: mpsc::Receiver<BroadcastJob>,
        mut typing_broadcast_rx: mpsc::Receiver<BroadcastJob>,
    ) {
        loop {
            tokio::select! {
                biased;

                Some(client) = register_rx.recv() => {
                    self.apply_register(client).await;
                }
                Some(client_id) = unregister_rx.recv() => {
                    self.apply_unregister(client_id).await;
                }
                Some(job) = presence_broadcast_rx.recv() => {
                    self.dispatch_broadcast_job(job);
                }
                Some(job) = typing_broadcast_rx.recv() => {
                    self.dispatch_broadcast_job(job);
                }
                else => break,
            }
        }
    }

    /// Fan-out runs on its own task so a slow recipient never stalls the
    /// event loop's ability to keep draining register/unregister.
    fn dispatch_broadcast_job(self: &Arc<Self>, job: BroadcastJob) {
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            match job.target {
                BroadcastTarget::User(user_id) => hub.broadcast_to_user(user_id, job.envelope).await,
                BroadcastTarget::Clients(ids) => {
                    hub.broadcast_to_clients(&ids, job.envelope, job.exclude).await
                }
            }
        });
    }

    /// Background ticker: any client with `now - last_pong > stale_timeout`
    /// is unregistered. Snapshots
    /// under the read-lock, then releases it before disconnecting.
    async fn run_stale_sweeper(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.config.stale_sweep_interval());
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let stale_timeout_ms = self.config.stale_timeout_ms;
            let now = crate::model::epoch_ms();

            let stale: Vec<Arc<Client>> = {
                let by_id = self.by_id.read().await;
                by_id
                    .values()
                    .filter(|c| now.saturating_sub(c.last_pong_ms()) > stale_timeout_ms)
                    .cloned()
                    .collect()
            };

            for client in stale {
                tracing::info!(client_id = %client.id, "stale connection sweep: unregistering");
                client.handle_disconnect().await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HubConfig {
        use clap::Parser;
        #[derive(clap::Parser)]
        struct TestCli {
            #[command(flatten)]
            hub: HubConfig,
        }
        TestCli::parse_from(["test"]).hub
    }

    #[tokio::test]
    async fn unregister_of_unknown_client_is_a_no_op() {
        let hub = Hub::spawn(test_config());
        hub.unregister(uuid::Uuid::new_v4()).await;
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!hub.is_online(uuid::Uuid::new_v4()).await);
    }

    #[tokio::test]
    async fn empty_hub_reports_offline_and_no_devices() {
        let hub = Hub::spawn(test_config());
        let user = uuid::Uuid::new_v4();
        assert!(!hub.is_online(user).await);
        assert_eq!(hub.device_count(user).await, 0);
        assert!(hub.active_devices(user).await.is_empty());
        assert_eq!(hub.online_user_count().await, 0);
        assert_eq!(hub.connected_client_count().await, 0);
    }
}
