// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One [`Client`] per open transport: lifecycle state machine,
//! bounded outbound queue, read/write pumps, and per-client counters. A
//! `Client` is exclusively owned by the Hub once registered; its pumps are
//! the only mutators of its transport.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use crate::connection::{ConnectionReader, ConnectionWriter, Frame, ReadError};
use crate::model::{ClientId, ClientMetadata, DeviceId, InboundEnvelope, OutboundEnvelope, UserId};
use crate::router::MessageRouter;

/// Lifecycle states for a connected client. Transitions are monotonic except the
/// `connecting -> error -> disconnected` branch; reconnection is modeled as a
/// brand new `Client`, never a state rewind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ClientState {
    Connecting = 0,
    Connected = 1,
    Disconnecting = 2,
    Error = 3,
    Disconnected = 4,
}

impl ClientState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Connected,
            2 => Self::Disconnecting,
            3 => Self::Error,
            _ => Self::Disconnected,
        }
    }
}

/// Errors surfaced by [`Client::send_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    /// State is neither `connecting` nor `connected`.
    Disconnected,
    /// The outbound queue was full for longer than `write_wait`; the client
    /// has been marked for disconnection.
    MessageTimeout,
    /// The write pump has already exited and dropped its receiver.
    ConnectionClosed,
}

/// Monotonic counters, updated without locking.
#[derive(Debug, Default)]
struct Counters {
    messages_sent: AtomicU64,
    messages_received: AtomicU64,
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

/// A message sent over the control channel, distinct from data frames so it
/// can never be reordered behind a slow data write.
enum ControlFrame {
    Pong(Vec<u8>),
    Close,
}

/// A single open transport connection from one device of one user.
pub struct Client {
    pub id: ClientId,
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub metadata: ClientMetadata,
    pub connected_at_ms: u64,

    outbound_tx: mpsc::Sender<OutboundEnvelope>,
    control_tx: mpsc::UnboundedSender<ControlFrame>,
    unregister_tx: mpsc::Sender<ClientId>,

    state: AtomicU8,
    last_activity_ms: AtomicU64,
    last_pong_ms: AtomicU64,
    counters: Counters,
    disconnect_once: AtomicBool,

    write_wait: Duration,
    close_grace_period: Duration,
}

impl Client {
    pub fn state(&self) -> ClientState {
        ClientState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, state: ClientState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub fn last_activity_ms(&self) -> u64 {
        self.last_activity_ms.load(Ordering::Relaxed)
    }

    pub fn last_pong_ms(&self) -> u64 {
        self.last_pong_ms.load(Ordering::Relaxed)
    }

    pub fn messages_sent(&self) -> u64 {
        self.counters.messages_sent.load(Ordering::Relaxed)
    }

    pub fn messages_received(&self) -> u64 {
        self.counters.messages_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.counters.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.counters.bytes_received.load(Ordering::Relaxed)
    }

    fn is_sendable(&self) -> bool {
        matches!(self.state(), ClientState::Connecting | ClientState::Connected)
    }

    /// Enqueue onto the bounded outbound channel.
    /// A full queue for longer than `write_wait` is a fatal slow-consumer
    /// condition: the client is marked for disconnection and the timeout is
    /// returned to the caller.
    pub async fn send_message(self: &Arc<Self>, envelope: OutboundEnvelope) -> Result<(), ClientError> {
        if !self.is_sendable() {
            return Err(ClientError::Disconnected);
        }

        match tokio::time::timeout(self.write_wait, self.outbound_tx.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ClientError::ConnectionClosed),
            Err(_elapsed) => {
                let this = Arc::clone(self);
                tokio::spawn(async move { this.handle_disconnect().await });
                Err(ClientError::MessageTimeout)
            }
        }
    }

    /// Idempotent close: transitions to `disconnecting`, asks the writer to
    /// send a close frame, then forces disconnect after `close_grace_period`
    /// regardless of whether the peer acknowledged.
    pub async fn close(self: &Arc<Self>) {
        if self.state() == ClientState::Disconnected {
            return;
        }
        self.transition(ClientState::Disconnecting);
        let _ = self.control_tx.send(ControlFrame::Close);
        tokio::time::sleep(self.close_grace_period).await;
        self.handle_disconnect().await;
    }

    /// The single disconnect path. Guarded by
    /// a one-shot flag so concurrent error paths from the read pump, write
    /// pump, stale sweeper, and explicit `close()` all converge on exactly
    /// one execution.
    pub async fn handle_disconnect(self: &Arc<Self>) {
        if self.disconnect_once.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire).is_err()
        {
            return;
        }
        self.transition(ClientState::Disconnecting);
        let _ = self.control_tx.send(ControlFrame::Close);
        // Enqueue unregister; the hub loop applies it serially relative to
        // any prior register for this client.
        let _ = self.unregister_tx.send(self.id).await;
        self.transition(ClientState::Disconnected);
    }
}

/// Construction parameters for [`new`], gathered so the call site doesn't
/// need a dozen positional arguments.
pub struct ClientParams {
    pub user_id: UserId,
    pub device_id: DeviceId,
    pub metadata: ClientMetadata,
    pub connected_at_ms: u64,
    pub outbound_queue_capacity: usize,
    pub ping_period: Duration,
    pub pong_wait: Duration,
    pub write_wait: Duration,
    pub close_grace_period: Duration,
}

/// The read/write pumps, held back until the caller has registered the
/// client with the Hub. Spawning the pumps first would let the read pump
/// race ahead and enqueue an unregister for a client the Hub has never seen
/// registered, leaving a zombie entry if that unregister is applied first.
pub struct PendingPumps {
    reader: ConnectionReader,
    writer: ConnectionWriter,
    outbound_rx: mpsc::Receiver<OutboundEnvelope>,
    control_rx: mpsc::UnboundedReceiver<ControlFrame>,
    router: Arc<dyn MessageRouter>,
    ping_period: Duration,
    pong_wait: Duration,
    write_wait: Duration,
}

impl PendingPumps {
    /// Start the read and write pumps. Call only after the client has been
    /// handed to `Hub::register`.
    pub fn start(self, client: Arc<Client>) {
        tokio::spawn(read_pump(Arc::clone(&client), self.reader, self.pong_wait, self.router));
        tokio::spawn(write_pump(client, self.writer, self.outbound_rx, self.control_rx, self.ping_period, self.write_wait));
    }
}

/// Construct a client's state and channels without starting its pumps. The
/// caller must register the returned handle with the Hub before calling
/// [`PendingPumps::start`], so a register-then-unregister ordering for this
/// client id is guaranteed regardless of how fast the transport fails.
pub fn new(
    reader: ConnectionReader,
    writer: ConnectionWriter,
    params: ClientParams,
    unregister_tx: mpsc::Sender<ClientId>,
    router: Arc<dyn MessageRouter>,
) -> (Arc<Client>, PendingPumps) {
    let (outbound_tx, outbound_rx) = mpsc::channel(params.outbound_queue_capacity.max(1));
    let (control_tx, control_rx) = mpsc::unbounded_channel();

    let client = Arc::new(Client {
        id: uuid::Uuid::new_v4(),
        user_id: params.user_id,
        device_id: params.device_id,
        metadata: params.metadata,
        connected_at_ms: params.connected_at_ms,
        outbound_tx,
        control_tx,
        unregister_tx,
        state: AtomicU8::new(ClientState::Connecting as u8),
        last_activity_ms: AtomicU64::new(params.connected_at_ms),
        last_pong_ms: AtomicU64::new(params.connected_at_ms),
        counters: Counters::default(),
        disconnect_once: AtomicBool::new(false),
        write_wait: params.write_wait,
        close_grace_period: params.close_grace_period,
    });
    client.transition(ClientState::Connected);

    let pumps = PendingPumps {
        reader,
        writer,
        outbound_rx,
        control_rx,
        router,
        ping_period: params.ping_period,
        pong_wait: params.pong_wait,
        write_wait: params.write_wait,
    };

    (client, pumps)
}

/// Loop: wait up to `pong_wait` for a frame, update activity/counters,
/// dispatch text frames through the router. Any read error or deadline
/// breach terminates the loop and triggers `handleDisconnect`.
async fn read_pump(
    client: Arc<Client>,
    mut reader: ConnectionReader,
    pong_wait: Duration,
    router: Arc<dyn MessageRouter>,
) {
    loop {
        match reader.read_message(pong_wait).await {
            Ok(Frame::Text(text)) => {
                client.last_activity_ms.store(crate::model::epoch_ms(), Ordering::Relaxed);
                client.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                client.counters.bytes_received.fetch_add(text.len() as u64, Ordering::Relaxed);

                match serde_json::from_str::<InboundEnvelope>(&text) {
                    Ok(envelope) => router.route(Arc::clone(&client), envelope).await,
                    Err(e) => {
                        tracing::warn!(client_id = %client.id, err = %e, "malformed envelope");
                    }
                }
            }
            Ok(Frame::Binary(bytes)) => {
                client.last_activity_ms.store(crate::model::epoch_ms(), Ordering::Relaxed);
                client.counters.messages_received.fetch_add(1, Ordering::Relaxed);
                client.counters.bytes_received.fetch_add(bytes.len() as u64, Ordering::Relaxed);
                tracing::debug!(client_id = %client.id, "binary frame ignored: text-only protocol");
            }
            Ok(Frame::Ping(payload)) => {
                let _ = client.control_tx.send(ControlFrame::Pong(payload));
            }
            Ok(Frame::Pong(_)) => {
                client.last_pong_ms.store(crate::model::epoch_ms(), Ordering::Relaxed);
            }
            Ok(Frame::Close(code)) => {
                if !crate::connection::is_routine_close_code(code) {
                    tracing::warn!(client_id = %client.id, close_code = code, "unexpected close code");
                }
                break;
            }
            Err(ReadError::Timeout) => {
                tracing::debug!(client_id = %client.id, "read deadline elapsed, no pong in time");
                break;
            }
            Err(ReadError::Closed) => break,
            Err(ReadError::Transport(e)) => {
                tracing::debug!(client_id = %client.id, err = %e, "transport read error");
                break;
            }
        }
    }

    client.handle_disconnect().await;
}

/// Loop over the outbound queue, the control channel, and a ping ticker.
/// Exactly one writer per client; this is the only task that touches the
/// transport's write half.
async fn write_pump(
    client: Arc<Client>,
    mut writer: ConnectionWriter,
    mut outbound_rx: mpsc::Receiver<OutboundEnvelope>,
    mut control_rx: mpsc::UnboundedReceiver<ControlFrame>,
    ping_period: Duration,
    write_wait: Duration,
) {
    let mut ticker = tokio::time::interval(ping_period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await; // first tick fires immediately; skip it

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if writer.write_ping(write_wait).await.is_err() {
                    break;
                }
            }
            ctrl = control_rx.recv() => {
                match ctrl {
                    Some(ControlFrame::Pong(payload)) => {
                        if writer.write_pong(payload, write_wait).await.is_err() {
                            break;
                        }
                    }
                    Some(ControlFrame::Close) | None => {
                        let _ = writer.write_close(write_wait).await;
                        break;
                    }
                }
            }
            envelope = outbound_rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        let text = match serde_json::to_string(&envelope) {
                            Ok(text) => text,
                            Err(e) => {
                                tracing::error!(client_id = %client.id, err = %e, "failed to encode outbound envelope");
                                continue;
                            }
                        };
                        let len = text.len() as u64;
                        if writer.write_message(text, write_wait).await.is_err() {
                            break;
                        }
                        client.counters.messages_sent.fetch_add(1, Ordering::Relaxed);
                        client.counters.bytes_sent.fetch_add(len, Ordering::Relaxed);
                    }
                    None => {
                        let _ = writer.write_close(write_wait).await;
                        break;
                    }
                }
            }
        }
    }

    client.handle_disconnect().await;
}
