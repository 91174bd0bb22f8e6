// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Real-time messaging fabric: connection lifecycle, presence, typing, and
//! topic fan-out for a multi-device chat backend.

pub mod client;
pub mod collaborators;
pub mod config;
pub mod connection;
pub mod error;
pub mod hub;
pub mod manager;
pub mod model;
pub mod presence;
pub mod router;
pub mod subscription;
pub mod transport;
pub mod typing;
pub mod upgrader;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::HubConfig;
use crate::manager::Manager;

/// Run the hub until shutdown (Ctrl+C, or an embedder cancelling its own
/// token around this call).
pub async fn run(config: HubConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let manager = Manager::spawn(config);
    let router = transport::build_router(Arc::clone(&manager));

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "realtime-hub listening");

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_shutdown.cancel();
        }
    });

    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    tracing::info!("draining connected clients");
    manager.hub.shutdown().await;

    Ok(())
}
