// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation coordinator: the coordination core of a live customer-support
//! chat platform. See `SPEC_FULL.md` for the full component design.

pub mod assignment;
pub mod audit;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod gateway;
pub mod keys;
pub mod lock;
pub mod model;
pub mod queue;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::audit::PgAuditStore;
use crate::bus::NatsBus;
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorLimits};
use crate::gateway::{build_router, AppState};
use crate::store::RedisStore;

/// Run the coordinator until shutdown.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = Arc::new(RedisStore::connect(&config.redis_url, &config.key_prefix).await?);

    let audit = Arc::new(PgAuditStore::connect(&config.database_url).await?);
    audit.migrate().await?;

    let bus = Arc::new(NatsBus::connect(&config.nats_url, config.nats_token.as_deref(), &config.key_prefix).await?);
    bus.spawn_relays(shutdown.clone()).await?;

    let limits = CoordinatorLimits {
        message_max_bytes: config.message_max_bytes,
        message_retention: config.message_retention(),
        assignment_lease_ttl: config.assignment_lease_ttl(),
        lock_acquire_timeout: config.lock_acquire_timeout(),
        lock_lease_ttl: config.lock_lease_ttl(),
    };
    let coordinator = Arc::new(Coordinator::new(store, audit, bus, config.queue_per_agent_concurrency, limits));

    spawn_purge_sweeper(Arc::clone(&coordinator), config.queue_purge_age(), config.purge_sweep_interval(), shutdown.clone());
    spawn_signal_handler(shutdown.clone());

    let config = Arc::new(config);
    let state = AppState::new(coordinator, config);
    let router = build_router(state);

    info!(%addr, "conversation coordinator listening");
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    Ok(())
}

/// Cancel the shutdown token on the first SIGTERM or SIGINT.
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()).ok();
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt()).ok();

        tokio::select! {
            _ = async {
                match sigterm.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => info!("received SIGTERM, shutting down"),
            _ = async {
                match sigint.as_mut() {
                    Some(s) => s.recv().await,
                    None => std::future::pending().await,
                }
            } => info!("received SIGINT, shutting down"),
        }
        shutdown.cancel();
    });
}

/// Periodically close conversations whose queue entry has gone stale past
/// the configured age, freeing abandoned tickets without an agent ever
/// touching them.
fn spawn_purge_sweeper(
    coordinator: Arc<Coordinator>,
    age: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match coordinator.purge_sweep(age).await {
                        Ok(count) if count > 0 => info!(count, "purge sweep closed stale queue entries"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "purge sweep failed"),
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }
    });
}
