// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The event bus port: cross-instance distribution of lifecycle and message
//! events. `NatsBus` is the production adapter; `LocalBus` is an in-process
//! broadcast channel used in single-instance runs and tests.

use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::error::CoordError;
use crate::keys::KeyNamer;
use crate::model::{LifecycleEvent, Message};

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn publish_lifecycle(&self, event: &LifecycleEvent) -> Result<(), CoordError>;
    async fn publish_message(&self, message: &Message) -> Result<(), CoordError>;
    fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent>;
    fn subscribe_messages(&self) -> broadcast::Receiver<Message>;
}

/// In-process fan-out used for single-instance deployments and tests. A
/// `NatsBus` on top of this would republish received events into the same
/// local channels so gateway subscribers don't need to care which adapter is
/// in play.
pub struct LocalBus {
    lifecycle_tx: broadcast::Sender<LifecycleEvent>,
    message_tx: broadcast::Sender<Message>,
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBus {
    pub fn new() -> Self {
        let (lifecycle_tx, _) = broadcast::channel(1024);
        let (message_tx, _) = broadcast::channel(1024);
        Self { lifecycle_tx, message_tx }
    }
}

#[async_trait]
impl EventBus for LocalBus {
    async fn publish_lifecycle(&self, event: &LifecycleEvent) -> Result<(), CoordError> {
        // No subscribers is not an error: the conversation may have no live
        // gateway session watching it.
        let _ = self.lifecycle_tx.send(event.clone());
        Ok(())
    }

    async fn publish_message(&self, message: &Message) -> Result<(), CoordError> {
        let _ = self.message_tx.send(message.clone());
        Ok(())
    }

    fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle_tx.subscribe()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.message_tx.subscribe()
    }
}

/// NATS-backed production adapter. Publishes onto `{prefix}.events.lifecycle`
/// and `{prefix}.events.message`, and relays subject traffic back into a
/// `LocalBus` so every gateway node on the same process sees both locally
/// published and remotely received events through one channel.
pub struct NatsBus {
    client: async_nats::Client,
    keys: KeyNamer,
    local: LocalBus,
}

impl NatsBus {
    pub async fn connect(url: &str, token: Option<&str>, key_prefix: &str) -> Result<Self, CoordError> {
        let mut opts = async_nats::ConnectOptions::new();
        if let Some(token) = token {
            opts = opts.token(token.to_owned());
        }
        opts = opts.retry_on_initial_connect();

        info!(%url, prefix = %key_prefix, "connecting event bus");
        let client = opts
            .connect(url)
            .await
            .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        info!("event bus connected");

        Ok(Self { client, keys: KeyNamer::new(key_prefix), local: LocalBus::new() })
    }

    /// Spawn the background tasks that bridge NATS subjects into the local
    /// broadcast channels. Must run before the gateway accepts connections
    /// (subscribe-before-publish, per the design notes on eventual consistency).
    pub async fn spawn_relays(&self, shutdown: tokio_util::sync::CancellationToken) -> Result<(), CoordError> {
        let lifecycle_sub = self
            .client
            .subscribe(self.keys.bus_subject_lifecycle())
            .await
            .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        let message_sub = self
            .client
            .subscribe(self.keys.bus_subject_message())
            .await
            .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;

        let lifecycle_tx = self.local.lifecycle_tx.clone();
        let lifecycle_shutdown = shutdown.clone();
        tokio::spawn(relay_lifecycle(lifecycle_sub, lifecycle_tx, lifecycle_shutdown));

        let message_tx = self.local.message_tx.clone();
        tokio::spawn(relay_messages(message_sub, message_tx, shutdown));

        Ok(())
    }
}

async fn relay_lifecycle(
    mut sub: async_nats::Subscriber,
    tx: broadcast::Sender<LifecycleEvent>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    use futures_util::StreamExt;
    loop {
        tokio::select! {
            msg = sub.next() => {
                let Some(msg) = msg else { break };
                match serde_json::from_slice::<LifecycleEvent>(&msg.payload) {
                    Ok(event) => { let _ = tx.send(event); }
                    Err(e) => warn!("dropping malformed lifecycle event: {e}"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("lifecycle relay shutting down");
}

async fn relay_messages(
    mut sub: async_nats::Subscriber,
    tx: broadcast::Sender<Message>,
    shutdown: tokio_util::sync::CancellationToken,
) {
    use futures_util::StreamExt;
    loop {
        tokio::select! {
            msg = sub.next() => {
                let Some(msg) = msg else { break };
                match serde_json::from_slice::<Message>(&msg.payload) {
                    Ok(message) => { let _ = tx.send(message); }
                    Err(e) => warn!("dropping malformed message event: {e}"),
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
    debug!("message relay shutting down");
}

#[async_trait]
impl EventBus for NatsBus {
    async fn publish_lifecycle(&self, event: &LifecycleEvent) -> Result<(), CoordError> {
        let payload = serde_json::to_vec(event).map_err(|e| CoordError::InvalidArgument(e.to_string()))?;
        if let Err(e) = self.client.publish(self.keys.bus_subject_lifecycle(), payload.into()).await {
            warn!("event bus publish (lifecycle) failed: {e}");
        }
        // Publish locally too so this node's own subscribers don't wait on a
        // round trip through the broker for their own writes.
        let _ = self.local.lifecycle_tx.send(event.clone());
        Ok(())
    }

    async fn publish_message(&self, message: &Message) -> Result<(), CoordError> {
        let payload = serde_json::to_vec(message).map_err(|e| CoordError::InvalidArgument(e.to_string()))?;
        if let Err(e) = self.client.publish(self.keys.bus_subject_message(), payload.into()).await {
            warn!("event bus publish (message) failed: {e}");
        }
        let _ = self.local.message_tx.send(message.clone());
        Ok(())
    }

    fn subscribe_lifecycle(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.local.subscribe_lifecycle()
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<Message> {
        self.local.subscribe_messages()
    }
}
