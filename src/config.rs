// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process configuration, parsed from CLI flags with environment fallbacks.

use std::time::Duration;

#[derive(Debug, Clone, clap::Args)]
pub struct Config {
    /// Host to bind the HTTP/WS listener on.
    #[arg(long, default_value = "0.0.0.0", env = "CHATCOORD_HOST")]
    pub host: String,

    /// Port to bind the HTTP/WS listener on.
    #[arg(long, default_value_t = 8080, env = "CHATCOORD_PORT")]
    pub port: u16,

    /// Connection URL for the ephemeral store (queue, assignment leases, locks, presence).
    #[arg(long, default_value = "redis://127.0.0.1:6379", env = "CHATCOORD_REDIS_URL")]
    pub redis_url: String,

    /// Connection URL for the event bus.
    #[arg(long, default_value = "nats://127.0.0.1:4222", env = "CHATCOORD_NATS_URL")]
    pub nats_url: String,

    /// Optional bearer token for the NATS connection.
    #[arg(long, env = "CHATCOORD_NATS_TOKEN")]
    pub nats_token: Option<String>,

    /// Connection URL for the audit store.
    #[arg(long, default_value = "postgres://localhost/chatcoord", env = "CHATCOORD_DATABASE_URL")]
    pub database_url: String,

    /// Prefix applied to every ephemeral-store key and event-bus subject.
    #[arg(long, default_value = "chat", env = "CHATCOORD_KEY_PREFIX")]
    pub key_prefix: String,

    /// Bearer token gating the HTTP/WS surface. Unset disables the check.
    #[arg(long, env = "CHATCOORD_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Maximum entries included in a queue:snapshot broadcast.
    #[arg(long, default_value_t = 50, env = "CHATCOORD_QUEUE_BROADCAST_MAX_ENTRIES")]
    pub queue_broadcast_max_entries: usize,

    /// Age (seconds) past which a queue entry is purged and its conversation closed.
    #[arg(long, default_value_t = 3600, env = "CHATCOORD_QUEUE_PURGE_AGE_SECS")]
    pub queue_purge_age_secs: u64,

    /// Maximum conversations a single agent may hold concurrently.
    #[arg(long, default_value_t = 3, env = "CHATCOORD_QUEUE_PER_AGENT_CONCURRENCY")]
    pub queue_per_agent_concurrency: usize,

    /// TTL (seconds) of an assignment lease, refreshed on activity.
    #[arg(long, default_value_t = 120, env = "CHATCOORD_ASSIGNMENT_LEASE_TTL_SECS")]
    pub assignment_lease_ttl_secs: u64,

    /// Maximum message body size, in bytes.
    #[arg(long, default_value_t = 4096, env = "CHATCOORD_MESSAGE_MAX_BYTES")]
    pub message_max_bytes: usize,

    /// Retention (seconds) of the ephemeral message log tail.
    #[arg(long, default_value_t = 86400, env = "CHATCOORD_MESSAGE_RETENTION_SECS")]
    pub message_retention_secs: u64,

    /// Timeout (milliseconds) to acquire the per-conversation lock.
    #[arg(long, default_value_t = 5000, env = "CHATCOORD_LOCK_ACQUIRE_TIMEOUT_MS")]
    pub lock_acquire_timeout_ms: u64,

    /// Lease (milliseconds) held by a conversation lock once acquired.
    #[arg(long, default_value_t = 10000, env = "CHATCOORD_LOCK_LEASE_TTL_MS")]
    pub lock_lease_ttl_ms: u64,

    /// TTL (seconds) of a presence marker.
    #[arg(long, default_value_t = 30, env = "CHATCOORD_PRESENCE_TTL_SECS")]
    pub presence_ttl_secs: u64,

    /// Interval (seconds) between queue purge sweeps.
    #[arg(long, default_value_t = 60, env = "CHATCOORD_PURGE_SWEEP_INTERVAL_SECS")]
    pub purge_sweep_interval_secs: u64,
}

impl Config {
    pub fn queue_purge_age(&self) -> Duration {
        Duration::from_secs(self.queue_purge_age_secs)
    }

    pub fn assignment_lease_ttl(&self) -> Duration {
        Duration::from_secs(self.assignment_lease_ttl_secs)
    }

    pub fn message_retention(&self) -> Duration {
        Duration::from_secs(self.message_retention_secs)
    }

    pub fn lock_acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_acquire_timeout_ms)
    }

    pub fn lock_lease_ttl(&self) -> Duration {
        Duration::from_millis(self.lock_lease_ttl_ms)
    }

    pub fn presence_ttl(&self) -> Duration {
        Duration::from_secs(self.presence_ttl_secs)
    }

    pub fn purge_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.purge_sweep_interval_secs)
    }
}
