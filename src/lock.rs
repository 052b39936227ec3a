// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed conversation lock: `SET NX PX` acquire plus a fencing-token
//! compare-and-delete release, giving cross-instance visibility that an
//! in-process mutex cannot. See `SPEC_FULL.md` §9 for why this must live in
//! the ephemeral store rather than a local `Mutex`.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::warn;
use uuid::Uuid;

use crate::error::CoordError;
use crate::store::Store;

const RETRY_BASE: Duration = Duration::from_millis(20);
const RETRY_CAP: Duration = Duration::from_millis(200);

pub struct LockManager {
    store: Arc<dyn Store>,
    acquire_timeout: Duration,
    lease_ttl: Duration,
}

impl LockManager {
    pub fn new(store: Arc<dyn Store>, acquire_timeout: Duration, lease_ttl: Duration) -> Self {
        Self { store, acquire_timeout, lease_ttl }
    }

    /// Acquire `name`, retrying with jittered backoff until `acquire_timeout`
    /// elapses. Returns `CoordError::Contention` on timeout.
    pub async fn acquire(&self, name: &str) -> Result<LockGuard, CoordError> {
        let token = Uuid::new_v4().to_string();
        let deadline = tokio::time::Instant::now() + self.acquire_timeout;
        let mut backoff = RETRY_BASE;

        loop {
            if self.store.acquire_lock(name, &token, self.lease_ttl).await? {
                return Ok(LockGuard {
                    inner: Some(LockInner { store: self.store.clone(), name: name.to_owned(), token }),
                });
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(CoordError::Contention);
            }
            let jitter = rand::rng().random_range(0..=backoff.as_millis() as u64 / 2 + 1);
            sleep(backoff + Duration::from_millis(jitter)).await;
            backoff = (backoff * 2).min(RETRY_CAP);
        }
    }
}

struct LockInner {
    store: Arc<dyn Store>,
    name: String,
    token: String,
}

/// Releases the lock on drop via a best-effort spawned task, matching the
/// fire-and-forget cleanup style used elsewhere for non-critical-path work.
/// Callers that need to guarantee release before returning should call
/// `release` explicitly — doing so takes `inner`, so `Drop` finds nothing
/// left to clean up and does not spawn a second, redundant release.
pub struct LockGuard {
    inner: Option<LockInner>,
}

impl LockGuard {
    pub async fn release(mut self) -> Result<(), CoordError> {
        match self.inner.take() {
            Some(inner) => inner.store.release_lock(&inner.name, &inner.token).await,
            None => Ok(()),
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            tokio::spawn(async move {
                if let Err(e) = inner.store.release_lock(&inner.name, &inner.token).await {
                    warn!("failed to release lock {} on drop: {e}", inner.name);
                }
            });
        }
    }
}
