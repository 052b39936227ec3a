// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ephemeral-store port: FIFO queue, assignment leases, presence, and
//! distributed locks. `RedisStore` is the production adapter; `MemStore` backs
//! tests and preserves the same atomicity contract for the claim operation.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tracing::warn;

use crate::error::CoordError;
use crate::keys::KeyNamer;
use crate::model::{epoch_ms, Message, QueueEntry};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(QueueEntry),
    Owned,
    Busy,
    Missing,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), CoordError>;

    /// Atomically decide ownership of `conversation_id` for `agent_id`. See
    /// `SPEC_FULL.md` §4.B / §9: this must be a single indivisible operation.
    async fn claim_for_agent(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, CoordError>;

    async fn peek(&self) -> Result<Option<QueueEntry>, CoordError>;
    async fn remove(&self, conversation_id: &str) -> Result<Option<QueueEntry>, CoordError>;
    async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>, CoordError>;
    async fn position(&self, conversation_id: &str) -> Result<i64, CoordError>;
    async fn touch(&self, conversation_id: &str) -> Result<(), CoordError>;
    async fn purge_older_than(&self, age: Duration) -> Result<Vec<QueueEntry>, CoordError>;

    async fn assignment_owner(&self, conversation_id: &str) -> Result<Option<String>, CoordError>;
    async fn release_assignment(&self, conversation_id: &str) -> Result<(), CoordError>;
    async fn refresh_assignment(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<(), CoordError>;

    async fn set_presence(&self, participant_id: &str, ttl: Duration) -> Result<(), CoordError>;
    async fn is_present(&self, participant_id: &str) -> Result<bool, CoordError>;

    /// `SET key token NX PX ttl`. Returns whether the lock was acquired.
    async fn acquire_lock(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, CoordError>;
    /// Compare-and-delete release, guarded by the fencing token used to acquire it.
    async fn release_lock(&self, name: &str, token: &str) -> Result<(), CoordError>;

    /// Append to the TTL-bounded ephemeral message log for a conversation.
    async fn append_message(&self, message: &Message, retention: Duration) -> Result<(), CoordError>;
    /// Most recent `limit` messages for a conversation, oldest first.
    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, CoordError>;
}

// ── Redis adapter ──────────────────────────────────────────────────────────

/// `claim_for_agent` as a single Lua script: read ownership, remove from the
/// sorted set and the entry hash, set ownership with TTL — one network round
/// trip, atomic. The entry payload is fetched and deleted inside the script
/// itself, not by the caller, so the whole claim is genuinely indivisible.
const CLAIM_SCRIPT: &str = r#"
local assignment_key = KEYS[1]
local queue_key = KEYS[2]
local entry_hash_key = KEYS[3]
local conversation_id = ARGV[1]
local agent_id = ARGV[2]
local ttl_ms = tonumber(ARGV[3])

local owner = redis.call('GET', assignment_key)
if owner then
    if owner == agent_id then
        redis.call('PSETEX', assignment_key, ttl_ms, agent_id)
        return {'owned'}
    else
        return {'busy'}
    end
end

local removed = redis.call('ZREM', queue_key, conversation_id)
if removed == 0 then
    return {'missing'}
end

local entry_json = redis.call('HGET', entry_hash_key, conversation_id)
redis.call('HDEL', entry_hash_key, conversation_id)
redis.call('PSETEX', assignment_key, ttl_ms, agent_id)
return {'claimed', entry_json}
"#;

const RELEASE_LOCK_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

pub struct RedisStore {
    manager: redis::aio::ConnectionManager,
    keys: KeyNamer,
    claim_script: redis::Script,
    release_lock_script: redis::Script,
}

impl RedisStore {
    pub async fn connect(url: &str, key_prefix: &str) -> Result<Self, CoordError> {
        let client = redis::Client::open(url)
            .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        let manager = client
            .get_connection_manager()
            .await
            .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        Ok(Self {
            manager,
            keys: KeyNamer::new(key_prefix),
            claim_script: redis::Script::new(CLAIM_SCRIPT),
            release_lock_script: redis::Script::new(RELEASE_LOCK_SCRIPT),
        })
    }

    fn conn(&self) -> redis::aio::ConnectionManager {
        self.manager.clone()
    }
}

fn backend_err(e: redis::RedisError) -> CoordError {
    CoordError::BackendUnavailable(e.to_string())
}

#[async_trait]
impl Store for RedisStore {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let payload = serde_json::to_string(entry)
            .map_err(|e| CoordError::InvalidArgument(e.to_string()))?;
        let hash_key = format!("{}:entry", self.keys.queue_pending());
        let _: () = conn
            .hset(&hash_key, &entry.conversation_id, &payload)
            .await
            .map_err(backend_err)?;
        let _: () = conn
            .zadd(self.keys.queue_pending(), &entry.conversation_id, entry.enqueued_at as f64)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn claim_for_agent(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, CoordError> {
        let mut conn = self.conn();
        let hash_key = format!("{}:entry", self.keys.queue_pending());

        let result: Vec<Option<String>> = self
            .claim_script
            .key(self.keys.assignment(conversation_id))
            .key(self.keys.queue_pending())
            .key(&hash_key)
            .arg(conversation_id)
            .arg(agent_id)
            .arg(ttl.as_millis() as i64)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;

        match result.first().and_then(|s| s.as_deref()) {
            Some("owned") => Ok(ClaimOutcome::Owned),
            Some("busy") => Ok(ClaimOutcome::Busy),
            Some("missing") => Ok(ClaimOutcome::Missing),
            Some("claimed") => {
                let entry_json = result.get(1).and_then(|s| s.as_deref()).unwrap_or("");
                let entry: QueueEntry = serde_json::from_str(entry_json)
                    .map_err(|e| CoordError::BackendUnavailable(format!("corrupt queue entry: {e}")))?;
                Ok(ClaimOutcome::Claimed(entry))
            }
            other => Err(CoordError::BackendUnavailable(format!("unexpected claim result: {other:?}"))),
        }
    }

    async fn peek(&self) -> Result<Option<QueueEntry>, CoordError> {
        let entries = self.list(1).await?;
        Ok(entries.into_iter().next())
    }

    async fn remove(&self, conversation_id: &str) -> Result<Option<QueueEntry>, CoordError> {
        let mut conn = self.conn();
        let hash_key = format!("{}:entry", self.keys.queue_pending());
        let entry_json: Option<String> = conn.hget(&hash_key, conversation_id).await.map_err(backend_err)?;
        let _: () = conn.zrem(self.keys.queue_pending(), conversation_id).await.map_err(backend_err)?;
        let _: () = conn.hdel(&hash_key, conversation_id).await.map_err(backend_err)?;
        match entry_json {
            Some(json) => serde_json::from_str(&json)
                .map(Some)
                .map_err(|e| CoordError::BackendUnavailable(format!("corrupt queue entry: {e}"))),
            None => Ok(None),
        }
    }

    async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>, CoordError> {
        let mut conn = self.conn();
        let ids: Vec<String> = conn
            .zrange(self.keys.queue_pending(), 0, (limit.max(1) - 1) as isize)
            .await
            .map_err(backend_err)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let hash_key = format!("{}:entry", self.keys.queue_pending());
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let json: Option<String> = conn.hget(&hash_key, &id).await.map_err(backend_err)?;
            if let Some(json) = json {
                if let Ok(entry) = serde_json::from_str(&json) {
                    out.push(entry);
                }
            }
        }
        Ok(out)
    }

    async fn position(&self, conversation_id: &str) -> Result<i64, CoordError> {
        let mut conn = self.conn();
        let rank: Option<isize> = conn
            .zrank(self.keys.queue_pending(), conversation_id)
            .await
            .map_err(backend_err)?;
        Ok(rank.map(|r| r as i64).unwrap_or(-1))
    }

    async fn touch(&self, conversation_id: &str) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let now = epoch_ms();
        let exists: bool = conn
            .zscore::<_, _, Option<f64>>(self.keys.queue_pending(), conversation_id)
            .await
            .map_err(backend_err)?
            .is_some();
        if exists {
            let _: () = conn
                .zadd(self.keys.queue_pending(), conversation_id, now as f64)
                .await
                .map_err(backend_err)?;
        }
        Ok(())
    }

    async fn purge_older_than(&self, age: Duration) -> Result<Vec<QueueEntry>, CoordError> {
        let mut conn = self.conn();
        let cutoff = epoch_ms().saturating_sub(age.as_millis() as u64);
        let stale_ids: Vec<String> = conn
            .zrangebyscore(self.keys.queue_pending(), 0, cutoff as f64)
            .await
            .map_err(backend_err)?;
        let mut purged = Vec::with_capacity(stale_ids.len());
        for id in stale_ids {
            if let Some(entry) = self.remove(&id).await? {
                purged.push(entry);
            }
        }
        Ok(purged)
    }

    async fn assignment_owner(&self, conversation_id: &str) -> Result<Option<String>, CoordError> {
        let mut conn = self.conn();
        conn.get(self.keys.assignment(conversation_id)).await.map_err(backend_err)
    }

    async fn release_assignment(&self, conversation_id: &str) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let _: () = conn.del(self.keys.assignment(conversation_id)).await.map_err(backend_err)?;
        Ok(())
    }

    async fn refresh_assignment(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(self.keys.assignment(conversation_id), agent_id, ttl.as_secs().max(1))
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn set_presence(&self, participant_id: &str, ttl: Duration) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let _: () = conn
            .set_ex(self.keys.presence(participant_id), "1", ttl.as_secs().max(1))
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn is_present(&self, participant_id: &str) -> Result<bool, CoordError> {
        let mut conn = self.conn();
        conn.exists(self.keys.presence(participant_id)).await.map_err(backend_err)
    }

    async fn acquire_lock(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, CoordError> {
        let mut conn = self.conn();
        let opts = redis::SetOptions::default()
            .with_expiration(redis::SetExpiry::PX(ttl.as_millis() as usize))
            .conditional_set(redis::ExistenceCheck::NX);
        let result: Option<String> = conn.set_options(name, token, opts).await.map_err(backend_err)?;
        Ok(result.is_some())
    }

    async fn release_lock(&self, name: &str, token: &str) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let _: i32 = self
            .release_lock_script
            .key(name)
            .arg(token)
            .invoke_async(&mut conn)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn append_message(&self, message: &Message, retention: Duration) -> Result<(), CoordError> {
        let mut conn = self.conn();
        let key = self.keys.conversation_messages(&message.conversation_id);
        let payload = serde_json::to_string(message).map_err(|e| CoordError::InvalidArgument(e.to_string()))?;
        let _: () = conn.rpush(&key, payload).await.map_err(backend_err)?;
        let _: () = conn.expire(&key, retention.as_secs().max(1) as i64).await.map_err(backend_err)?;
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, CoordError> {
        let mut conn = self.conn();
        let key = self.keys.conversation_messages(conversation_id);
        let len: isize = conn.llen(&key).await.map_err(backend_err)?;
        let start = (len - limit as isize).max(0);
        let raw: Vec<String> = conn.lrange(&key, start, -1).await.map_err(backend_err)?;
        raw.into_iter()
            .map(|s| serde_json::from_str(&s).map_err(|e| CoordError::BackendUnavailable(format!("corrupt message: {e}"))))
            .collect()
    }
}

// ── In-memory adapter (tests) ───────────────────────────────────────────────

#[derive(Default)]
struct MemState {
    queue: BTreeMap<String, QueueEntry>,
    assignments: std::collections::HashMap<String, (String, std::time::Instant)>,
    presence: std::collections::HashMap<String, std::time::Instant>,
    locks: std::collections::HashMap<String, (String, std::time::Instant)>,
    messages: std::collections::HashMap<String, Vec<Message>>,
}

/// Single-mutex in-process stand-in for the Redis adapter. Correctness of the
/// claim operation depends only on the mutex being held across the whole
/// check-then-act sequence, mirroring the atomicity the Lua script provides.
pub struct MemStore {
    state: Mutex<MemState>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self { state: Mutex::new(MemState::default()) }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("mem store mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

#[async_trait]
impl Store for MemStore {
    async fn enqueue(&self, entry: &QueueEntry) -> Result<(), CoordError> {
        self.lock().queue.insert(entry.conversation_id.clone(), entry.clone());
        Ok(())
    }

    async fn claim_for_agent(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, CoordError> {
        let mut state = self.lock();
        if let Some((owner, _)) = state.assignments.get(conversation_id) {
            if owner == agent_id {
                let deadline = std::time::Instant::now() + ttl;
                state.assignments.insert(conversation_id.to_owned(), (agent_id.to_owned(), deadline));
                return Ok(ClaimOutcome::Owned);
            }
            return Ok(ClaimOutcome::Busy);
        }
        match state.queue.remove(conversation_id) {
            Some(entry) => {
                let deadline = std::time::Instant::now() + ttl;
                state.assignments.insert(conversation_id.to_owned(), (agent_id.to_owned(), deadline));
                Ok(ClaimOutcome::Claimed(entry))
            }
            None => Ok(ClaimOutcome::Missing),
        }
    }

    async fn peek(&self) -> Result<Option<QueueEntry>, CoordError> {
        Ok(self.lock().queue.values().min_by_key(|e| e.enqueued_at).cloned())
    }

    async fn remove(&self, conversation_id: &str) -> Result<Option<QueueEntry>, CoordError> {
        Ok(self.lock().queue.remove(conversation_id))
    }

    async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>, CoordError> {
        let state = self.lock();
        let mut entries: Vec<QueueEntry> = state.queue.values().cloned().collect();
        entries.sort_by_key(|e| e.enqueued_at);
        entries.truncate(limit);
        Ok(entries)
    }

    async fn position(&self, conversation_id: &str) -> Result<i64, CoordError> {
        let state = self.lock();
        let mut entries: Vec<&QueueEntry> = state.queue.values().collect();
        entries.sort_by_key(|e| e.enqueued_at);
        Ok(entries
            .iter()
            .position(|e| e.conversation_id == conversation_id)
            .map(|p| p as i64)
            .unwrap_or(-1))
    }

    async fn touch(&self, conversation_id: &str) -> Result<(), CoordError> {
        let mut state = self.lock();
        if let Some(entry) = state.queue.get_mut(conversation_id) {
            entry.enqueued_at = epoch_ms();
        }
        Ok(())
    }

    async fn purge_older_than(&self, age: Duration) -> Result<Vec<QueueEntry>, CoordError> {
        let cutoff = epoch_ms().saturating_sub(age.as_millis() as u64);
        let mut state = self.lock();
        let stale: Vec<String> = state
            .queue
            .values()
            .filter(|e| e.enqueued_at < cutoff)
            .map(|e| e.conversation_id.clone())
            .collect();
        let mut purged = Vec::with_capacity(stale.len());
        for id in stale {
            if let Some(entry) = state.queue.remove(&id) {
                purged.push(entry);
            }
        }
        Ok(purged)
    }

    async fn assignment_owner(&self, conversation_id: &str) -> Result<Option<String>, CoordError> {
        let state = self.lock();
        Ok(state.assignments.get(conversation_id).filter(|(_, deadline)| *deadline > std::time::Instant::now()).map(|(owner, _)| owner.clone()))
    }

    async fn release_assignment(&self, conversation_id: &str) -> Result<(), CoordError> {
        self.lock().assignments.remove(conversation_id);
        Ok(())
    }

    async fn refresh_assignment(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<(), CoordError> {
        let deadline = std::time::Instant::now() + ttl;
        self.lock().assignments.insert(conversation_id.to_owned(), (agent_id.to_owned(), deadline));
        Ok(())
    }

    async fn set_presence(&self, participant_id: &str, ttl: Duration) -> Result<(), CoordError> {
        let deadline = std::time::Instant::now() + ttl;
        self.lock().presence.insert(participant_id.to_owned(), deadline);
        Ok(())
    }

    async fn is_present(&self, participant_id: &str) -> Result<bool, CoordError> {
        let state = self.lock();
        Ok(state.presence.get(participant_id).map(|d| *d > std::time::Instant::now()).unwrap_or(false))
    }

    async fn acquire_lock(&self, name: &str, token: &str, ttl: Duration) -> Result<bool, CoordError> {
        let mut state = self.lock();
        let now = std::time::Instant::now();
        if let Some((_, deadline)) = state.locks.get(name) {
            if *deadline > now {
                return Ok(false);
            }
        }
        state.locks.insert(name.to_owned(), (token.to_owned(), now + ttl));
        Ok(true)
    }

    async fn release_lock(&self, name: &str, token: &str) -> Result<(), CoordError> {
        let mut state = self.lock();
        if let Some((held_token, _)) = state.locks.get(name) {
            if held_token == token {
                state.locks.remove(name);
            }
        }
        Ok(())
    }

    async fn append_message(&self, message: &Message, _retention: Duration) -> Result<(), CoordError> {
        self.lock().messages.entry(message.conversation_id.clone()).or_default().push(message.clone());
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, CoordError> {
        let state = self.lock();
        let all = state.messages.get(conversation_id).cloned().unwrap_or_default();
        let start = all.len().saturating_sub(limit);
        Ok(all[start..].to_vec())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn entry(id: &str, at: u64) -> QueueEntry {
        QueueEntry {
            conversation_id: id.to_owned(),
            customer_id: format!("cust-{id}"),
            channel: "web".to_owned(),
            enqueued_at: at,
        }
    }

    #[tokio::test]
    async fn claim_is_single_winner() {
        let store = MemStore::new();
        store.enqueue(&entry("c1", 1)).await.unwrap();

        let a = store.claim_for_agent("c1", "agent-a", Duration::from_secs(60)).await.unwrap();
        let b = store.claim_for_agent("c1", "agent-b", Duration::from_secs(60)).await.unwrap();

        assert!(matches!(a, ClaimOutcome::Claimed(_)));
        assert_eq!(b, ClaimOutcome::Busy);
    }

    #[tokio::test]
    async fn claim_by_owner_is_idempotent() {
        let store = MemStore::new();
        store.enqueue(&entry("c1", 1)).await.unwrap();
        store.claim_for_agent("c1", "agent-a", Duration::from_secs(60)).await.unwrap();
        let again = store.claim_for_agent("c1", "agent-a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(again, ClaimOutcome::Owned);
    }

    #[tokio::test]
    async fn claim_on_missing_entry_reports_missing() {
        let store = MemStore::new();
        let outcome = store.claim_for_agent("ghost", "agent-a", Duration::from_secs(60)).await.unwrap();
        assert_eq!(outcome, ClaimOutcome::Missing);
    }

    #[tokio::test]
    async fn list_is_fifo_by_enqueue_time() {
        let store = MemStore::new();
        store.enqueue(&entry("c2", 200)).await.unwrap();
        store.enqueue(&entry("c1", 100)).await.unwrap();
        store.enqueue(&entry("c3", 300)).await.unwrap();

        let ordered = store.list(10).await.unwrap();
        let ids: Vec<&str> = ordered.iter().map(|e| e.conversation_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "c2", "c3"]);
    }

    #[tokio::test]
    async fn purge_older_than_removes_only_stale_entries() {
        let store = MemStore::new();
        store.enqueue(&entry("old", 0)).await.unwrap();
        store.enqueue(&entry("fresh", epoch_ms())).await.unwrap();

        let purged = store.purge_older_than(Duration::from_secs(1)).await.unwrap();
        assert_eq!(purged.len(), 1);
        assert_eq!(purged[0].conversation_id, "old");
        assert_eq!(store.list(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lock_acquire_is_exclusive_until_released() {
        let store = MemStore::new();
        assert!(store.acquire_lock("lock:x", "tok-1", Duration::from_secs(5)).await.unwrap());
        assert!(!store.acquire_lock("lock:x", "tok-2", Duration::from_secs(5)).await.unwrap());
        store.release_lock("lock:x", "tok-1").await.unwrap();
        assert!(store.acquire_lock("lock:x", "tok-2", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn message_log_preserves_append_order_and_respects_limit() {
        use crate::model::{MessageType, Participant, ParticipantType};
        let store = MemStore::new();
        let sender = Participant { id: "cust-1".into(), kind: ParticipantType::Customer, display_name: "Alice".into() };
        for content in ["one", "two", "three"] {
            let msg = Message::new("c1", sender.clone(), MessageType::Text, content.to_owned());
            store.append_message(&msg, Duration::from_secs(60)).await.unwrap();
        }

        let tail = store.list_messages("c1", 2).await.unwrap();
        let contents: Vec<&str> = tail.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["two", "three"]);
    }

    #[tokio::test]
    async fn release_lock_requires_matching_token() {
        let store = MemStore::new();
        store.acquire_lock("lock:x", "tok-1", Duration::from_secs(5)).await.unwrap();
        store.release_lock("lock:x", "wrong-token").await.unwrap();
        assert!(!store.acquire_lock("lock:x", "tok-2", Duration::from_secs(5)).await.unwrap());
    }
}
