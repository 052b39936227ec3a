// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Queue Engine: FIFO of conversations waiting for an agent, backed by the
//! ephemeral store's sorted set and the atomic claim script.

use std::sync::Arc;
use std::time::Duration;

use crate::error::CoordError;
use crate::model::{epoch_ms, QueueEntry};
use crate::store::{ClaimOutcome, Store};

pub struct QueueEngine {
    store: Arc<dyn Store>,
}

impl QueueEngine {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn enqueue(&self, conversation_id: &str, customer_id: &str, channel: &str) -> Result<(), CoordError> {
        let entry = QueueEntry {
            conversation_id: conversation_id.to_owned(),
            customer_id: customer_id.to_owned(),
            channel: channel.to_owned(),
            enqueued_at: epoch_ms(),
        };
        self.store.enqueue(&entry).await
    }

    pub async fn claim_for_agent(
        &self,
        conversation_id: &str,
        agent_id: &str,
        ttl: Duration,
    ) -> Result<ClaimOutcome, CoordError> {
        self.store.claim_for_agent(conversation_id, agent_id, ttl).await
    }

    pub async fn remove(&self, conversation_id: &str) -> Result<Option<QueueEntry>, CoordError> {
        self.store.remove(conversation_id).await
    }

    pub async fn list(&self, limit: usize) -> Result<Vec<QueueEntry>, CoordError> {
        self.store.list(limit).await
    }

    pub async fn position(&self, conversation_id: &str) -> Result<i64, CoordError> {
        self.store.position(conversation_id).await
    }

    pub async fn touch(&self, conversation_id: &str) -> Result<(), CoordError> {
        self.store.touch(conversation_id).await
    }

    pub async fn purge_older_than(&self, age: Duration) -> Result<Vec<QueueEntry>, CoordError> {
        self.store.purge_older_than(age).await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    #[tokio::test]
    async fn enqueue_then_claim_returns_the_entry() -> anyhow::Result<()> {
        let engine = QueueEngine::new(Arc::new(MemStore::new()));
        engine.enqueue("c1", "cust-1", "web").await?;

        let outcome = engine.claim_for_agent("c1", "agent-a", Duration::from_secs(60)).await?;
        let ClaimOutcome::Claimed(entry) = outcome else {
            anyhow::bail!("expected Claimed, got {outcome:?}");
        };
        assert_eq!(entry.conversation_id, "c1");
        Ok(())
    }

    #[tokio::test]
    async fn position_reflects_fifo_order() {
        let engine = QueueEngine::new(Arc::new(MemStore::new()));
        engine.enqueue("c1", "cust-1", "web").await.unwrap();
        engine.enqueue("c2", "cust-2", "web").await.unwrap();

        assert_eq!(engine.position("c1").await.unwrap(), 0);
        assert_eq!(engine.position("c2").await.unwrap(), 1);
        assert_eq!(engine.position("ghost").await.unwrap(), -1);
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(fut)
    }

    proptest::proptest! {
        /// Queue FIFO (§8): for any sequence of distinct enqueues, `list` and
        /// `position` never report a non-decreasing-`enqueuedAt` ordering
        /// violation, and removing an entry never resurrects it.
        #[test]
        fn list_and_position_respect_enqueued_at_order(ids in proptest::collection::vec("[a-z]{4,8}", 1..20)) {
            let distinct: Vec<String> = {
                let mut seen = std::collections::HashSet::new();
                ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
            };
            block_on(async {
                let engine = QueueEngine::new(Arc::new(MemStore::new()));
                for id in &distinct {
                    engine.enqueue(id, "cust-1", "web").await.unwrap();
                }

                let listed = engine.list(distinct.len()).await.unwrap();
                assert_eq!(listed.len(), distinct.len());
                assert!(listed.windows(2).all(|w| w[0].enqueued_at <= w[1].enqueued_at));

                let listed_ids: std::collections::HashSet<&str> = listed.iter().map(|e| e.conversation_id.as_str()).collect();
                assert_eq!(listed_ids, distinct.iter().map(String::as_str).collect());

                for (i, entry) in listed.iter().enumerate() {
                    assert_eq!(engine.position(&entry.conversation_id).await.unwrap(), i as i64);
                }

                if let Some(head) = listed.first() {
                    engine.remove(&head.conversation_id).await.unwrap();
                    let remaining = engine.list(distinct.len()).await.unwrap();
                    assert_eq!(remaining.len(), listed.len() - 1);
                    assert!(!remaining.iter().any(|e| e.conversation_id == head.conversation_id));
                }
            });
        }
    }
}
