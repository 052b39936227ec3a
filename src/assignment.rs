// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Assignment Registry: the per-agent concurrency view used for fast
//! admission control. The ephemeral store's assignment key (see `store.rs`)
//! remains the authoritative owner of a conversation; this registry is a
//! best-effort upper bound checked before attempting a claim.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

pub struct AssignmentRegistry {
    max_concurrent_per_agent: usize,
    load: RwLock<HashMap<String, HashSet<String>>>,
}

impl AssignmentRegistry {
    pub fn new(max_concurrent_per_agent: usize) -> Self {
        Self { max_concurrent_per_agent, load: RwLock::new(HashMap::new()) }
    }

    pub async fn can_assign(&self, agent_id: &str) -> bool {
        let load = self.load.read().await;
        load.get(agent_id).map(|set| set.len()).unwrap_or(0) < self.max_concurrent_per_agent
    }

    pub async fn register_assignment(&self, agent_id: &str, conversation_id: &str) {
        let mut load = self.load.write().await;
        load.entry(agent_id.to_owned()).or_default().insert(conversation_id.to_owned());
    }

    pub async fn remove_assignment(&self, agent_id: &str, conversation_id: &str) {
        let mut load = self.load.write().await;
        if let Some(set) = load.get_mut(agent_id) {
            set.remove(conversation_id);
            if set.is_empty() {
                load.remove(agent_id);
            }
        }
    }

    pub async fn assignments_of(&self, agent_id: &str) -> HashSet<String> {
        self.load.read().await.get(agent_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn can_assign_respects_the_configured_limit() {
        let reg = AssignmentRegistry::new(2);
        assert!(reg.can_assign("agent-a").await);

        reg.register_assignment("agent-a", "c1").await;
        assert!(reg.can_assign("agent-a").await);

        reg.register_assignment("agent-a", "c2").await;
        assert!(!reg.can_assign("agent-a").await);
    }

    #[tokio::test]
    async fn removing_an_assignment_frees_capacity() {
        let reg = AssignmentRegistry::new(1);
        reg.register_assignment("agent-a", "c1").await;
        assert!(!reg.can_assign("agent-a").await);

        reg.remove_assignment("agent-a", "c1").await;
        assert!(reg.can_assign("agent-a").await);
        assert!(reg.assignments_of("agent-a").await.is_empty());
    }

    #[tokio::test]
    async fn assignments_of_unknown_agent_is_empty() {
        let reg = AssignmentRegistry::new(3);
        assert!(reg.assignments_of("nobody").await.is_empty());
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(fut)
    }

    proptest::proptest! {
        /// Capacity bound (§8): however register/remove calls interleave, the
        /// registry never reports an agent as assignable past its limit.
        #[test]
        fn capacity_bound_holds_under_any_register_remove_sequence(
            limit in 1usize..=5,
            ops in proptest::collection::vec((0usize..8, proptest::bool::ANY), 1..64),
        ) {
            block_on(async {
                let reg = AssignmentRegistry::new(limit);
                for (slot, register) in ops {
                    let conversation_id = format!("c{slot}");
                    if register {
                        if reg.can_assign("agent-a").await {
                            reg.register_assignment("agent-a", &conversation_id).await;
                        }
                    } else {
                        reg.remove_assignment("agent-a", &conversation_id).await;
                    }
                    assert!(reg.assignments_of("agent-a").await.len() <= limit);
                }
            });
        }
    }
}
