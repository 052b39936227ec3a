// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Deterministic naming of ephemeral-store keys and event-bus subjects.
//!
//! Pure functions only; callers own the prefix (typically from `Config::key_prefix`).

pub struct KeyNamer {
    prefix: String,
}

impl KeyNamer {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn conversation_messages(&self, conversation_id: &str) -> String {
        format!("{}:conversation:{}:messages", self.prefix, conversation_id)
    }

    pub fn queue_pending(&self) -> String {
        format!("{}:queue:pending", self.prefix)
    }

    pub fn assignment(&self, conversation_id: &str) -> String {
        format!("{}:assignment:{}", self.prefix, conversation_id)
    }

    pub fn presence(&self, participant_id: &str) -> String {
        format!("{}:presence:{}", self.prefix, participant_id)
    }

    pub fn agent_load(&self, agent_id: &str) -> String {
        format!("{}:agent:{}:load", self.prefix, agent_id)
    }

    pub fn lock_conversation(&self, conversation_id: &str) -> String {
        format!("lock:conversation:{conversation_id}")
    }

    pub fn lock_queue(&self) -> String {
        "lock:queue".to_owned()
    }

    pub fn bus_subject_lifecycle(&self) -> String {
        format!("{}.events.lifecycle", self.prefix)
    }

    pub fn bus_subject_message(&self) -> String {
        format!("{}.events.message", self.prefix)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn keys_carry_the_configured_prefix() {
        let k = KeyNamer::new("chat");
        assert_eq!(k.conversation_messages("c1"), "chat:conversation:c1:messages");
        assert_eq!(k.queue_pending(), "chat:queue:pending");
        assert_eq!(k.assignment("c1"), "chat:assignment:c1");
        assert_eq!(k.presence("cust-1"), "chat:presence:cust-1");
        assert_eq!(k.agent_load("ag-1"), "chat:agent:ag-1:load");
    }

    #[test]
    fn locks_are_not_prefixed_by_the_store_namespace() {
        let k = KeyNamer::new("chat");
        assert_eq!(k.lock_conversation("c1"), "lock:conversation:c1");
        assert_eq!(k.lock_queue(), "lock:queue");
    }
}
