// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Core domain types: participants, conversations, messages, queue entries,
//! and the lifecycle events published on the event bus.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current epoch milliseconds. Centralized so tests can reason about ordering
/// without depending on wall-clock precision elsewhere.
pub fn epoch_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParticipantType {
    Customer,
    Agent,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ParticipantType,
    pub display_name: String,
}

impl Participant {
    pub fn system() -> Self {
        Self {
            id: "system".to_owned(),
            kind: ParticipantType::System,
            display_name: "System".to_owned(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Open,
    Queued,
    Assigned,
    Closed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub customer: Participant,
    pub agent: Option<Participant>,
    pub status: ConversationStatus,
    pub channel: Option<String>,
    #[serde(default = "default_attributes")]
    pub attributes: serde_json::Value,
    pub created_at: u64,
    pub accepted_at: Option<u64>,
    pub closed_at: Option<u64>,
    pub updated_at: u64,
}

fn default_attributes() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

impl Conversation {
    pub fn new(customer: Participant) -> Self {
        Self::with_attributes(customer, default_attributes())
    }

    pub fn with_attributes(customer: Participant, attributes: serde_json::Value) -> Self {
        let now = epoch_ms();
        Self {
            id: Uuid::new_v4().to_string(),
            customer,
            agent: None,
            status: ConversationStatus::Open,
            channel: None,
            attributes,
            created_at: now,
            accepted_at: None,
            closed_at: None,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender: Participant,
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub content: String,
    pub timestamp: u64,
}

impl Message {
    pub fn new(conversation_id: &str, sender: Participant, kind: MessageType, content: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.to_owned(),
            sender,
            kind,
            content,
            timestamp: epoch_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub conversation_id: String,
    pub customer_id: String,
    pub channel: String,
    pub enqueued_at: u64,
}

/// Lifecycle events fanned out across the event bus to every gateway instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    ConversationStarted { conversation: Conversation },
    ConversationQueued { conversation: Conversation, position: usize },
    ConversationAccepted { conversation: Conversation },
    ConversationReassigned { conversation: Conversation, previous_agent_id: String },
    MessageReceived { message: Message },
    ConversationClosed { conversation: Conversation },
}

impl LifecycleEvent {
    pub fn conversation_id(&self) -> &str {
        match self {
            LifecycleEvent::ConversationStarted { conversation }
            | LifecycleEvent::ConversationQueued { conversation, .. }
            | LifecycleEvent::ConversationAccepted { conversation }
            | LifecycleEvent::ConversationReassigned { conversation, .. }
            | LifecycleEvent::ConversationClosed { conversation } => &conversation.id,
            LifecycleEvent::MessageReceived { message } => &message.conversation_id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn new_conversation_starts_open_with_no_agent() {
        let c = Conversation::new(Participant {
            id: "cust-1".into(),
            kind: ParticipantType::Customer,
            display_name: "Alice".into(),
        });
        assert_eq!(c.status, ConversationStatus::Open);
        assert!(c.agent.is_none());
        assert!(c.accepted_at.is_none());
        assert!(c.closed_at.is_none());
    }

    #[test]
    fn lifecycle_event_conversation_id_matches_payload() {
        let c = Conversation::new(Participant {
            id: "cust-1".into(),
            kind: ParticipantType::Customer,
            display_name: "Alice".into(),
        });
        let id = c.id.clone();
        let ev = LifecycleEvent::ConversationStarted { conversation: c };
        assert_eq!(ev.conversation_id(), id);
    }
}
