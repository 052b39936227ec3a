// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Conversation Coordinator: the lifecycle state machine composing the
//! queue, assignment registry, message log, and event bus under a
//! per-conversation distributed lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

use crate::assignment::AssignmentRegistry;
use crate::audit::AuditStore;
use crate::bus::EventBus;
use crate::error::CoordError;
use crate::lock::LockManager;
use crate::model::{
    epoch_ms, Conversation, ConversationStatus, LifecycleEvent, Message, MessageType, Participant, ParticipantType,
    QueueEntry,
};
use crate::queue::QueueEngine;
use crate::store::{ClaimOutcome, Store};

pub struct CoordinatorLimits {
    pub message_max_bytes: usize,
    pub message_retention: Duration,
    pub assignment_lease_ttl: Duration,
    pub lock_acquire_timeout: Duration,
    pub lock_lease_ttl: Duration,
}

pub struct Coordinator {
    store: Arc<dyn Store>,
    audit: Arc<dyn AuditStore>,
    bus: Arc<dyn EventBus>,
    queue: QueueEngine,
    assignments: AssignmentRegistry,
    locks: LockManager,
    cache: RwLock<HashMap<String, Conversation>>,
    limits: CoordinatorLimits,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn Store>,
        audit: Arc<dyn AuditStore>,
        bus: Arc<dyn EventBus>,
        max_concurrent_per_agent: usize,
        limits: CoordinatorLimits,
    ) -> Self {
        let locks = LockManager::new(store.clone(), limits.lock_acquire_timeout, limits.lock_lease_ttl);
        Self {
            queue: QueueEngine::new(store.clone()),
            assignments: AssignmentRegistry::new(max_concurrent_per_agent),
            locks,
            store,
            audit,
            bus,
            cache: RwLock::new(HashMap::new()),
            limits,
        }
    }

    async fn cached_or_audited(&self, conversation_id: &str) -> Result<Conversation, CoordError> {
        if let Some(c) = self.cache.read().await.get(conversation_id).cloned() {
            return Ok(c);
        }
        match self.audit.get_conversation(conversation_id).await? {
            Some(c) => {
                self.cache.write().await.insert(c.id.clone(), c.clone());
                Ok(c)
            }
            None => Err(CoordError::NotFound(conversation_id.to_owned())),
        }
    }

    async fn put(&self, conversation: Conversation) {
        self.cache.write().await.insert(conversation.id.clone(), conversation);
    }

    pub async fn get_conversation(&self, conversation_id: &str) -> Result<Conversation, CoordError> {
        self.cached_or_audited(conversation_id).await
    }

    pub async fn list_messages(&self, conversation_id: &str, limit: usize) -> Result<Vec<Message>, CoordError> {
        self.store.list_messages(conversation_id, limit).await
    }

    pub async fn conversations_of_agent(
        &self,
        agent_id: &str,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, CoordError> {
        self.audit.list_for_agent(agent_id, status).await
    }

    pub async fn queue_snapshot(&self, limit: usize) -> Result<Vec<QueueEntry>, CoordError> {
        self.queue.list(limit).await
    }

    pub fn bus_subscribe_lifecycle(&self) -> tokio::sync::broadcast::Receiver<LifecycleEvent> {
        self.bus.subscribe_lifecycle()
    }

    pub fn bus_subscribe_messages(&self) -> tokio::sync::broadcast::Receiver<Message> {
        self.bus.subscribe_messages()
    }

    #[instrument(skip(self, customer, attributes), fields(customer_id = %customer.id))]
    pub async fn start(&self, customer: Participant, attributes: serde_json::Value) -> Result<Conversation, CoordError> {
        let conversation = Conversation::with_attributes(customer.clone(), attributes);
        self.audit.insert_conversation(&conversation).await?;
        self.put(conversation.clone()).await;
        self.store.set_presence(&customer.id, self.limits.lock_lease_ttl).await?;

        info!(conversation_id = %conversation.id, "conversation started");
        self.bus
            .publish_lifecycle(&LifecycleEvent::ConversationStarted { conversation: conversation.clone() })
            .await?;
        Ok(conversation)
    }

    #[instrument(skip(self), fields(%conversation_id, %channel))]
    pub async fn queue_for_agent(&self, conversation_id: &str, channel: &str) -> Result<Conversation, CoordError> {
        let guard = self.locks.acquire(&format!("lock:conversation:{conversation_id}")).await?;

        let mut conversation = self.cached_or_audited(conversation_id).await?;
        if conversation.status == ConversationStatus::Closed {
            guard.release().await?;
            return Err(CoordError::AlreadyClosed);
        }

        let previous_owner = self.store.assignment_owner(conversation_id).await?;
        if previous_owner.is_some() {
            self.store.release_assignment(conversation_id).await?;
            if let Some(ref owner) = previous_owner {
                self.assignments.remove_assignment(owner, conversation_id).await;
            }
        }

        conversation.status = ConversationStatus::Queued;
        conversation.channel = Some(channel.to_owned());
        conversation.updated_at = epoch_ms();
        self.audit.update_conversation(&conversation).await?;
        self.put(conversation.clone()).await;

        self.queue.enqueue(conversation_id, &conversation.customer.id, channel).await?;
        let position = self.queue.position(conversation_id).await?.max(0) as usize;

        self.bus
            .publish_lifecycle(&LifecycleEvent::ConversationQueued { conversation: conversation.clone(), position })
            .await?;

        if let Some(previous_owner) = previous_owner {
            self.bus
                .publish_lifecycle(&LifecycleEvent::ConversationReassigned {
                    conversation: conversation.clone(),
                    previous_agent_id: previous_owner,
                })
                .await?;
        }

        guard.release().await?;
        Ok(conversation)
    }

    #[instrument(skip(self, agent), fields(agent_id = %agent.id, %conversation_id))]
    pub async fn accept_conversation(&self, agent: Participant, conversation_id: &str) -> Result<Conversation, CoordError> {
        let guard = self.locks.acquire(&format!("lock:conversation:{conversation_id}")).await?;

        let mut conversation = self.cached_or_audited(conversation_id).await?;
        if conversation.status == ConversationStatus::Closed {
            guard.release().await?;
            return Err(CoordError::AlreadyClosed);
        }
        if let Some(ref current_agent) = conversation.agent {
            if conversation.status == ConversationStatus::Assigned && current_agent.id != agent.id {
                guard.release().await?;
                return Err(CoordError::ConflictOwner);
            }
        }

        let already_mine = conversation.agent.as_ref().map(|a| a.id == agent.id).unwrap_or(false);
        if !already_mine && !self.assignments.can_assign(&agent.id).await {
            guard.release().await?;
            return Err(CoordError::AgentCapacityExceeded);
        }

        let outcome = self
            .queue
            .claim_for_agent(conversation_id, &agent.id, self.limits.assignment_lease_ttl)
            .await?;

        let result = match outcome {
            ClaimOutcome::Claimed(_) | ClaimOutcome::Owned => {
                let newly_claimed = matches!(outcome, ClaimOutcome::Claimed(_));
                conversation.agent = Some(agent.clone());
                conversation.status = ConversationStatus::Assigned;
                conversation.updated_at = epoch_ms();
                if conversation.accepted_at.is_none() {
                    conversation.accepted_at = Some(conversation.updated_at);
                }
                self.audit.update_conversation(&conversation).await?;
                self.put(conversation.clone()).await;

                if newly_claimed {
                    self.assignments.register_assignment(&agent.id, conversation_id).await;
                }

                info!(conversation_id = %conversation.id, agent_id = %agent.id, "conversation accepted");
                self.bus
                    .publish_lifecycle(&LifecycleEvent::ConversationAccepted { conversation: conversation.clone() })
                    .await?;
                Ok(conversation)
            }
            ClaimOutcome::Busy => Err(CoordError::ConflictOwner),
            ClaimOutcome::Missing => Err(CoordError::NoLongerAvailable),
        };

        guard.release().await?;
        result
    }

    #[instrument(skip(self, sender, content), fields(%conversation_id, sender_id = %sender.id))]
    pub async fn send_message(
        &self,
        conversation_id: &str,
        sender: Participant,
        kind: MessageType,
        content: String,
    ) -> Result<Message, CoordError> {
        let trimmed = content.trim();
        if trimmed.is_empty() {
            return Err(CoordError::InvalidArgument("message content must not be empty".into()));
        }
        if trimmed.len() > self.limits.message_max_bytes {
            return Err(CoordError::InvalidArgument(format!(
                "message exceeds the {}-byte limit",
                self.limits.message_max_bytes
            )));
        }

        let guard = self.locks.acquire(&format!("lock:conversation:{conversation_id}")).await?;

        let mut conversation = self.cached_or_audited(conversation_id).await?;
        if conversation.status == ConversationStatus::Closed {
            guard.release().await?;
            return Err(CoordError::AlreadyClosed);
        }

        let message = Message::new(conversation_id, sender.clone(), kind, trimmed.to_owned());
        self.store.append_message(&message, self.limits.message_retention).await?;
        self.audit.insert_message(&message).await?;

        conversation.updated_at = epoch_ms();
        self.audit.update_conversation(&conversation).await?;
        self.put(conversation.clone()).await;

        self.store.set_presence(&sender.id, self.limits.lock_lease_ttl).await?;
        if conversation.status == ConversationStatus::Assigned {
            if let Some(ref agent) = conversation.agent {
                self.store
                    .refresh_assignment(conversation_id, &agent.id, self.limits.assignment_lease_ttl)
                    .await?;
            }
        }

        self.bus.publish_message(&message).await?;
        self.bus
            .publish_lifecycle(&LifecycleEvent::MessageReceived { message: message.clone() })
            .await?;

        guard.release().await?;
        Ok(message)
    }

    #[instrument(skip(self, closed_by), fields(%conversation_id, closed_by_id = %closed_by.id))]
    pub async fn close_conversation(&self, conversation_id: &str, closed_by: Participant) -> Result<Conversation, CoordError> {
        let guard = self.locks.acquire(&format!("lock:conversation:{conversation_id}")).await?;

        let mut conversation = self.cached_or_audited(conversation_id).await?;
        if conversation.status == ConversationStatus::Closed {
            guard.release().await?;
            return Ok(conversation);
        }

        let notice_text = closure_notice(&closed_by);
        let notice = Message::new(conversation_id, Participant::system(), MessageType::System, notice_text);
        self.store.append_message(&notice, self.limits.message_retention).await?;
        self.audit.insert_message(&notice).await?;

        conversation.status = ConversationStatus::Closed;
        conversation.closed_at = Some(epoch_ms());
        conversation.updated_at = conversation.closed_at.unwrap_or(epoch_ms());
        self.audit.update_conversation(&conversation).await?;
        self.put(conversation.clone()).await;

        self.queue.remove(conversation_id).await?;
        if let Some(agent_id) = self.store.assignment_owner(conversation_id).await? {
            self.assignments.remove_assignment(&agent_id, conversation_id).await;
        }
        self.store.release_assignment(conversation_id).await?;

        self.bus.publish_message(&notice).await?;
        info!(conversation_id = %conversation.id, "conversation closed");
        self.bus
            .publish_lifecycle(&LifecycleEvent::ConversationClosed { conversation: conversation.clone() })
            .await?;

        guard.release().await?;
        Ok(conversation)
    }

    /// Sweep stale queue entries, closing each with a system notice. Intended
    /// to run on an interval from a background task (see `lib.rs`).
    pub async fn purge_sweep(&self, age: Duration) -> Result<usize, CoordError> {
        let purged = self.queue.purge_older_than(age).await?;
        let count = purged.len();
        for entry in purged {
            if let Err(e) = self
                .close_conversation(&entry.conversation_id, Participant::system())
                .await
            {
                warn!(conversation_id = %entry.conversation_id, error = %e, "purge-triggered close failed");
            }
        }
        Ok(count)
    }
}

fn closure_notice(closed_by: &Participant) -> String {
    match closed_by.kind {
        ParticipantType::Agent => format!(
            "{} has closed this chat. Feel free to start a new conversation if you need any more help.",
            closed_by.display_name
        ),
        ParticipantType::Customer => "You ended the chat.".to_owned(),
        ParticipantType::System => "This conversation was closed due to inactivity.".to_owned(),
    }
}
