// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The audit store port: the durable, permanent projection of conversations
//! and messages. Never on the hot path for lifecycle correctness — the
//! ephemeral store is authoritative for queue/assignment state.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Mutex;

use crate::error::CoordError;
use crate::model::{Conversation, ConversationStatus, Message, Participant, ParticipantType};

#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), CoordError>;
    async fn update_conversation(&self, conversation: &Conversation) -> Result<(), CoordError>;
    async fn insert_message(&self, message: &Message) -> Result<(), CoordError>;
    /// Fallback read path for a node whose in-memory cache (`Coordinator`)
    /// never saw this conversation's creation, e.g. after a restart or when
    /// a request lands on a different instance than the one that created it.
    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, CoordError>;
    /// Conversations owned by `agent_id`, optionally filtered by status.
    async fn list_for_agent(
        &self,
        agent_id: &str,
        status: Option<crate::model::ConversationStatus>,
    ) -> Result<Vec<Conversation>, CoordError>;
}

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub async fn connect(database_url: &str) -> Result<Self, CoordError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), CoordError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                customer_display_name TEXT NOT NULL,
                agent_id TEXT,
                agent_display_name TEXT,
                status TEXT NOT NULL,
                channel TEXT,
                attributes JSONB NOT NULL DEFAULT '{}',
                created_at BIGINT NOT NULL,
                accepted_at BIGINT,
                closed_at BIGINT,
                updated_at BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL REFERENCES conversations(id),
                sender_id TEXT NOT NULL,
                sender_type TEXT NOT NULL,
                sender_display_name TEXT NOT NULL,
                kind TEXT NOT NULL,
                content TEXT NOT NULL,
                timestamp BIGINT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;

        Ok(())
    }
}

fn status_str(status: ConversationStatus) -> &'static str {
    use ConversationStatus::*;
    match status {
        Open => "open",
        Queued => "queued",
        Assigned => "assigned",
        Closed => "closed",
    }
}

fn parse_status(s: &str) -> Result<ConversationStatus, CoordError> {
    match s {
        "open" => Ok(ConversationStatus::Open),
        "queued" => Ok(ConversationStatus::Queued),
        "assigned" => Ok(ConversationStatus::Assigned),
        "closed" => Ok(ConversationStatus::Closed),
        other => Err(CoordError::BackendUnavailable(format!("unknown conversation status: {other}"))),
    }
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn insert_conversation(&self, c: &Conversation) -> Result<(), CoordError> {
        sqlx::query(
            r#"
            INSERT INTO conversations
                (id, customer_id, customer_display_name, agent_id, agent_display_name,
                 status, channel, attributes, created_at, accepted_at, closed_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&c.id)
        .bind(&c.customer.id)
        .bind(&c.customer.display_name)
        .bind(c.agent.as_ref().map(|a| a.id.clone()))
        .bind(c.agent.as_ref().map(|a| a.display_name.clone()))
        .bind(status_str(c.status))
        .bind(&c.channel)
        .bind(&c.attributes)
        .bind(c.created_at as i64)
        .bind(c.accepted_at.map(|v| v as i64))
        .bind(c.closed_at.map(|v| v as i64))
        .bind(c.updated_at as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn update_conversation(&self, c: &Conversation) -> Result<(), CoordError> {
        sqlx::query(
            r#"
            UPDATE conversations SET
                agent_id = $2, agent_display_name = $3, status = $4, channel = $5,
                accepted_at = $6, closed_at = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(&c.id)
        .bind(c.agent.as_ref().map(|a| a.id.clone()))
        .bind(c.agent.as_ref().map(|a| a.display_name.clone()))
        .bind(status_str(c.status))
        .bind(&c.channel)
        .bind(c.accepted_at.map(|v| v as i64))
        .bind(c.closed_at.map(|v| v as i64))
        .bind(c.updated_at as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn insert_message(&self, m: &Message) -> Result<(), CoordError> {
        let sender_type = match m.sender.kind {
            crate::model::ParticipantType::Customer => "customer",
            crate::model::ParticipantType::Agent => "agent",
            crate::model::ParticipantType::System => "system",
        };
        let kind = match m.kind {
            crate::model::MessageType::Text => "text",
            crate::model::MessageType::System => "system",
        };
        sqlx::query(
            r#"
            INSERT INTO messages
                (id, conversation_id, sender_id, sender_type, sender_display_name, kind, content, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(&m.id)
        .bind(&m.conversation_id)
        .bind(&m.sender.id)
        .bind(sender_type)
        .bind(&m.sender.display_name)
        .bind(kind)
        .bind(&m.content)
        .bind(m.timestamp as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, CoordError> {
        let row = sqlx::query(
            r#"
            SELECT id, customer_id, customer_display_name, agent_id, agent_display_name,
                   status, channel, attributes, created_at, accepted_at, closed_at, updated_at
            FROM conversations WHERE id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };

        let agent_id: Option<String> = row.try_get("agent_id").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        let agent_display_name: Option<String> =
            row.try_get("agent_display_name").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
        let agent = agent_id.map(|id| Participant { id, kind: ParticipantType::Agent, display_name: agent_display_name.unwrap_or_default() });

        Ok(Some(Conversation {
            id: row.try_get("id").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
            customer: Participant {
                id: row.try_get("customer_id").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
                kind: ParticipantType::Customer,
                display_name: row
                    .try_get("customer_display_name")
                    .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
            },
            agent,
            status: parse_status(row.try_get::<String, _>("status").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?.as_str())?,
            channel: row.try_get("channel").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
            attributes: row.try_get("attributes").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
            created_at: row.try_get::<i64, _>("created_at").map_err(|e| CoordError::BackendUnavailable(e.to_string()))? as u64,
            accepted_at: row
                .try_get::<Option<i64>, _>("accepted_at")
                .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?
                .map(|v| v as u64),
            closed_at: row
                .try_get::<Option<i64>, _>("closed_at")
                .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?
                .map(|v| v as u64),
            updated_at: row.try_get::<i64, _>("updated_at").map_err(|e| CoordError::BackendUnavailable(e.to_string()))? as u64,
        }))
    }

    async fn list_for_agent(
        &self,
        agent_id: &str,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, CoordError> {
        let rows = if let Some(status) = status {
            sqlx::query(
                r#"
                SELECT id, customer_id, customer_display_name, agent_id, agent_display_name,
                       status, channel, attributes, created_at, accepted_at, closed_at, updated_at
                FROM conversations WHERE agent_id = $1 AND status = $2
                "#,
            )
            .bind(agent_id)
            .bind(status_str(status))
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                SELECT id, customer_id, customer_display_name, agent_id, agent_display_name,
                       status, channel, attributes, created_at, accepted_at, closed_at, updated_at
                FROM conversations WHERE agent_id = $1
                "#,
            )
            .bind(agent_id)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let agent_display_name: Option<String> =
                row.try_get("agent_display_name").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?;
            out.push(Conversation {
                id: row.try_get("id").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
                customer: Participant {
                    id: row.try_get("customer_id").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
                    kind: ParticipantType::Customer,
                    display_name: row
                        .try_get("customer_display_name")
                        .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
                },
                agent: Some(Participant {
                    id: agent_id.to_owned(),
                    kind: ParticipantType::Agent,
                    display_name: agent_display_name.unwrap_or_default(),
                }),
                status: parse_status(
                    row.try_get::<String, _>("status").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?.as_str(),
                )?,
                channel: row.try_get("channel").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
                attributes: row.try_get("attributes").map_err(|e| CoordError::BackendUnavailable(e.to_string()))?,
                created_at: row.try_get::<i64, _>("created_at").map_err(|e| CoordError::BackendUnavailable(e.to_string()))? as u64,
                accepted_at: row
                    .try_get::<Option<i64>, _>("accepted_at")
                    .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?
                    .map(|v| v as u64),
                closed_at: row
                    .try_get::<Option<i64>, _>("closed_at")
                    .map_err(|e| CoordError::BackendUnavailable(e.to_string()))?
                    .map(|v| v as u64),
                updated_at: row.try_get::<i64, _>("updated_at").map_err(|e| CoordError::BackendUnavailable(e.to_string()))? as u64,
            });
        }
        Ok(out)
    }
}

/// In-memory audit store double, used in tests in place of Postgres.
#[derive(Default)]
pub struct MemAuditStore {
    conversations: Mutex<Vec<Conversation>>,
    messages: Mutex<Vec<Message>>,
}

impl MemAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn conversations(&self) -> Vec<Conversation> {
        self.conversations.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl AuditStore for MemAuditStore {
    async fn insert_conversation(&self, c: &Conversation) -> Result<(), CoordError> {
        self.conversations.lock().unwrap_or_else(|p| p.into_inner()).push(c.clone());
        Ok(())
    }

    async fn update_conversation(&self, c: &Conversation) -> Result<(), CoordError> {
        let mut guard = self.conversations.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(existing) = guard.iter_mut().find(|existing| existing.id == c.id) {
            *existing = c.clone();
        } else {
            guard.push(c.clone());
        }
        Ok(())
    }

    async fn insert_message(&self, m: &Message) -> Result<(), CoordError> {
        self.messages.lock().unwrap_or_else(|p| p.into_inner()).push(m.clone());
        Ok(())
    }

    async fn get_conversation(&self, conversation_id: &str) -> Result<Option<Conversation>, CoordError> {
        Ok(self
            .conversations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned())
    }

    async fn list_for_agent(
        &self,
        agent_id: &str,
        status: Option<ConversationStatus>,
    ) -> Result<Vec<Conversation>, CoordError> {
        Ok(self
            .conversations
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .filter(|c| c.agent.as_ref().map(|a| a.id.as_str()) == Some(agent_id))
            .filter(|c| match status {
                Some(s) => c.status == s,
                None => true,
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::{Participant, ParticipantType};

    #[tokio::test]
    async fn mem_audit_store_tracks_conversations_and_messages() {
        let store = MemAuditStore::new();
        let customer = Participant {
            id: "cust-1".into(),
            kind: ParticipantType::Customer,
            display_name: "Alice".into(),
        };
        let convo = Conversation::new(customer.clone());
        store.insert_conversation(&convo).await.unwrap();
        assert_eq!(store.conversations().len(), 1);

        let mut closed = convo.clone();
        closed.status = crate::model::ConversationStatus::Closed;
        store.update_conversation(&closed).await.unwrap();
        assert_eq!(store.conversations()[0].status, crate::model::ConversationStatus::Closed);

        let msg = Message::new(&convo.id, customer, crate::model::MessageType::Text, "hi".into());
        store.insert_message(&msg).await.unwrap();
        assert_eq!(store.messages().len(), 1);
    }
}
