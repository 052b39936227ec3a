// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP handlers for the conversation coordinator's REST surface.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::CoordError;
use crate::gateway::AppState;
use crate::model::{ConversationStatus, MessageType, Participant, ParticipantType};

// -- Request/Response types --------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub live_sessions: usize,
}

#[derive(Debug, Deserialize)]
pub struct StartConversationRequest {
    pub customer_id: String,
    pub customer_display_name: String,
    #[serde(default)]
    pub attributes: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct QueueConversationRequest {
    pub channel: String,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub sender_id: String,
    pub sender_display_name: String,
    #[serde(default)]
    pub sender_type: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct AcceptRequest {
    pub agent_id: String,
    pub agent_display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CloseByCustomerRequest {
    pub customer_id: String,
    pub customer_display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct CloseByAgentRequest {
    pub agent_id: String,
    pub agent_display_name: String,
}

#[derive(Debug, Deserialize)]
pub struct AgentConversationsQuery {
    pub agent_id: String,
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

#[derive(Debug, Deserialize)]
pub struct AgentMessagesQuery {
    pub agent_id: String,
    #[serde(default = "default_list_limit")]
    pub limit: usize,
}

fn default_list_limit() -> usize {
    100
}

fn parse_status(raw: &str) -> Result<ConversationStatus, CoordError> {
    match raw {
        "open" => Ok(ConversationStatus::Open),
        "queued" => Ok(ConversationStatus::Queued),
        "assigned" => Ok(ConversationStatus::Assigned),
        "closed" => Ok(ConversationStatus::Closed),
        other => Err(CoordError::InvalidArgument(format!("unknown status '{other}'"))),
    }
}

fn sender_kind(raw: Option<&str>) -> ParticipantType {
    match raw {
        Some("agent") => ParticipantType::Agent,
        Some("system") => ParticipantType::System,
        _ => ParticipantType::Customer,
    }
}

fn message_kind(raw: Option<&str>) -> MessageType {
    match raw {
        Some("system") => MessageType::System,
        _ => MessageType::Text,
    }
}

// -- Handlers -----------------------------------------------------------------

/// `GET /api/v1/health`
pub async fn health(State(s): State<Arc<AppState>>) -> impl IntoResponse {
    let live_sessions = s.sessions.read().await.len();
    Json(HealthResponse { status: "running".to_owned(), live_sessions })
}

/// `POST /api/conversations` — open a new conversation for a customer.
pub async fn start_conversation(
    State(s): State<Arc<AppState>>,
    Json(req): Json<StartConversationRequest>,
) -> impl IntoResponse {
    let customer = Participant {
        id: req.customer_id,
        kind: ParticipantType::Customer,
        display_name: req.customer_display_name,
    };
    match s.coordinator.start(customer, req.attributes).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/conversations/{id}/queue` — place a conversation on the FIFO queue.
pub async fn queue_conversation(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<QueueConversationRequest>,
) -> impl IntoResponse {
    match s.coordinator.queue_for_agent(&id, &req.channel).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/conversations/{id}/messages` — list messages as the customer sees them.
pub async fn list_messages(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<ListQuery>,
) -> impl IntoResponse {
    match s.coordinator.list_messages(&id, q.limit).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/conversations/{id}/messages` — send a message from the customer side.
pub async fn send_message(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let sender = Participant {
        id: req.sender_id,
        kind: sender_kind(req.sender_type.as_deref()),
        display_name: req.sender_display_name,
    };
    match s.coordinator.send_message(&id, sender, MessageType::Text, req.content).await {
        Ok(message) => Json(message).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `DELETE /api/conversations/{id}` — customer ends the chat.
pub async fn close_by_customer(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CloseByCustomerRequest>,
) -> impl IntoResponse {
    let closed_by = Participant {
        id: req.customer_id,
        kind: ParticipantType::Customer,
        display_name: req.customer_display_name,
    };
    match s.coordinator.close_conversation(&id, closed_by).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/agent/queue` — a snapshot of the pending queue, FIFO order.
pub async fn agent_queue(State(s): State<Arc<AppState>>, Query(q): Query<ListQuery>) -> impl IntoResponse {
    match s.coordinator.queue_snapshot(q.limit).await {
        Ok(entries) => Json(entries).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/agent/conversations/{id}/accept` — claim a queued conversation.
pub async fn accept_conversation(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<AcceptRequest>,
) -> impl IntoResponse {
    let agent = Participant { id: req.agent_id, kind: ParticipantType::Agent, display_name: req.agent_display_name };
    match s.coordinator.accept_conversation(agent, &id).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/agent/conversations` — conversations currently held by an agent.
pub async fn agent_conversations(
    State(s): State<Arc<AppState>>,
    Query(q): Query<AgentConversationsQuery>,
) -> impl IntoResponse {
    let status = match q.status.as_deref().map(parse_status).transpose() {
        Ok(status) => status,
        Err(e) => return e.into_response(),
    };
    match s.coordinator.conversations_of_agent(&q.agent_id, status).await {
        Ok(conversations) => Json(conversations).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `GET /api/agent/conversations/{id}/messages` — same log as the customer's
/// view, but only for the agent who owns the conversation.
pub async fn agent_messages(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(q): Query<AgentMessagesQuery>,
) -> impl IntoResponse {
    let conversation = match s.coordinator.get_conversation(&id).await {
        Ok(conversation) => conversation,
        Err(e) => return e.into_response(),
    };
    match conversation.agent {
        Some(ref agent) if agent.id == q.agent_id => {}
        _ => return CoordError::Forbidden.into_response(),
    }
    match s.coordinator.list_messages(&id, q.limit).await {
        Ok(messages) => Json(messages).into_response(),
        Err(e) => e.into_response(),
    }
}

/// `POST /api/agent/conversations/{id}/close` — agent ends the chat.
pub async fn close_by_agent(
    State(s): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<CloseByAgentRequest>,
) -> impl IntoResponse {
    let closed_by = Participant { id: req.agent_id, kind: ParticipantType::Agent, display_name: req.agent_display_name };
    match s.coordinator.close_conversation(&id, closed_by).await {
        Ok(conversation) => Json(conversation).into_response(),
        Err(e) => e.into_response(),
    }
}
