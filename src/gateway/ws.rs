// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Downstream WebSocket handler: the realtime surface for customers and
//! agents, bridging the event bus into per-connection sessions.

use std::sync::Arc;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::gateway::{auth, AppState, ClientEvent, GatewaySession, ServerEvent};
use crate::model::{ConversationStatus, LifecycleEvent, MessageType, Participant, ParticipantType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Customer,
    AgentConversation,
    AgentQueue,
}

impl Role {
    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "customer" => Some(Role::Customer),
            "agent-conversation" => Some(Role::AgentConversation),
            "agent-queue" => Some(Role::AgentQueue),
            _ => None,
        }
    }
}

/// Query parameters for the downstream WS upgrade.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayWsQuery {
    pub token: Option<String>,
    pub role: String,
    pub participant_id: String,
    pub display_name: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// `GET /ws` — websocket upgrade for a customer, an agent watching one
/// conversation, or an agent watching the queue.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GatewayWsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let query_str = query.token.as_ref().map(|t| format!("token={t}")).unwrap_or_default();
    if auth::validate_ws_query(&query_str, state.config.auth_token.as_deref()).is_err() {
        return axum::http::Response::builder()
            .status(401)
            .body(axum::body::Body::from("unauthorized"))
            .unwrap_or_default()
            .into_response();
    }

    let Some(role) = Role::parse(&query.role) else {
        return axum::http::Response::builder()
            .status(400)
            .body(axum::body::Body::from("unknown role"))
            .unwrap_or_default()
            .into_response();
    };

    if role == Role::AgentConversation && query.conversation_id.is_none() {
        return axum::http::Response::builder()
            .status(400)
            .body(axum::body::Body::from("conversation_id is required for this role"))
            .unwrap_or_default()
            .into_response();
    }

    let participant = Participant {
        id: query.participant_id,
        kind: if role == Role::Customer { ParticipantType::Customer } else { ParticipantType::Agent },
        display_name: query.display_name,
    };

    ws.on_upgrade(move |socket| handle_ws(socket, state, participant, role, query.conversation_id)).into_response()
}

async fn handle_ws(
    socket: WebSocket,
    state: Arc<AppState>,
    participant: Participant,
    role: Role,
    conversation_id: Option<String>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let conversation_id = match role {
        Role::AgentQueue => None,
        Role::Customer if conversation_id.is_none() => match state.coordinator.start(participant.clone(), serde_json::Value::Null).await {
            Ok(conversation) => Some(conversation.id),
            Err(e) => {
                let _ = send_error_and_close(&mut ws_tx, e.message()).await;
                return;
            }
        },
        _ => {
            let id = conversation_id.unwrap_or_default();
            match state.coordinator.get_conversation(&id).await {
                Ok(conversation) if conversation.status != ConversationStatus::Closed => Some(id),
                Ok(_) => {
                    let _ = send_error_and_close(&mut ws_tx, "conversation is closed".into()).await;
                    return;
                }
                Err(e) => {
                    let _ = send_error_and_close(&mut ws_tx, e.message()).await;
                    return;
                }
            }
        }
    };

    let session_id = Uuid::new_v4().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEvent>();
    let session = Arc::new(GatewaySession {
        participant: participant.clone(),
        conversation_id: conversation_id.clone(),
        is_queue_watcher: role == Role::AgentQueue,
        tx,
    });
    state.sessions.write().await.insert(session_id.clone(), Arc::clone(&session));

    if role == Role::AgentQueue {
        if let Ok(entries) = state.coordinator.queue_snapshot(state.config.queue_broadcast_max_entries).await {
            let _ = session.tx.send(ServerEvent::QueueSnapshot { entries });
        }
    } else if let Some(ref id) = conversation_id {
        if let Ok(conversation) = state.coordinator.get_conversation(id).await {
            let _ = session.tx.send(ServerEvent::SystemEvent { participant: participant.clone(), conversation: Some(conversation) });
        }
    }

    let mut lifecycle_rx = state.coordinator.bus_subscribe_lifecycle();
    let mut message_rx = state.coordinator.bus_subscribe_messages();

    loop {
        tokio::select! {
            forwarded = rx.recv() => {
                match forwarded {
                    Some(event) => {
                        let Ok(text) = serde_json::to_string(&event) else { continue };
                        if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }

            event = lifecycle_rx.recv() => {
                match event {
                    Ok(event) => handle_lifecycle_event(&state, &session, role, event).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            msg = message_rx.recv() => {
                match msg {
                    Ok(message) => {
                        if session.conversation_id.as_deref() == Some(message.conversation_id.as_str()) {
                            let _ = session.tx.send(ServerEvent::ChatMessage { message });
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }

            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        handle_inbound(&state, &session, &text.to_string()).await;
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    state.sessions.write().await.remove(&session_id);
}

async fn send_error_and_close(ws_tx: &mut futures_util::stream::SplitSink<WebSocket, WsMessage>, message: String) {
    let event = ServerEvent::SystemError { message };
    if let Ok(text) = serde_json::to_string(&event) {
        let _ = ws_tx.send(WsMessage::Text(text.into())).await;
    }
    let _ = ws_tx.send(WsMessage::Close(None)).await;
}

async fn handle_lifecycle_event(state: &Arc<AppState>, session: &Arc<GatewaySession>, role: Role, event: LifecycleEvent) {
    if role == Role::AgentQueue {
        if matches!(event, LifecycleEvent::ConversationQueued { .. } | LifecycleEvent::ConversationReassigned { .. }) {
            if let Ok(entries) = state.coordinator.queue_snapshot(state.config.queue_broadcast_max_entries).await {
                let _ = session.tx.send(ServerEvent::QueueSnapshot { entries });
            }
        }
        return;
    }

    let Some(ref bound_id) = session.conversation_id else { return };
    if event.conversation_id() != bound_id {
        return;
    }

    match event {
        LifecycleEvent::ConversationAccepted { conversation }
        | LifecycleEvent::ConversationClosed { conversation }
        | LifecycleEvent::ConversationQueued { conversation, .. } => {
            let _ = session
                .tx
                .send(ServerEvent::SystemEvent { participant: session.participant.clone(), conversation: Some(conversation) });
        }
        LifecycleEvent::ConversationReassigned { conversation, previous_agent_id } => {
            if session.participant.id == previous_agent_id {
                let _ = session
                    .tx
                    .send(ServerEvent::SystemEvent { participant: session.participant.clone(), conversation: Some(conversation) });
            }
        }
        LifecycleEvent::ConversationStarted { .. } | LifecycleEvent::MessageReceived { .. } => {}
    }
}

async fn handle_inbound(state: &Arc<AppState>, session: &Arc<GatewaySession>, text: &str) {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(e) => {
            let _ = session.tx.send(ServerEvent::SystemError { message: format!("malformed event: {e}") });
            return;
        }
    };

    match event {
        ClientEvent::ChatMessage { conversation_id, content } => {
            if session.conversation_id.as_deref() != Some(conversation_id.as_str()) {
                let _ = session.tx.send(ServerEvent::SystemError { message: "not bound to this conversation".into() });
                return;
            }
            match state
                .coordinator
                .send_message(&conversation_id, session.participant.clone(), MessageType::Text, content)
                .await
            {
                Ok(message) => {
                    let _ = session.tx.send(ServerEvent::ChatMessage { message });
                }
                Err(e) => {
                    let _ = session.tx.send(ServerEvent::SystemError { message: e.message() });
                }
            }
        }
    }
}
