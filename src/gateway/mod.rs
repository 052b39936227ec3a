// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Realtime Gateway: HTTP surface, websocket handshake/room protocol, and the
//! process-wide session maps that back them.

pub mod auth;
pub mod http;
pub mod ws;

use std::collections::HashMap;
use std::sync::Arc;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::coordinator::Coordinator;
use crate::model::{Conversation, Message, Participant};

/// Server→client websocket events. Tagged the same way `Message`/lifecycle
/// events are, so a client only needs one JSON-tag dispatch on the wire.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    SystemEvent { participant: Participant, conversation: Option<Conversation> },
    ChatMessage { message: Message },
    QueueSnapshot { entries: Vec<crate::model::QueueEntry> },
    SystemError { message: String },
}

/// Client→server websocket events.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    ChatMessage { conversation_id: String, content: String },
}

/// A live websocket session: its bound identity, optional room membership,
/// and the channel the connection's write-half drains.
pub struct GatewaySession {
    pub participant: Participant,
    pub conversation_id: Option<String>,
    pub is_queue_watcher: bool,
    pub tx: mpsc::UnboundedSender<ServerEvent>,
}

pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub config: Arc<Config>,
    pub sessions: RwLock<HashMap<String, Arc<GatewaySession>>>,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>, config: Arc<Config>) -> Arc<Self> {
        Arc::new(Self { coordinator, config, sessions: RwLock::new(HashMap::new()) })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/v1/health", get(http::health))
        .route("/api/conversations", post(http::start_conversation))
        .route("/api/conversations/{id}/queue", post(http::queue_conversation))
        .route(
            "/api/conversations/{id}/messages",
            get(http::list_messages).post(http::send_message),
        )
        .route("/api/conversations/{id}", delete(http::close_by_customer))
        .route("/api/agent/queue", get(http::agent_queue))
        .route("/api/agent/conversations/{id}/accept", post(http::accept_conversation))
        .route("/api/agent/conversations", get(http::agent_conversations))
        .route("/api/agent/conversations/{id}/messages", get(http::agent_messages))
        .route("/api/agent/conversations/{id}/close", post(http::close_by_agent))
        .route("/ws", get(ws::ws_handler))
        .layer(middleware::from_fn_with_state(state.clone(), auth::auth_layer))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
