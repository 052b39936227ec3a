// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Integration tests for the conversation coordinator's HTTP surface.
//!
//! Uses `axum_test::TestServer` and the in-memory adapters — no real
//! Redis/NATS/Postgres needed.

use std::sync::Arc;
use std::time::Duration;

use axum_test::TestServer;

use chatcoord::audit::MemAuditStore;
use chatcoord::bus::LocalBus;
use chatcoord::config::Config;
use chatcoord::coordinator::{Coordinator, CoordinatorLimits};
use chatcoord::gateway::{build_router, AppState};
use chatcoord::store::MemStore;

fn test_config() -> Config {
    Config {
        host: "127.0.0.1".into(),
        port: 0,
        redis_url: "redis://127.0.0.1:6379".into(),
        nats_url: "nats://127.0.0.1:4222".into(),
        nats_token: None,
        database_url: "postgres://localhost/chatcoord_test".into(),
        key_prefix: "chat".into(),
        auth_token: None,
        queue_broadcast_max_entries: 50,
        queue_purge_age_secs: 3600,
        queue_per_agent_concurrency: 2,
        assignment_lease_ttl_secs: 120,
        message_max_bytes: 4096,
        message_retention_secs: 86400,
        lock_acquire_timeout_ms: 500,
        lock_lease_ttl_ms: 5000,
        presence_ttl_secs: 30,
        purge_sweep_interval_secs: 60,
    }
}

fn test_server() -> TestServer {
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(MemStore::new()),
        Arc::new(MemAuditStore::new()),
        Arc::new(LocalBus::new()),
        2,
        CoordinatorLimits {
            message_max_bytes: 4096,
            message_retention: Duration::from_secs(3600),
            assignment_lease_ttl: Duration::from_secs(120),
            lock_acquire_timeout: Duration::from_millis(500),
            lock_lease_ttl: Duration::from_secs(5),
        },
    ));
    let state = AppState::new(coordinator, Arc::new(test_config()));
    TestServer::new(build_router(state)).expect("failed to create test server")
}

#[tokio::test]
async fn happy_path_through_the_http_surface() -> anyhow::Result<()> {
    let server = test_server();

    let start = server
        .post("/api/conversations")
        .json(&serde_json::json!({
            "customer_id": "cust-7",
            "customer_display_name": "Cust Seven",
        }))
        .await;
    start.assert_status_ok();
    let conversation: serde_json::Value = start.json();
    let id = conversation["id"].as_str().unwrap().to_owned();
    assert_eq!(conversation["status"], "open");

    let queued = server.post(&format!("/api/conversations/{id}/queue")).json(&serde_json::json!({ "channel": "web" })).await;
    queued.assert_status_ok();
    assert_eq!(queued.json::<serde_json::Value>()["status"], "queued");

    let accepted = server
        .post(&format!("/api/agent/conversations/{id}/accept"))
        .json(&serde_json::json!({ "agent_id": "ag-1", "agent_display_name": "Agent One" }))
        .await;
    accepted.assert_status_ok();
    assert_eq!(accepted.json::<serde_json::Value>()["status"], "assigned");

    let customer_msg = server
        .post(&format!("/api/conversations/{id}/messages"))
        .json(&serde_json::json!({
            "sender_id": "cust-7",
            "sender_display_name": "Cust Seven",
            "content": "hi",
        }))
        .await;
    customer_msg.assert_status_ok();

    let agent_msg = server
        .post(&format!("/api/conversations/{id}/messages"))
        .json(&serde_json::json!({
            "sender_id": "ag-1",
            "sender_display_name": "Agent One",
            "sender_type": "agent",
            "content": "hello",
        }))
        .await;
    agent_msg.assert_status_ok();

    let closed = server
        .post(&format!("/api/agent/conversations/{id}/close"))
        .json(&serde_json::json!({ "agent_id": "ag-1", "agent_display_name": "Agent One" }))
        .await;
    closed.assert_status_ok();
    assert_eq!(closed.json::<serde_json::Value>()["status"], "closed");

    let messages = server.get(&format!("/api/conversations/{id}/messages")).await;
    messages.assert_status_ok();
    let messages: Vec<serde_json::Value> = messages.json();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0]["content"], "hi");
    assert_eq!(messages[1]["content"], "hello");
    assert_eq!(messages[2]["type"], "system");
    assert!(messages[2]["content"].as_str().unwrap().contains("Agent One has closed this chat"));

    Ok(())
}

#[tokio::test]
async fn race_on_claim_has_exactly_one_winner() -> anyhow::Result<()> {
    let server = test_server();

    let start = server.post("/api/conversations").json(&serde_json::json!({
        "customer_id": "cust-1",
        "customer_display_name": "Cust One",
    })).await;
    let id = start.json::<serde_json::Value>()["id"].as_str().unwrap().to_owned();
    server.post(&format!("/api/conversations/{id}/queue")).json(&serde_json::json!({ "channel": "web" })).await.assert_status_ok();

    let a = server
        .post(&format!("/api/agent/conversations/{id}/accept"))
        .json(&serde_json::json!({ "agent_id": "ag-a", "agent_display_name": "Agent A" }))
        .await;
    let b = server
        .post(&format!("/api/agent/conversations/{id}/accept"))
        .json(&serde_json::json!({ "agent_id": "ag-b", "agent_display_name": "Agent B" }))
        .await;

    let statuses = [a.status_code().as_u16(), b.status_code().as_u16()];
    assert!(statuses.contains(&200));
    assert!(statuses.contains(&409));

    Ok(())
}

#[tokio::test]
async fn over_capacity_agent_is_rejected_with_422() -> anyhow::Result<()> {
    let server = test_server();
    let mut ids = Vec::new();
    for customer_id in ["cust-1", "cust-2", "cust-3"] {
        let start = server
            .post("/api/conversations")
            .json(&serde_json::json!({ "customer_id": customer_id, "customer_display_name": customer_id }))
            .await;
        let id = start.json::<serde_json::Value>()["id"].as_str().unwrap().to_owned();
        server.post(&format!("/api/conversations/{id}/queue")).json(&serde_json::json!({ "channel": "web" })).await.assert_status_ok();
        ids.push(id);
    }

    for id in &ids[..2] {
        server
            .post(&format!("/api/agent/conversations/{id}/accept"))
            .json(&serde_json::json!({ "agent_id": "ag-a", "agent_display_name": "Agent A" }))
            .await
            .assert_status_ok();
    }

    let third = server
        .post(&format!("/api/agent/conversations/{}/accept", ids[2]))
        .json(&serde_json::json!({ "agent_id": "ag-a", "agent_display_name": "Agent A" }))
        .await;
    third.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);

    let still_queued = server.get(&format!("/api/conversations/{}/messages", ids[2])).await;
    still_queued.assert_status_ok();

    Ok(())
}

#[tokio::test]
async fn empty_message_is_rejected_with_422() -> anyhow::Result<()> {
    let server = test_server();
    let start = server
        .post("/api/conversations")
        .json(&serde_json::json!({ "customer_id": "cust-1", "customer_display_name": "Cust One" }))
        .await;
    let id = start.json::<serde_json::Value>()["id"].as_str().unwrap().to_owned();

    let resp = server
        .post(&format!("/api/conversations/{id}/messages"))
        .json(&serde_json::json!({ "sender_id": "cust-1", "sender_display_name": "Cust One", "content": "   " }))
        .await;
    resp.assert_status(axum::http::StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn agent_messages_rejects_a_non_owning_agent() -> anyhow::Result<()> {
    let server = test_server();
    let start = server
        .post("/api/conversations")
        .json(&serde_json::json!({ "customer_id": "cust-1", "customer_display_name": "Cust One" }))
        .await;
    let id = start.json::<serde_json::Value>()["id"].as_str().unwrap().to_owned();
    server.post(&format!("/api/conversations/{id}/queue")).json(&serde_json::json!({ "channel": "web" })).await.assert_status_ok();
    server
        .post(&format!("/api/agent/conversations/{id}/accept"))
        .json(&serde_json::json!({ "agent_id": "ag-owner", "agent_display_name": "Owner" }))
        .await
        .assert_status_ok();

    let owner = server.get(&format!("/api/agent/conversations/{id}/messages?agent_id=ag-owner")).await;
    owner.assert_status_ok();

    let intruder = server.get(&format!("/api/agent/conversations/{id}/messages?agent_id=ag-other")).await;
    intruder.assert_status(axum::http::StatusCode::FORBIDDEN);

    Ok(())
}

#[tokio::test]
async fn health_reports_running() -> anyhow::Result<()> {
    let server = test_server();
    let resp = server.get("/api/v1/health").await;
    resp.assert_status_ok();
    assert_eq!(resp.json::<serde_json::Value>()["status"], "running");
    Ok(())
}

#[tokio::test]
async fn auth_token_rejects_unauthenticated_requests() -> anyhow::Result<()> {
    let coordinator = Arc::new(Coordinator::new(
        Arc::new(MemStore::new()),
        Arc::new(MemAuditStore::new()),
        Arc::new(LocalBus::new()),
        2,
        CoordinatorLimits {
            message_max_bytes: 4096,
            message_retention: Duration::from_secs(3600),
            assignment_lease_ttl: Duration::from_secs(120),
            lock_acquire_timeout: Duration::from_millis(500),
            lock_lease_ttl: Duration::from_secs(5),
        },
    ));
    let mut config = test_config();
    config.auth_token = Some("secret".into());
    let state = AppState::new(coordinator, Arc::new(config));
    let server = TestServer::new(build_router(state))?;

    let resp = server.get("/api/agent/queue").await;
    resp.assert_status(axum::http::StatusCode::UNAUTHORIZED);

    let health = server.get("/api/v1/health").await;
    health.assert_status_ok();

    Ok(())
}
