// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coordinator error taxonomy and its mapping onto HTTP status codes.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone)]
pub enum CoordError {
    NotFound(String),
    AlreadyClosed,
    ConflictOwner,
    NoLongerAvailable,
    AgentCapacityExceeded,
    InvalidArgument(String),
    Contention,
    BackendUnavailable(String),
    Unauthorized,
    Forbidden,
}

impl CoordError {
    pub fn http_status(&self) -> u16 {
        match self {
            CoordError::NotFound(_) => 404,
            CoordError::AlreadyClosed => 409,
            CoordError::ConflictOwner => 409,
            CoordError::NoLongerAvailable => 409,
            CoordError::AgentCapacityExceeded => 422,
            CoordError::InvalidArgument(_) => 422,
            CoordError::Contention => 429,
            CoordError::BackendUnavailable(_) => 503,
            CoordError::Unauthorized => 401,
            CoordError::Forbidden => 403,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CoordError::NotFound(_) => "not_found",
            CoordError::AlreadyClosed => "already_closed",
            CoordError::ConflictOwner => "conflict_owner",
            CoordError::NoLongerAvailable => "no_longer_available",
            CoordError::AgentCapacityExceeded => "agent_capacity_exceeded",
            CoordError::InvalidArgument(_) => "invalid_argument",
            CoordError::Contention => "contention",
            CoordError::BackendUnavailable(_) => "backend_unavailable",
            CoordError::Unauthorized => "unauthorized",
            CoordError::Forbidden => "forbidden",
        }
    }

    pub fn message(&self) -> String {
        match self {
            CoordError::NotFound(id) => format!("conversation {id} not found"),
            CoordError::AlreadyClosed => "conversation is already closed".to_owned(),
            CoordError::ConflictOwner => "conversation is owned by another agent".to_owned(),
            CoordError::NoLongerAvailable => "conversation is no longer available".to_owned(),
            CoordError::AgentCapacityExceeded => "agent has reached its concurrency limit".to_owned(),
            CoordError::InvalidArgument(why) => why.clone(),
            CoordError::Contention => "could not acquire the conversation lock in time".to_owned(),
            CoordError::BackendUnavailable(why) => format!("backend unavailable: {why}"),
            CoordError::Unauthorized => "unauthorized".to_owned(),
            CoordError::Forbidden => "not the owning agent".to_owned(),
        }
    }

    pub fn to_error_body(&self) -> ErrorResponse {
        ErrorResponse {
            error: ErrorBody {
                code: self.as_str().to_owned(),
                message: self.message(),
            },
        }
    }

    pub fn to_http_response(&self) -> (StatusCode, Json<ErrorResponse>) {
        let status = StatusCode::from_u16(self.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_error_body()))
    }
}

impl fmt::Display for CoordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.as_str(), self.message())
    }
}

impl std::error::Error for CoordError {}

impl IntoResponse for CoordError {
    fn into_response(self) -> Response {
        self.to_http_response().into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: ErrorBody,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn conflict_owner_maps_to_409() {
        assert_eq!(CoordError::ConflictOwner.http_status(), 409);
        assert_eq!(CoordError::ConflictOwner.as_str(), "conflict_owner");
    }

    #[test]
    fn capacity_exceeded_maps_to_422() {
        assert_eq!(CoordError::AgentCapacityExceeded.http_status(), 422);
    }

    #[test]
    fn forbidden_maps_to_403() {
        assert_eq!(CoordError::Forbidden.http_status(), 403);
        assert_eq!(CoordError::Forbidden.as_str(), "forbidden");
    }

    #[test]
    fn not_found_message_includes_id() {
        let e = CoordError::NotFound("c1".into());
        assert!(e.message().contains("c1"));
    }
}
