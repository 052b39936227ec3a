// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Coarse service-to-service bearer auth for the HTTP surface. The identity
//! provider for individual customers/agents is external (see `SPEC_FULL.md`
//! §1); this layer only gates the API as a whole.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use crate::error::CoordError;
use crate::gateway::AppState;

/// Constant-time string comparison to avoid a timing side channel on the
/// shared-secret check.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = a.as_bytes();
    let b = b.as_bytes();
    if a.len() != b.len() {
        return false;
    }
    let mut acc = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        acc |= x ^ y;
    }
    acc == 0
}

pub fn validate_bearer(headers: &HeaderMap, expected: Option<&str>) -> Result<(), CoordError> {
    let Some(expected) = expected else { return Ok(()) };

    let header = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or(CoordError::Unauthorized)?;
    let token = header.strip_prefix("Bearer ").ok_or(CoordError::Unauthorized)?;

    if constant_time_eq(token, expected) {
        Ok(())
    } else {
        Err(CoordError::Unauthorized)
    }
}

pub fn validate_ws_query(query: &str, expected: Option<&str>) -> Result<(), CoordError> {
    let Some(expected) = expected else { return Ok(()) };

    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if constant_time_eq(value, expected) {
                return Ok(());
            }
        }
    }
    Err(CoordError::Unauthorized)
}

/// Exempt the health probe and websocket upgrades (the WS handshake
/// validates its own `token` query parameter instead).
pub async fn auth_layer(state: State<Arc<AppState>>, req: Request<axum::body::Body>, next: Next) -> Response {
    let path = req.uri().path();
    if path == "/api/v1/health" || path.starts_with("/ws") {
        return next.run(req).await;
    }

    if let Err(e) = validate_bearer(req.headers(), state.config.auth_token.as_deref()) {
        return e.into_response();
    }

    next.run(req).await
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;

    #[test]
    fn no_expected_token_allows_anything() {
        let headers = HeaderMap::new();
        assert!(validate_bearer(&headers, None).is_ok());
    }

    #[test]
    fn missing_header_is_unauthorized_when_token_configured() {
        let headers = HeaderMap::new();
        assert!(validate_bearer(&headers, Some("secret")).is_err());
    }

    #[test]
    fn matching_bearer_token_is_authorized() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer secret".parse().unwrap());
        assert!(validate_bearer(&headers, Some("secret")).is_ok());
    }

    #[test]
    fn mismatched_bearer_token_is_unauthorized() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer wrong".parse().unwrap());
        assert!(validate_bearer(&headers, Some("secret")).is_err());
    }

    #[test]
    fn ws_query_token_is_validated() {
        assert!(validate_ws_query("role=customer&token=secret", Some("secret")).is_ok());
        assert!(validate_ws_query("role=customer&token=wrong", Some("secret")).is_err());
    }
}
