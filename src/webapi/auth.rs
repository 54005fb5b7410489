// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::AppState;

/// Bearer token authenticator used by the API layer.
pub struct TokenAuthenticator {
    token: String,
}

impl TokenAuthenticator {
    pub fn new(token: String) -> Self {
        Self { token }
    }

    /// Constant-time comparison against the configured token.
    pub fn verify(&self, candidate: &str) -> bool {
        let expected = self.token.as_bytes();
        let got = candidate.as_bytes();
        let mut diff = expected.len() ^ got.len();
        for i in 0..expected.len().max(got.len()) {
            let a = expected.get(i).copied().unwrap_or(0);
            let b = got.get(i).copied().unwrap_or(0);
            diff |= usize::from(a ^ b);
        }
        diff == 0
    }
}

fn unauthorized(detail: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        [(header::WWW_AUTHENTICATE, "Bearer")],
        axum::Json(json!({ "detail": detail })),
    )
        .into_response()
}

/// Validate the Authorization header when authentication is enabled.
pub async fn require_token(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(authenticator) = &state.authenticator else {
        return next.run(request).await;
    };

    let header_value = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    let Some(candidate) = header_value.and_then(|v| v.strip_prefix("Bearer ")) else {
        return unauthorized("Missing bearer token");
    };
    if !authenticator.verify(candidate) {
        return unauthorized("Invalid bearer token");
    }
    next.run(request).await
}
