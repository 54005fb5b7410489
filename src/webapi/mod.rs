// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Thin HTTP adapter over the session orchestrator.

pub mod auth;
pub mod routes;
pub mod schemas;

use std::sync::Arc;

use axum::{Router, middleware};

use crate::{device::store::ConfigurationStore, orchestrator::SessionOrchestrator};

use self::auth::TokenAuthenticator;

/// Shared state of the web adapter.
pub struct AppState {
    pub orchestrator: Arc<SessionOrchestrator>,
    pub store: Arc<ConfigurationStore>,
    pub authenticator: Option<TokenAuthenticator>,
}

/// Build the router bound to an orchestrator and configuration store.
///
/// Bearer-token authentication is enabled when `auth_token` is set.
pub fn create_app(
    orchestrator: Arc<SessionOrchestrator>,
    store: Arc<ConfigurationStore>,
    auth_token: Option<String>,
) -> Router {
    let state = Arc::new(AppState {
        orchestrator,
        store,
        authenticator: auth_token.map(TokenAuthenticator::new),
    });

    routes::api_router()
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            auth::require_token,
        ))
        .layer(middleware::from_fn(routes::log_requests))
        .with_state(state)
}
