// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use tracing::{error, info};

use crate::{
    device::config::load_configuration,
    errors::PlcError,
    models::cip::path::parse_class_instance,
    orchestrator::CommandTransport,
};

use super::{
    AppState,
    schemas::{
        ApiError, AssemblyQuery, AssemblyReadResponse, AssemblyStateResponse,
        AssemblyWriteRequest, CipPathModel, CipStatusSchema, CommandRequest, CommandResponse,
        ConfigurationSummary, IoWriteRequest, SessionDiagnosticsResponse, SessionResponse,
        StartSessionRequest,
    },
};

pub fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sessions", post(start_session))
        .route(
            "/sessions/{session_id}",
            get(get_session).delete(stop_session),
        )
        .route("/sessions/{session_id}/diagnostics", get(session_diagnostics))
        .route("/sessions/{session_id}/assemblies", get(read_assembly))
        .route(
            "/sessions/{session_id}/assemblies/{*path}",
            axum::routing::patch(update_assembly),
        )
        .route("/sessions/{session_id}/commands", post(execute_command))
        .route(
            "/sessions/{session_id}/io/{alias}",
            get(assembly_state).post(write_assembly),
        )
        .route(
            "/configuration",
            put(apply_configuration).get(configuration_summary),
        )
}

/// Log the outcome of every handled request.
pub async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let response = next.run(request).await;
    if response.status().is_server_error() {
        error!("{method} {path} -> {}", response.status());
    } else {
        info!("{method} {path} -> {}", response.status());
    }
    response
}

async fn start_session(
    State(state): State<Arc<AppState>>,
    body: Option<Json<StartSessionRequest>>,
) -> Result<Response, ApiError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();
    let info = state
        .orchestrator
        .start_session(request.host.as_deref(), request.port)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(SessionResponse::from_info(info)),
    )
        .into_response())
}

async fn stop_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let connection = state.orchestrator.stop_session(&session_id).await?;
    Ok(Json(SessionResponse::from_handle(session_id, connection)))
}

async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionResponse>, ApiError> {
    let connection = state.orchestrator.get_status(&session_id)?;
    Ok(Json(SessionResponse::from_handle(session_id, connection)))
}

async fn session_diagnostics(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Json<SessionDiagnosticsResponse>, ApiError> {
    let report = state.orchestrator.get_diagnostics(&session_id)?;
    Ok(Json(SessionDiagnosticsResponse(report)))
}

async fn read_assembly(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Query(query): Query<AssemblyQuery>,
) -> Result<Json<AssemblyReadResponse>, ApiError> {
    let snapshot = state
        .orchestrator
        .read_assembly(
            &session_id,
            query.class_id,
            query.instance_id,
            query.total_size,
        )
        .await?;
    Ok(Json(AssemblyReadResponse::from_snapshot(snapshot)))
}

async fn update_assembly(
    State(state): State<Arc<AppState>>,
    Path((session_id, path)): Path<(String, String)>,
    Json(payload): Json<AssemblyWriteRequest>,
) -> Result<Json<CipStatusSchema>, ApiError> {
    let cip_path = match &payload.path {
        Some(model) => model.to_cip_path()?,
        None => {
            let (class_id, instance_id) = parse_class_instance(&path)?;
            CipPathModel {
                class_id: Some(class_id),
                instance_id: Some(instance_id),
                ..Default::default()
            }
            .to_cip_path()?
        }
    };
    let status = state
        .orchestrator
        .write_attribute(
            &session_id,
            cip_path,
            payload.attribute_id,
            payload.value_bytes()?,
        )
        .await?;
    Ok(Json(CipStatusSchema::from_status(status)))
}

async fn execute_command(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<CommandRequest>,
) -> Result<Json<CommandResponse>, ApiError> {
    let transport: CommandTransport = payload.transport.parse()?;
    let result = state
        .orchestrator
        .send_command(
            &session_id,
            payload.service,
            payload.path.to_cip_path()?,
            payload.payload_bytes()?,
            transport,
        )
        .await?;
    Ok(Json(CommandResponse::from_result(result)))
}

async fn assembly_state(
    State(state): State<Arc<AppState>>,
    Path((session_id, alias)): Path<(String, String)>,
) -> Result<Json<AssemblyStateResponse>, ApiError> {
    let view = state.orchestrator.get_assembly_state(&session_id, &alias)?;
    Ok(Json(AssemblyStateResponse(view)))
}

async fn write_assembly(
    State(state): State<Arc<AppState>>,
    Path((session_id, alias)): Path<(String, String)>,
    Json(payload): Json<IoWriteRequest>,
) -> Result<Json<CipStatusSchema>, ApiError> {
    let status = state
        .orchestrator
        .write_assembly(&session_id, &alias, payload.payload_bytes()?)
        .await?;
    Ok(Json(CipStatusSchema::from_status(status)))
}

async fn apply_configuration(
    State(state): State<Arc<AppState>>,
    body: String,
) -> Result<Json<ConfigurationSummary>, ApiError> {
    let configuration = load_configuration(&body)?;
    let state_snapshot = state.store.load(configuration);
    let configuration = state_snapshot
        .configuration
        .ok_or_else(|| PlcError::ConfigValidation("configuration failed to load".into()))?;
    state.orchestrator.apply_configuration(configuration).await?;
    Ok(Json(summary_of(&state.store)))
}

async fn configuration_summary(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ConfigurationSummary>, ApiError> {
    Ok(Json(summary_of(&state.store)))
}

fn summary_of(store: &crate::device::store::ConfigurationStore) -> ConfigurationSummary {
    let snapshot = store.state();
    ConfigurationSummary {
        loaded: snapshot.loaded(),
        identity: snapshot
            .configuration
            .as_ref()
            .map(|cfg| cfg.identity.clone()),
        assemblies: snapshot
            .configuration
            .as_ref()
            .map(|cfg| cfg.assemblies.iter().map(|a| a.alias.clone()).collect())
            .unwrap_or_default(),
    }
}
