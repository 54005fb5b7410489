// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Request/response bodies shared by the web API endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    errors::PlcError,
    models::cip::{path::CipPath, status::CipStatus},
    orchestrator::{AssemblySnapshot, CommandResult, SessionDiagnostics, SessionInfo},
    runtime::AssemblyState,
    session::manager::ConnectionStatus,
};

/// Error envelope; the HTTP status is derived from the error kind.
pub struct ApiError(pub PlcError);

impl From<PlcError> for ApiError {
    fn from(err: PlcError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            PlcError::Connection(_) | PlcError::Communication(_) | PlcError::Response { .. } => {
                StatusCode::BAD_GATEWAY
            }
            PlcError::Runtime(_) | PlcError::RuntimeDirection(_) => StatusCode::BAD_REQUEST,
            PlcError::RuntimeNotRegistered(_) => StatusCode::NOT_FOUND,
            PlcError::Manager(msg) if msg.starts_with("Unknown session") => StatusCode::NOT_FOUND,
            PlcError::Manager(msg) if msg.starts_with("Unknown assembly alias") => {
                StatusCode::NOT_FOUND
            }
            PlcError::Manager(_) => StatusCode::BAD_REQUEST,
            PlcError::ConfigParse(_) => StatusCode::BAD_REQUEST,
            PlcError::ConfigValidation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        };
        let body = json!({
            "detail": self.0.to_string(),
            "cip_status": self.0.cip_status(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StartSessionRequest {
    pub host: Option<String>,
    pub port: Option<u16>,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub session_id: String,
    pub connection: ConnectionStatus,
}

impl SessionResponse {
    pub fn from_info(info: SessionInfo) -> Self {
        Self {
            session_id: info.session_id,
            connection: info.connection,
        }
    }

    pub fn from_handle(session_id: String, connection: ConnectionStatus) -> Self {
        Self {
            session_id,
            connection,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SessionDiagnosticsResponse(pub SessionDiagnostics);

#[derive(Debug, Deserialize)]
pub struct AssemblyQuery {
    pub class_id: u16,
    pub instance_id: u16,
    pub total_size: usize,
}

#[derive(Debug, Serialize)]
pub struct AssemblyReadResponse {
    pub class_id: u16,
    pub instance_id: u16,
    pub data_hex: String,
    pub words: Vec<u16>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub last_status: CipStatus,
}

impl AssemblyReadResponse {
    pub fn from_snapshot(snapshot: AssemblySnapshot) -> Self {
        let words = crate::client::client::words_from_payload(&snapshot.data);
        Self {
            class_id: snapshot.class_id,
            instance_id: snapshot.instance_id,
            data_hex: hex::encode(&snapshot.data),
            words,
            timestamp: snapshot.timestamp,
            last_status: snapshot.last_status,
        }
    }
}

/// A CIP path given field by field. At least class and instance must be
/// present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CipPathModel {
    pub class_id: Option<u16>,
    pub instance_id: Option<u16>,
    pub member_id: Option<u16>,
    pub attribute_id: Option<u16>,
}

impl CipPathModel {
    pub fn to_cip_path(&self) -> Result<CipPath, PlcError> {
        let (Some(class_id), Some(instance_id)) = (self.class_id, self.instance_id) else {
            return Err(PlcError::Manager(
                "At least class_id and instance_id must be provided".into(),
            ));
        };
        let mut path = CipPath::make(class_id, instance_id);
        if let Some(member) = self.member_id {
            path = path.with_member(member);
        }
        if let Some(attr) = self.attribute_id {
            path = path.with_attribute(attr);
        }
        Ok(path)
    }
}

#[derive(Debug, Deserialize)]
pub struct AssemblyWriteRequest {
    #[serde(default)]
    pub path: Option<CipPathModel>,
    pub attribute_id: u16,
    pub value_hex: String,
}

impl AssemblyWriteRequest {
    pub fn value_bytes(&self) -> Result<Bytes, PlcError> {
        decode_hex(&self.value_hex)
    }
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub service: u8,
    pub path: CipPathModel,
    #[serde(default)]
    pub payload_hex: String,
    #[serde(default = "default_transport")]
    pub transport: String,
}

fn default_transport() -> String {
    "rr_cm".to_string()
}

impl CommandRequest {
    pub fn payload_bytes(&self) -> Result<Bytes, PlcError> {
        if self.payload_hex.is_empty() {
            return Ok(Bytes::new());
        }
        decode_hex(&self.payload_hex)
    }
}

#[derive(Debug, Serialize)]
pub struct CommandResponse {
    pub status: CipStatus,
    pub payload_hex: String,
}

impl CommandResponse {
    pub fn from_result(result: CommandResult) -> Self {
        Self {
            payload_hex: hex::encode(&result.payload),
            status: result.status,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct IoWriteRequest {
    pub payload_hex: String,
}

impl IoWriteRequest {
    pub fn payload_bytes(&self) -> Result<Bytes, PlcError> {
        decode_hex(&self.payload_hex)
    }
}

#[derive(Debug, Serialize)]
pub struct AssemblyStateResponse(pub AssemblyState);

#[derive(Debug, Serialize)]
pub struct CipStatusSchema {
    pub code: Option<u8>,
    pub message: Option<String>,
}

impl CipStatusSchema {
    pub fn from_status(status: CipStatus) -> Self {
        Self {
            code: status.code,
            message: status.message,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ConfigurationSummary {
    pub loaded: bool,
    pub identity: Option<crate::device::config::DeviceIdentity>,
    pub assemblies: Vec<String>,
}

fn decode_hex(text: &str) -> Result<Bytes, PlcError> {
    let cleaned: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    hex::decode(&cleaned)
        .map(Bytes::from)
        .map_err(|_| PlcError::Manager(format!("Invalid hex payload '{text}'")))
}
