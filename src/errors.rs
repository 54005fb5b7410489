// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use thiserror::Error;

use crate::models::cip::status::CipStatus;

/// Crate-wide error taxonomy for PLC communication.
///
/// The kinds are deliberately coarse: transport failures, decoder failures,
/// protocol-level rejections, assembly-runtime precondition violations and
/// orchestrator-level failures. The web adapter maps each kind onto an HTTP
/// status, so new failure modes should extend an existing kind rather than
/// introduce a new one.
#[derive(Debug, Error)]
pub enum PlcError {
    /// TCP socket failure, pool exhaustion, timeout or premature close.
    #[error("{0}")]
    Connection(String),

    /// A well-formed-looking frame whose body could not be decoded.
    #[error("{0}")]
    Communication(String),

    /// A syntactically valid CIP reply with a non-zero general status, or an
    /// unexpected payload shape/size.
    #[error("{message}")]
    Response { message: String, status: CipStatus },

    /// Assembly runtime precondition violated (size mismatch, unreadable
    /// assembly, ...).
    #[error("{0}")]
    Runtime(String),

    /// Operation incompatible with the assembly direction.
    #[error("{0}")]
    RuntimeDirection(String),

    /// The referenced assembly alias is not registered in the runtime.
    #[error("{0}")]
    RuntimeNotRegistered(String),

    /// Orchestrator-level failure (unknown session, unsupported transport,
    /// output-write timeout).
    #[error("{0}")]
    Manager(String),

    /// Malformed device-configuration document.
    #[error("{0}")]
    ConfigParse(String),

    /// Well-formed device-configuration document that fails validation.
    #[error("{0}")]
    ConfigValidation(String),
}

impl PlcError {
    pub fn response(message: impl Into<String>, status: CipStatus) -> Self {
        Self::Response {
            message: message.into(),
            status,
        }
    }

    /// The CIP status attached to a `Response` error, if any.
    pub fn cip_status(&self) -> Option<&CipStatus> {
        match self {
            Self::Response { status, .. } => Some(status),
            _ => None,
        }
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_))
    }
}

impl From<std::io::Error> for PlcError {
    fn from(err: std::io::Error) -> Self {
        Self::Connection(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PlcError>;
