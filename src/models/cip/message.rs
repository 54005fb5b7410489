// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Top-level CIP request/response envelopes.

use bytes::{Bytes, BytesMut};

use crate::{
    errors::{PlcError, Result},
    models::{
        cip::{RESPONSE_BIT, path::CipPath, status::CipStatus},
        common::{ByteReader, Encode},
    },
};

/// A CIP service request: service byte, request path, service payload.
#[derive(Debug, Clone, PartialEq)]
pub struct CipRequest {
    pub service: u8,
    pub path: CipPath,
    pub payload: Bytes,
}

impl CipRequest {
    pub fn new(service: u8, path: CipPath) -> Self {
        Self {
            service,
            path,
            payload: Bytes::new(),
        }
    }

    pub fn with_payload(service: u8, path: CipPath, payload: impl Into<Bytes>) -> Self {
        Self {
            service,
            path,
            payload: payload.into(),
        }
    }
}

impl Encode for CipRequest {
    fn encoded_len(&self) -> usize {
        1 + self.path.encoded_len() + self.payload.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.service]);
        self.path.encode(buf);
        buf.extend_from_slice(&self.payload);
    }
}

/// A decoded CIP reply.
///
/// `service` is the original request service (reply bit stripped). Some
/// Forward Open replies stop at the reply-service byte; those decode with a
/// synthesized success status and no additional words.
#[derive(Debug, Clone, PartialEq)]
pub struct CipResponse {
    pub service: u8,
    pub status: CipStatus,
    pub additional: Vec<u16>,
    pub payload: Bytes,
}

impl CipResponse {
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let reply_service = r.u8("CIP reply service")?;
        if reply_service & RESPONSE_BIT == 0 {
            return Err(PlcError::Communication(format!(
                "CIP service byte 0x{reply_service:02x} is not a reply"
            )));
        }
        let service = reply_service & !RESPONSE_BIT;

        // A reply truncated right after the service byte means "success with
        // nothing further to say".
        if r.is_empty() {
            return Ok(Self {
                service,
                status: CipStatus::from_code(0),
                additional: Vec::new(),
                payload: Bytes::new(),
            });
        }

        let _reserved = r.u8("CIP reply reserved byte")?;
        let general = r.u8("CIP general status")?;
        let additional_size = r.u8("CIP additional status size")? as usize;
        let mut additional = Vec::with_capacity(additional_size);
        for _ in 0..additional_size {
            additional.push(r.u16_le("CIP additional status word")?);
        }
        Ok(Self {
            service,
            status: CipStatus::from_code(general),
            additional,
            payload: Bytes::copy_from_slice(r.rest()),
        })
    }

    /// Fail unless the general status is zero.
    pub fn ensure_ok(&self, context: &str) -> Result<()> {
        if self.status.ok() {
            return Ok(());
        }
        Err(PlcError::response(
            format!("{context}: {}", self.status.message()),
            self.status.clone(),
        ))
    }
}

impl Encode for CipResponse {
    fn encoded_len(&self) -> usize {
        4 + self.additional.len() * 2 + self.payload.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[
            self.service | RESPONSE_BIT,
            0,
            self.status.code.unwrap_or(0),
            self.additional.len() as u8,
        ]);
        for word in &self.additional {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf.extend_from_slice(&self.payload);
    }
}
