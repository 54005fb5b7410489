// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Multiple Service Packet (service 0x0A) to the Message Router.
//!
//! The payload is a count, a table of 16-bit offsets measured from the start
//! of the count field, and the embedded service requests back to back.

use bytes::{Bytes, BytesMut};

use crate::{
    errors::Result,
    models::{
        cip::{
            message::{CipRequest, CipResponse},
            path::CipPath,
            service,
        },
        common::{ByteReader, Encode},
    },
};

#[derive(Debug, Clone, PartialEq)]
pub struct MultipleServicePacket {
    pub requests: Vec<Bytes>,
}

impl MultipleServicePacket {
    pub fn new(requests: Vec<Bytes>) -> Self {
        Self { requests }
    }

    pub fn wrap(request: &CipRequest) -> Self {
        Self::new(vec![request.to_bytes()])
    }

    pub fn into_cip(self) -> CipRequest {
        CipRequest::with_payload(
            service::MULTIPLE_SERVICE_PACKET,
            CipPath::message_router(),
            self.to_bytes(),
        )
    }

    /// Split a Multiple Service reply payload back into embedded replies.
    pub fn decode_replies(payload: &[u8]) -> Result<Vec<CipResponse>> {
        let mut r = ByteReader::new(payload);
        let count = r.u16_le("embedded reply count")? as usize;
        let mut offsets = Vec::with_capacity(count);
        for _ in 0..count {
            offsets.push(r.u16_le("embedded reply offset")? as usize);
        }
        let mut replies = Vec::with_capacity(count);
        for (i, &start) in offsets.iter().enumerate() {
            let end = offsets.get(i + 1).copied().unwrap_or(payload.len());
            let mut body = ByteReader::new(payload);
            let _skip = body.take(start, "embedded reply offset")?;
            let slice = body.take(end - start, "embedded reply body")?;
            replies.push(CipResponse::decode(slice)?);
        }
        Ok(replies)
    }
}

impl Encode for MultipleServicePacket {
    fn encoded_len(&self) -> usize {
        2 + self.requests.len() * 2 + self.requests.iter().map(Bytes::len).sum::<usize>()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&(self.requests.len() as u16).to_le_bytes());
        let mut offset = 2 + self.requests.len() * 2;
        for req in &self.requests {
            buf.extend_from_slice(&(offset as u16).to_le_bytes());
            offset += req.len();
        }
        for req in &self.requests {
            buf.extend_from_slice(req);
        }
    }
}
