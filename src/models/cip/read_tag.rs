// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Read Other Tag (service 0x4C) and Get Instance List (service 0x4B)
//! payloads. Both are resumable services: a partial-transfer status tells
//! the caller to issue another request for the remainder.

use bytes::BytesMut;

use crate::{
    errors::Result,
    models::{
        cip::{message::CipRequest, path::CipPath, service},
        common::{ByteReader, Encode},
    },
};

/// Request payload of Read Other Tag: byte offset to start from and the
/// number of bytes still wanted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOtherTag {
    pub start: u32,
    pub length: u16,
}

impl ReadOtherTag {
    pub fn new(start: u32, length: u16) -> Self {
        Self { start, length }
    }

    pub fn into_cip(self, path: CipPath) -> CipRequest {
        CipRequest::with_payload(service::READ_OTHER_TAG, path, self.to_bytes())
    }
}

impl Encode for ReadOtherTag {
    fn encoded_len(&self) -> usize {
        6
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.start.to_le_bytes());
        buf.extend_from_slice(&self.length.to_le_bytes());
    }
}

/// Get Instance List request against `class_id`, resuming enumeration at
/// `start_instance`.
pub fn instance_list_request(class_id: u16, start_instance: u16) -> CipRequest {
    CipRequest::new(
        service::GET_INSTANCE_LIST,
        CipPath::make(class_id, start_instance),
    )
}

/// Decode a Get Instance List reply payload into 32-bit instance ids.
pub fn decode_instance_list(payload: &[u8]) -> Result<Vec<u32>> {
    let mut r = ByteReader::new(payload);
    let mut instances = Vec::with_capacity(payload.len() / 4);
    while !r.is_empty() {
        instances.push(r.u32_le("instance id")?);
    }
    Ok(instances)
}
