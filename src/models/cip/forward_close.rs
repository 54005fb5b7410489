// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Forward Close (service 0x4E) request and reply bodies.

use bytes::BytesMut;
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::{
    errors::{PlcError, Result},
    models::{
        cip::{forward_open::CONNECTION_PATH, message::CipRequest, path::CipPath, service},
        common::Encode,
    },
};

/// Fixed-layout prefix of the Forward Close request body; word count,
/// a reserved pad byte and the connection path follow on the wire.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ForwardCloseBody {
    pub priority_time_tick: u8,
    pub timeout_ticks: u8,
    pub connection_serial: U16<LittleEndian>,
    pub vendor_id: U16<LittleEndian>,
    pub originator_serial: U32<LittleEndian>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardCloseRequest {
    pub body: ForwardCloseBody,
    pub connection_path: Vec<u8>,
}

impl ForwardCloseRequest {
    pub fn new(connection_serial: u16, originator_serial: u32) -> Self {
        Self {
            body: ForwardCloseBody {
                priority_time_tick: 0x0A,
                timeout_ticks: 0x0E,
                connection_serial: U16::new(connection_serial),
                vendor_id: U16::new(0x004D),
                originator_serial: U32::new(originator_serial),
            },
            connection_path: CONNECTION_PATH.to_vec(),
        }
    }

    pub fn into_cip(self) -> CipRequest {
        CipRequest::with_payload(
            service::FORWARD_CLOSE,
            CipPath::connection_manager(),
            self.to_bytes(),
        )
    }
}

impl Encode for ForwardCloseRequest {
    fn encoded_len(&self) -> usize {
        size_of::<ForwardCloseBody>() + 2 + self.connection_path.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.body.as_bytes());
        buf.extend_from_slice(&[(self.connection_path.len() / 2) as u8, 0]);
        buf.extend_from_slice(&self.connection_path);
    }
}

/// Forward Close reply body.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ForwardCloseReply {
    pub connection_serial: U16<LittleEndian>,
    pub vendor_id: U16<LittleEndian>,
    pub originator_serial: U32<LittleEndian>,
    pub application_reply_size: u8,
    reserved: u8,
}

impl ForwardCloseReply {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (reply, _rest) = Self::read_from_prefix(payload).map_err(|_| {
            PlcError::Communication(format!(
                "Forward Close reply too short: {} bytes",
                payload.len()
            ))
        })?;
        Ok(reply)
    }
}
