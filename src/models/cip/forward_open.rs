// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Forward Open (service 0x54) request and reply bodies.

use bytes::BytesMut;
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::{
    errors::{PlcError, Result},
    models::{
        cip::{message::CipRequest, path::CipPath, service},
        common::Encode,
    },
};

/// Connection path sent with Forward Open / Forward Close: port 1, link 0,
/// then the Message Router (class 2, instance 1).
pub const CONNECTION_PATH: [u8; 6] = [0x01, 0x00, 0x20, 0x02, 0x24, 0x01];

/// Default network connection payload size in bytes.
const DEFAULT_CONNECTION_SIZE: u16 = 500;
/// Variable-size, low-priority connection parameter flags.
const CONNECTION_PARAM_FLAGS: u16 = 0x4000;

/// Requested packet interval, microseconds.
const DEFAULT_RPI_US: u32 = 0x001E_8480;

/// Network connection parameters as a 16-bit word: flag bits plus the
/// payload size. The default size of 500 encodes as `0x41F4`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionParams {
    pub size: u16,
}

impl ConnectionParams {
    pub fn to_word(self) -> u16 {
        CONNECTION_PARAM_FLAGS | self.size
    }
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            size: DEFAULT_CONNECTION_SIZE,
        }
    }
}

/// Fixed-layout prefix of the Forward Open request body; the connection path
/// (word count + bytes) follows on the wire.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ForwardOpenBody {
    pub priority_time_tick: u8,
    pub timeout_ticks: u8,
    pub ot_connection_id: U32<LittleEndian>,
    pub to_connection_id: U32<LittleEndian>,
    pub connection_serial: U16<LittleEndian>,
    pub vendor_id: U16<LittleEndian>,
    pub originator_serial: U32<LittleEndian>,
    pub timeout_multiplier: u8,
    reserved: [u8; 3],
    pub ot_rpi: U32<LittleEndian>,
    pub ot_params: U16<LittleEndian>,
    pub to_rpi: U32<LittleEndian>,
    pub to_params: U16<LittleEndian>,
    pub transport_class_trigger: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForwardOpenRequest {
    pub body: ForwardOpenBody,
    pub connection_path: Vec<u8>,
}

impl ForwardOpenRequest {
    pub fn new(connection_serial: u16, originator_serial: u32) -> Self {
        Self::with_params(
            connection_serial,
            originator_serial,
            ConnectionParams::default(),
            ConnectionParams::default(),
        )
    }

    pub fn with_params(
        connection_serial: u16,
        originator_serial: u32,
        ot: ConnectionParams,
        to: ConnectionParams,
    ) -> Self {
        Self {
            body: ForwardOpenBody {
                priority_time_tick: 0x0A,
                timeout_ticks: 0x0E,
                ot_connection_id: U32::new(0),
                to_connection_id: U32::new(1),
                connection_serial: U16::new(connection_serial),
                vendor_id: U16::new(0x004D),
                originator_serial: U32::new(originator_serial),
                timeout_multiplier: 1,
                reserved: [0; 3],
                ot_rpi: U32::new(DEFAULT_RPI_US),
                ot_params: U16::new(ot.to_word()),
                to_rpi: U32::new(DEFAULT_RPI_US),
                to_params: U16::new(to.to_word()),
                transport_class_trigger: 0xA3,
            },
            connection_path: CONNECTION_PATH.to_vec(),
        }
    }

    /// Wrap the body into the CIP request to the Connection Manager.
    pub fn into_cip(self) -> CipRequest {
        let mut payload = BytesMut::with_capacity(
            size_of::<ForwardOpenBody>() + 1 + self.connection_path.len(),
        );
        payload.extend_from_slice(self.body.as_bytes());
        payload.extend_from_slice(&[(self.connection_path.len() / 2) as u8]);
        payload.extend_from_slice(&self.connection_path);
        CipRequest::with_payload(
            service::FORWARD_OPEN,
            CipPath::connection_manager(),
            payload.freeze(),
        )
    }
}

impl Encode for ForwardOpenRequest {
    fn encoded_len(&self) -> usize {
        size_of::<ForwardOpenBody>() + 1 + self.connection_path.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(self.body.as_bytes());
        buf.extend_from_slice(&[(self.connection_path.len() / 2) as u8]);
        buf.extend_from_slice(&self.connection_path);
    }
}

/// Forward Open reply body.
#[repr(C)]
#[derive(Debug, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct ForwardOpenReply {
    pub ot_connection_id: U32<LittleEndian>,
    pub to_connection_id: U32<LittleEndian>,
    pub connection_serial: U16<LittleEndian>,
    pub vendor_id: U16<LittleEndian>,
    pub originator_serial: U32<LittleEndian>,
    pub ot_api: U32<LittleEndian>,
    pub to_api: U32<LittleEndian>,
    pub application_reply_size: u8,
    reserved: u8,
}

impl ForwardOpenReply {
    pub fn decode(payload: &[u8]) -> Result<Self> {
        let (reply, _rest) = Self::read_from_prefix(payload).map_err(|_| {
            PlcError::Communication(format!(
                "Forward Open reply too short: {} bytes",
                payload.len()
            ))
        })?;
        Ok(reply)
    }
}
