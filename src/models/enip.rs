// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! ENIP encapsulation framing.
//!
//! Every TCP exchange starts with a fixed 24-byte header followed by
//! `length` bytes of command-specific payload:
//!
//! ```text
//! +---------+---------+-----------------+-----------------+
//! | command | length  | session handle  | status          |
//! |  u16 LE |  u16 LE |     u32 LE      |     u32 LE      |
//! +---------+---------+-----------------+-----------------+
//! | sender context (8 bytes, echoed)    | options (u32 LE)|
//! +-------------------------------------+-----------------+
//! ```

use bytes::{Bytes, BytesMut};
use zerocopy::{FromBytes as ZFromBytes, Immutable, IntoBytes, KnownLayout, LittleEndian, U16, U32};

use crate::{
    errors::{PlcError, Result},
    models::{
        common::{ByteReader, ENIP_HEADER_LEN, Encode},
        cpf::CommonPacket,
    },
};

/// Encapsulation commands used by this client.
pub const CMD_REGISTER_SESSION: u16 = 0x0065;
pub const CMD_SEND_RR_DATA: u16 = 0x006F;
pub const CMD_SEND_UNIT_DATA: u16 = 0x0070;

/// Protocol version sent in RegisterSession.
const ENIP_PROTOCOL_VERSION: u16 = 1;

/// Fixed encapsulation header preceding every ENIP TCP frame.
#[repr(C)]
#[derive(Debug, Default, Clone, PartialEq, ZFromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct EncapsulationHeader {
    pub command: U16<LittleEndian>,
    pub length: U16<LittleEndian>,
    pub session: U32<LittleEndian>,
    pub status: U32<LittleEndian>,
    pub sender_context: [u8; 8],
    pub options: U32<LittleEndian>,
}

impl EncapsulationHeader {
    pub fn from_bytes(buf: &[u8; ENIP_HEADER_LEN]) -> Result<Self> {
        Self::read_from_bytes(buf.as_slice())
            .map_err(|e| PlcError::Communication(format!("failed to read ENIP header: {e}")))
    }
}

/// A decoded (or to-be-sent) ENIP frame: header fields plus raw payload.
#[derive(Debug, Clone, PartialEq)]
pub struct EnipFrame {
    pub command: u16,
    pub session: u32,
    pub status: u32,
    pub sender_context: [u8; 8],
    pub options: u32,
    pub payload: Bytes,
}

impl EnipFrame {
    /// RegisterSession request. The session handle is zero until the PLC
    /// assigns one in the reply.
    pub fn register_session() -> Self {
        let mut payload = BytesMut::with_capacity(4);
        payload.extend_from_slice(&ENIP_PROTOCOL_VERSION.to_le_bytes());
        payload.extend_from_slice(&0u16.to_le_bytes());
        Self {
            command: CMD_REGISTER_SESSION,
            session: 0,
            status: 0,
            sender_context: [0; 8],
            options: 0,
            payload: payload.freeze(),
        }
    }

    /// SendRRData frame carrying a common packet.
    pub fn send_rr_data(session: u32, packet: &CommonPacket) -> Self {
        Self {
            command: CMD_SEND_RR_DATA,
            session,
            status: 0,
            sender_context: [0; 8],
            options: 0,
            payload: packet.to_bytes(),
        }
    }

    /// SendUnitData frame carrying a common packet.
    pub fn send_unit_data(session: u32, packet: &CommonPacket) -> Self {
        Self {
            command: CMD_SEND_UNIT_DATA,
            session,
            status: 0,
            sender_context: [0; 8],
            options: 0,
            payload: packet.to_bytes(),
        }
    }

    /// Rebuild a frame from the already-read header and payload bytes.
    pub fn from_parts(header: &EncapsulationHeader, payload: Bytes) -> Result<Self> {
        if payload.len() != header.length.get() as usize {
            return Err(PlcError::Communication(format!(
                "ENIP payload length mismatch: header says {}, got {}",
                header.length.get(),
                payload.len()
            )));
        }
        Ok(Self {
            command: header.command.get(),
            session: header.session.get(),
            status: header.status.get(),
            sender_context: header.sender_context,
            options: header.options.get(),
            payload,
        })
    }

    /// Decode a frame out of a contiguous buffer (header + payload).
    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let raw: &[u8] = r.take(ENIP_HEADER_LEN, "ENIP header")?;
        let mut header = [0u8; ENIP_HEADER_LEN];
        header.copy_from_slice(raw);
        let header = EncapsulationHeader::from_bytes(&header)?;
        let payload = r.take(header.length.get() as usize, "ENIP payload")?;
        Self::from_parts(&header, Bytes::copy_from_slice(payload))
    }

    /// The CPF payload of a SendRRData/SendUnitData frame.
    pub fn common_packet(&self) -> Result<CommonPacket> {
        match self.command {
            CMD_SEND_RR_DATA | CMD_SEND_UNIT_DATA => CommonPacket::decode(&self.payload),
            other => Err(PlcError::Communication(format!(
                "ENIP command 0x{other:04x} does not carry a common packet"
            ))),
        }
    }
}

impl Encode for EnipFrame {
    fn encoded_len(&self) -> usize {
        ENIP_HEADER_LEN + self.payload.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        let header = EncapsulationHeader {
            command: U16::new(self.command),
            length: U16::new(self.payload.len() as u16),
            session: U32::new(self.session),
            status: U32::new(self.status),
            sender_context: self.sender_context,
            options: U32::new(self.options),
        };
        buf.extend_from_slice(header.as_bytes());
        buf.extend_from_slice(&self.payload);
    }
}
