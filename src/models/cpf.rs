// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Common Packet Format carried by SendRRData / SendUnitData.
//!
//! The payload is a 4-byte interface handle and a 2-byte timeout, followed by
//! an item count and `count` address/data items.

use bytes::{Bytes, BytesMut};

use crate::{
    errors::{PlcError, Result},
    models::common::{ByteReader, Encode},
};

pub const ITEM_NULL_ADDRESS: u16 = 0x0000;
pub const ITEM_CONNECTED_ADDRESS: u16 = 0x00A1;
pub const ITEM_CONNECTED_PACKET: u16 = 0x00B1;
pub const ITEM_UNCONNECTED_DATA: u16 = 0x00B2;

#[derive(Debug, Clone, PartialEq)]
pub enum CpfItem {
    NullAddress,
    ConnectedAddress { connection_id: u32 },
    ConnectedPacket { sequence: u16, body: Bytes },
    UnconnectedData { body: Bytes },
    /// Item types this client does not interpret are carried verbatim.
    Other { type_id: u16, body: Bytes },
}

impl CpfItem {
    fn body_len(&self) -> usize {
        match self {
            Self::NullAddress => 0,
            Self::ConnectedAddress { .. } => 4,
            Self::ConnectedPacket { body, .. } => 2 + body.len(),
            Self::UnconnectedData { body } => body.len(),
            Self::Other { body, .. } => body.len(),
        }
    }

    fn type_id(&self) -> u16 {
        match self {
            Self::NullAddress => ITEM_NULL_ADDRESS,
            Self::ConnectedAddress { .. } => ITEM_CONNECTED_ADDRESS,
            Self::ConnectedPacket { .. } => ITEM_CONNECTED_PACKET,
            Self::UnconnectedData { .. } => ITEM_UNCONNECTED_DATA,
            Self::Other { type_id, .. } => *type_id,
        }
    }

    fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let type_id = r.u16_le("CPF item type")?;
        let length = r.u16_le("CPF item length")? as usize;
        let body = r.take(length, "CPF item body")?;
        Ok(match type_id {
            ITEM_NULL_ADDRESS => Self::NullAddress,
            ITEM_CONNECTED_ADDRESS => {
                let mut br = ByteReader::new(body);
                Self::ConnectedAddress {
                    connection_id: br.u32_le("connection id")?,
                }
            }
            ITEM_CONNECTED_PACKET => {
                let mut br = ByteReader::new(body);
                let sequence = br.u16_le("connected packet sequence")?;
                Self::ConnectedPacket {
                    sequence,
                    body: Bytes::copy_from_slice(br.rest()),
                }
            }
            ITEM_UNCONNECTED_DATA => Self::UnconnectedData {
                body: Bytes::copy_from_slice(body),
            },
            other => Self::Other {
                type_id: other,
                body: Bytes::copy_from_slice(body),
            },
        })
    }
}

/// Interface handle + timeout + item list.
#[derive(Debug, Clone, PartialEq)]
pub struct CommonPacket {
    pub interface_handle: u32,
    pub timeout: u16,
    pub items: Vec<CpfItem>,
}

impl CommonPacket {
    pub fn new(items: Vec<CpfItem>) -> Self {
        Self {
            interface_handle: 0,
            timeout: 0,
            items,
        }
    }

    /// Null address + unconnected data, the request/reply shape.
    pub fn unconnected(cip: Bytes) -> Self {
        Self::new(vec![CpfItem::NullAddress, CpfItem::UnconnectedData { body: cip }])
    }

    /// Connected address + connected packet, the unit-data shape.
    pub fn connected(connection_id: u32, sequence: u16, cip: Bytes) -> Self {
        Self::new(vec![
            CpfItem::ConnectedAddress { connection_id },
            CpfItem::ConnectedPacket { sequence, body: cip },
        ])
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        let mut r = ByteReader::new(buf);
        let interface_handle = r.u32_le("CPF interface handle")?;
        let timeout = r.u16_le("CPF timeout")?;
        let count = r.u16_le("CPF item count")? as usize;
        let mut items = Vec::with_capacity(count);
        for _ in 0..count {
            items.push(CpfItem::decode(&mut r)?);
        }
        Ok(Self {
            interface_handle,
            timeout,
            items,
        })
    }

    /// The CIP body carried by this packet, from either the unconnected-data
    /// or the connected-packet item.
    pub fn cip_body(&self) -> Result<&Bytes> {
        for item in &self.items {
            match item {
                CpfItem::UnconnectedData { body } => return Ok(body),
                CpfItem::ConnectedPacket { body, .. } => return Ok(body),
                _ => {}
            }
        }
        Err(PlcError::Communication(
            "common packet carries no CIP data item".into(),
        ))
    }
}

impl Encode for CommonPacket {
    fn encoded_len(&self) -> usize {
        4 + 2 + 2 + self.items.iter().map(|i| 4 + i.body_len()).sum::<usize>()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&self.interface_handle.to_le_bytes());
        buf.extend_from_slice(&self.timeout.to_le_bytes());
        buf.extend_from_slice(&(self.items.len() as u16).to_le_bytes());
        for item in &self.items {
            buf.extend_from_slice(&item.type_id().to_le_bytes());
            buf.extend_from_slice(&(item.body_len() as u16).to_le_bytes());
            match item {
                CpfItem::NullAddress => {}
                CpfItem::ConnectedAddress { connection_id } => {
                    buf.extend_from_slice(&connection_id.to_le_bytes());
                }
                CpfItem::ConnectedPacket { sequence, body } => {
                    buf.extend_from_slice(&sequence.to_le_bytes());
                    buf.extend_from_slice(body);
                }
                CpfItem::UnconnectedData { body } | CpfItem::Other { body, .. } => {
                    buf.extend_from_slice(body);
                }
            }
        }
    }
}
