// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Get_Attribute_List / Set_Attribute_List payloads.

use bytes::{Bytes, BytesMut};

use crate::{
    errors::{PlcError, Result},
    models::{
        cip::{message::CipRequest, path::CipPath, service},
        common::{ByteReader, Encode},
    },
};

/// Request payload of Get_Attribute_List: attribute count + ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetAttributeList {
    pub attributes: Vec<u16>,
}

impl GetAttributeList {
    pub fn single(attribute_id: u16) -> Self {
        Self {
            attributes: vec![attribute_id],
        }
    }

    pub fn into_cip(self, path: CipPath) -> CipRequest {
        CipRequest::with_payload(service::GET_ATTRIBUTE_LIST, path, self.to_bytes())
    }
}

impl Encode for GetAttributeList {
    fn encoded_len(&self) -> usize {
        2 + self.attributes.len() * 2
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&(self.attributes.len() as u16).to_le_bytes());
        for attr in &self.attributes {
            buf.extend_from_slice(&attr.to_le_bytes());
        }
    }
}

/// Extract the value of a single-attribute Get_Attribute_List reply.
///
/// The reply payload must read `[01 00][attr LE][00 00]` followed by the raw
/// attribute value; any other shape is a response error.
pub fn decode_single_attribute(payload: &[u8], attribute_id: u16) -> Result<Bytes> {
    let mut r = ByteReader::new(payload);
    let count = r.u16_le("attribute count")?;
    if count != 1 {
        return Err(PlcError::response(
            format!("Get Attribute List reply carries {count} attributes, expected 1"),
            Default::default(),
        ));
    }
    let attr = r.u16_le("attribute id")?;
    if attr != attribute_id {
        return Err(PlcError::response(
            format!("Get Attribute List reply names attribute 0x{attr:x}, expected 0x{attribute_id:x}"),
            Default::default(),
        ));
    }
    let status = r.u16_le("attribute status")?;
    if status != 0 {
        return Err(PlcError::response(
            format!("Attribute 0x{attribute_id:x} read failed with status 0x{status:04x}"),
            Default::default(),
        ));
    }
    Ok(Bytes::copy_from_slice(r.rest()))
}

/// Request payload of Set_Attribute_List for one attribute: count = 1,
/// attribute id, raw value bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct SetAttributeList {
    pub attribute_id: u16,
    pub value: Bytes,
}

impl SetAttributeList {
    pub fn new(attribute_id: u16, value: impl Into<Bytes>) -> Self {
        Self {
            attribute_id,
            value: value.into(),
        }
    }

    pub fn into_cip(self, path: CipPath) -> CipRequest {
        CipRequest::with_payload(service::SET_ATTRIBUTE_LIST, path, self.to_bytes())
    }
}

impl Encode for SetAttributeList {
    fn encoded_len(&self) -> usize {
        4 + self.value.len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&self.attribute_id.to_le_bytes());
        buf.extend_from_slice(&self.value);
    }
}
