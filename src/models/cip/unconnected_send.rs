// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Connection Manager Unconnected Send (service 0x52) wrapper.
//!
//! The embedded request travels with its byte size, a pad byte when the size
//! is odd, and the route path to the target port.

use bytes::{Bytes, BytesMut};

use crate::models::{
    cip::{message::CipRequest, path::CipPath, service},
    common::Encode,
};

#[derive(Debug, Clone, PartialEq)]
pub struct UnconnectedSend {
    pub priority_time_tick: u8,
    pub timeout_ticks: u8,
    pub message: Bytes,
    /// Route path as (port, link) pairs; one hop by default.
    pub route: Vec<(u8, u8)>,
}

impl UnconnectedSend {
    pub fn wrap(request: &CipRequest) -> Self {
        Self {
            priority_time_tick: 0x0A,
            timeout_ticks: 0x0E,
            message: request.to_bytes(),
            route: vec![(0x01, 0x00)],
        }
    }

    pub fn into_cip(self) -> CipRequest {
        CipRequest::with_payload(
            service::UNCONNECTED_SEND,
            CipPath::connection_manager(),
            self.to_bytes(),
        )
    }
}

impl Encode for UnconnectedSend {
    fn encoded_len(&self) -> usize {
        4 + self.message.len() + self.message.len() % 2 + 2 + self.route.len() * 2
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.extend_from_slice(&[self.priority_time_tick, self.timeout_ticks]);
        buf.extend_from_slice(&(self.message.len() as u16).to_le_bytes());
        buf.extend_from_slice(&self.message);
        if self.message.len() % 2 != 0 {
            buf.extend_from_slice(&[0]);
        }
        buf.extend_from_slice(&[self.route.len() as u8, 0]);
        for (port, link) in &self.route {
            buf.extend_from_slice(&[*port, *link]);
        }
    }
}
