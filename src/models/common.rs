// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use bytes::BytesMut;

use crate::errors::{PlcError, Result};

/// Size of the fixed ENIP encapsulation header preceding every TCP frame.
pub const ENIP_HEADER_LEN: usize = 24;

/// Anything that can serialize itself into an outgoing wire buffer.
///
/// All multi-byte integers on the ENIP/CIP wire are little-endian; encoders
/// append to the buffer and never pad beyond what the protocol requires.
pub trait Encode {
    fn encoded_len(&self) -> usize;

    fn encode(&self, buf: &mut BytesMut);

    fn to_bytes(&self) -> bytes::Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode(&mut buf);
        buf.freeze()
    }
}

/// A forward-only reader over a received byte slice.
///
/// Decoders consume exactly what they need; running off the end of the slice
/// is a `Communication` error carrying the label of the field being read, so
/// a truncated body names the structure that failed rather than an offset.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize, label: &str) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(PlcError::Communication(format!(
                "truncated {label}: need {n} bytes, have {}",
                self.remaining()
            )));
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Consume the rest of the buffer.
    pub fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }

    pub fn u8(&mut self, label: &str) -> Result<u8> {
        Ok(self.take(1, label)?[0])
    }

    pub fn u16_le(&mut self, label: &str) -> Result<u16> {
        let b = self.take(2, label)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn u32_le(&mut self, label: &str) -> Result<u32> {
        let b = self.take(4, label)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }
}
