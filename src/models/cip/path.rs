// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! CIP logical paths.
//!
//! A path is an ordered sequence of logical segments, each addressing one
//! level of the object model. Identifiers up to 0xFF use the 2-byte segment
//! form; larger identifiers use the 4-byte form with a pad byte:
//!
//! ```text
//! 8-bit:   [tag      , id      ]
//! 16-bit:  [tag | 01 , 00 , id_lo , id_hi]
//! ```
//!
//! On the wire a path is prefixed by its size in 16-bit words.

use bytes::BytesMut;

use crate::{
    errors::{PlcError, Result},
    models::common::{ByteReader, Encode},
};

const SEG_CLASS: u8 = 0x20;
const SEG_INSTANCE: u8 = 0x24;
const SEG_MEMBER: u8 = 0x28;
const SEG_ATTRIBUTE: u8 = 0x30;
const SEG_16BIT: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Class,
    Instance,
    Member,
    Attribute,
}

impl SegmentKind {
    fn tag(self) -> u8 {
        match self {
            Self::Class => SEG_CLASS,
            Self::Instance => SEG_INSTANCE,
            Self::Member => SEG_MEMBER,
            Self::Attribute => SEG_ATTRIBUTE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathSegment {
    pub kind: SegmentKind,
    pub value: u16,
}

/// An encoded-or-decoded CIP path.
///
/// `Raw` carries pre-encoded path bytes for the handful of fixed paths the
/// protocol uses (connection paths embedding port segments); `Logical` is
/// the usual class/instance/member/attribute form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CipPath {
    Logical(Vec<PathSegment>),
    Raw(Vec<u8>),
}

impl CipPath {
    pub fn make(class_id: u16, instance_id: u16) -> Self {
        Self::Logical(vec![
            PathSegment {
                kind: SegmentKind::Class,
                value: class_id,
            },
            PathSegment {
                kind: SegmentKind::Instance,
                value: instance_id,
            },
        ])
    }

    pub fn with_member(mut self, member_id: u16) -> Self {
        if let Self::Logical(segments) = &mut self {
            segments.push(PathSegment {
                kind: SegmentKind::Member,
                value: member_id,
            });
        }
        self
    }

    pub fn with_attribute(mut self, attribute_id: u16) -> Self {
        if let Self::Logical(segments) = &mut self {
            segments.push(PathSegment {
                kind: SegmentKind::Attribute,
                value: attribute_id,
            });
        }
        self
    }

    /// A pre-encoded path. The byte length must be even.
    pub fn raw(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Raw(bytes.into())
    }

    /// Message Router object, the target of multiple-service packets.
    pub fn message_router() -> Self {
        Self::make(0x02, 0x01)
    }

    /// Connection Manager object, the target of forward open/close and
    /// unconnected sends.
    pub fn connection_manager() -> Self {
        Self::make(0x06, 0x01)
    }

    fn path_bytes(&self) -> Vec<u8> {
        match self {
            Self::Raw(bytes) => bytes.clone(),
            Self::Logical(segments) => {
                let mut out = Vec::with_capacity(segments.len() * 4);
                for seg in segments {
                    if seg.value <= 0xFF {
                        out.push(seg.kind.tag());
                        out.push(seg.value as u8);
                    } else {
                        out.push(seg.kind.tag() | SEG_16BIT);
                        out.push(0);
                        out.extend_from_slice(&seg.value.to_le_bytes());
                    }
                }
                out
            }
        }
    }

    /// Size of the encoded path in 16-bit words.
    pub fn word_count(&self) -> u8 {
        (self.path_bytes().len() / 2) as u8
    }

    /// Class and instance ids of a logical path, when both are present.
    pub fn class_instance(&self) -> Option<(u16, u16)> {
        let Self::Logical(segments) = self else {
            return None;
        };
        let mut class = None;
        let mut instance = None;
        for seg in segments {
            match seg.kind {
                SegmentKind::Class => class = Some(seg.value),
                SegmentKind::Instance => instance = Some(seg.value),
                _ => {}
            }
        }
        Some((class?, instance?))
    }

    /// Decode a word-count-prefixed path.
    pub fn decode(r: &mut ByteReader<'_>) -> Result<Self> {
        let words = r.u8("path word count")? as usize;
        let bytes = r.take(words * 2, "path segments")?;
        let mut sr = ByteReader::new(bytes);
        let mut segments = Vec::new();
        while !sr.is_empty() {
            let tag = sr.u8("segment tag")?;
            let kind = match tag & !SEG_16BIT {
                SEG_CLASS => SegmentKind::Class,
                SEG_INSTANCE => SegmentKind::Instance,
                SEG_MEMBER => SegmentKind::Member,
                SEG_ATTRIBUTE => SegmentKind::Attribute,
                // Port or symbolic segments: keep the whole path verbatim.
                _ => return Ok(Self::Raw(bytes.to_vec())),
            };
            let value = if tag & SEG_16BIT != 0 {
                let _pad = sr.u8("segment pad")?;
                sr.u16_le("segment value")?
            } else {
                u16::from(sr.u8("segment value")?)
            };
            segments.push(PathSegment { kind, value });
        }
        Ok(Self::Logical(segments))
    }
}

impl Encode for CipPath {
    fn encoded_len(&self) -> usize {
        1 + self.path_bytes().len()
    }

    fn encode(&self, buf: &mut BytesMut) {
        let bytes = self.path_bytes();
        debug_assert_eq!(bytes.len() % 2, 0, "CIP path bytes must be word-aligned");
        buf.extend_from_slice(&[(bytes.len() / 2) as u8]);
        buf.extend_from_slice(&bytes);
    }
}

impl std::fmt::Display for CipPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.class_instance() {
            Some((class, instance)) => write!(f, "0x{class:02x}/0x{instance:02x}"),
            None => {
                for b in self.path_bytes() {
                    write!(f, "{b:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// Parse a `class/instance` (or `class:instance`) textual path, accepting
/// `0x`-prefixed hexadecimal and decimal forms.
pub fn parse_class_instance(text: &str) -> Result<(u16, u16)> {
    let token = text.trim();
    let parts: Vec<&str> = if token.contains('/') {
        token.splitn(2, '/').collect()
    } else if token.contains(':') {
        token.splitn(2, ':').collect()
    } else {
        return Err(PlcError::Manager(format!(
            "Unknown assembly alias '{text}'"
        )));
    };
    let parse = |s: &str| -> Result<u16> {
        let s = s.trim();
        let (digits, radix) = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(rest) => (rest, 16),
            None => (s, 10),
        };
        u16::from_str_radix(digits, radix)
            .map_err(|_| PlcError::Manager(format!("Invalid assembly identifier '{text}'")))
    };
    Ok((parse(parts[0])?, parse(parts[1])?))
}
