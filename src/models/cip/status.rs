// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::Serialize;

/// General status code meaning "partial transfer": the reply carries only a
/// prefix of the requested data and the request should be resumed.
pub const STATUS_PARTIAL_TRANSFER: u8 = 0x06;

/// CIP general status codes (volume 1, appendix B) this client can name.
static ERROR_CODES: Lazy<HashMap<u8, &'static str>> = Lazy::new(|| {
    HashMap::from([
        (0x00, "Success"),
        (0x01, "Connection failure"),
        (0x02, "Resource unavailable"),
        (0x03, "Invalid parameter value"),
        (0x04, "Path segment error"),
        (0x05, "Path destination unknown"),
        (0x06, "Partial transfer"),
        (0x07, "Connection lost"),
        (0x08, "Service not supported"),
        (0x09, "Invalid attribute value"),
        (0x0A, "Attribute list error"),
        (0x0B, "Already in requested mode/state"),
        (0x0C, "Object state conflict"),
        (0x0D, "Object already exists"),
        (0x0E, "Attribute not settable"),
        (0x0F, "Privilege violation"),
        (0x10, "Device state conflict"),
        (0x11, "Reply data too large"),
        (0x12, "Fragmentation of a primitive value"),
        (0x13, "Not enough data"),
        (0x14, "Attribute not supported"),
        (0x15, "Too much data"),
        (0x16, "Object does not exist"),
        (0x17, "Service fragmentation sequence not in progress"),
        (0x18, "No stored attribute data"),
        (0x19, "Store operation failure"),
        (0x1A, "Routing failure, request packet too large"),
        (0x1B, "Routing failure, response packet too large"),
        (0x1C, "Missing attribute list entry data"),
        (0x1D, "Invalid attribute value list"),
        (0x1E, "Embedded service error"),
        (0x1F, "Vendor specific error"),
        (0x20, "Invalid parameter"),
        (0x25, "Key failure in path"),
        (0x26, "Path size invalid"),
        (0x27, "Unexpected attribute in list"),
        (0x28, "Invalid member ID"),
        (0x29, "Member not settable"),
    ])
});

/// Information about the latest CIP response status.
///
/// `code` is absent when no response was available to inspect; a status is
/// `ok` when the code is zero or absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CipStatus {
    pub code: Option<u8>,
    pub message: Option<String>,
}

impl CipStatus {
    pub fn from_code(code: u8) -> Self {
        let message = ERROR_CODES
            .get(&code)
            .map(|m| (*m).to_string())
            .unwrap_or_else(|| format!("Unknown status 0x{code:02x}"));
        Self {
            code: Some(code),
            message: Some(message),
        }
    }

    pub fn ok(&self) -> bool {
        matches!(self.code, None | Some(0))
    }

    /// The status message, or a placeholder when none was recorded.
    pub fn message(&self) -> &str {
        self.message.as_deref().unwrap_or("no status recorded")
    }
}

impl std::fmt::Display for CipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.code {
            Some(code) => write!(f, "0x{code:02x} ({})", self.message()),
            None => f.write_str("none"),
        }
    }
}
