// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! ENIP UDP keep-alive pattern.
//!
//! PLCs with an established connected transport emit a periodic UDP frame of
//! this exact shape: a two-item common packet pairing a sequenced address
//! item (connection id + encapsulation sequence, both zero in the idle
//! pattern) with an empty-count connected data item. The core never sends
//! UDP traffic; the pattern is published so diagnostics can recognize and
//! report it.

/// Sequenced address item type id used by UDP implicit messaging.
pub const ITEM_SEQUENCED_ADDRESS: u16 = 0x8002;

/// The fixed keep-alive byte sequence.
pub const ENIP_UDP_KEEPALIVE: [u8; 20] = [
    0x02, 0x00, // item count
    0x02, 0x80, 0x08, 0x00, // sequenced address item, 8 bytes
    0x00, 0x00, 0x00, 0x00, // connection id
    0x00, 0x00, 0x00, 0x00, // encapsulation sequence
    0xB1, 0x00, 0x02, 0x00, // connected data item, 2 bytes
    0x00, 0x00, // sequence count
];

/// Hex rendering of the keep-alive pattern, as exposed by diagnostics.
pub fn keepalive_pattern_hex() -> String {
    hex::encode(ENIP_UDP_KEEPALIVE)
}
