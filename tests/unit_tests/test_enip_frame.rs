// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use bytes::Bytes;
use enip_client_rs::models::{
    common::Encode,
    cpf::{CommonPacket, CpfItem},
    enip::{CMD_SEND_RR_DATA, CMD_SEND_UNIT_DATA, EnipFrame},
    udp::{ENIP_UDP_KEEPALIVE, keepalive_pattern_hex},
};
use hex_literal::hex;

use crate::unit_tests::enip_frame;

#[test]
fn register_session_bytes_are_exact() {
    let frame = EnipFrame::register_session();
    let encoded = frame.to_bytes();
    assert_eq!(
        encoded.as_ref(),
        hex!(
            "6500 0400 00000000 00000000 0000000000000000 00000000" // header
            "0100 0000" // protocol version 1, options 0
        )
    );
}

#[test]
fn rr_data_frame_round_trips() -> Result<()> {
    let cip = Bytes::from_static(&hex!("0e 02 20 04 24 64"));
    let packet = CommonPacket::unconnected(cip);
    let frame = EnipFrame::send_rr_data(0x1234_5678, &packet);

    let encoded = frame.to_bytes();
    let decoded = EnipFrame::decode(&encoded)?;
    assert_eq!(decoded, frame);
    assert_eq!(decoded.command, CMD_SEND_RR_DATA);
    assert_eq!(decoded.session, 0x1234_5678);

    let items = decoded.common_packet()?.items;
    assert_eq!(items.len(), 2);
    assert!(matches!(items[0], CpfItem::NullAddress));
    Ok(())
}

#[test]
fn unit_data_frame_round_trips() -> Result<()> {
    let cip = Bytes::from_static(&hex!("4d 02 20 04 24 65 aabb"));
    let packet = CommonPacket::connected(0xDEAD_BEEF, 7, cip.clone());
    let frame = EnipFrame::send_unit_data(1, &packet);

    let decoded = EnipFrame::decode(&frame.to_bytes())?;
    assert_eq!(decoded.command, CMD_SEND_UNIT_DATA);
    let packet = decoded.common_packet()?;
    match &packet.items[..] {
        [
            CpfItem::ConnectedAddress { connection_id },
            CpfItem::ConnectedPacket { sequence, body },
        ] => {
            assert_eq!(*connection_id, 0xDEAD_BEEF);
            assert_eq!(*sequence, 7);
            assert_eq!(body, &cip);
        }
        other => panic!("unexpected CPF layout: {other:?}"),
    }
    assert_eq!(packet.cip_body()?, &cip);
    Ok(())
}

#[test]
fn decode_matches_hand_rolled_frames() -> Result<()> {
    let raw = enip_frame(0x006F, 0xA1B2_C3D4, &hex!("00000000 0000 0000"));
    let frame = EnipFrame::decode(&raw)?;
    assert_eq!(frame.command, 0x006F);
    assert_eq!(frame.session, 0xA1B2_C3D4);
    assert_eq!(frame.to_bytes().as_ref(), &raw[..]);
    Ok(())
}

#[test]
fn truncated_payload_is_a_communication_error() {
    let mut raw = enip_frame(0x006F, 1, &[0u8; 8]);
    raw.truncate(28);
    let err = EnipFrame::decode(&raw).expect_err("must fail");
    assert!(err.to_string().contains("ENIP payload"));
}

#[test]
fn keepalive_pattern_is_published_as_hex() {
    let pattern = keepalive_pattern_hex();
    assert_eq!(pattern, hex::encode(ENIP_UDP_KEEPALIVE));
    assert!(pattern.starts_with("0200"));
    assert_eq!(pattern.len(), ENIP_UDP_KEEPALIVE.len() * 2);
}
