// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use anyhow::Result;
use bytes::Bytes;
use enip_client_rs::{
    client::{client::PlcClient, common::IoTimeouts, transport::{FixtureStore, Transport}},
    session::manager::SessionManager,
};
use hex_literal::hex;

async fn offline_client() -> Result<PlcClient> {
    Ok(PlcClient::connect(
        "plc.local",
        44818,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    )
    .await?)
}

fn manager() -> SessionManager {
    SessionManager::new(
        "plc.local",
        44818,
        2,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    )
}

/// Fixture-backed attribute read, then a write that the next read observes.
#[tokio::test]
async fn get_set_get_round_trip() -> Result<()> {
    let manager = manager();
    let mut client = offline_client().await?;

    let value = manager.get_attribute(&mut client, 0x04, 0x64, 0x03).await?;
    assert_eq!(value.as_ref(), hex!("1000"));

    let status = manager
        .set_attribute(&mut client, 0x04, 0x64, 0x03, Bytes::from_static(&hex!("2000")))
        .await?;
    assert!(status.ok());

    let value = manager.get_attribute(&mut client, 0x04, 0x64, 0x03).await?;
    assert_eq!(value.as_ref(), hex!("2000"));
    Ok(())
}

#[tokio::test]
async fn missing_fixture_attribute_is_a_runtime_error() -> Result<()> {
    let manager = manager();
    let mut client = offline_client().await?;
    let err = manager
        .get_attribute(&mut client, 0x04, 0x64, 0x77)
        .await
        .expect_err("must fail");
    assert!(err.to_string().contains("unavailable"));
    Ok(())
}

#[tokio::test]
async fn forward_open_and_close_use_fixed_ids() -> Result<()> {
    let manager = manager();
    let mut client = offline_client().await?;

    let status = manager.start_session(&mut client).await?;
    assert!(status.connected);
    assert_eq!(status.enip_connection_id, 1);
    assert!(status.last_status.ok());

    let status = manager.stop_session(&mut client).await?;
    assert!(status.ok());
    Ok(())
}

#[tokio::test]
async fn tag_reads_return_zero_filled_payloads() -> Result<()> {
    let manager = manager();
    let mut client = offline_client().await?;
    let (data, status) = manager.read_full_tag(&mut client, 0x04, 0x64, 16).await?;
    assert_eq!(data.as_ref(), &[0u8; 16]);
    assert!(status.ok());
    Ok(())
}

#[tokio::test]
async fn instance_list_reflects_registered_fixtures() -> Result<()> {
    let manager = manager();
    let mut client = offline_client().await?;
    let instances = manager.get_list_of_instances(&mut client, 0x04).await?;
    assert_eq!(instances, vec![0x64, 0x65, 0x66]);
    Ok(())
}

#[test]
fn fixture_store_register_replaces_attributes() {
    let mut store = FixtureStore::new();
    store.register(0x04, 0x64, [(0x03u16, vec![0x10, 0x00]), (0x04, vec![0x00, 0x00])]);
    assert_eq!(
        store.get(0x04, 0x64, 0x03).expect("registered").as_ref(),
        hex!("1000")
    );

    store.register(0x04, 0x64, [(0x09u16, vec![0x05, 0x00])]);
    assert!(store.get(0x04, 0x64, 0x03).is_none(), "register replaces");
    assert!(store.get(0x04, 0x64, 0x09).is_some());

    store.clear();
    assert!(store.is_empty());
}
