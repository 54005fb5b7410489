// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use enip_client_rs::{
    client::{client::PlcClient, common::IoTimeouts, transport::Transport},
    device::config::{
        AssemblyDefinition, AssemblyDirection, AssemblyMember, DeviceConfiguration,
        DeviceIdentity,
    },
    errors::PlcError,
    models::cip::status::CipStatus,
    runtime::IoRuntime,
    session::manager::SessionManager,
};

pub fn demo_configuration() -> DeviceConfiguration {
    DeviceConfiguration {
        identity: DeviceIdentity {
            name: Some("demo".to_string()),
            ..DeviceIdentity::default()
        },
        assemblies: vec![
            AssemblyDefinition {
                alias: "Inputs".to_string(),
                class_id: 0x04,
                instance_id: 0x64,
                direction: AssemblyDirection::Input,
                size: Some(8),
                members: vec![
                    AssemblyMember {
                        name: "conveyor".to_string(),
                        datatype: Some("UINT".to_string()),
                        offset: Some(0),
                        size: Some(2),
                        ..AssemblyMember::default()
                    },
                    AssemblyMember {
                        name: "tail".to_string(),
                        offset: Some(4),
                        size: Some(4),
                        ..AssemblyMember::default()
                    },
                    AssemblyMember {
                        name: "overflow".to_string(),
                        offset: Some(6),
                        size: Some(4),
                        ..AssemblyMember::default()
                    },
                ],
            },
            AssemblyDefinition {
                alias: "outputs".to_string(),
                class_id: 0x04,
                instance_id: 0x65,
                direction: AssemblyDirection::Output,
                size: Some(8),
                members: Vec::new(),
            },
            AssemblyDefinition {
                alias: "mirror".to_string(),
                class_id: 0x04,
                instance_id: 0x67,
                direction: AssemblyDirection::Bidirectional,
                size: None,
                members: Vec::new(),
            },
        ],
    }
}

fn loaded_runtime() -> IoRuntime {
    let runtime = IoRuntime::new();
    runtime.load(Arc::new(demo_configuration()));
    runtime
}

async fn offline_client() -> Result<PlcClient> {
    Ok(PlcClient::connect(
        "plc.local",
        44818,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    )
    .await?)
}

fn offline_manager() -> SessionManager {
    SessionManager::new(
        "plc.local",
        44818,
        2,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    )
}

#[test]
fn load_replaces_the_assembly_map() {
    let runtime = loaded_runtime();
    assert!(runtime.configured());

    let mut aliases = runtime.assemblies();
    aliases.sort();
    assert_eq!(aliases, vec!["inputs", "mirror", "outputs"]);

    let mut inputs = runtime.input_assemblies();
    inputs.sort();
    assert_eq!(inputs, vec!["inputs", "mirror"]);

    let mut outputs = runtime.output_assemblies();
    outputs.sort();
    assert_eq!(outputs, vec!["mirror", "outputs"]);

    runtime.clear();
    assert!(!runtime.configured());
    assert!(runtime.get_view("inputs").is_err());
}

#[test]
fn aliases_resolve_case_insensitively() {
    let runtime = loaded_runtime();
    let view = runtime.get_view("INPUTS").expect("alias must resolve");
    assert_eq!(view.alias, "Inputs");
    assert_eq!(view.class_id, 0x04);
    assert_eq!(view.direction, AssemblyDirection::Input);
}

#[test]
fn unknown_alias_is_not_registered() {
    let runtime = loaded_runtime();
    let err = runtime.get_view("ghost").expect_err("must fail");
    assert!(matches!(err, PlcError::RuntimeNotRegistered(_)));
}

#[tokio::test]
async fn fetch_updates_payload_words_and_members() -> Result<()> {
    let runtime = loaded_runtime();
    let manager = offline_manager();
    let mut client = offline_client().await?;

    let (data, status) = runtime.fetch(&manager, &mut client, "inputs").await?;
    assert_eq!(data.len(), 8);
    assert!(status.ok());

    let view = runtime.get_view("inputs")?;
    assert_eq!(view.payload.len(), 8);
    assert_eq!(view.word_values, vec![0, 0, 0, 0]);
    assert!(view.timestamp.is_some());
    // "overflow" reaches past the payload and is skipped; the two members
    // that fit decode to integers.
    assert_eq!(view.members.len(), 2);
    assert_eq!(view.members[0].name, "conveyor");
    assert_eq!(view.members[0].raw_hex, "0000");
    assert_eq!(view.members[0].int_value, Some(0));
    assert_eq!(view.members[1].name, "tail");
    Ok(())
}

#[tokio::test]
async fn fetch_without_declared_size_is_a_runtime_error() -> Result<()> {
    let runtime = loaded_runtime();
    let manager = offline_manager();
    let mut client = offline_client().await?;

    let err = runtime
        .fetch(&manager, &mut client, "mirror")
        .await
        .expect_err("must fail");
    assert!(matches!(err, PlcError::Runtime(_)));
    assert!(err.to_string().contains("does not define a payload size"));
    Ok(())
}

#[test]
fn queue_output_enforces_direction() {
    let runtime = loaded_runtime();
    let err = runtime
        .queue_output("inputs", Bytes::from_static(&[0u8; 8]))
        .expect_err("must fail");
    assert!(matches!(err, PlcError::RuntimeDirection(_)));
}

#[test]
fn queue_output_enforces_declared_size() {
    let runtime = loaded_runtime();
    let err = runtime
        .queue_output("outputs", Bytes::from_static(&[0u8; 3]))
        .expect_err("must fail");
    assert!(matches!(err, PlcError::Runtime(_)));
    assert!(err.to_string().contains("exactly 8 bytes"));

    // No declared size means any length is accepted.
    assert!(
        runtime
            .queue_output("mirror", Bytes::from_static(&[0u8; 3]))
            .is_ok()
    );
}

#[tokio::test]
async fn await_output_returns_none_on_timeout() -> Result<()> {
    let runtime = loaded_runtime();
    let pending = runtime
        .await_output("outputs", Duration::from_millis(50))
        .await?;
    assert!(pending.is_none());
    Ok(())
}

#[tokio::test]
async fn queued_outputs_dequeue_in_fifo_order() -> Result<()> {
    let runtime = loaded_runtime();
    let _first = runtime.queue_output("outputs", Bytes::from_static(&[1u8; 8]))?;
    let _second = runtime.queue_output("outputs", Bytes::from_static(&[2u8; 8]))?;

    let a = runtime
        .await_output("outputs", Duration::from_millis(50))
        .await?
        .expect("first request");
    let b = runtime
        .await_output("outputs", Duration::from_millis(50))
        .await?
        .expect("second request");
    assert_eq!(a.payload.as_ref(), &[1u8; 8]);
    assert_eq!(b.payload.as_ref(), &[2u8; 8]);
    Ok(())
}

#[tokio::test]
async fn completion_reaches_the_ticket() -> Result<()> {
    let runtime = loaded_runtime();
    let ticket = runtime.queue_output("outputs", Bytes::from_static(&[0u8; 8]))?;
    let request = runtime
        .await_output("outputs", Duration::from_millis(50))
        .await?
        .expect("queued request");

    request.complete(Ok(CipStatus::from_code(0)));
    let status = ticket.wait(Duration::from_millis(200)).await?;
    assert!(status.ok());
    Ok(())
}

#[tokio::test]
async fn ticket_times_out_without_a_consumer() -> Result<()> {
    let runtime = loaded_runtime();
    let ticket = runtime.queue_output("outputs", Bytes::from_static(&[0u8; 8]))?;
    let err = ticket
        .wait(Duration::from_millis(50))
        .await
        .expect_err("must time out");
    assert!(matches!(err, PlcError::Manager(_)));
    assert!(err.to_string().contains("Timed out waiting for output write"));
    Ok(())
}

#[tokio::test]
async fn send_output_updates_the_record() -> Result<()> {
    let runtime = loaded_runtime();
    let mut client = offline_client().await?;

    let payload = Bytes::from_static(&[0x11, 0x22, 0x33, 0x44, 0x55, 0x66, 0x77, 0x88]);
    let status = runtime.send_output(&mut client, "outputs", payload.clone()).await?;
    assert!(status.ok());

    let view = runtime.get_view("outputs")?;
    assert_eq!(view.payload, payload);
    assert_eq!(view.word_values, vec![0x2211, 0x4433, 0x6655, 0x8877]);
    Ok(())
}

/// One SendUnitData frame carrying service 0x4D goes out per write, and a
/// status-0 reply completes the exchange.
#[tokio::test]
async fn send_output_emits_one_unit_data_write() -> Result<()> {
    use crate::unit_tests::{
        ScriptServer, cip_reply, contains_bytes, register_reply, unit_reply,
    };

    let server = ScriptServer::start(vec![
        register_reply(0x90),
        unit_reply(0x90, 0xDEAD_BEEF, 1, &cip_reply(0x4D, 0, &[])),
    ])
    .await;
    let mut client = PlcClient::connect(
        "127.0.0.1",
        server.addr.port(),
        IoTimeouts::default(),
        Transport::Tcp,
    )
    .await?;
    client.enip_connid = 0xDEAD_BEEF;

    let runtime = loaded_runtime();
    let payload = Bytes::from_static(&[0x42; 8]);
    let status = runtime.send_output(&mut client, "outputs", payload).await?;
    assert!(status.ok());
    drop(client);

    let requests = server.finish().await;
    assert_eq!(requests.len(), 2, "register + exactly one unit-data write");
    let unit = &requests[1];
    // SendUnitData command in the encapsulation header.
    assert_eq!(&unit[..2], [0x70, 0x00]);
    // CIP write: service 0x4D against the outputs assembly path.
    assert!(contains_bytes(unit, &[0x4D, 0x02, 0x20, 0x04, 0x24, 0x65]));
    Ok(())
}

#[tokio::test]
async fn drain_pending_empties_the_queue() -> Result<()> {
    let runtime = loaded_runtime();
    let _t1 = runtime.queue_output("outputs", Bytes::from_static(&[0u8; 8]))?;
    let _t2 = runtime.queue_output("outputs", Bytes::from_static(&[1u8; 8]))?;

    let pending = runtime.drain_pending("outputs").await;
    assert_eq!(pending.len(), 2);
    assert!(
        runtime
            .await_output("outputs", Duration::from_millis(20))
            .await?
            .is_none()
    );
    Ok(())
}
