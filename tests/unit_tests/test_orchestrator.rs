// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use enip_client_rs::{
    client::{common::IoTimeouts, transport::Transport},
    errors::PlcError,
    models::{cip::path::CipPath, udp::ENIP_UDP_KEEPALIVE},
    orchestrator::{
        CommandTransport, OrchestratorSettings, SessionOrchestrator,
    },
    runtime::IoRuntime,
    session::manager::SessionManager,
};
use hex_literal::hex;

use crate::unit_tests::{ScriptServer, cip_reply, forward_open_reply, register_reply, unit_reply};
use super::test_runtime::demo_configuration;

fn fast_settings() -> OrchestratorSettings {
    OrchestratorSettings {
        poll_interval: Duration::from_millis(20),
        dispatch_timeout: Duration::from_millis(25),
        output_timeout: Duration::from_millis(500),
        worker_join_timeout: Duration::from_millis(500),
    }
}

fn offline_orchestrator() -> SessionOrchestrator {
    let manager = Arc::new(SessionManager::new(
        "plc.local",
        44818,
        4,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    ));
    SessionOrchestrator::new(manager, Arc::new(IoRuntime::new()), fast_settings())
}

#[tokio::test]
async fn session_lifecycle_and_unknown_session_errors() -> Result<()> {
    let orchestrator = offline_orchestrator();
    let info = orchestrator.start_session(None, None).await?;
    assert!(info.connection.connected);
    assert!(!info.session_id.is_empty());

    let status = orchestrator.get_status(&info.session_id)?;
    assert!(status.connected);

    let closed = orchestrator.stop_session(&info.session_id).await?;
    assert!(!closed.connected);
    assert!(closed.last_status.ok());

    // Destruction is idempotent only through the error.
    let err = orchestrator
        .stop_session(&info.session_id)
        .await
        .expect_err("second stop must fail");
    assert!(matches!(err, PlcError::Manager(_)));
    assert!(err.to_string().contains("Unknown session"));
    Ok(())
}

#[tokio::test]
async fn diagnostics_expose_keepalive_pattern_and_freshness() -> Result<()> {
    let orchestrator = offline_orchestrator();
    let info = orchestrator.start_session(None, None).await?;

    let diagnostics = orchestrator.get_diagnostics(&info.session_id)?;
    assert_eq!(diagnostics.session_id, info.session_id);
    assert_eq!(
        diagnostics.keep_alive_pattern_hex,
        hex::encode(ENIP_UDP_KEEPALIVE)
    );
    assert!(diagnostics.keep_alive_active);
    assert!(diagnostics.connection.last_status.ok());

    // Activity timestamps move forward with operations.
    let before = diagnostics.last_activity_at;
    tokio::time::sleep(Duration::from_millis(10)).await;
    orchestrator.get_status(&info.session_id)?;
    let after = orchestrator.get_diagnostics(&info.session_id)?.last_activity_at;
    assert!(after >= before);

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

#[tokio::test]
async fn read_assembly_updates_session_status() -> Result<()> {
    let orchestrator = offline_orchestrator();
    let info = orchestrator.start_session(None, None).await?;

    let snapshot = orchestrator
        .read_assembly(&info.session_id, 0x04, 0x64, 4)
        .await?;
    assert_eq!(snapshot.data.len(), 4);
    assert!(snapshot.last_status.ok());

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

#[tokio::test]
async fn write_attribute_reaches_the_fixture_store() -> Result<()> {
    let orchestrator = offline_orchestrator();
    let info = orchestrator.start_session(None, None).await?;

    let status = orchestrator
        .write_attribute(
            &info.session_id,
            CipPath::make(0x04, 0x64),
            0x03,
            Bytes::from_static(&hex!("2000")),
        )
        .await?;
    assert!(status.ok());

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

/// With a configuration applied, queued output writes are picked up by the
/// dispatch worker and complete with the write status.
#[tokio::test]
async fn write_assembly_completes_through_the_dispatch_worker() -> Result<()> {
    let orchestrator = offline_orchestrator();
    orchestrator
        .apply_configuration(Arc::new(demo_configuration()))
        .await?;
    let info = orchestrator.start_session(None, None).await?;

    let payload = Bytes::from_static(&[0xAB; 8]);
    let status = orchestrator
        .write_assembly(&info.session_id, "outputs", payload.clone())
        .await?;
    assert!(status.ok());

    let view = orchestrator.get_assembly_state(&info.session_id, "outputs")?;
    assert_eq!(view.payload, payload);

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

#[tokio::test]
async fn poll_workers_refresh_input_assemblies() -> Result<()> {
    let orchestrator = offline_orchestrator();
    orchestrator
        .apply_configuration(Arc::new(demo_configuration()))
        .await?;
    let info = orchestrator.start_session(None, None).await?;

    // Give the poll worker a few rounds.
    tokio::time::sleep(Duration::from_millis(120)).await;
    let view = orchestrator.get_assembly_state(&info.session_id, "inputs")?;
    assert!(view.timestamp.is_some(), "poll worker must have fetched");
    assert_eq!(view.payload.len(), 8);

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

#[tokio::test]
async fn write_assembly_enforces_direction() -> Result<()> {
    let orchestrator = offline_orchestrator();
    orchestrator
        .apply_configuration(Arc::new(demo_configuration()))
        .await?;
    let info = orchestrator.start_session(None, None).await?;

    let err = orchestrator
        .write_assembly(&info.session_id, "inputs", Bytes::from_static(&[0u8; 8]))
        .await
        .expect_err("input-only alias must reject writes");
    assert!(matches!(err, PlcError::RuntimeDirection(_)));

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

/// Without a dispatch worker the ticket never completes and the write
/// surfaces the manager timeout.
#[tokio::test]
async fn write_assembly_times_out_without_workers() -> Result<()> {
    let orchestrator = offline_orchestrator();
    // Session first: no configuration is loaded, so no workers spawn.
    let info = orchestrator.start_session(None, None).await?;
    orchestrator.runtime().load(Arc::new(demo_configuration()));

    let err = orchestrator
        .write_assembly(&info.session_id, "outputs", Bytes::from_static(&[0u8; 8]))
        .await
        .expect_err("must time out");
    assert!(err.to_string().contains("Timed out waiting for output write"));

    orchestrator.stop_session(&info.session_id).await?;
    Ok(())
}

#[test]
fn transport_names_parse_or_fail() {
    assert_eq!("rr".parse::<CommandTransport>().ok(), Some(CommandTransport::Rr));
    assert_eq!(
        "rr_cm".parse::<CommandTransport>().ok(),
        Some(CommandTransport::RrCm)
    );
    assert_eq!(
        "rr_mr".parse::<CommandTransport>().ok(),
        Some(CommandTransport::RrMr)
    );
    assert_eq!(
        "unit".parse::<CommandTransport>().ok(),
        Some(CommandTransport::Unit)
    );
    let err = "smoke".parse::<CommandTransport>().expect_err("must fail");
    assert!(err.to_string().contains("Unsupported transport 'smoke'"));
}

/// Two sessions against two scripted PLCs: one forward open each, then a
/// command on each in parallel with independent sequence counters.
#[tokio::test]
async fn parallel_sessions_are_isolated() -> Result<()> {
    let script = |session: u32| {
        vec![
            register_reply(session),
            forward_open_reply(session, 0x1000_0000 | session),
            unit_reply(session, 0x1000_0000 | session, 1, &cip_reply(0x4D, 0, &[])),
        ]
    };
    let server_a = ScriptServer::start(script(0xA)).await;
    let server_b = ScriptServer::start(script(0xB)).await;

    let manager = Arc::new(SessionManager::new(
        "127.0.0.1",
        44818,
        2,
        IoTimeouts {
            connect: Duration::from_secs(2),
            read: Duration::from_millis(800),
            write: Duration::from_secs(2),
        },
        Transport::Tcp,
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        manager,
        Arc::new(IoRuntime::new()),
        fast_settings(),
    ));

    let a = orchestrator
        .start_session(Some("127.0.0.1"), Some(server_a.addr.port()))
        .await?;
    let b = orchestrator
        .start_session(Some("127.0.0.1"), Some(server_b.addr.port()))
        .await?;
    assert_ne!(a.session_id, b.session_id);
    assert_eq!(a.connection.enip_connection_id, 0x1000_000A);
    assert_eq!(b.connection.enip_connection_id, 0x1000_000B);

    let command = |id: String| {
        let orchestrator = Arc::clone(&orchestrator);
        async move {
            orchestrator
                .send_command(
                    &id,
                    0x4D,
                    CipPath::make(0x04, 0x65),
                    Bytes::new(),
                    CommandTransport::Unit,
                )
                .await
        }
    };
    let (ra, rb) = tokio::join!(command(a.session_id.clone()), command(b.session_id.clone()));
    assert!(ra?.status.ok());
    assert!(rb?.status.ok());

    let requests_a = server_a.finish().await;
    let requests_b = server_b.finish().await;
    // Exactly one Forward Open per session, and each unit-data exchange
    // opens with sequence 1.
    let forward_opens = |reqs: &[Vec<u8>]| {
        reqs.iter()
            .filter(|r| crate::unit_tests::contains_bytes(r, &hex!("54 02 2006 2401")))
            .count()
    };
    assert_eq!(forward_opens(&requests_a), 1);
    assert_eq!(forward_opens(&requests_b), 1);
    assert!(crate::unit_tests::contains_bytes(&requests_a[2], &hex!("b100")));
    let seq_of = |req: &[u8]| {
        let at = req
            .windows(2)
            .position(|w| w == hex!("b100"))
            .expect("connected packet");
        u16::from_le_bytes([req[at + 4], req[at + 5]])
    };
    assert_eq!(seq_of(&requests_a[2]), 1);
    assert_eq!(seq_of(&requests_b[2]), 1);
    Ok(())
}
