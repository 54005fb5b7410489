// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use enip_client_rs::{
    client::{client::PlcClient, common::IoTimeouts, transport::Transport},
    models::{
        cip::{message::CipRequest, path::CipPath},
        common::Encode,
    },
};
use hex_literal::hex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};

use crate::unit_tests::{ScriptServer, cip_reply, contains_bytes, register_reply, rr_reply};

fn short_timeouts() -> IoTimeouts {
    IoTimeouts {
        connect: Duration::from_secs(2),
        read: Duration::from_millis(400),
        write: Duration::from_secs(2),
    }
}

async fn connect(server: &ScriptServer) -> Result<PlcClient> {
    Ok(PlcClient::connect(
        "127.0.0.1",
        server.addr.port(),
        short_timeouts(),
        Transport::Tcp,
    )
    .await?)
}

/// The session handle assigned by the RegisterSession reply is recorded and
/// used as the session field of the next request.
#[tokio::test]
async fn register_session_handle_is_echoed_in_requests() -> Result<()> {
    let server = ScriptServer::start(vec![
        register_reply(0x0000_0001),
        rr_reply(0x0000_0001, &cip_reply(0x0E, 0, &[])),
    ])
    .await;

    let mut client = connect(&server).await?;
    assert_eq!(client.session_id, 1);
    assert!(client.connected());

    let request = CipRequest::new(0x0E, CipPath::make(0x01, 0x01));
    client.send_rr_cip(&request).await?;
    let _ = client.recv_cip_response().await?;
    drop(client);

    let requests = server.finish().await;
    assert_eq!(requests.len(), 2);
    // Request 0 is RegisterSession with a zero session handle; request 1
    // must carry the assigned handle in header bytes 4..8.
    assert_eq!(&requests[1][4..8], 1u32.to_le_bytes());
    Ok(())
}

/// Any split of a valid frame into chunks reassembles to the same bytes.
#[tokio::test]
async fn recv_reassembles_chunked_frames() -> Result<()> {
    let reply = rr_reply(0x77, &cip_reply(0x4C, 0, &hex!("11223344")));
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;

    let chunks = [8usize, 4, 12, 1, 2];
    let reply_for_server = reply.clone();
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        // Swallow the RegisterSession request first.
        let mut buf = [0u8; 28];
        stream.read_exact(&mut buf).await.expect("register request");
        stream
            .write_all(&register_reply(0x77))
            .await
            .expect("register reply");

        let mut sent = 0usize;
        for chunk in chunks {
            let end = (sent + chunk).min(reply_for_server.len());
            stream
                .write_all(&reply_for_server[sent..end])
                .await
                .expect("chunk");
            stream.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(20)).await;
            sent = end;
        }
        stream
            .write_all(&reply_for_server[sent..])
            .await
            .expect("tail");
    });

    let mut client =
        PlcClient::connect("127.0.0.1", addr.port(), short_timeouts(), Transport::Tcp).await?;
    let frame = client.recv_enippkt().await?;
    assert_eq!(
        frame.to_bytes().as_ref(),
        &reply[..],
        "reassembled frame differs from the original bytes"
    );
    server.await?;
    Ok(())
}

/// A socket that goes away mid-header fails with a message naming the
/// header.
#[tokio::test]
async fn premature_close_during_header_names_header() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 28];
        stream.read_exact(&mut buf).await.expect("register request");
        stream
            .write_all(&register_reply(0x42))
            .await
            .expect("register reply");
        // 10 bytes of the next header, then FIN.
        stream.write_all(&[0u8; 10]).await.expect("partial header");
    });

    let mut client =
        PlcClient::connect("127.0.0.1", addr.port(), short_timeouts(), Transport::Tcp).await?;
    let err = client.recv_enippkt().await.expect_err("must fail");
    assert!(
        err.to_string()
            .contains("Socket closed while reading ENIP header"),
        "unexpected error: {err}"
    );
    server.await?;
    Ok(())
}

/// A socket that closes before the advertised payload arrives names the
/// payload.
#[tokio::test]
async fn premature_close_during_payload_names_payload() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 28];
        stream.read_exact(&mut buf).await.expect("register request");
        stream
            .write_all(&register_reply(0x42))
            .await
            .expect("register reply");
        let reply = rr_reply(0x42, &cip_reply(0x4C, 0, &hex!("aabbccdd")));
        // Full header plus only two payload bytes.
        stream.write_all(&reply[..26]).await.expect("partial frame");
    });

    let mut client =
        PlcClient::connect("127.0.0.1", addr.port(), short_timeouts(), Transport::Tcp).await?;
    let err = client.recv_enippkt().await.expect_err("must fail");
    assert!(
        err.to_string()
            .contains("Socket closed while reading ENIP payload"),
        "unexpected error: {err}"
    );
    server.await?;
    Ok(())
}

/// A silent peer trips the read timeout with a message naming the header
/// wait.
#[tokio::test]
async fn recv_timeout_names_the_wait() -> Result<()> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let server = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.expect("accept");
        let mut buf = [0u8; 28];
        stream.read_exact(&mut buf).await.expect("register request");
        stream
            .write_all(&register_reply(0x42))
            .await
            .expect("register reply");
        // Stay connected but silent for longer than the read timeout.
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let mut client =
        PlcClient::connect("127.0.0.1", addr.port(), short_timeouts(), Transport::Tcp).await?;
    let err = client.recv_enippkt().await.expect_err("must fail");
    assert!(
        err.to_string()
            .contains("Timed out while waiting for ENIP header"),
        "unexpected error: {err}"
    );
    server.abort();
    Ok(())
}

/// Unit data carries the forward-open connection id and a sequence counter
/// that starts at 1.
#[tokio::test]
async fn unit_data_uses_connection_id_and_sequence() -> Result<()> {
    let server = ScriptServer::start(vec![register_reply(0x10), register_reply(0)]).await;
    let mut client = connect(&server).await?;
    client.enip_connid = 0xDEAD_BEEF;

    let request = CipRequest::with_payload(
        0x4D,
        CipPath::make(0x04, 0x65),
        Bytes::from_static(&[0u8; 4]),
    );
    client.send_unit_cip(&request).await?;
    assert_eq!(client.sequence, 2);
    drop(client);

    let requests = server.finish().await;
    let unit = &requests[1];
    // CPF connected-address item body: EF BE AD DE.
    assert!(contains_bytes(unit, &hex!("a100 0400 efbeadde")));
    // Connected-packet item starts with sequence 01 00.
    assert!(contains_bytes(unit, &hex!("b100")));
    let b1_at = unit
        .windows(2)
        .position(|w| w == hex!("b100"))
        .expect("connected packet item");
    assert_eq!(&unit[b1_at + 4..b1_at + 6], hex!("0100"));
    Ok(())
}

/// Offline clients come up with fixed ids and refuse wire traffic.
#[tokio::test]
async fn offline_client_uses_fixed_ids() -> Result<()> {
    let mut client = PlcClient::connect(
        "plc.local",
        44818,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    )
    .await?;
    assert!(client.is_offline());
    assert!(client.connected());
    assert_eq!(client.session_id, 1);
    assert_eq!(client.enip_connid, 1);

    let request = CipRequest::new(0x0E, CipPath::make(0x01, 0x01));
    assert!(client.send_rr_cip(&request).await.is_err());
    Ok(())
}
