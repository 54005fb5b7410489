// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! A single ENIP session over one TCP stream.
//!
//! The client owns the socket and the per-session wire state (session
//! handle, connected-transport id, unit-data sequence counter). Every
//! request/response exchange is strictly serialized: all methods take
//! `&mut self`, and callers reach a client only through the session's lock,
//! so a poll worker, a dispatch worker and an API call can never interleave
//! on the wire.

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
    time::timeout,
};
use tracing::{debug, warn};

use crate::{
    errors::{PlcError, Result},
    models::{
        cip::{
            message::{CipRequest, CipResponse},
            multiple_service::MultipleServicePacket,
            unconnected_send::UnconnectedSend,
        },
        common::{ENIP_HEADER_LEN, Encode},
        cpf::CommonPacket,
        enip::{CMD_REGISTER_SESSION, EncapsulationHeader, EnipFrame},
    },
};

use super::{
    common::{IoTimeouts, io_with_timeout},
    transport::{FixtureStore, Transport},
};

/// Session and connection ids reported by offline clients.
const OFFLINE_ID: u32 = 1;

#[derive(Debug)]
enum Link {
    Tcp(TcpStream),
    Offline(FixtureStore),
}

/// Handle for all the state of an EtherNet/IP session with a PLC.
#[derive(Debug)]
pub struct PlcClient {
    link: Link,
    host: String,
    port: u16,
    timeouts: IoTimeouts,
    /// ENIP session handle assigned by the RegisterSession reply.
    pub session_id: u32,
    /// O→T network connection id assigned by the Forward Open reply.
    pub enip_connid: u32,
    /// Unit-data sequence counter, monotonically increasing from 1.
    pub sequence: u16,
}

impl PlcClient {
    /// Open the transport and register an ENIP session.
    pub async fn connect(
        host: &str,
        port: u16,
        timeouts: IoTimeouts,
        transport: Transport,
    ) -> Result<Self> {
        let mut client = match transport {
            Transport::Offline(store) => Self {
                link: Link::Offline(store),
                host: host.to_string(),
                port,
                timeouts,
                session_id: OFFLINE_ID,
                enip_connid: OFFLINE_ID,
                sequence: 1,
            },
            Transport::Tcp => {
                let stream = match timeout(timeouts.connect, TcpStream::connect((host, port))).await
                {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        warn!("socket error: {e}");
                        return Err(PlcError::Connection(format!(
                            "Failed to open PLC socket {host}:{port}: {e}"
                        )));
                    }
                    Err(_) => {
                        return Err(PlcError::Connection(format!(
                            "Timed out while connecting to {host}:{port}"
                        )));
                    }
                };
                stream.set_nodelay(true)?;
                Self {
                    link: Link::Tcp(stream),
                    host: host.to_string(),
                    port,
                    timeouts,
                    session_id: 0,
                    enip_connid: 0,
                    sequence: 1,
                }
            }
        };

        if !client.is_offline() {
            client.register_session().await?;
        }
        Ok(client)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Construction only succeeds with an established transport, so a live
    /// client is always connected.
    pub fn connected(&self) -> bool {
        true
    }

    pub fn is_offline(&self) -> bool {
        matches!(self.link, Link::Offline(_))
    }

    /// The fixture store of an offline client.
    pub fn offline_store(&self) -> Option<&FixtureStore> {
        match &self.link {
            Link::Offline(store) => Some(store),
            Link::Tcp(_) => None,
        }
    }

    pub fn offline_store_mut(&mut self) -> Option<&mut FixtureStore> {
        match &mut self.link {
            Link::Offline(store) => Some(store),
            Link::Tcp(_) => None,
        }
    }

    /// Open an Ethernet/IP session: RegisterSession, record the assigned
    /// session handle.
    async fn register_session(&mut self) -> Result<()> {
        let frame = EnipFrame::register_session();
        self.send_frame(&frame, "sending RegisterSession request").await?;
        let reply = self.recv_enippkt().await?;
        if reply.command != CMD_REGISTER_SESSION {
            return Err(PlcError::Communication(format!(
                "expected RegisterSession reply, got command 0x{:04x}",
                reply.command
            )));
        }
        self.session_id = reply.session;
        debug!("registered ENIP session 0x{:08x}", self.session_id);
        Ok(())
    }

    /// Send a CIP packet as an ENIP request/reply exchange (null address +
    /// unconnected data item).
    pub async fn send_rr_cip(&mut self, cip: &CipRequest) -> Result<()> {
        let packet = CommonPacket::unconnected(cip.to_bytes());
        let frame = EnipFrame::send_rr_data(self.session_id, &packet);
        self.send_frame(&frame, "sending CIP request").await
    }

    /// Encapsulate the CIP packet into a ConnectionManager unconnected send.
    pub async fn send_rr_cm_cip(&mut self, cip: &CipRequest) -> Result<()> {
        let wrapped = UnconnectedSend::wrap(cip).into_cip();
        self.send_rr_cip(&wrapped).await
    }

    /// Encapsulate the CIP packet into a MultipleServicePacket to the
    /// MessageRouter.
    pub async fn send_rr_mr_cip(&mut self, cip: &CipRequest) -> Result<()> {
        let wrapped = MultipleServicePacket::wrap(cip).into_cip();
        self.send_rr_cip(&wrapped).await
    }

    /// Send a CIP packet over the connected transport as ENIP unit data.
    pub async fn send_unit_cip(&mut self, cip: &CipRequest) -> Result<()> {
        let packet = CommonPacket::connected(self.enip_connid, self.sequence, cip.to_bytes());
        self.sequence = self.sequence.wrapping_add(1);
        let frame = EnipFrame::send_unit_data(self.session_id, &packet);
        self.send_frame(&frame, "sending connected CIP request").await
    }

    /// Receive one ENIP packet: exactly 24 header bytes, then exactly the
    /// advertised number of payload bytes.
    pub async fn recv_enippkt(&mut self) -> Result<EnipFrame> {
        let mut header = [0u8; ENIP_HEADER_LEN];
        self.read_exact(&mut header, "ENIP header").await?;
        let header = EncapsulationHeader::from_bytes(&header)?;

        let payload_len = header.length.get() as usize;
        let mut payload = BytesMut::zeroed(payload_len);
        if payload_len > 0 {
            self.read_exact(&mut payload, "ENIP payload").await?;
        }
        let frame = EnipFrame::from_parts(&header, payload.freeze())?;
        debug!(
            "RECV command=0x{:04x} len={} status={}",
            frame.command,
            frame.payload.len(),
            frame.status
        );
        Ok(frame)
    }

    /// Receive an ENIP packet and peel it down to the CIP reply.
    pub async fn recv_cip_response(&mut self) -> Result<CipResponse> {
        let frame = self.recv_enippkt().await?;
        let packet = frame.common_packet()?;
        let body = packet.cip_body()?;
        CipResponse::decode(body)
    }

    async fn send_frame(&mut self, frame: &EnipFrame, context: &str) -> Result<()> {
        let stream = match &mut self.link {
            Link::Tcp(stream) => stream,
            Link::Offline(_) => {
                return Err(PlcError::Connection(
                    "offline transport cannot exchange ENIP frames".into(),
                ));
            }
        };
        let bytes = frame.to_bytes();
        debug!("SEND command=0x{:04x} len={}", frame.command, bytes.len());
        io_with_timeout(context, stream.write_all(&bytes), self.timeouts.write).await
    }

    /// Exact read tolerating short reads; distinguishes a peer close from a
    /// read timeout in the error message.
    async fn read_exact(&mut self, buf: &mut [u8], what: &str) -> Result<()> {
        let stream = match &mut self.link {
            Link::Tcp(stream) => stream,
            Link::Offline(_) => {
                return Err(PlcError::Connection(
                    "offline transport cannot exchange ENIP frames".into(),
                ));
            }
        };
        match timeout(self.timeouts.read, stream.read_exact(buf)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(
                PlcError::Connection(format!("Socket closed while reading {what}")),
            ),
            Ok(Err(e)) => Err(PlcError::Connection(format!(
                "Socket error while reading {what}: {e}"
            ))),
            Err(_) => Err(PlcError::Connection(format!(
                "Timed out while waiting for {what}"
            ))),
        }
    }

    /// Format an attribute value for human consumption: small integers are
    /// rendered in hex, all-zero blobs are summarized, anything else is
    /// hex-dumped.
    pub fn attr_format(value: &[u8]) -> String {
        match value.len() {
            1 => format!("{:#x}", value[0]),
            2 => format!("{:#x}", u16::from_le_bytes([value[0], value[1]])),
            4 => format!(
                "{:#x}",
                u32::from_le_bytes([value[0], value[1], value[2], value[3]])
            ),
            n if value.iter().all(|&b| b == 0) => format!("[{n} zeros]"),
            _ => hex::encode(value),
        }
    }
}

/// Decode a two-byte little-endian word vector out of an attribute payload.
pub fn words_from_payload(payload: &Bytes) -> Vec<u16> {
    if payload.is_empty() || payload.len() % 2 != 0 {
        return Vec::new();
    }
    payload
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect()
}
