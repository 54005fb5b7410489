// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! High-level session operations over a [`PlcClient`].
//!
//! The manager owns the per-endpoint connection pools and implements the
//! protocol sequences that span multiple exchanges: forward open/close,
//! segmented tag reads, attribute access and instance enumeration. Every
//! method that talks to the PLC takes `&mut PlcClient`; the caller holds the
//! session lock for the duration of the exchange.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use serde::Serialize;
use tracing::{debug, error};

use crate::{
    client::{
        client::PlcClient,
        common::IoTimeouts,
        pool::{ConnectionPool, PooledClient},
        transport::Transport,
    },
    errors::{PlcError, Result},
    models::cip::{
        attributes::{GetAttributeList, SetAttributeList, decode_single_attribute},
        forward_close::ForwardCloseRequest,
        forward_open::{ForwardOpenReply, ForwardOpenRequest},
        path::CipPath,
        read_tag::{ReadOtherTag, decode_instance_list, instance_list_request},
        status::{CipStatus, STATUS_PARTIAL_TRANSFER},
    },
};

/// Description of the logical connection maintained with a PLC.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub session_id: u32,
    pub enip_connection_id: u32,
    pub sequence: u16,
    pub last_status: CipStatus,
}

impl ConnectionStatus {
    pub fn of(client: &PlcClient, last_status: CipStatus) -> Self {
        Self {
            connected: client.connected(),
            session_id: client.session_id,
            enip_connection_id: client.enip_connid,
            sequence: client.sequence,
            last_status,
        }
    }
}

/// Context-managed access to PLC endpoints with connection pooling.
#[derive(Debug)]
pub struct SessionManager {
    default_host: String,
    default_port: u16,
    pool_size: usize,
    timeouts: IoTimeouts,
    transport: Transport,
    pools: DashMap<(String, u16), Arc<ConnectionPool>>,
}

impl SessionManager {
    pub fn new(
        default_host: impl Into<String>,
        default_port: u16,
        pool_size: usize,
        timeouts: IoTimeouts,
        transport: Transport,
    ) -> Self {
        Self {
            default_host: default_host.into(),
            default_port,
            pool_size,
            timeouts,
            transport,
            pools: DashMap::new(),
        }
    }

    /// Fill in the configured defaults for an endpoint request.
    pub fn resolve_endpoint(&self, host: Option<&str>, port: Option<u16>) -> (String, u16) {
        (
            host.map(str::to_string)
                .unwrap_or_else(|| self.default_host.clone()),
            port.unwrap_or(self.default_port),
        )
    }

    /// Borrow a client from the endpoint's pool, creating the pool on first
    /// use.
    pub async fn acquire_client(&self, host: &str, port: u16) -> Result<PooledClient> {
        let pool = self
            .pools
            .entry((host.to_string(), port))
            .or_insert_with(|| {
                Arc::new(ConnectionPool::new(
                    host,
                    port,
                    self.pool_size,
                    self.timeouts,
                    self.transport.clone(),
                ))
            })
            .clone();
        pool.acquire().await
    }

    pub fn release_client(&self, host: &str, port: u16, client: PooledClient) {
        if let Some(pool) = self.pools.get(&(host.to_string(), port)) {
            pool.release(client);
        }
    }

    /// Issue a Forward Open and record the O→T connection id on the client.
    pub async fn start_session(&self, client: &mut PlcClient) -> Result<ConnectionStatus> {
        if client.is_offline() {
            client.enip_connid = 1;
            return Ok(ConnectionStatus::of(client, CipStatus::from_code(0)));
        }

        let request = ForwardOpenRequest::new(rand::random::<u16>(), rand::random::<u32>());
        client.send_rr_cip(&request.into_cip()).await?;
        let response = client.recv_cip_response().await?;
        if !response.status.ok() {
            error!(
                "Failed to Forward Open CIP connection: {}",
                response.status
            );
            return Err(PlcError::response(
                format!(
                    "Failed to Forward Open CIP connection: {}",
                    response.status.message()
                ),
                response.status,
            ));
        }
        let reply = ForwardOpenReply::decode(&response.payload).map_err(|_| {
            PlcError::response(
                "Forward Open response missing connection identifier".to_string(),
                response.status.clone(),
            )
        })?;
        client.enip_connid = reply.ot_connection_id.get();
        debug!(
            "Forward Open established connection 0x{:08x}",
            client.enip_connid
        );
        Ok(ConnectionStatus::of(client, response.status))
    }

    /// Issue a Forward Close; returns the final status.
    pub async fn stop_session(&self, client: &mut PlcClient) -> Result<CipStatus> {
        if client.is_offline() {
            return Ok(CipStatus::from_code(0));
        }

        let request = ForwardCloseRequest::new(rand::random::<u16>(), rand::random::<u32>());
        client.send_rr_cip(&request.into_cip()).await?;
        let response = client.recv_cip_response().await?;
        if !response.status.ok() {
            error!(
                "Failed to Forward Close CIP connection: {}",
                response.status
            );
            return Err(PlcError::response(
                format!(
                    "Failed to Forward Close CIP connection: {}",
                    response.status.message()
                ),
                response.status,
            ));
        }
        Ok(response.status)
    }

    /// Read the full content of a tag, resuming on partial-transfer replies
    /// until `total_size` bytes have arrived.
    pub async fn read_full_tag(
        &self,
        client: &mut PlcClient,
        class_id: u16,
        instance_id: u16,
        total_size: usize,
    ) -> Result<(Bytes, CipStatus)> {
        if client.is_offline() {
            return Ok((
                Bytes::from(vec![0u8; total_size]),
                CipStatus::from_code(0),
            ));
        }

        let mut data = BytesMut::with_capacity(total_size);
        let mut offset = 0u32;
        let mut remaining = total_size;
        let mut last_status = CipStatus::default();

        while remaining > 0 {
            let request = ReadOtherTag::new(offset, remaining as u16)
                .into_cip(CipPath::make(class_id, instance_id));
            client.send_rr_cm_cip(&request).await?;
            let response = client.recv_cip_response().await?;
            let payload = response.payload;
            last_status = response.status;

            match last_status.code {
                Some(0) | None => {
                    if payload.len() != remaining {
                        return Err(PlcError::response(
                            format!(
                                "Unexpected payload size. Expected {remaining}, got {}",
                                payload.len()
                            ),
                            last_status,
                        ));
                    }
                }
                Some(STATUS_PARTIAL_TRANSFER) if !payload.is_empty() => {
                    // Partial response, the rest is requested next round.
                }
                _ => {
                    error!("Error in Read Tag response: {last_status}");
                    return Err(PlcError::response(
                        format!("Error reading tag: {}", last_status.message()),
                        last_status,
                    ));
                }
            }

            offset += payload.len() as u32;
            remaining -= payload.len();
            data.extend_from_slice(&payload);
        }

        Ok((data.freeze(), last_status))
    }

    /// Fetch one attribute with Get_Attribute_List.
    pub async fn get_attribute(
        &self,
        client: &mut PlcClient,
        class_id: u16,
        instance_id: u16,
        attribute_id: u16,
    ) -> Result<Bytes> {
        if let Some(store) = client.offline_store() {
            return store.get(class_id, instance_id, attribute_id).ok_or_else(|| {
                PlcError::Runtime(format!(
                    "Attribute 0x{attribute_id:x} unavailable for class {class_id} instance {instance_id}"
                ))
            });
        }

        let request = GetAttributeList::single(attribute_id)
            .into_cip(CipPath::make(class_id, instance_id));
        client.send_rr_cm_cip(&request).await?;
        let response = client.recv_cip_response().await?;
        response.ensure_ok("CIP get attribute error")?;
        decode_single_attribute(&response.payload, attribute_id)
    }

    /// Write one attribute with Set_Attribute_List; returns the reply
    /// status.
    pub async fn set_attribute(
        &self,
        client: &mut PlcClient,
        class_id: u16,
        instance_id: u16,
        attribute_id: u16,
        value: Bytes,
    ) -> Result<CipStatus> {
        if let Some(store) = client.offline_store_mut() {
            store.set(class_id, instance_id, attribute_id, value);
            return Ok(CipStatus::from_code(0));
        }

        let request = SetAttributeList::new(attribute_id, value)
            .into_cip(CipPath::make(class_id, instance_id));
        client.send_rr_cm_cip(&request).await?;
        let response = client.recv_cip_response().await?;
        if !response.status.ok() {
            error!("CIP set attribute error: {}", response.status);
        }
        Ok(response.status)
    }

    /// Enumerate the instances of a class, following partial replies from
    /// the last returned instance.
    pub async fn get_list_of_instances(
        &self,
        client: &mut PlcClient,
        class_id: u16,
    ) -> Result<Vec<u32>> {
        if let Some(store) = client.offline_store() {
            return Ok(store.instances_of(class_id));
        }

        let mut start_instance = 0u16;
        let mut instances = Vec::new();
        loop {
            let request = instance_list_request(class_id, start_instance);
            client.send_rr_cm_cip(&request).await?;
            let response = client.recv_cip_response().await?;
            instances.extend(decode_instance_list(&response.payload)?);

            match response.status.code {
                Some(0) | None => return Ok(instances),
                Some(STATUS_PARTIAL_TRANSFER) => {
                    // Partial response, query again from the next instance.
                    let last = instances.last().copied().ok_or_else(|| {
                        PlcError::response(
                            "Instance list partial reply carried no instances".to_string(),
                            response.status.clone(),
                        )
                    })?;
                    start_instance = (last + 1) as u16;
                }
                _ => {
                    error!("Error in Get Instance List response: {}", response.status);
                    return Err(PlcError::response(
                        format!(
                            "Error in Get Instance List response: {}",
                            response.status.message()
                        ),
                        response.status,
                    ));
                }
            }
        }
    }
}
