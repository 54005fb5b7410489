// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Per-assembly runtime state: last polled payload, decoded views and the
//! pending output queue.
//!
//! One record exists per configured assembly, keyed by lower-cased alias.
//! All record mutations happen under the runtime-wide mutex; socket I/O is
//! never performed while it is held. The output queue is a channel pair so
//! producers never block and the dispatch worker can bound its dequeue wait.

use std::{collections::HashMap, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};

use crate::{
    client::client::{PlcClient, words_from_payload},
    device::config::{AssemblyDefinition, AssemblyDirection, AssemblyMember, DeviceConfiguration},
    errors::{PlcError, Result},
    models::cip::{message::CipRequest, service, status::CipStatus},
    session::manager::SessionManager,
};

/// Decoded representation of one assembly member inside a payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssemblyMemberValue {
    pub name: String,
    pub offset: Option<usize>,
    pub size: Option<usize>,
    pub datatype: Option<String>,
    pub description: Option<String>,
    pub raw_hex: String,
    pub int_value: Option<u64>,
}

/// Snapshot of the runtime state associated with an assembly.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblyState {
    pub alias: String,
    pub class_id: u16,
    pub instance_id: u16,
    pub direction: AssemblyDirection,
    pub size: Option<usize>,
    #[serde(with = "crate::runtime::serde_hex")]
    pub payload: Bytes,
    pub timestamp: Option<DateTime<Utc>>,
    pub status: CipStatus,
    pub word_values: Vec<u16>,
    pub members: Vec<AssemblyMemberValue>,
}

/// A pending unit-data write for an output assembly.
///
/// Completed exactly once: either by the dispatch worker after the exchange,
/// or with a session-closed error during teardown.
#[derive(Debug)]
pub struct OutputRequest {
    pub payload: Bytes,
    done: Option<oneshot::Sender<Result<CipStatus>>>,
}

impl OutputRequest {
    fn new(payload: Bytes) -> (Self, OutputTicket) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                payload,
                done: Some(tx),
            },
            OutputTicket { rx },
        )
    }

    pub fn complete(mut self, outcome: Result<CipStatus>) {
        if let Some(tx) = self.done.take() {
            let _ = tx.send(outcome);
        }
    }
}

/// The caller's half of an [`OutputRequest`].
#[derive(Debug)]
pub struct OutputTicket {
    rx: oneshot::Receiver<Result<CipStatus>>,
}

impl OutputTicket {
    /// Block until the dispatch worker completes the write.
    pub async fn wait(self, timeout: Duration) -> Result<CipStatus> {
        match tokio::time::timeout(timeout, self.rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(PlcError::Manager(
                "Output request dropped before completion".into(),
            )),
            Err(_) => Err(PlcError::Manager(
                "Timed out waiting for output write".into(),
            )),
        }
    }
}

#[derive(Debug)]
struct AssemblyRecord {
    definition: AssemblyDefinition,
    last_payload: Bytes,
    last_timestamp: Option<DateTime<Utc>>,
    last_status: CipStatus,
    word_values: Vec<u16>,
    member_values: Vec<AssemblyMemberValue>,
    outputs_tx: mpsc::UnboundedSender<OutputRequest>,
    outputs_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<OutputRequest>>>,
}

impl AssemblyRecord {
    fn new(definition: AssemblyDefinition) -> Self {
        let (outputs_tx, outputs_rx) = mpsc::unbounded_channel();
        Self {
            definition,
            last_payload: Bytes::new(),
            last_timestamp: None,
            last_status: CipStatus::default(),
            word_values: Vec::new(),
            member_values: Vec::new(),
            outputs_tx,
            outputs_rx: Arc::new(tokio::sync::Mutex::new(outputs_rx)),
        }
    }

    fn view(&self) -> AssemblyState {
        AssemblyState {
            alias: self.definition.alias.clone(),
            class_id: self.definition.class_id,
            instance_id: self.definition.instance_id,
            direction: self.definition.direction,
            size: self.definition.size,
            payload: self.last_payload.clone(),
            timestamp: self.last_timestamp,
            status: self.last_status.clone(),
            word_values: self.word_values.clone(),
            members: self.member_values.clone(),
        }
    }
}

#[derive(Debug, Default)]
struct RuntimeInner {
    configuration: Option<Arc<DeviceConfiguration>>,
    assemblies: HashMap<String, AssemblyRecord>,
}

/// Keep assembly payloads synchronised with the PLC sessions.
#[derive(Debug, Default)]
pub struct IoRuntime {
    inner: std::sync::Mutex<RuntimeInner>,
}

impl IoRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically replace the runtime map with the assemblies declared in
    /// `configuration`.
    pub fn load(&self, configuration: Arc<DeviceConfiguration>) {
        let mut assemblies = HashMap::with_capacity(configuration.assemblies.len());
        for definition in &configuration.assemblies {
            assemblies.insert(
                normalise_alias(&definition.alias),
                AssemblyRecord::new(definition.clone()),
            );
        }
        let mut inner = self.inner.lock().expect("runtime state poisoned");
        inner.configuration = Some(configuration);
        inner.assemblies = assemblies;
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().expect("runtime state poisoned");
        inner.configuration = None;
        inner.assemblies.clear();
    }

    pub fn configured(&self) -> bool {
        let inner = self.inner.lock().expect("runtime state poisoned");
        inner.configuration.is_some() && !inner.assemblies.is_empty()
    }

    pub fn assemblies(&self) -> Vec<String> {
        let inner = self.inner.lock().expect("runtime state poisoned");
        inner.assemblies.keys().cloned().collect()
    }

    /// Aliases the poll workers should read.
    pub fn input_assemblies(&self) -> Vec<String> {
        self.assemblies_where(|d| d.is_input())
    }

    /// Aliases the dispatch workers should serve.
    pub fn output_assemblies(&self) -> Vec<String> {
        self.assemblies_where(|d| d.is_output())
    }

    fn assemblies_where(&self, predicate: impl Fn(AssemblyDirection) -> bool) -> Vec<String> {
        let inner = self.inner.lock().expect("runtime state poisoned");
        inner
            .assemblies
            .iter()
            .filter(|(_, record)| predicate(record.definition.direction))
            .map(|(alias, _)| alias.clone())
            .collect()
    }

    pub fn get_view(&self, alias: &str) -> Result<AssemblyState> {
        let inner = self.inner.lock().expect("runtime state poisoned");
        let record = require_record(&inner, alias)?;
        Ok(record.view())
    }

    /// Read the assembly's full payload through the session manager and
    /// refresh the record.
    pub async fn fetch(
        &self,
        manager: &SessionManager,
        client: &mut PlcClient,
        alias: &str,
    ) -> Result<(Bytes, CipStatus)> {
        let (class_id, instance_id, size) = {
            let inner = self.inner.lock().expect("runtime state poisoned");
            let record = require_record(&inner, alias)?;
            let size = record.definition.size.ok_or_else(|| {
                PlcError::Runtime(format!(
                    "Assembly '{}' does not define a payload size and cannot be read",
                    record.definition.alias
                ))
            })?;
            (
                record.definition.class_id,
                record.definition.instance_id,
                size,
            )
        };

        match manager
            .read_full_tag(client, class_id, instance_id, size)
            .await
        {
            Ok((data, status)) => {
                self.update_record(alias, &data, status.clone());
                Ok((data, status))
            }
            Err(err) => {
                if let Some(status) = err.cip_status() {
                    self.update_status(alias, status.clone());
                }
                Err(err)
            }
        }
    }

    /// Queue a payload for the assembly's dispatch worker.
    pub fn queue_output(&self, alias: &str, payload: Bytes) -> Result<OutputTicket> {
        let inner = self.inner.lock().expect("runtime state poisoned");
        let record = require_output_record(&inner, alias)?;
        validate_payload_size(record, &payload)?;
        let (request, ticket) = OutputRequest::new(payload);
        record
            .outputs_tx
            .send(request)
            .map_err(|_| PlcError::Manager("Session closed".into()))?;
        Ok(ticket)
    }

    /// Dequeue the next pending output, waiting at most `timeout`. `None`
    /// means the queue stayed empty, so the worker can check its stop
    /// signal and come back.
    pub async fn await_output(&self, alias: &str, timeout: Duration) -> Result<Option<OutputRequest>> {
        let rx = {
            let inner = self.inner.lock().expect("runtime state poisoned");
            let record = require_output_record(&inner, alias)?;
            Arc::clone(&record.outputs_rx)
        };
        let mut rx = rx.lock().await;
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(request)) => Ok(Some(request)),
            Ok(None) => Ok(None),
            Err(_) => Ok(None),
        }
    }

    /// Pull whatever is still queued without waiting; used at session
    /// teardown to fail pending requests.
    pub async fn drain_pending(&self, alias: &str) -> Vec<OutputRequest> {
        let rx = {
            let inner = self.inner.lock().expect("runtime state poisoned");
            match require_output_record(&inner, alias) {
                Ok(record) => Arc::clone(&record.outputs_rx),
                Err(_) => return Vec::new(),
            }
        };
        let mut rx = rx.lock().await;
        let mut pending = Vec::new();
        while let Ok(request) = rx.try_recv() {
            pending.push(request);
        }
        pending
    }

    /// Write a payload to the assembly over the connected transport.
    pub async fn send_output(
        &self,
        client: &mut PlcClient,
        alias: &str,
        payload: Bytes,
    ) -> Result<CipStatus> {
        let (path, display_alias) = {
            let inner = self.inner.lock().expect("runtime state poisoned");
            let record = require_output_record(&inner, alias)?;
            validate_payload_size(record, &payload)?;
            (
                record.definition.to_cip_path(None),
                record.definition.alias.clone(),
            )
        };

        if client.is_offline() {
            let status = CipStatus::from_code(0);
            self.update_record(alias, &payload, status.clone());
            return Ok(status);
        }

        let request = CipRequest::with_payload(service::WRITE_OTHER_TAG, path, payload.clone());
        client.send_unit_cip(&request).await?;
        let response = client.recv_cip_response().await.map_err(|err| match err {
            PlcError::Connection(_) => PlcError::Connection(
                "Socket closed while awaiting assembly write response".into(),
            ),
            other => other,
        })?;
        if !response.status.ok() {
            return Err(PlcError::response(
                format!(
                    "Failed to write assembly '{display_alias}': {}",
                    response.status.message()
                ),
                response.status,
            ));
        }
        self.update_record(alias, &payload, response.status.clone());
        Ok(response.status)
    }

    fn update_record(&self, alias: &str, payload: &Bytes, status: CipStatus) {
        let word_values = words_from_payload(payload);
        let mut inner = self.inner.lock().expect("runtime state poisoned");
        let Some(record) = inner.assemblies.get_mut(&normalise_alias(alias)) else {
            return;
        };
        record.member_values = decode_members(&record.definition.members, payload);
        record.word_values = word_values;
        record.last_payload = payload.clone();
        record.last_timestamp = Some(Utc::now());
        record.last_status = status;
    }

    fn update_status(&self, alias: &str, status: CipStatus) {
        let mut inner = self.inner.lock().expect("runtime state poisoned");
        if let Some(record) = inner.assemblies.get_mut(&normalise_alias(alias)) {
            record.last_status = status;
            record.last_timestamp = Some(Utc::now());
        }
    }
}

fn normalise_alias(alias: &str) -> String {
    alias.trim().to_ascii_lowercase()
}

fn require_record<'a>(inner: &'a RuntimeInner, alias: &str) -> Result<&'a AssemblyRecord> {
    inner
        .assemblies
        .get(&normalise_alias(alias))
        .ok_or_else(|| {
            PlcError::RuntimeNotRegistered(format!(
                "Assembly '{alias}' is not registered in the runtime"
            ))
        })
}

fn require_output_record<'a>(inner: &'a RuntimeInner, alias: &str) -> Result<&'a AssemblyRecord> {
    let record = require_record(inner, alias)?;
    if !record.definition.direction.is_output() {
        return Err(PlcError::RuntimeDirection(format!(
            "Assembly '{}' is not configured for output operations",
            record.definition.alias
        )));
    }
    Ok(record)
}

fn validate_payload_size(record: &AssemblyRecord, payload: &Bytes) -> Result<()> {
    if let Some(size) = record.definition.size
        && payload.len() != size
    {
        return Err(PlcError::Runtime(format!(
            "Payload for assembly '{}' must be exactly {size} bytes",
            record.definition.alias
        )));
    }
    Ok(())
}

fn decode_members(members: &[AssemblyMember], payload: &Bytes) -> Vec<AssemblyMemberValue> {
    let mut decoded = Vec::new();
    for member in members {
        let (Some(offset), Some(size)) = (member.offset, member.size) else {
            continue;
        };
        let end = offset + size;
        if end > payload.len() {
            continue;
        }
        let chunk = &payload[offset..end];
        let int_value = matches!(size, 1 | 2 | 4).then(|| {
            let mut raw = [0u8; 8];
            raw[..size].copy_from_slice(chunk);
            u64::from_le_bytes(raw)
        });
        decoded.push(AssemblyMemberValue {
            name: member.name.clone(),
            offset: member.offset,
            size: member.size,
            datatype: member.datatype.clone(),
            description: member.description.clone(),
            raw_hex: hex::encode(chunk),
            int_value,
        });
    }
    decoded
}

/// Serialize `Bytes` payloads as lowercase hex.
pub(crate) mod serde_hex {
    use bytes::Bytes;
    use serde::Serializer;

    pub fn serialize<S: Serializer>(payload: &Bytes, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(payload))
    }
}
