// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Multi-session orchestration: the session registry, the per-session I/O
//! workers and the operations the web adapter binds to.
//!
//! Each session owns one pooled client behind an async mutex; that mutex is
//! the io_lock of the concurrency model. Workers and API calls alike take
//! the guard for the full request/response exchange, so wire traffic within
//! a session never interleaves. Sessions never take each other's locks.

use std::{str::FromStr, sync::Arc, time::Duration};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use tokio::{task::JoinHandle, time::timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::{
    client::pool::PooledClient,
    device::config::DeviceConfiguration,
    errors::{PlcError, Result},
    models::{
        cip::{
            attributes::SetAttributeList,
            message::CipRequest,
            path::CipPath,
            status::CipStatus,
        },
        udp::keepalive_pattern_hex,
    },
    runtime::IoRuntime,
    session::manager::{ConnectionStatus, SessionManager},
};

/// A session is considered to be keeping its transport alive while the gap
/// since the last successful operation stays within this window.
pub const KEEPALIVE_IDLE_SECONDS: i64 = 10;

/// Tunables for the per-session workers and output waits.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorSettings {
    /// Pause between poll rounds of one input assembly.
    pub poll_interval: Duration,
    /// Upper bound on one dequeue wait of a dispatch worker; bounds how
    /// long a stop signal can go unobserved.
    pub dispatch_timeout: Duration,
    /// How long `write_assembly` waits for its request to complete.
    pub output_timeout: Duration,
    /// Best-effort deadline when joining workers at teardown.
    pub worker_join_timeout: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(200),
            dispatch_timeout: Duration::from_millis(250),
            output_timeout: Duration::from_secs(5),
            worker_join_timeout: Duration::from_secs(1),
        }
    }
}

/// How a raw CIP command should travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandTransport {
    Rr,
    RrCm,
    RrMr,
    Unit,
}

impl FromStr for CommandTransport {
    type Err = PlcError;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "rr" => Self::Rr,
            "rr_cm" => Self::RrCm,
            "rr_mr" => Self::RrMr,
            "unit" => Self::Unit,
            other => return Err(PlcError::Manager(format!("Unsupported transport '{other}'"))),
        })
    }
}

/// Result of a low-level CIP command execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandResult {
    pub status: CipStatus,
    #[serde(with = "crate::runtime::serde_hex")]
    pub payload: Bytes,
}

/// Structured representation of an assembly read from the PLC.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssemblySnapshot {
    pub class_id: u16,
    pub instance_id: u16,
    #[serde(with = "crate::runtime::serde_hex")]
    pub data: Bytes,
    pub timestamp: DateTime<Utc>,
    pub last_status: CipStatus,
}

/// Diagnostics view over one session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionDiagnostics {
    pub session_id: String,
    pub connection: ConnectionStatus,
    pub host: String,
    pub port: u16,
    pub keep_alive_pattern_hex: String,
    pub keep_alive_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
}

/// Identity + status pair returned by session operations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub connection: ConnectionStatus,
}

struct WorkerSet {
    stop: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerSet {
    fn empty() -> Self {
        Self {
            stop: CancellationToken::new(),
            handles: Vec::new(),
        }
    }
}

/// One live PLC session managed by the orchestrator.
pub struct SessionHandle {
    session_id: String,
    host: String,
    port: u16,
    client: PooledClient,
    status: std::sync::Mutex<ConnectionStatus>,
    created_at: DateTime<Utc>,
    last_activity: std::sync::Mutex<DateTime<Utc>>,
    workers: tokio::sync::Mutex<WorkerSet>,
}

impl SessionHandle {
    fn touch(&self) {
        *self.last_activity.lock().expect("session handle poisoned") = Utc::now();
    }

    fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.lock().expect("session handle poisoned")
    }

    fn status(&self) -> ConnectionStatus {
        self.status.lock().expect("session handle poisoned").clone()
    }

    fn set_status(&self, status: ConnectionStatus) {
        *self.status.lock().expect("session handle poisoned") = status;
    }

    fn record_cip_status(&self, last_status: CipStatus) {
        self.status
            .lock()
            .expect("session handle poisoned")
            .last_status = last_status;
    }

    fn mark_disconnected(&self) {
        self.status
            .lock()
            .expect("session handle poisoned")
            .connected = false;
    }
}

/// Coordinate PLC sessions that are shared across API requests.
pub struct SessionOrchestrator {
    manager: Arc<SessionManager>,
    runtime: Arc<IoRuntime>,
    settings: OrchestratorSettings,
    sessions: DashMap<String, Arc<SessionHandle>>,
}

impl SessionOrchestrator {
    pub fn new(
        manager: Arc<SessionManager>,
        runtime: Arc<IoRuntime>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            manager,
            runtime,
            settings,
            sessions: DashMap::new(),
        }
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    pub fn runtime(&self) -> &Arc<IoRuntime> {
        &self.runtime
    }

    /// Start a new PLC session and keep it active until explicitly stopped.
    pub async fn start_session(
        &self,
        host: Option<&str>,
        port: Option<u16>,
    ) -> Result<SessionInfo> {
        let (host, port) = self.manager.resolve_endpoint(host, port);
        let client = self.manager.acquire_client(&host, port).await?;

        let status = {
            let mut guard = client.lock().await;
            match self.manager.start_session(&mut guard).await {
                Ok(status) => status,
                Err(e) => {
                    drop(guard);
                    self.manager.release_client(&host, port, client);
                    return Err(e);
                }
            }
        };

        let session_id = Uuid::new_v4().simple().to_string();
        let handle = Arc::new(SessionHandle {
            session_id: session_id.clone(),
            host,
            port,
            client,
            status: std::sync::Mutex::new(status.clone()),
            created_at: Utc::now(),
            last_activity: std::sync::Mutex::new(Utc::now()),
            workers: tokio::sync::Mutex::new(WorkerSet::empty()),
        });
        self.sessions.insert(session_id.clone(), Arc::clone(&handle));

        if self.runtime.configured() {
            self.spawn_workers(&handle).await;
        }
        info!("started PLC session {session_id}");
        Ok(SessionInfo {
            session_id,
            connection: status,
        })
    }

    /// Tear a session down: stop its workers, Forward Close under the
    /// io_lock, return the client to the pool and forget the handle.
    pub async fn stop_session(&self, session_id: &str) -> Result<ConnectionStatus> {
        let (_, handle) = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| PlcError::Manager(format!("Unknown session '{session_id}'")))?;

        self.shutdown_workers(&handle).await;

        let close_result = {
            let mut guard = handle.client.lock().await;
            self.manager.stop_session(&mut guard).await
        };
        self.manager
            .release_client(&handle.host, handle.port, Arc::clone(&handle.client));

        let status = close_result?;
        handle.record_cip_status(status);
        handle.mark_disconnected();
        info!("stopped PLC session {session_id}");
        Ok(handle.status())
    }

    pub fn get_status(&self, session_id: &str) -> Result<ConnectionStatus> {
        let handle = self.require_session(session_id)?;
        handle.touch();
        Ok(handle.status())
    }

    pub fn get_diagnostics(&self, session_id: &str) -> Result<SessionDiagnostics> {
        let handle = self.require_session(session_id)?;
        let last_activity = handle.last_activity();
        let idle = Utc::now().signed_duration_since(last_activity);
        Ok(SessionDiagnostics {
            session_id: handle.session_id.clone(),
            connection: handle.status(),
            host: handle.host.clone(),
            port: handle.port,
            keep_alive_pattern_hex: keepalive_pattern_hex(),
            keep_alive_active: idle.num_seconds() <= KEEPALIVE_IDLE_SECONDS,
            created_at: handle.created_at,
            last_activity_at: last_activity,
        })
    }

    /// Read `total_size` bytes out of the given assembly object.
    pub async fn read_assembly(
        &self,
        session_id: &str,
        class_id: u16,
        instance_id: u16,
        total_size: usize,
    ) -> Result<AssemblySnapshot> {
        let handle = self.require_session(session_id)?;
        let mut client = handle.client.lock().await;
        let (data, status) = self
            .manager
            .read_full_tag(&mut client, class_id, instance_id, total_size)
            .await?;
        drop(client);
        handle.record_cip_status(status.clone());
        handle.touch();
        Ok(AssemblySnapshot {
            class_id,
            instance_id,
            data,
            timestamp: Utc::now(),
            last_status: status,
        })
    }

    /// Write one attribute through Set_Attribute_List at an arbitrary path.
    pub async fn write_attribute(
        &self,
        session_id: &str,
        path: CipPath,
        attribute_id: u16,
        value: Bytes,
    ) -> Result<CipStatus> {
        let handle = self.require_session(session_id)?;
        let mut client = handle.client.lock().await;

        if client.is_offline() {
            let (class_id, instance_id) = path.class_instance().ok_or_else(|| {
                PlcError::Manager("CIP path is missing class or instance information".into())
            })?;
            let status = self
                .manager
                .set_attribute(&mut client, class_id, instance_id, attribute_id, value)
                .await?;
            drop(client);
            handle.record_cip_status(status.clone());
            handle.touch();
            return Ok(status);
        }

        let request = SetAttributeList::new(attribute_id, value).into_cip(path);
        client.send_rr_cm_cip(&request).await?;
        let response = client.recv_cip_response().await?;
        drop(client);
        handle.record_cip_status(response.status.clone());
        if !response.status.ok() {
            return Err(PlcError::response(
                format!(
                    "Failed to write attribute: {}",
                    response.status.message()
                ),
                response.status,
            ));
        }
        handle.touch();
        Ok(response.status)
    }

    /// Queue a payload for the assembly's dispatch worker and wait for the
    /// completion it records.
    pub async fn write_assembly(
        &self,
        session_id: &str,
        alias: &str,
        payload: Bytes,
    ) -> Result<CipStatus> {
        let handle = self.require_session(session_id)?;
        let ticket = self.runtime.queue_output(alias, payload)?;
        let status = ticket.wait(self.settings.output_timeout).await?;
        handle.touch();
        Ok(status)
    }

    /// Runtime snapshot of one assembly.
    pub fn get_assembly_state(&self, session_id: &str, alias: &str) -> Result<crate::runtime::AssemblyState> {
        let _handle = self.require_session(session_id)?;
        self.runtime.get_view(alias)
    }

    /// Execute a raw CIP command over the chosen transport.
    pub async fn send_command(
        &self,
        session_id: &str,
        service: u8,
        path: CipPath,
        payload: Bytes,
        transport: CommandTransport,
    ) -> Result<CommandResult> {
        let handle = self.require_session(session_id)?;
        let request = CipRequest::with_payload(service, path, payload);

        let mut client = handle.client.lock().await;
        match transport {
            CommandTransport::Rr => client.send_rr_cip(&request).await?,
            CommandTransport::RrCm => client.send_rr_cm_cip(&request).await?,
            CommandTransport::RrMr => client.send_rr_mr_cip(&request).await?,
            CommandTransport::Unit => client.send_unit_cip(&request).await?,
        }
        let response = client.recv_cip_response().await?;
        drop(client);

        handle.record_cip_status(response.status.clone());
        if !response.status.ok() {
            return Err(PlcError::response(
                format!("CIP command failed: {}", response.status.message()),
                response.status,
            ));
        }
        handle.touch();
        Ok(CommandResult {
            status: response.status,
            payload: response.payload,
        })
    }

    /// Load a configuration into the runtime and restart every session's
    /// worker set against it.
    pub async fn apply_configuration(&self, configuration: Arc<DeviceConfiguration>) -> Result<()> {
        self.runtime.load(configuration);
        let handles: Vec<Arc<SessionHandle>> =
            self.sessions.iter().map(|kv| Arc::clone(kv.value())).collect();
        for handle in handles {
            self.shutdown_workers(&handle).await;
            self.spawn_workers(&handle).await;
        }
        Ok(())
    }

    pub fn session_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|kv| kv.key().clone()).collect()
    }

    fn require_session(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .get(session_id)
            .map(|kv| Arc::clone(kv.value()))
            .ok_or_else(|| PlcError::Manager(format!("Unknown session '{session_id}'")))
    }

    /// One poll worker per input assembly, one dispatch worker per output
    /// assembly; all sharing the session's stop token.
    async fn spawn_workers(&self, handle: &Arc<SessionHandle>) {
        let mut workers = handle.workers.lock().await;
        workers.stop = CancellationToken::new();

        for alias in self.runtime.input_assemblies() {
            let manager = Arc::clone(&self.manager);
            let runtime = Arc::clone(&self.runtime);
            let handle = Arc::clone(handle);
            let stop = workers.stop.clone();
            let poll_interval = self.settings.poll_interval;
            workers.handles.push(tokio::spawn(async move {
                poll_loop(manager, runtime, handle, alias, stop, poll_interval).await;
            }));
        }

        for alias in self.runtime.output_assemblies() {
            let runtime = Arc::clone(&self.runtime);
            let handle = Arc::clone(handle);
            let stop = workers.stop.clone();
            let dispatch_timeout = self.settings.dispatch_timeout;
            workers.handles.push(tokio::spawn(async move {
                dispatch_loop(runtime, handle, alias, stop, dispatch_timeout).await;
            }));
        }
    }

    async fn shutdown_workers(&self, handle: &Arc<SessionHandle>) {
        let mut workers = handle.workers.lock().await;
        workers.stop.cancel();
        for worker in workers.handles.drain(..) {
            if timeout(self.settings.worker_join_timeout, worker)
                .await
                .is_err()
            {
                warn!("worker for session {} did not join in time", handle.session_id);
            }
        }
    }
}

/// Periodically fetch one input assembly while the session lives.
async fn poll_loop(
    manager: Arc<SessionManager>,
    runtime: Arc<IoRuntime>,
    handle: Arc<SessionHandle>,
    alias: String,
    stop: CancellationToken,
    poll_interval: Duration,
) {
    debug!("poll worker for '{alias}' started (session {})", handle.session_id);
    while !stop.is_cancelled() {
        {
            let mut client = handle.client.lock().await;
            match runtime.fetch(&manager, &mut client, &alias).await {
                Ok(_) => {
                    drop(client);
                    handle.touch();
                }
                Err(PlcError::RuntimeNotRegistered(msg)) => {
                    debug!("poll worker for '{alias}' exiting: {msg}");
                    break;
                }
                Err(e @ PlcError::Connection(_)) => {
                    error!("poll worker for '{alias}' lost the connection: {e}");
                    handle.mark_disconnected();
                    stop.cancel();
                    break;
                }
                Err(e) => {
                    warn!("poll of assembly '{alias}' failed: {e}");
                }
            }
        }
        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(poll_interval) => {}
        }
    }
    debug!("poll worker for '{alias}' stopped (session {})", handle.session_id);
}

/// Serve queued output writes for one assembly while the session lives.
async fn dispatch_loop(
    runtime: Arc<IoRuntime>,
    handle: Arc<SessionHandle>,
    alias: String,
    stop: CancellationToken,
    dispatch_timeout: Duration,
) {
    debug!(
        "dispatch worker for '{alias}' started (session {})",
        handle.session_id
    );
    loop {
        let request = tokio::select! {
            _ = stop.cancelled() => break,
            r = runtime.await_output(&alias, dispatch_timeout) => r,
        };
        match request {
            Ok(None) => continue,
            Ok(Some(request)) => {
                let payload = request.payload.clone();
                let mut client = handle.client.lock().await;
                let outcome = runtime.send_output(&mut client, &alias, payload).await;
                drop(client);
                let lost_connection = matches!(outcome, Err(PlcError::Connection(_)));
                if outcome.is_ok() {
                    handle.touch();
                }
                request.complete(outcome);
                if lost_connection {
                    error!("dispatch worker for '{alias}' lost the connection");
                    handle.mark_disconnected();
                    stop.cancel();
                    break;
                }
            }
            Err(e) => {
                debug!("dispatch worker for '{alias}' exiting: {e}");
                break;
            }
        }
    }

    // Teardown fails whatever is still queued; nothing is transmitted.
    for pending in runtime.drain_pending(&alias).await {
        pending.complete(Err(PlcError::Manager("Session closed".into())));
    }
    debug!(
        "dispatch worker for '{alias}' stopped (session {})",
        handle.session_id
    );
}
