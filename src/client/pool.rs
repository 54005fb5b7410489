// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Bounded reuse of PLC clients for one endpoint.
//!
//! Idle clients stack up to `max_size`; `acquire` pops the most recently
//! released one and only constructs a new client while the lifetime-created
//! count stays within the bound.

use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::errors::{PlcError, Result};

use super::{
    client::PlcClient,
    common::IoTimeouts,
    transport::Transport,
};

/// A pooled client: the mutex is the session io_lock, so holding the guard
/// is what authorizes socket I/O.
pub type PooledClient = Arc<tokio::sync::Mutex<PlcClient>>;

#[derive(Debug, Default)]
struct PoolState {
    idle: Vec<PooledClient>,
    created: usize,
}

/// Small-footprint pool of [`PlcClient`] instances for a single endpoint.
#[derive(Debug)]
pub struct ConnectionPool {
    host: String,
    port: u16,
    timeouts: IoTimeouts,
    transport: Transport,
    max_size: usize,
    state: Mutex<PoolState>,
}

impl ConnectionPool {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        max_size: usize,
        timeouts: IoTimeouts,
        transport: Transport,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            timeouts,
            transport,
            max_size: max_size.max(1),
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Number of clients ever constructed by this pool. Never exceeds
    /// `max_size`.
    pub fn created(&self) -> usize {
        self.state.lock().expect("pool state poisoned").created
    }

    /// Take an idle client or construct a new one within the bound.
    pub async fn acquire(&self) -> Result<PooledClient> {
        {
            let mut state = self.state.lock().expect("pool state poisoned");
            if let Some(client) = state.idle.pop() {
                debug!("Reusing PlcClient from pool for {}:{}", self.host, self.port);
                return Ok(client);
            }
            if state.created >= self.max_size {
                return Err(PlcError::Connection("PLC connection pool exhausted".into()));
            }
            // Reserve the slot before the (slow) connect so concurrent
            // acquires cannot overshoot the bound.
            state.created += 1;
        }

        match self.create_client().await {
            Ok(client) => Ok(client),
            Err(e) => {
                let mut state = self.state.lock().expect("pool state poisoned");
                state.created -= 1;
                Err(e)
            }
        }
    }

    /// Return a client; drops it silently when the pool is already full.
    pub fn release(&self, client: PooledClient) {
        let mut state = self.state.lock().expect("pool state poisoned");
        if state.idle.len() < self.max_size {
            state.idle.push(client);
            debug!("PlcClient returned to pool for {}:{}", self.host, self.port);
        }
    }

    async fn create_client(&self) -> Result<PooledClient> {
        let client = PlcClient::connect(
            &self.host,
            self.port,
            self.timeouts,
            self.transport.clone(),
        )
        .await?;
        if !client.connected() {
            return Err(PlcError::Connection(
                "PlcClient failed to establish TCP connection".into(),
            ));
        }
        debug!("Created new PlcClient for pool ({}:{})", self.host, self.port);
        Ok(Arc::new(tokio::sync::Mutex::new(client)))
    }
}
