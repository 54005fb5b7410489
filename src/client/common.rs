// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::time::Duration;

use tokio::time::timeout;

use crate::errors::{PlcError, Result};

/// Per-client socket timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for IoTimeouts {
    fn default() -> Self {
        Self {
            connect: Duration::from_secs(5),
            read: Duration::from_secs(5),
            write: Duration::from_secs(5),
        }
    }
}

/// Run a socket operation under a deadline. A timeout surfaces as
/// `Connection("Timed out while <label>")`.
pub(super) async fn io_with_timeout<F, T>(label: &str, fut: F, io_timeout: Duration) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match timeout(io_timeout, fut).await {
        Ok(Ok(v)) => Ok(v),
        Ok(Err(e)) => Err(PlcError::Connection(format!("{label} failed: {e}"))),
        Err(_) => Err(PlcError::Connection(format!("Timed out while {label}"))),
    }
}
