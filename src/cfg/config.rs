// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{fs, path::Path, time::Duration};

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};

use crate::{
    client::{common::IoTimeouts, transport::Transport},
    orchestrator::OrchestratorSettings,
};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Config {
    /// Endpoint, pooling and socket-timeout settings for the PLC link.
    pub plc: PlcConfig,
    /// Worker cadence and output-wait settings.
    #[serde(default)]
    pub runtime: RuntimeConfig,
    /// Web adapter settings.
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct PlcConfig {
    #[serde(rename = "Host")]
    /// PLC address used when a session request names no host.
    pub host: String,

    #[serde(default = "default_port", rename = "Port")]
    /// EtherNet/IP TCP port.
    pub port: u16,

    #[serde(default = "default_pool_size", rename = "PoolSize")]
    /// Upper bound on clients created per endpoint.
    pub pool_size: usize,

    #[serde(default = "default_io_secs", rename = "ConnectTimeout", with = "serde_secs")]
    /// Timeout for establishing the TCP connection.
    pub connect_timeout: Duration,

    #[serde(default = "default_io_secs", rename = "ReadTimeout", with = "serde_secs")]
    /// Timeout applied to every socket read.
    pub read_timeout: Duration,

    #[serde(default = "default_io_secs", rename = "WriteTimeout", with = "serde_secs")]
    /// Timeout applied to every socket write.
    pub write_timeout: Duration,

    #[serde(default, rename = "Offline")]
    /// Serve fixture data instead of opening sockets.
    pub offline: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RuntimeConfig {
    #[serde(default = "default_poll_ms", rename = "PollIntervalMs", with = "serde_millis")]
    /// Pause between poll rounds of one input assembly.
    pub poll_interval: Duration,

    #[serde(default = "default_dispatch_ms", rename = "DispatchTimeoutMs", with = "serde_millis")]
    /// Dequeue wait of the dispatch workers.
    pub dispatch_timeout: Duration,

    #[serde(default = "default_output_ms", rename = "OutputTimeoutMs", with = "serde_millis")]
    /// How long `write_assembly` waits for completion.
    pub output_timeout: Duration,

    #[serde(default = "default_join_ms", rename = "WorkerJoinTimeoutMs", with = "serde_millis")]
    /// Best-effort deadline when joining workers at teardown.
    pub worker_join_timeout: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_ms(),
            dispatch_timeout: default_dispatch_ms(),
            output_timeout: default_output_ms(),
            worker_join_timeout: default_join_ms(),
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct HttpConfig {
    #[serde(default = "default_bind", rename = "BindAddr")]
    /// Address the web adapter listens on.
    pub bind_addr: String,

    #[serde(default, rename = "ApiToken")]
    /// Bearer token required by the web adapter; auth is disabled when
    /// unset.
    pub api_token: Option<String>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind(),
            api_token: None,
        }
    }
}

impl Config {
    /// Loads the configuration from YAML, applies environment overrides,
    /// validates it, and returns the ready-to-use value.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let s = fs::read_to_string(path)?;
        let mut cfg: Config = serde_yaml::from_str(&s).context("failed to parse config YAML")?;
        cfg.apply_env_overrides()?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// `PLC_HOST`, `PLC_PORT`, `PLC_POOL_SIZE` and `PLC_API_TOKEN` override
    /// whatever the file says.
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var("PLC_HOST")
            && !host.is_empty()
        {
            self.plc.host = host;
        }
        if let Ok(port) = std::env::var("PLC_PORT")
            && !port.is_empty()
        {
            self.plc.port = port
                .parse()
                .with_context(|| format!("invalid PLC_PORT '{port}'"))?;
        }
        if let Ok(size) = std::env::var("PLC_POOL_SIZE")
            && !size.is_empty()
        {
            self.plc.pool_size = size
                .parse()
                .with_context(|| format!("invalid PLC_POOL_SIZE '{size}'"))?;
        }
        if let Ok(token) = std::env::var("PLC_API_TOKEN")
            && !token.is_empty()
        {
            self.http.api_token = Some(token);
        }
        Ok(())
    }

    /// Validates invariants and normalizes derived fields.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.plc.host.is_empty(), "Host must not be empty");
        ensure!(self.plc.port != 0, "Port must not be zero");
        ensure!(self.plc.pool_size >= 1, "PoolSize must be >= 1");
        ensure!(
            !self.runtime.poll_interval.is_zero(),
            "PollIntervalMs must be > 0"
        );
        ensure!(
            !self.runtime.dispatch_timeout.is_zero(),
            "DispatchTimeoutMs must be > 0"
        );
        if let Some(token) = &self.http.api_token {
            ensure!(!token.is_empty(), "ApiToken must not be empty when set");
        }
        Ok(())
    }

    pub fn io_timeouts(&self) -> IoTimeouts {
        IoTimeouts {
            connect: self.plc.connect_timeout,
            read: self.plc.read_timeout,
            write: self.plc.write_timeout,
        }
    }

    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            poll_interval: self.runtime.poll_interval,
            dispatch_timeout: self.runtime.dispatch_timeout,
            output_timeout: self.runtime.output_timeout,
            worker_join_timeout: self.runtime.worker_join_timeout,
        }
    }

    pub fn transport(&self) -> Transport {
        if self.plc.offline {
            Transport::offline_with_defaults()
        } else {
            Transport::Tcp
        }
    }
}

fn default_port() -> u16 {
    44818
}

fn default_pool_size() -> usize {
    2
}

fn default_io_secs() -> Duration {
    Duration::from_secs(5)
}

fn default_poll_ms() -> Duration {
    Duration::from_millis(200)
}

fn default_dispatch_ms() -> Duration {
    Duration::from_millis(250)
}

fn default_output_ms() -> Duration {
    Duration::from_secs(5)
}

fn default_join_ms() -> Duration {
    Duration::from_secs(1)
}

fn default_bind() -> String {
    "127.0.0.1:8000".to_string()
}

/// Serde helpers for representing `Duration` as a number of seconds.
mod serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde helpers for representing `Duration` as a number of milliseconds.
mod serde_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let millis = u64::deserialize(d)?;
        Ok(Duration::from_millis(millis))
    }
}
