// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::sync::Arc;

use anyhow::{Context, Result};
use enip_client_rs::{
    cfg::{cli::resolve_config_path, config::Config, logger::init_logger},
    device::{config::load_configuration, store::ConfigurationStore},
    orchestrator::SessionOrchestrator,
    runtime::IoRuntime,
    session::manager::SessionManager,
    webapi::create_app,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let config_path = args.next().unwrap_or_else(|| "config.yaml".to_string());

    let config_file = resolve_config_path(&config_path).context("failed to resolve config path")?;
    let cfg = Config::load_from_file(config_file).context("failed to load config")?;

    let _logger_guard = init_logger("config_logger.yaml").ok();

    let manager = Arc::new(SessionManager::new(
        cfg.plc.host.clone(),
        cfg.plc.port,
        cfg.plc.pool_size,
        cfg.io_timeouts(),
        cfg.transport(),
    ));
    let runtime = Arc::new(IoRuntime::new());
    let orchestrator = Arc::new(SessionOrchestrator::new(
        Arc::clone(&manager),
        Arc::clone(&runtime),
        cfg.orchestrator_settings(),
    ));
    let store = Arc::new(ConfigurationStore::new());

    // An optional second argument points at a device configuration to load
    // up front; it can also be applied later through the API.
    if let Some(device_xml) = args.next() {
        let xml = std::fs::read_to_string(&device_xml)
            .with_context(|| format!("failed to read device configuration {device_xml}"))?;
        let configuration = load_configuration(&xml)
            .with_context(|| format!("failed to parse device configuration {device_xml}"))?;
        let state = store.load(configuration);
        if let Some(configuration) = state.configuration {
            orchestrator.apply_configuration(configuration).await?;
            info!("device configuration {device_xml} loaded");
        }
    }

    let app = create_app(orchestrator, store, cfg.http.api_token.clone());
    let listener = tokio::net::TcpListener::bind(&cfg.http.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", cfg.http.bind_addr))?;
    info!(
        "CIP/ENIP orchestration API listening on {}",
        cfg.http.bind_addr
    );
    axum::serve(listener, app).await.context("server failed")?;
    Ok(())
}
