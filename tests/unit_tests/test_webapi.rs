// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use enip_client_rs::{
    client::{common::IoTimeouts, transport::Transport},
    device::store::ConfigurationStore,
    orchestrator::{OrchestratorSettings, SessionOrchestrator},
    runtime::IoRuntime,
    session::manager::SessionManager,
    webapi::create_app,
};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

const DEVICE_XML: &str = r#"
<Device>
  <Identity name="demo" />
  <Assemblies>
    <Assembly alias="inputs" class_id="0x04" instance_id="0x64" direction="input" size="8" />
    <Assembly alias="outputs" class_id="0x04" instance_id="0x65" direction="output" size="8" />
  </Assemblies>
</Device>
"#;

fn build_app(token: Option<&str>) -> Router {
    let manager = Arc::new(SessionManager::new(
        "plc.local",
        44818,
        4,
        IoTimeouts::default(),
        Transport::offline_with_defaults(),
    ));
    let orchestrator = Arc::new(SessionOrchestrator::new(
        manager,
        Arc::new(IoRuntime::new()),
        OrchestratorSettings {
            poll_interval: Duration::from_millis(20),
            dispatch_timeout: Duration::from_millis(25),
            output_timeout: Duration::from_millis(500),
            worker_join_timeout: Duration::from_millis(500),
        },
    ));
    create_app(
        orchestrator,
        Arc::new(ConfigurationStore::new()),
        token.map(str::to_string),
    )
}

fn authed(request: axum::http::request::Builder) -> axum::http::request::Builder {
    request.header(header::AUTHORIZATION, "Bearer secret")
}

async fn body_json(response: axum::response::Response) -> Result<Value> {
    let bytes = response.into_body().collect().await?.to_bytes();
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn missing_bearer_token_is_unauthorized() -> Result<()> {
    let app = build_app(Some("secret"));
    let response = app
        .oneshot(Request::get("/configuration").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn wrong_bearer_token_is_unauthorized() -> Result<()> {
    let app = build_app(Some("secret"));
    let response = app
        .oneshot(
            Request::get("/configuration")
                .header(header::AUTHORIZATION, "Bearer nope")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    Ok(())
}

#[tokio::test]
async fn auth_is_disabled_without_a_token() -> Result<()> {
    let app = build_app(None);
    let response = app
        .oneshot(Request::get("/configuration").body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["loaded"], Value::Bool(false));
    Ok(())
}

#[tokio::test]
async fn unknown_session_maps_to_not_found() -> Result<()> {
    let app = build_app(Some("secret"));
    let response = app
        .oneshot(authed(Request::get("/sessions/no-such-session")).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn session_start_returns_created_with_an_id() -> Result<()> {
    let app = build_app(Some("secret"));
    let response = app
        .clone()
        .oneshot(authed(Request::post("/sessions")).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    let session_id = body["session_id"].as_str().expect("session id").to_string();
    assert!(body["connection"]["connected"].as_bool().expect("connected"));

    let response = app
        .oneshot(
            authed(Request::get(format!("/sessions/{session_id}/diagnostics")))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["session_id"], Value::String(session_id));
    assert!(body["keep_alive_active"].as_bool().expect("keep alive"));
    Ok(())
}

#[tokio::test]
async fn configuration_and_io_write_flow() -> Result<()> {
    let app = build_app(Some("secret"));

    let response = app
        .clone()
        .oneshot(authed(Request::put("/configuration")).body(Body::from(DEVICE_XML))?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["loaded"], Value::Bool(true));

    let response = app
        .clone()
        .oneshot(authed(Request::post("/sessions")).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = body_json(response).await?;
    let session_id = body["session_id"].as_str().expect("session id").to_string();

    let response = app
        .clone()
        .oneshot(
            authed(Request::post(format!("/sessions/{session_id}/io/outputs")))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"payload_hex":"1122334455667788"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["code"], Value::from(0));

    let response = app
        .clone()
        .oneshot(
            authed(Request::get(format!("/sessions/{session_id}/io/outputs")))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await?;
    assert_eq!(body["payload"], Value::String("1122334455667788".to_string()));

    // Writes to an input-only alias map to 400.
    let response = app
        .oneshot(
            authed(Request::post(format!("/sessions/{session_id}/io/inputs")))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(r#"{"payload_hex":"0000000000000000"}"#))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn malformed_configuration_maps_to_bad_request_or_unprocessable() -> Result<()> {
    let app = build_app(Some("secret"));
    let response = app
        .clone()
        .oneshot(authed(Request::put("/configuration")).body(Body::from("<Device"))?)
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let duplicate = r#"
    <Device>
      <Assembly alias="x" class_id="4" instance_id="1" direction="input" />
      <Assembly alias="X" class_id="4" instance_id="2" direction="input" />
    </Device>
    "#;
    let response = app
        .oneshot(authed(Request::put("/configuration")).body(Body::from(duplicate))?)
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    Ok(())
}

#[tokio::test]
async fn unsupported_transport_maps_to_bad_request() -> Result<()> {
    let app = build_app(Some("secret"));
    let response = app
        .clone()
        .oneshot(authed(Request::post("/sessions")).body(Body::empty())?)
        .await?;
    let body = body_json(response).await?;
    let session_id = body["session_id"].as_str().expect("session id").to_string();

    let command = r#"{"service": 78, "path": {"class_id": 4, "instance_id": 100}, "transport": "smoke"}"#;
    let response = app
        .oneshot(
            authed(Request::post(format!("/sessions/{session_id}/commands")))
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(command))?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    Ok(())
}
