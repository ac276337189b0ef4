#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use rsa::pkcs1::{EncodeRsaPrivateKey, EncodeRsaPublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemon_server::app;
use telemon_server::durability::{Durability, DurabilityMode};
use telemon_server::envelope::EnvelopeSettings;
use telemon_server::service::MetricsService;
use telemon_server::state::AppState;
use telemon_common::types::Metric;
use telemon_storage::{MemStorage, Storage, StorageError};
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub fn build_test_context() -> Result<TestContext> {
    build_test_context_with(EnvelopeSettings::default(), None)
}

/// In-memory store, optional snapshot file `metrics-db.json` in the temp dir.
pub fn build_test_context_with(
    envelope: EnvelopeSettings,
    durability_mode: Option<DurabilityMode>,
) -> Result<TestContext> {
    build_test_context_on(Arc::new(MemStorage::new()), envelope, durability_mode)
}

pub fn build_test_context_on(
    storage: Arc<dyn Storage>,
    envelope: EnvelopeSettings,
    durability_mode: Option<DurabilityMode>,
) -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let durability = durability_mode.map(|mode| {
        Arc::new(Durability::new(
            storage.clone(),
            temp_dir.path().join("metrics-db.json"),
            mode,
        ))
    });
    let service = Arc::new(MetricsService::new(storage, durability));
    let state = AppState::new(service, envelope);
    let app = app::build_http_app(state.clone(), Duration::from_secs(5));
    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> Reply {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    Reply {
        status,
        headers,
        body,
    }
}

pub async fn get(app: &axum::Router, uri: &str) -> Reply {
    let req = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn post(app: &axum::Router, uri: &str, body: impl Into<Body>) -> Reply {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(body.into())
        .expect("request should build");
    send(app, req).await
}

pub async fn post_with_headers(
    app: &axum::Router,
    uri: &str,
    headers: &[(&str, &str)],
    body: impl Into<Body>,
) -> Reply {
    let mut builder = Request::builder().method("POST").uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let req = builder.body(body.into()).expect("request should build");
    send(app, req).await
}

/// A fresh 1024-bit key pair written as PKCS#1 PEM files.
pub fn write_key_pair(dir: &std::path::Path) -> Result<(RsaPrivateKey, PathBuf, PathBuf)> {
    let key = RsaPrivateKey::new(&mut rand::thread_rng(), 1024)?;
    let private_path = dir.join("private.pem");
    let public_path = dir.join("public.pem");
    std::fs::write(&private_path, key.to_pkcs1_pem(LineEnding::LF)?.as_bytes())?;
    std::fs::write(
        &public_path,
        RsaPublicKey::from(&key).to_pkcs1_pem(LineEnding::LF)?,
    )?;
    Ok((key, private_path, public_path))
}

/// A backend whose connection is gone: every call fails as unavailable.
pub struct UnreachableStorage;

fn down<T>() -> telemon_storage::Result<T> {
    Err(StorageError::Unavailable("connection refused".into()))
}

#[async_trait]
impl Storage for UnreachableStorage {
    async fn save(&self, _name: &str, _metric: Metric) -> telemon_storage::Result<()> {
        down()
    }

    async fn update(&self, _name: &str, _metric: Metric) -> telemon_storage::Result<()> {
        down()
    }

    async fn get(&self, _name: &str) -> telemon_storage::Result<Metric> {
        down()
    }

    async fn has(&self, _name: &str) -> telemon_storage::Result<bool> {
        down()
    }

    async fn all(&self) -> telemon_storage::Result<Vec<Metric>> {
        down()
    }

    async fn all_with_keys(&self) -> telemon_storage::Result<HashMap<String, Metric>> {
        down()
    }

    async fn fill(&self, _records: HashMap<String, Metric>) -> telemon_storage::Result<()> {
        down()
    }

    async fn get_by_ids(&self, _ids: &[String]) -> telemon_storage::Result<Vec<Metric>> {
        down()
    }

    async fn bulk_insert_or_update(&self, _metrics: Vec<Metric>) -> telemon_storage::Result<()> {
        down()
    }

    async fn ping(&self) -> telemon_storage::Result<()> {
        down()
    }

    async fn reset(&self) -> telemon_storage::Result<()> {
        down()
    }
}
