use crate::error::{ServiceError, TracedError};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, State};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use std::fmt::Write;
use telemon_common::types::{Metric, MetricDto, MetricKind, MetricQuery, MetricValue};

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ping", get(ping))
        .route("/update/", post(update_json))
        .route("/update/:kind/:name/:value", post(update_path))
        .route("/updates/", post(bulk_update))
        .route("/value/", post(value_json))
        .route("/value/:kind/:name", get(value_path))
}

/// Parses a JSON request body. Any decode failure is the client's fault.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::InvalidArgument(format!("invalid JSON body: {e}")))
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

fn render_index(metrics: &[Metric]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html>\n<head><title>Metrics</title></head>\n<body>\n<table>\n\
         <tr><th>Name</th><th>Kind</th><th>Value</th></tr>\n",
    );
    for metric in metrics {
        let _ = writeln!(
            html,
            "<tr><td>{}</td><td>{}</td><td>{}</td></tr>",
            escape_html(&metric.name),
            metric.kind(),
            metric.value
        );
    }
    html.push_str("</table>\n</body>\n</html>\n");
    html
}

async fn index(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
) -> Result<Html<String>, TracedError> {
    let metrics = state.service.get_all().await.map_err(|e| e.traced(&trace_id))?;
    Ok(Html(render_index(&metrics)))
}

async fn ping(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
) -> Result<&'static str, TracedError> {
    state.service.ping().await.map_err(|e| {
        tracing::error!(trace_id = %trace_id.0, error = %e, "Storage ping failed");
        e.traced(&trace_id)
    })?;
    Ok("pong")
}

/// `POST /update/{kind}/{name}/{value}`; answers with the stored value.
async fn update_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name, value)): Path<(String, String, String)>,
) -> Result<String, TracedError> {
    let result: Result<Metric, ServiceError> = async {
        let kind: MetricKind = kind.parse()?;
        let value = MetricValue::parse(kind, &value)?;
        let dto = MetricDto::from(Metric { name, value });
        state.service.add(&dto).await
    }
    .await;
    let stored = result.map_err(|e| e.traced(&trace_id))?;
    Ok(stored.value.to_string())
}

async fn update_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Result<Json<MetricDto>, TracedError> {
    let result = async {
        let dto: MetricDto = parse_json(&body)?;
        state.service.add(&dto).await
    }
    .await;
    let stored = result.map_err(|e| e.traced(&trace_id))?;
    Ok(Json(MetricDto::from(stored)))
}

async fn bulk_update(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Result<Json<Vec<MetricDto>>, TracedError> {
    let result = async {
        let dtos: Vec<MetricDto> = parse_json(&body)?;
        state.service.bulk_add(&dtos).await
    }
    .await;
    let stored = result.map_err(|e| e.traced(&trace_id))?;
    tracing::info!(trace_id = %trace_id.0, count = stored.len(), "Bulk update stored");
    Ok(Json(stored.iter().map(MetricDto::from).collect()))
}

async fn value_json(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    body: Bytes,
) -> Result<Json<MetricDto>, TracedError> {
    let result = async {
        let query: MetricQuery = parse_json(&body)?;
        state.service.find(&query).await
    }
    .await;
    let metric = result.map_err(|e| e.traced(&trace_id))?;
    Ok(Json(MetricDto::from(metric)))
}

/// `GET /value/{kind}/{name}`: the bare value as plain text.
async fn value_path(
    State(state): State<AppState>,
    Extension(trace_id): Extension<TraceId>,
    Path((kind, name)): Path<(String, String)>,
) -> Response {
    let query = MetricQuery { id: name, kind };
    match state.service.find(&query).await {
        Ok(metric) => metric.value.to_string().into_response(),
        Err(e) => e.traced(&trace_id).into_response(),
    }
}
