use axum::body::{Body, Bytes};
use axum::extract::State;
use axum::http::{header, HeaderName, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::{engine::general_purpose, Engine as _};
use telemon_common::crypto;

use crate::error::ServiceError;
use crate::logging::TraceId;
use crate::state::AppState;

/// Response header carrying the MAC of the response body.
static HASH_RESPONSE_HEADER: HeaderName = HeaderName::from_static("hashsha256");

/// Upper bound on a buffered request body.
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

async fn read_body(body: Body, trace_id: &str) -> Result<Bytes, Response> {
    axum::body::to_bytes(body, MAX_BODY_BYTES).await.map_err(|e| {
        tracing::warn!(trace_id = %trace_id, error = %e, "Unreadable request body");
        ServiceError::InvalidArgument(format!("unreadable request body: {e}"))
            .traced(trace_id)
            .into_response()
    })
}

/// Rejects requests whose `X-Real-IP` is outside the trusted subnet.
pub async fn subnet_filter(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if !state.envelope.subnet.is_enabled() {
        return next.run(req).await;
    }

    let real_ip = req
        .headers()
        .get(crypto::REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());
    match state.envelope.subnet.check(real_ip) {
        Ok(()) => next.run(req).await,
        Err(e) => {
            let trace_id = TraceId::of(&req);
            tracing::warn!(
                trace_id = %trace_id,
                real_ip = real_ip.unwrap_or("-"),
                error = %e,
                "Request rejected by subnet filter"
            );
            e.traced(&trace_id).into_response()
        }
    }
}

/// Replaces a base64, RSA-encrypted body with its plaintext.
///
/// Runs after transport decompression; an empty body passes through.
pub async fn decrypt_body(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(private_key) = state.envelope.private_key.clone() else {
        return next.run(req).await;
    };

    let trace_id = TraceId::of(&req);
    let (mut parts, body) = req.into_parts();
    let bytes = match read_body(body, &trace_id).await {
        Ok(bytes) => bytes,
        Err(resp) => return resp,
    };
    if bytes.is_empty() {
        return next.run(Request::from_parts(parts, Body::from(bytes))).await;
    }

    let cipher = match general_purpose::STANDARD.decode(&bytes) {
        Ok(cipher) => cipher,
        Err(e) => {
            tracing::warn!(trace_id = %trace_id, error = %e, "Encrypted body is not base64");
            return ServiceError::from(crypto::EnvelopeError::from(e))
                .traced(&trace_id)
                .into_response();
        }
    };

    let plain = tokio::task::spawn_blocking(move || crypto::decrypt(&private_key, &cipher)).await;
    let plain = match plain {
        Ok(Ok(plain)) => plain,
        Ok(Err(e)) => {
            tracing::error!(trace_id = %trace_id, error = %e, "Body decryption failed");
            return ServiceError::from(e).traced(&trace_id).into_response();
        }
        Err(e) => {
            return ServiceError::Internal(format!("decryption task failed: {e}"))
                .traced(&trace_id)
                .into_response();
        }
    };

    parts.headers.remove(header::CONTENT_LENGTH);
    next.run(Request::from_parts(parts, Body::from(plain))).await
}

/// Checks the `HashSHA256` MAC of the request body and signs the response.
pub async fn verify_mac(State(state): State<AppState>, req: Request<Body>, next: Next) -> Response {
    let Some(key) = state.envelope.key.clone() else {
        return next.run(req).await;
    };

    let trace_id = TraceId::of(&req);
    let (parts, body) = req.into_parts();
    let bytes = match read_body(body, &trace_id).await {
        Ok(bytes) => bytes,
        Err(resp) => return resp,
    };

    if !bytes.is_empty() {
        let tag = parts
            .headers
            .get(crypto::HASH_HEADER)
            .and_then(|v| v.to_str().ok());
        let checked = match tag {
            None => Err(ServiceError::InvalidArgument(format!(
                "missing {} header",
                crypto::HASH_HEADER
            ))),
            Some(tag) => crypto::verify(&bytes, &key, tag).map_err(ServiceError::from),
        };
        if let Err(e) = checked {
            tracing::warn!(trace_id = %trace_id, error = %e, "Request MAC rejected");
            return e.traced(&trace_id).into_response();
        }
    }

    let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;

    let (mut parts, body) = response.into_parts();
    let body = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(body) => body,
        Err(e) => {
            return ServiceError::Internal(format!("unreadable response body: {e}"))
                .traced(&trace_id)
                .into_response();
        }
    };
    match crypto::sign(&body, &key).map(|tag| HeaderValue::from_str(&tag)) {
        Ok(Ok(value)) => {
            parts.headers.insert(HASH_RESPONSE_HEADER.clone(), value);
        }
        Ok(Err(e)) => tracing::error!(trace_id = %trace_id, error = %e, "Invalid MAC header value"),
        Err(e) => tracing::error!(trace_id = %trace_id, error = %e, "Response signing failed"),
    }
    Response::from_parts(parts, Body::from(body))
}
