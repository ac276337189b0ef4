use crate::state::AppState;
use crate::{api, logging, middleware};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::Router;
use std::time::Duration;
use tower_http::compression::predicate::SizeAbove;
use tower_http::compression::CompressionLayer;
use tower_http::decompression::RequestDecompressionLayer;
use tower_http::timeout::TimeoutLayer;

/// Builds the HTTP application.
///
/// Request path, outermost first: logging, timeout, subnet filter, gzip
/// (request and response), decryption, MAC check, handler.
pub fn build_http_app(state: AppState, request_timeout: Duration) -> Router {
    api::routes()
        .layer(from_fn_with_state(state.clone(), middleware::verify_mac))
        .layer(from_fn_with_state(state.clone(), middleware::decrypt_body))
        .layer(CompressionLayer::new().compress_when(SizeAbove::new(0)))
        .layer(RequestDecompressionLayer::new())
        .layer(from_fn_with_state(state.clone(), middleware::subnet_filter))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(from_fn(logging::request_logging))
        .with_state(state)
}
