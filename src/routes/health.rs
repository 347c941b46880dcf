//! Health check endpoint
//!
//! Liveness probe: returns 200 whenever the gateway is running. Account
//! store connectivity is reported but never blocks the probe - guests can
//! diagnose without it.

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::json_response;
use crate::server::AppState;

/// Health response body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub healthy: bool,
    /// Service version
    pub version: &'static str,
    /// Uptime in seconds
    pub uptime: u64,
    /// Operating mode
    pub mode: &'static str,
    /// Whether the remote account store is reachable
    pub account_store_connected: bool,
    /// Current timestamp
    pub timestamp: String,
}

/// Handle GET /health and /healthz
pub fn health_check(state: &Arc<AppState>) -> Response<Full<Bytes>> {
    let body = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started_at.elapsed().as_secs(),
        mode: if state.args.dev_mode {
            "development"
        } else {
            "production"
        },
        account_store_connected: state.account_store_connected,
        timestamp: chrono::Utc::now().to_rfc3339(),
    };
    json_response(StatusCode::OK, &body)
}
