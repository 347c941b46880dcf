//! History endpoints
//!
//! `GET /api/history` lists the caller's past diagnoses newest-first;
//! `DELETE /api/history/{id}` removes one entry.

use bytes::Bytes;
use http_body_util::Full;
use hyper::header::HeaderMap;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::history::HistoryEntry;
use crate::routes::{error_response, failure_response, identity_from_headers, json_response};
use crate::server::AppState;

/// History list response body
#[derive(Serialize)]
pub struct HistoryResponse {
    pub entries: Vec<HistoryEntry>,
}

/// Handle GET /api/history
pub async fn handle_history_list(
    headers: &HeaderMap,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let identity = match identity_from_headers(headers) {
        Ok(identity) => identity,
        Err(e) => return failure_response(e),
    };

    let entries = state.history.list(&identity.storage_key()).await;
    json_response(StatusCode::OK, &HistoryResponse { entries })
}

/// Handle DELETE /api/history/{id}
pub async fn handle_history_delete(
    headers: &HeaderMap,
    id_segment: &str,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let identity = match identity_from_headers(headers) {
        Ok(identity) => identity,
        Err(e) => return failure_response(e),
    };

    let id: i64 = match id_segment.parse() {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::BAD_REQUEST, "history id must be numeric"),
    };

    match state.history.remove(&identity.storage_key(), id).await {
        Ok(()) => json_response(StatusCode::OK, &serde_json::json!({ "deleted": id })),
        Err(e) => failure_response(e),
    }
}
