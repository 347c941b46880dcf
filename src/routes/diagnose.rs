//! Diagnosis endpoint
//!
//! `POST /api/diagnose` - accepts a base64 crop photo plus crop name,
//! normalizes the image, and runs it through the quota-enforced
//! orchestrator. Quota and oracle failures come back as typed JSON errors,
//! never as a dropped connection.

use base64::Engine;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::diagnosis::DiagnosisRequest;
use crate::ingest;
use crate::routes::{failure_response, identity_from_headers, json_response, read_json_body};
use crate::server::AppState;
use crate::types::CropgateError;

/// Diagnosis request body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseBody {
    /// Base64-encoded image bytes
    pub image: String,
    /// MIME type of the upload
    #[serde(default = "default_mime")]
    pub mime: String,
    /// Crop the photo shows (tomato, maize, ...)
    pub crop: String,
}

fn default_mime() -> String {
    "image/jpeg".to_string()
}

/// Diagnosis response body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnoseResponse {
    pub diagnosis: String,
    pub history_id: i64,
    pub captured_at: String,
    /// Diagnoses left; absent for paid (unlimited) identities
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    /// Storage degradation notice
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

/// Handle POST /api/diagnose
pub async fn handle_diagnose(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let identity = match identity_from_headers(req.headers()) {
        Ok(identity) => identity,
        Err(e) => return failure_response(e),
    };

    let body: DiagnoseBody = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return failure_response(e),
    };

    let raw = match base64::engine::general_purpose::STANDARD.decode(&body.image) {
        Ok(raw) => raw,
        Err(e) => {
            return failure_response(CropgateError::Validation(format!(
                "image is not valid base64: {}",
                e
            )))
        }
    };

    debug!(
        bytes = raw.len(),
        crop = %body.crop,
        identity = %identity.storage_key(),
        "Diagnosis requested"
    );

    let image = ingest::prepare_image(raw, &body.mime);
    let request = DiagnosisRequest {
        image,
        crop: body.crop,
        identity,
    };

    match state.orchestrator.diagnose(request).await {
        Ok(outcome) => json_response(
            StatusCode::OK,
            &DiagnoseResponse {
                diagnosis: outcome.diagnosis,
                history_id: outcome.history_id,
                captured_at: outcome.captured_at.to_rfc3339(),
                remaining: outcome.remaining,
                warning: outcome.warning,
            },
        ),
        Err(e) => failure_response(e),
    }
}
