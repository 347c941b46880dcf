//! HTTP routes for Cropgate

pub mod diagnose;
pub mod health;
pub mod history;
pub mod session;
pub mod webhook;

pub use diagnose::handle_diagnose;
pub use health::health_check;
pub use history::{handle_history_delete, handle_history_list};
pub use session::{handle_entitlement, handle_sign_in, handle_simulate_payment};
pub use webhook::handle_payment_webhook;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::identity::Identity;
use crate::types::{CropgateError, Result};

/// Build a JSON response
pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let payload = serde_json::to_vec(body).unwrap_or_else(|_| b"{}".to_vec());
    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(Bytes::from(payload)))
        .unwrap()
}

/// Build a JSON error response
pub fn error_response(status: StatusCode, message: &str) -> Response<Full<Bytes>> {
    json_response(status, &serde_json::json!({ "error": message }))
}

/// Convert an operation failure into its HTTP response
pub fn failure_response(err: CropgateError) -> Response<Full<Bytes>> {
    let (status, body) = err.into_status_code_and_body();
    error_response(status, &body)
}

/// Collect and deserialize a JSON request body
pub async fn read_json_body<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T> {
    let body = req
        .collect()
        .await
        .map_err(|e| CropgateError::BadRequest(format!("unreadable body: {}", e)))?
        .to_bytes();
    serde_json::from_slice(&body)
        .map_err(|e| CropgateError::BadRequest(format!("invalid JSON body: {}", e)))
}

/// Resolve the caller identity from request headers.
///
/// Signed-in callers send `X-Account-Id` (+ email / display name) as vouched
/// for by the external authenticator; everyone else is a guest identified by
/// the opaque `X-Device-Id` token the client generated.
pub fn identity_from_headers(headers: &HeaderMap) -> Result<Identity> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };

    if let Some(account_id) = header("X-Account-Id") {
        return Ok(Identity::Account {
            account_id,
            email: header("X-Account-Email").unwrap_or_default(),
            display_name: header("X-Account-Name").unwrap_or_default(),
        });
    }

    match header("X-Device-Id") {
        Some(device_id) if !device_id.is_empty() => Ok(Identity::Guest { device_id }),
        _ => Err(CropgateError::BadRequest(
            "missing X-Account-Id or X-Device-Id header".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::header::HeaderValue;

    #[test]
    fn account_headers_win_over_device_header() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Account-Id", HeaderValue::from_static("acc-1"));
        headers.insert("X-Account-Email", HeaderValue::from_static("a@example.com"));
        headers.insert("X-Device-Id", HeaderValue::from_static("dev-1"));

        let identity = identity_from_headers(&headers).unwrap();
        assert!(identity.is_account());
    }

    #[test]
    fn device_header_yields_guest() {
        let mut headers = HeaderMap::new();
        headers.insert("X-Device-Id", HeaderValue::from_static("dev-1"));

        let identity = identity_from_headers(&headers).unwrap();
        assert_eq!(
            identity,
            Identity::Guest {
                device_id: "dev-1".into()
            }
        );
    }

    #[test]
    fn missing_identity_headers_are_rejected() {
        assert!(identity_from_headers(&HeaderMap::new()).is_err());
    }
}
