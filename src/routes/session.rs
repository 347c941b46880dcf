//! Session and entitlement endpoints
//!
//! `POST /api/session/signin` is called after the external authenticator
//! vouches for a user; it reads the remote entitlement document and creates
//! a fresh unpaid one if absent. The guest counter on the device is NOT
//! carried over. `GET /api/entitlement` reports the caller's current record
//! for UI display. `POST /api/payment/simulate` is the dev-mode-only manual
//! payment trigger.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::HeaderMap;
use hyper::{Request, Response, StatusCode};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

use crate::identity::Identity;
use crate::routes::{error_response, failure_response, identity_from_headers, json_response, read_json_body};
use crate::server::AppState;

/// Sign-in body, forwarded from the external authenticator
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignInBody {
    pub account_id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: String,
}

/// Handle POST /api/session/signin
pub async fn handle_sign_in(req: Request<Incoming>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    let body: SignInBody = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return failure_response(e),
    };
    if body.account_id.is_empty() {
        return error_response(StatusCode::BAD_REQUEST, "accountId must not be empty");
    }

    let identity = Identity::Account {
        account_id: body.account_id,
        email: body.email,
        display_name: body.display_name,
    };

    match state.entitlements.sign_in(&identity).await {
        Ok(record) => {
            info!(identity = %identity.storage_key(), "Sign-in reconciled entitlement record");
            json_response(StatusCode::OK, &record)
        }
        Err(e) => failure_response(e),
    }
}

/// Handle GET /api/entitlement
pub async fn handle_entitlement(
    headers: &HeaderMap,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let identity = match identity_from_headers(headers) {
        Ok(identity) => identity,
        Err(e) => return failure_response(e),
    };

    match state.entitlements.record(&identity).await {
        Ok(record) => json_response(StatusCode::OK, &record),
        Err(e) => failure_response(e),
    }
}

/// Simulate-payment body
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatePaymentBody {
    pub account_id: String,
}

/// Handle POST /api/payment/simulate (dev mode only; 404 otherwise)
pub async fn handle_simulate_payment(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    if !state.args.dev_mode {
        return error_response(StatusCode::NOT_FOUND, "not found");
    }

    let body: SimulatePaymentBody = match read_json_body(req).await {
        Ok(body) => body,
        Err(e) => return failure_response(e),
    };

    match state
        .entitlements
        .accounts()
        .grant_unlimited(&body.account_id)
        .await
    {
        Ok(()) => {
            info!(account_id = %body.account_id, "Simulated payment granted unlimited entitlement");
            json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
        }
        Err(e) => failure_response(e),
    }
}
