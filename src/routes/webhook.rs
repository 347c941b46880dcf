//! Payment webhook receiver
//!
//! Runs out-of-band from any diagnosis session and mutates the same account
//! entitlement documents the orchestrator reads. The payment provider posts
//! pledge events; anything that is not a `pledge_created` event for our
//! organization is deliberately skipped with a 200 so the provider stops
//! redelivering it. The grant is a fixed assignment, so redelivery of a
//! matching event is harmless.
//!
//! Retry on processing errors is the provider's responsibility; nothing is
//! retried here.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Request, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;
use tracing::{info, warn};

use crate::entitlement::AccountEntitlements;
use crate::routes::{error_response, json_response};
use crate::server::AppState;

/// Event type honored by the receiver
const PLEDGE_CREATED: &str = "pledge_created";

/// What processing one event decided
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// Event type or organization did not match the expected pair
    Skipped,
    /// Payer email matched an account; unlimited entitlement assigned
    Granted { email: String },
    /// No account document carries the payer email
    NoMatch { email: String },
    /// Malformed-but-matching payload or store failure
    Error(String),
}

/// Decide and apply the entitlement mutation for one payment event.
///
/// Email matching is a case-sensitive exact comparison against the first
/// matching account document; email uniqueness is not enforced anywhere in
/// the data model, so ties go to the first match.
pub async fn process_event(
    event: &Value,
    expected_organization: &str,
    accounts: &Arc<dyn AccountEntitlements>,
) -> WebhookOutcome {
    let event_type = event.get("type").and_then(Value::as_str);
    if event_type != Some(PLEDGE_CREATED) {
        return WebhookOutcome::Skipped;
    }

    let organization = event
        .pointer("/payload/pledge/pledge_tier/organization/name")
        .and_then(Value::as_str);
    if organization != Some(expected_organization) {
        return WebhookOutcome::Skipped;
    }

    let Some(email) = event
        .pointer("/payload/pledge/pledger/email")
        .and_then(Value::as_str)
    else {
        return WebhookOutcome::Error("pledge event carries no payer email".into());
    };

    let account = match accounts.find_by_email(email).await {
        Ok(account) => account,
        Err(e) => return WebhookOutcome::Error(e.to_string()),
    };
    let Some(account) = account else {
        return WebhookOutcome::NoMatch {
            email: email.to_string(),
        };
    };

    match accounts.grant_unlimited(&account.account_id).await {
        Ok(()) => WebhookOutcome::Granted {
            email: email.to_string(),
        },
        Err(e) => WebhookOutcome::Error(e.to_string()),
    }
}

/// Handle POST /webhook/payment
pub async fn handle_payment_webhook(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Response<Full<Bytes>> {
    let body = match req.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!(error = %e, "Webhook body unreadable");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "unreadable body");
        }
    };

    let event: Value = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "Webhook payload is not JSON");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "invalid payload");
        }
    };

    match process_event(&event, &state.args.webhook_organization, state.entitlements.accounts())
        .await
    {
        WebhookOutcome::Skipped => {
            json_response(StatusCode::OK, &serde_json::json!({ "status": "skipped" }))
        }
        WebhookOutcome::Granted { email } => {
            info!(email = %email, "Payment webhook granted unlimited entitlement");
            json_response(StatusCode::OK, &serde_json::json!({ "status": "ok" }))
        }
        WebhookOutcome::NoMatch { email } => {
            warn!(email = %email, "Payment webhook matched no account");
            error_response(StatusCode::NOT_FOUND, "no matching account")
        }
        WebhookOutcome::Error(message) => {
            warn!("Payment webhook processing failed: {}", message);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, &message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schemas::UNLIMITED_SENTINEL;
    use crate::entitlement::MemoryAccountEntitlements;
    use serde_json::json;

    const ORG: &str = "Cropgate";

    fn pledge_event(event_type: &str, organization: &str, email: &str) -> Value {
        json!({
            "type": event_type,
            "payload": {
                "pledge": {
                    "pledger": { "email": email },
                    "pledge_tier": { "organization": { "name": organization } }
                }
            }
        })
    }

    async fn store_with_account(email: &str) -> Arc<dyn AccountEntitlements> {
        let store = MemoryAccountEntitlements::default();
        store.ensure("acc-1", email, "A", 10).await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    async fn matching_event_grants_unlimited_paid_entitlement() {
        let accounts = store_with_account("a@example.com").await;
        let event = pledge_event(PLEDGE_CREATED, ORG, "a@example.com");

        let outcome = process_event(&event, ORG, &accounts).await;
        assert_eq!(
            outcome,
            WebhookOutcome::Granted {
                email: "a@example.com".into()
            }
        );

        let doc = accounts.fetch("acc-1").await.unwrap().unwrap();
        assert!(doc.has_paid);
        assert_eq!(doc.diagnosis_limit, UNLIMITED_SENTINEL);
    }

    #[tokio::test]
    async fn redelivered_event_is_idempotent() {
        let accounts = store_with_account("a@example.com").await;
        let event = pledge_event(PLEDGE_CREATED, ORG, "a@example.com");

        process_event(&event, ORG, &accounts).await;
        let outcome = process_event(&event, ORG, &accounts).await;
        assert!(matches!(outcome, WebhookOutcome::Granted { .. }));

        let doc = accounts.fetch("acc-1").await.unwrap().unwrap();
        assert!(doc.has_paid);
        assert_eq!(doc.diagnosis_limit, UNLIMITED_SENTINEL);
    }

    #[tokio::test]
    async fn unknown_email_reports_no_match_and_mutates_nothing() {
        let accounts = store_with_account("a@example.com").await;
        let event = pledge_event(PLEDGE_CREATED, ORG, "stranger@example.com");

        let outcome = process_event(&event, ORG, &accounts).await;
        assert_eq!(
            outcome,
            WebhookOutcome::NoMatch {
                email: "stranger@example.com".into()
            }
        );

        let doc = accounts.fetch("acc-1").await.unwrap().unwrap();
        assert!(!doc.has_paid);
    }

    #[tokio::test]
    async fn wrong_event_type_is_skipped() {
        let accounts = store_with_account("a@example.com").await;
        let event = pledge_event("pledge_deleted", ORG, "a@example.com");

        assert_eq!(
            process_event(&event, ORG, &accounts).await,
            WebhookOutcome::Skipped
        );
        assert!(!accounts.fetch("acc-1").await.unwrap().unwrap().has_paid);
    }

    #[tokio::test]
    async fn wrong_organization_is_skipped() {
        let accounts = store_with_account("a@example.com").await;
        let event = pledge_event(PLEDGE_CREATED, "SomeoneElse", "a@example.com");

        assert_eq!(
            process_event(&event, ORG, &accounts).await,
            WebhookOutcome::Skipped
        );
    }

    #[tokio::test]
    async fn email_match_is_case_sensitive() {
        let accounts = store_with_account("a@example.com").await;
        let event = pledge_event(PLEDGE_CREATED, ORG, "A@Example.com");

        assert!(matches!(
            process_event(&event, ORG, &accounts).await,
            WebhookOutcome::NoMatch { .. }
        ));
    }

    #[tokio::test]
    async fn matching_event_without_email_is_an_error() {
        let accounts = store_with_account("a@example.com").await;
        let event = json!({
            "type": PLEDGE_CREATED,
            "payload": {
                "pledge": {
                    "pledge_tier": { "organization": { "name": ORG } }
                }
            }
        });

        assert!(matches!(
            process_event(&event, ORG, &accounts).await,
            WebhookOutcome::Error(_)
        ));
    }

    #[tokio::test]
    async fn first_matching_account_wins_on_shared_email() {
        let store = MemoryAccountEntitlements::default();
        store.ensure("first", "dup@example.com", "F", 10).await.unwrap();
        store.ensure("second", "dup@example.com", "S", 10).await.unwrap();
        let accounts: Arc<dyn AccountEntitlements> = Arc::new(store);

        let event = pledge_event(PLEDGE_CREATED, ORG, "dup@example.com");
        process_event(&event, ORG, &accounts).await;

        assert!(accounts.fetch("first").await.unwrap().unwrap().has_paid);
        assert!(!accounts.fetch("second").await.unwrap().unwrap().has_paid);
    }
}
