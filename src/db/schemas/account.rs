//! Account entitlement document schema
//!
//! One document per signed-in account; the remote document is the single
//! source of truth for an account's usage counter, limit, and paid flag.

use bson::{doc, oid::ObjectId, DateTime, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::IntoIndexes;

/// Collection name for accounts
pub const ACCOUNT_COLLECTION: &str = "accounts";

/// Stored value of `diagnosisLimit` meaning "unlimited"
pub const UNLIMITED_SENTINEL: i64 = -1;

/// Account entitlement document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct AccountDoc {
    /// MongoDB document ID
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,

    /// Stable external account identifier (authenticator subject)
    pub account_id: String,

    /// Payer email as reported by the authenticator
    pub email: String,

    /// Display name for UI purposes
    pub display_name: String,

    /// Diagnoses consumed so far; incremented atomically server-side
    #[serde(default)]
    pub diagnosis_count: i64,

    /// Diagnosis quota; `UNLIMITED_SENTINEL` once paid
    pub diagnosis_limit: i64,

    /// Whether a payment event has been reconciled for this account
    #[serde(default)]
    pub has_paid: bool,

    /// When the account document was created
    pub created_at: DateTime,
}

impl AccountDoc {
    /// Fresh unpaid record created on first sign-in
    pub fn new(account_id: String, email: String, display_name: String, limit: u32) -> Self {
        Self {
            id: None,
            account_id,
            email,
            display_name,
            diagnosis_count: 0,
            diagnosis_limit: limit as i64,
            has_paid: false,
            created_at: DateTime::now(),
        }
    }
}

impl IntoIndexes for AccountDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            // Unique index on the external account identifier
            (
                doc! { "accountId": 1 },
                Some(
                    IndexOptions::builder()
                        .unique(true)
                        .name("account_id_unique".to_string())
                        .build(),
                ),
            ),
            // Email lookup for the payment webhook. NOT unique: nothing in
            // the data model enforces one account per email, so the webhook
            // takes the first match (unresolved invariant).
            (
                doc! { "email": 1 },
                Some(
                    IndexOptions::builder()
                        .name("email_index".to_string())
                        .build(),
                ),
            ),
        ]
    }
}
