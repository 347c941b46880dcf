//! Caller identity
//!
//! Every request is made either by an anonymous guest (tracked only by an
//! opaque device token the client holds) or by a signed-in account coming
//! from the external authenticator. Authentication itself is out of scope;
//! the gateway trusts the identity headers it is handed.

use serde::{Deserialize, Serialize};

/// Who is asking for a diagnosis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Identity {
    /// Anonymous caller, tracked per device
    Guest {
        /// Client-generated opaque device token
        device_id: String,
    },
    /// Signed-in caller backed by a remote entitlement document
    #[serde(rename_all = "camelCase")]
    Account {
        /// Stable external account identifier
        account_id: String,
        email: String,
        display_name: String,
    },
}

impl Identity {
    /// Stable key used to scope per-identity state (history ledger files).
    ///
    /// Both identifiers are caller-supplied, so they are percent-encoded
    /// into a file-name-safe form before they can reach the filesystem.
    pub fn storage_key(&self) -> String {
        match self {
            Identity::Guest { device_id } => format!("guest-{}", encode_key(device_id)),
            Identity::Account { account_id, .. } => {
                format!("account-{}", encode_key(account_id))
            }
        }
    }

    pub fn is_account(&self) -> bool {
        matches!(self, Identity::Account { .. })
    }
}

/// Percent-encode every byte outside `[A-Za-z0-9_-]`, so path separators
/// and dot segments can never appear in a storage key. Collision-free:
/// distinct identifiers always produce distinct keys.
fn encode_key(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'-' | b'_' => out.push(byte as char),
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}
