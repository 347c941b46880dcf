//! Entitlement store
//!
//! Per-identity usage counter, quota, and paid flag. Guests are counted in
//! device-local storage; accounts live in a remote document that is the
//! single source of truth once signed in. One facade dispatches to the
//! backing representation selected by the current identity.
//!
//! Known limitation (accepted, not masked): the quota check and the usage
//! increment are not one atomic step. Two near-simultaneous requests from
//! the same identity can both pass the check and push usage slightly past
//! the limit. The increment itself is atomic per backend, so the counter
//! never loses writes within one process (guests) or across processes
//! (accounts, server-side `$inc`).

mod account;
mod guest;
mod memory;

pub use account::MongoAccountEntitlements;
pub use guest::GuestCounterStore;
pub use memory::MemoryAccountEntitlements;

use std::sync::Arc;

use serde::{Serialize, Serializer};

use crate::db::schemas::AccountDoc;
use crate::identity::Identity;
use crate::types::{CropgateError, Result};

/// Diagnosis quota: a positive bound or unlimited
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Finite(u32),
    Unlimited,
}

impl Serialize for Limit {
    /// Wire form matches the stored document: `-1` means unlimited
    fn serialize<S: Serializer>(&self, ser: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Limit::Finite(n) => ser.serialize_i64(*n as i64),
            Limit::Unlimited => ser.serialize_i64(-1),
        }
    }
}

/// Snapshot of one identity's entitlement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitlementRecord {
    /// Diagnoses consumed so far
    pub used: u32,
    pub limit: Limit,
    pub paid: bool,
}

impl EntitlementRecord {
    /// Whether a new diagnosis request must be refused
    pub fn blocked(&self) -> bool {
        match self.limit {
            Limit::Unlimited => false,
            Limit::Finite(limit) => self.used >= limit,
        }
    }

    /// Diagnoses left before blocking; `None` when unlimited
    pub fn remaining(&self) -> Option<u32> {
        match self.limit {
            Limit::Unlimited => None,
            Limit::Finite(limit) => Some(limit.saturating_sub(self.used)),
        }
    }
}

impl From<&AccountDoc> for EntitlementRecord {
    fn from(doc: &AccountDoc) -> Self {
        // Invariant: paid implies unlimited, regardless of what the stored
        // limit field says
        let limit = if doc.has_paid || doc.diagnosis_limit < 0 {
            Limit::Unlimited
        } else {
            Limit::Finite(doc.diagnosis_limit as u32)
        };
        EntitlementRecord {
            used: doc.diagnosis_count.max(0) as u32,
            limit,
            paid: doc.has_paid,
        }
    }
}

/// Remote account entitlement operations, swappable between the MongoDB
/// implementation and an in-memory one (dev mode, tests)
#[async_trait::async_trait]
pub trait AccountEntitlements: Send + Sync {
    /// Fetch the document for an account identifier
    async fn fetch(&self, account_id: &str) -> Result<Option<AccountDoc>>;

    /// Read the document, creating a fresh unpaid record if absent (sign-in)
    async fn ensure(
        &self,
        account_id: &str,
        email: &str,
        display_name: &str,
        default_limit: u32,
    ) -> Result<AccountDoc>;

    /// Atomic server-side increment of the usage counter
    async fn increment_usage(&self, account_id: &str) -> Result<()>;

    /// First account whose stored email equals `email` exactly
    async fn find_by_email(&self, email: &str) -> Result<Option<AccountDoc>>;

    /// Fixed assignment `hasPaid = true, diagnosisLimit = unlimited`;
    /// redelivery is harmless
    async fn grant_unlimited(&self, account_id: &str) -> Result<()>;
}

/// Entitlement facade dispatching on identity kind
pub struct Entitlements {
    guests: GuestCounterStore,
    accounts: Arc<dyn AccountEntitlements>,
    guest_limit: u32,
    account_limit: u32,
}

impl Entitlements {
    pub fn new(
        guests: GuestCounterStore,
        accounts: Arc<dyn AccountEntitlements>,
        guest_limit: u32,
        account_limit: u32,
    ) -> Self {
        Self {
            guests,
            accounts,
            guest_limit,
            account_limit,
        }
    }

    /// Current entitlement snapshot for an identity.
    ///
    /// A signed-in account with no stored document reads as a fresh unpaid
    /// record; the document itself is created on sign-in, not here.
    pub async fn record(&self, identity: &Identity) -> Result<EntitlementRecord> {
        match identity {
            Identity::Guest { device_id } => Ok(EntitlementRecord {
                used: self.guests.used(device_id).await,
                limit: Limit::Finite(self.guest_limit),
                paid: false,
            }),
            Identity::Account { account_id, .. } => {
                match self.accounts.fetch(account_id).await? {
                    Some(doc) => Ok(EntitlementRecord::from(&doc)),
                    None => Ok(EntitlementRecord {
                        used: 0,
                        limit: Limit::Finite(self.account_limit),
                        paid: false,
                    }),
                }
            }
        }
    }

    /// Record one consumed diagnosis. Called exactly once per successful
    /// diagnosis; callers skip it entirely for paid identities.
    ///
    /// An account that never went through sign-in reads as a fresh unpaid
    /// record, so its first increment creates the default document the same
    /// way sign-in would, then counts against it.
    pub async fn increment(&self, identity: &Identity) -> Result<()> {
        match identity {
            Identity::Guest { device_id } => self.guests.increment(device_id).await,
            Identity::Account {
                account_id,
                email,
                display_name,
            } => match self.accounts.increment_usage(account_id).await {
                Err(CropgateError::NotFound(_)) => {
                    self.accounts
                        .ensure(account_id, email, display_name, self.account_limit)
                        .await?;
                    self.accounts.increment_usage(account_id).await
                }
                other => other,
            },
        }
    }

    /// Sign-in hook: read the remote record, creating a default one if
    /// absent. The guest counter is deliberately NOT transferred.
    pub async fn sign_in(&self, identity: &Identity) -> Result<EntitlementRecord> {
        match identity {
            Identity::Guest { .. } => Err(CropgateError::BadRequest(
                "sign-in requires an account identity".into(),
            )),
            Identity::Account {
                account_id,
                email,
                display_name,
            } => {
                let doc = self
                    .accounts
                    .ensure(account_id, email, display_name, self.account_limit)
                    .await?;
                Ok(EntitlementRecord::from(&doc))
            }
        }
    }

    /// Account backend, for webhook and payment-simulation paths
    pub fn accounts(&self) -> &Arc<dyn AccountEntitlements> {
        &self.accounts
    }
}
