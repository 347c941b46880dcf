//! In-memory account entitlements
//!
//! Used in dev mode when no MongoDB is reachable, and by tests. Implements
//! the same contract as the MongoDB store, including first-match email
//! lookup in insertion order.

use std::collections::HashMap;

use tokio::sync::Mutex;

use crate::db::schemas::{AccountDoc, UNLIMITED_SENTINEL};
use crate::types::{CropgateError, Result};

use super::AccountEntitlements;

/// Volatile account store keyed by account identifier
#[derive(Default)]
pub struct MemoryAccountEntitlements {
    // Insertion order is preserved separately so find_by_email mirrors the
    // "first matching document" behavior of the real store
    inner: Mutex<(HashMap<String, AccountDoc>, Vec<String>)>,
}

#[async_trait::async_trait]
impl AccountEntitlements for MemoryAccountEntitlements {
    async fn fetch(&self, account_id: &str) -> Result<Option<AccountDoc>> {
        let inner = self.inner.lock().await;
        Ok(inner.0.get(account_id).cloned())
    }

    async fn ensure(
        &self,
        account_id: &str,
        email: &str,
        display_name: &str,
        default_limit: u32,
    ) -> Result<AccountDoc> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.0.get(account_id) {
            return Ok(existing.clone());
        }
        let fresh = AccountDoc::new(
            account_id.to_string(),
            email.to_string(),
            display_name.to_string(),
            default_limit,
        );
        inner.0.insert(account_id.to_string(), fresh.clone());
        inner.1.push(account_id.to_string());
        Ok(fresh)
    }

    async fn increment_usage(&self, account_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.0.get_mut(account_id) {
            Some(doc) => {
                doc.diagnosis_count += 1;
                Ok(())
            }
            None => Err(CropgateError::NotFound(format!(
                "no account document for '{}'",
                account_id
            ))),
        }
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountDoc>> {
        let inner = self.inner.lock().await;
        for id in &inner.1 {
            if let Some(doc) = inner.0.get(id) {
                if doc.email == email {
                    return Ok(Some(doc.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn grant_unlimited(&self, account_id: &str) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.0.get_mut(account_id) {
            Some(doc) => {
                doc.has_paid = true;
                doc.diagnosis_limit = UNLIMITED_SENTINEL;
                Ok(())
            }
            None => Err(CropgateError::NotFound(format!(
                "no account document for '{}'",
                account_id
            ))),
        }
    }
}
