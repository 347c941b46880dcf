//! MongoDB-backed account entitlements
//!
//! The stored document is authoritative for signed-in identities. All
//! mutations use merge semantics (`$set` / `$inc`) so partial updates never
//! clobber unspecified fields, and the usage increment is a single atomic
//! server-side counter update.

use bson::doc;
use tracing::info;

use crate::db::schemas::{AccountDoc, ACCOUNT_COLLECTION, UNLIMITED_SENTINEL};
use crate::db::{MongoClient, MongoCollection};
use crate::types::{CropgateError, Result};

use super::AccountEntitlements;

/// Account entitlement store over MongoDB
pub struct MongoAccountEntitlements {
    mongo: MongoClient,
}

impl MongoAccountEntitlements {
    pub fn new(mongo: MongoClient) -> Self {
        Self { mongo }
    }

    async fn collection(&self) -> Result<MongoCollection<AccountDoc>> {
        self.mongo.collection::<AccountDoc>(ACCOUNT_COLLECTION).await
    }
}

#[async_trait::async_trait]
impl AccountEntitlements for MongoAccountEntitlements {
    async fn fetch(&self, account_id: &str) -> Result<Option<AccountDoc>> {
        self.collection()
            .await?
            .find_one(doc! { "accountId": account_id })
            .await
    }

    async fn ensure(
        &self,
        account_id: &str,
        email: &str,
        display_name: &str,
        default_limit: u32,
    ) -> Result<AccountDoc> {
        let collection = self.collection().await?;

        if let Some(existing) = collection.find_one(doc! { "accountId": account_id }).await? {
            return Ok(existing);
        }

        let fresh = AccountDoc::new(
            account_id.to_string(),
            email.to_string(),
            display_name.to_string(),
            default_limit,
        );
        collection.insert_one(fresh.clone()).await?;
        info!(account_id = %account_id, "Created account entitlement document");
        Ok(fresh)
    }

    async fn increment_usage(&self, account_id: &str) -> Result<()> {
        let result = self
            .collection()
            .await?
            .update_one(
                doc! { "accountId": account_id },
                doc! { "$inc": { "diagnosisCount": 1_i64 } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(CropgateError::NotFound(format!(
                "no account document for '{}'",
                account_id
            )));
        }
        Ok(())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<AccountDoc>> {
        // Case-sensitive exact match, first document wins. Email uniqueness
        // is not enforced anywhere in the data model.
        self.collection()
            .await?
            .find_one(doc! { "email": email })
            .await
    }

    async fn grant_unlimited(&self, account_id: &str) -> Result<()> {
        let result = self
            .collection()
            .await?
            .update_one(
                doc! { "accountId": account_id },
                doc! { "$set": {
                    "hasPaid": true,
                    "diagnosisLimit": UNLIMITED_SENTINEL,
                } },
            )
            .await?;

        if result.matched_count == 0 {
            return Err(CropgateError::NotFound(format!(
                "no account document for '{}'",
                account_id
            )));
        }
        info!(account_id = %account_id, "Granted unlimited entitlement");
        Ok(())
    }
}
