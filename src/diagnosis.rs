//! Diagnosis orchestrator
//!
//! Ties the subsystems together for one diagnosis: validate the request,
//! consult the entitlement store, call the oracle, charge the quota exactly
//! once on success, and append to the history ledger. A failed or blocked
//! attempt never consumes quota and never creates a history entry.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::entitlement::Entitlements;
use crate::history::{HistoryEntry, HistoryStore};
use crate::identity::Identity;
use crate::ingest::EncodedImage;
use crate::oracle::DiagnosisOracle;
use crate::types::{CropgateError, Result};

/// Transient diagnosis input; never persisted as such
pub struct DiagnosisRequest {
    pub image: EncodedImage,
    pub crop: String,
    pub identity: Identity,
}

/// Successful diagnosis outcome
#[derive(Debug, Clone)]
pub struct DiagnosisOutcome {
    /// Opaque oracle text
    pub diagnosis: String,
    pub captured_at: DateTime<Utc>,
    /// History entry created for this diagnosis
    pub history_id: i64,
    /// Diagnoses left after this one; `None` when unlimited
    pub remaining: Option<u32>,
    /// Storage degradation notice, if history persistence had to degrade
    pub warning: Option<String>,
}

pub struct Orchestrator {
    oracle: Arc<dyn DiagnosisOracle>,
    entitlements: Arc<Entitlements>,
    history: Arc<HistoryStore>,
}

impl Orchestrator {
    pub fn new(
        oracle: Arc<dyn DiagnosisOracle>,
        entitlements: Arc<Entitlements>,
        history: Arc<HistoryStore>,
    ) -> Self {
        Self {
            oracle,
            entitlements,
            history,
        }
    }

    /// Run one diagnosis end to end
    pub async fn diagnose(&self, request: DiagnosisRequest) -> Result<DiagnosisOutcome> {
        if request.image.is_empty() {
            return Err(CropgateError::Validation("no image provided".into()));
        }
        if request.crop.trim().is_empty() {
            return Err(CropgateError::Validation("no crop specified".into()));
        }

        // Quota check happens before any external call
        let record = self.entitlements.record(&request.identity).await?;
        if record.blocked() {
            let message = match &request.identity {
                Identity::Guest { .. } => {
                    "Free diagnoses used up. Sign in to get more.".to_string()
                }
                Identity::Account { .. } => {
                    "Your diagnosis quota is used up. Upgrade for unlimited diagnoses.".to_string()
                }
            };
            return Err(CropgateError::QuotaExceeded(message));
        }

        let diagnosis = self
            .oracle
            .diagnose(&request.image, &request.crop)
            .await?;
        let captured_at = Utc::now();

        // Exactly one increment per successful diagnosis; paid identities
        // are exempt from counting
        if !record.paid {
            self.entitlements.increment(&request.identity).await?;
        }

        let entry = HistoryEntry::new(Some(request.image.data_url()), diagnosis.clone());
        let report = self
            .history
            .append(&request.identity.storage_key(), entry)
            .await?;
        if let Some(message) = &report.warning {
            warn!(identity = %request.identity.storage_key(), "{}", message);
        }

        let remaining = if record.paid {
            None
        } else {
            record.remaining().map(|left| left.saturating_sub(1))
        };

        info!(
            identity = %request.identity.storage_key(),
            crop = %request.crop,
            remaining = ?remaining,
            "Diagnosis completed"
        );

        Ok(DiagnosisOutcome {
            diagnosis,
            captured_at,
            history_id: report.entry_id,
            remaining,
            warning: report.warning,
        })
    }
}
