//! Cropgate - crop pest and disease diagnosis gateway
//!
//! Clients submit a crop photo; Cropgate normalizes it, checks the caller's
//! diagnosis entitlement, asks an external vision-model oracle for a
//! natural-language diagnosis, and records the result in a bounded
//! per-identity history ledger. A payment webhook runs out-of-band and
//! upgrades accounts to unlimited entitlement.
//!
//! ## Subsystems
//!
//! - **Ingestion**: bounded-size JPEG normalization with pass-through fallback
//! - **Entitlement**: usage counter + quota + paid flag, device-local for
//!   guests and a remote document for signed-in accounts
//! - **Orchestrator**: quota-enforced oracle calls, exactly-once counting
//! - **History**: bounded most-recent-first ledger with capacity-aware
//!   persistence
//! - **Webhook**: idempotent payment reconciliation by payer email

pub mod config;
pub mod db;
pub mod diagnosis;
pub mod entitlement;
pub mod history;
pub mod identity;
pub mod ingest;
pub mod oracle;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{CropgateError, Result};
