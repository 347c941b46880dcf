//! Database schemas for Cropgate

mod account;

pub use account::{AccountDoc, ACCOUNT_COLLECTION, UNLIMITED_SENTINEL};
