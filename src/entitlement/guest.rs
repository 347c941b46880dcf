//! Device-local guest counters
//!
//! Guests have no remote document; their usage lives in a single JSON map
//! (`device_id -> count`) under the data directory. An absent or corrupt
//! file reads as zero for every device. Single-process safety only - the
//! file is guarded by a mutex, not a cross-process lock.

use std::collections::HashMap;
use std::path::PathBuf;

use tokio::sync::Mutex;
use tracing::warn;

use crate::types::{CropgateError, Result};

/// File-backed per-device usage counters
pub struct GuestCounterStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl GuestCounterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Current count for a device; absent devices read as 0
    pub async fn used(&self, device_id: &str) -> u32 {
        let _guard = self.lock.lock().await;
        self.load().await.get(device_id).copied().unwrap_or(0)
    }

    /// Add one consumed diagnosis for a device
    pub async fn increment(&self, device_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut counters = self.load().await;
        *counters.entry(device_id.to_string()).or_insert(0) += 1;
        self.store(&counters).await
    }

    async fn load(&self) -> HashMap<String, u32> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(_) => return HashMap::new(),
        };
        match serde_json::from_str(&raw) {
            Ok(counters) => counters,
            Err(e) => {
                warn!(error = %e, path = %self.path.display(), "Guest counter file unreadable, treating as empty");
                HashMap::new()
            }
        }
    }

    async fn store(&self, counters: &HashMap<String, u32>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string(counters)
            .map_err(|e| CropgateError::Storage(e.to_string()))?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn absent_file_reads_as_zero() {
        let dir = tempdir().unwrap();
        let store = GuestCounterStore::new(dir.path().join("guests.json"));
        assert_eq!(store.used("nobody").await, 0);
    }

    #[tokio::test]
    async fn increments_survive_reopening_the_store() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guests.json");

        let store = GuestCounterStore::new(&path);
        store.increment("dev").await.unwrap();
        store.increment("dev").await.unwrap();

        let reopened = GuestCounterStore::new(&path);
        assert_eq!(reopened.used("dev").await, 2);
    }

    #[tokio::test]
    async fn corrupt_file_reads_as_zero_and_recovers_on_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("guests.json");
        std::fs::write(&path, "not json{{").unwrap();

        let store = GuestCounterStore::new(&path);
        assert_eq!(store.used("dev").await, 0);

        store.increment("dev").await.unwrap();
        assert_eq!(store.used("dev").await, 1);
    }
}
