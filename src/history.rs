//! History ledger
//!
//! Bounded, most-recent-first log of past diagnoses, persisted per identity
//! as one serialized JSON sequence. Persistence is best-effort under a byte
//! capacity: a write that exceeds capacity strips the image attachment from
//! every entry and retries once; if the stripped form still does not fit the
//! in-memory ledger stays intact and the caller gets a warning. Data loss is
//! confined to image attachments on reload, never the diagnosis text.

use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::types::{CropgateError, Result};

/// One past diagnosis. Never mutated after creation except for deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    /// Unique monotonic token (unix milliseconds at creation)
    pub id: i64,
    /// Encoded image data URL; dropped when storage capacity demands it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Opaque oracle text
    pub diagnosis: String,
    /// Display timestamp
    pub date: String,
}

impl HistoryEntry {
    pub fn new(image: Option<String>, diagnosis: String) -> Self {
        let now = Utc::now();
        Self {
            id: next_entry_id(now.timestamp_millis()),
            image,
            diagnosis,
            date: now.format("%Y-%m-%d %H:%M").to_string(),
        }
    }
}

/// Highest id handed out so far, process-wide
static LAST_ENTRY_ID: AtomicI64 = AtomicI64::new(0);

/// Unique monotonic id token: the current unix milliseconds, bumped past the
/// previous token when two entries land in the same millisecond.
fn next_entry_id(now_millis: i64) -> i64 {
    let previous = LAST_ENTRY_ID
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(last.max(now_millis - 1) + 1)
        })
        .unwrap_or(now_millis - 1);
    previous.max(now_millis - 1) + 1
}

/// Outcome of an append, carrying the degradation warning if persistence
/// had to drop images or give up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendReport {
    pub entry_id: i64,
    /// Present when the persisted form lost image attachments or could not
    /// be written at all; the in-memory/returned ledger is unaffected
    pub warning: Option<String>,
}

/// Decode a persisted ledger blob.
///
/// Returns `None` when the whole blob fails to parse (caller clears the
/// corrupt store). Individual non-conforming entries are filtered out;
/// legacy entries lacking an id get `now_millis + index` assigned.
pub fn decode_ledger(raw: &str, now_millis: i64) -> Option<Vec<HistoryEntry>> {
    let parsed: Value = serde_json::from_str(raw).ok()?;
    let items = parsed.as_array()?;

    let mut entries = Vec::new();
    for (index, item) in items.iter().enumerate() {
        let Some(obj) = item.as_object() else { continue };
        let Some(diagnosis) = obj.get("diagnosis").and_then(Value::as_str) else {
            continue;
        };
        let Some(date) = obj.get("date").and_then(Value::as_str) else {
            continue;
        };
        let id = obj
            .get("id")
            .and_then(Value::as_i64)
            .unwrap_or(now_millis + index as i64);
        let image = obj.get("image").and_then(Value::as_str).map(str::to_string);
        entries.push(HistoryEntry {
            id,
            image,
            diagnosis: diagnosis.to_string(),
            date: date.to_string(),
        });
    }
    Some(entries)
}

/// Prepend an entry, evicting the oldest beyond `bound`
pub fn bound_prepend(entries: &mut Vec<HistoryEntry>, entry: HistoryEntry, bound: usize) {
    entries.insert(0, entry);
    entries.truncate(bound);
}

/// Serialize a ledger under a byte capacity, stripping images once if the
/// full form does not fit
fn encode_within_capacity(
    entries: &[HistoryEntry],
    capacity_bytes: usize,
) -> Result<(String, bool)> {
    let full = serde_json::to_string(entries).map_err(|e| CropgateError::Storage(e.to_string()))?;
    if full.len() <= capacity_bytes {
        return Ok((full, false));
    }

    let stripped: Vec<HistoryEntry> = entries
        .iter()
        .cloned()
        .map(|mut entry| {
            entry.image = None;
            entry
        })
        .collect();
    let lean =
        serde_json::to_string(&stripped).map_err(|e| CropgateError::Storage(e.to_string()))?;
    if lean.len() <= capacity_bytes {
        return Ok((lean, true));
    }

    Err(CropgateError::Storage(format!(
        "ledger exceeds capacity even without images ({} > {} bytes)",
        lean.len(),
        capacity_bytes
    )))
}

/// Per-identity ledger files under `<data_dir>/history/`
pub struct HistoryStore {
    dir: PathBuf,
    bound: usize,
    capacity_bytes: usize,
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(dir: impl Into<PathBuf>, bound: usize, capacity_bytes: usize) -> Self {
        Self {
            dir: dir.into(),
            bound,
            capacity_bytes,
            lock: Mutex::new(()),
        }
    }

    /// Past diagnoses for one identity, newest first
    pub async fn list(&self, key: &str) -> Vec<HistoryEntry> {
        let _guard = self.lock.lock().await;
        self.load(key).await
    }

    /// Record a successful diagnosis
    pub async fn append(&self, key: &str, entry: HistoryEntry) -> Result<AppendReport> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load(key).await;
        let entry_id = entry.id;
        bound_prepend(&mut entries, entry, self.bound);

        let warning = self.persist(key, &entries).await;
        Ok(AppendReport { entry_id, warning })
    }

    /// Delete one entry by id; unknown ids are a not-found condition
    pub async fn remove(&self, key: &str, id: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load(key).await;
        let before = entries.len();
        entries.retain(|entry| entry.id != id);
        if entries.len() == before {
            return Err(CropgateError::NotFound(format!("no history entry {}", id)));
        }

        if let Some(warning) = self.persist(key, &entries).await {
            warn!(key = %key, "History delete persisted degraded: {}", warning);
        }
        Ok(())
    }

    async fn load(&self, key: &str) -> Vec<HistoryEntry> {
        let path = self.ledger_path(key);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(_) => return Vec::new(),
        };

        match decode_ledger(&raw, Utc::now().timestamp_millis()) {
            Some(entries) => entries,
            None => {
                // Corrupt blob: clear it rather than failing the same way
                // on every load
                info!(path = %path.display(), "Clearing corrupt history ledger");
                let _ = tokio::fs::remove_file(&path).await;
                Vec::new()
            }
        }
    }

    /// Best-effort write; returns a user-visible warning instead of an error
    /// when persistence degraded
    async fn persist(&self, key: &str, entries: &[HistoryEntry]) -> Option<String> {
        let (encoded, stripped) = match encode_within_capacity(entries, self.capacity_bytes) {
            Ok(result) => result,
            Err(e) => {
                warn!(key = %key, error = %e, "History ledger not persisted");
                return Some(
                    "History could not be saved; past diagnoses may be missing after a restart"
                        .to_string(),
                );
            }
        };

        let path = self.ledger_path(key);
        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!(error = %e, "Could not create history directory");
                return Some("History could not be saved".to_string());
            }
        }
        if let Err(e) = tokio::fs::write(&path, encoded).await {
            warn!(key = %key, error = %e, "History write failed");
            return Some("History could not be saved".to_string());
        }

        if stripped {
            Some("History images were dropped to fit storage limits".to_string())
        } else {
            None
        }
    }

    fn ledger_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(id: i64, diagnosis: &str) -> HistoryEntry {
        HistoryEntry {
            id,
            image: Some(format!("data:image/jpeg;base64,{}", "A".repeat(256))),
            diagnosis: diagnosis.to_string(),
            date: "2026-08-25 10:00".to_string(),
        }
    }

    fn store(dir: &std::path::Path) -> HistoryStore {
        HistoryStore::new(dir.join("history"), 20, 1_000_000)
    }

    #[tokio::test]
    async fn appending_beyond_bound_evicts_exactly_the_oldest() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());

        for i in 0..21 {
            store.append("k", entry(i, &format!("d{}", i))).await.unwrap();
        }

        let entries = store.list("k").await;
        assert_eq!(entries.len(), 20);
        // Newest first; the oldest (id 0) is gone
        assert_eq!(entries[0].id, 20);
        assert_eq!(entries.last().unwrap().id, 1);
    }

    #[tokio::test]
    async fn remove_deletes_one_entry_and_rejects_unknown_ids() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.append("k", entry(1, "a")).await.unwrap();
        store.append("k", entry(2, "b")).await.unwrap();

        store.remove("k", 1).await.unwrap();
        let entries = store.list("k").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 2);

        assert!(matches!(
            store.remove("k", 99).await,
            Err(CropgateError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn ledgers_are_scoped_per_identity() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.append("guest-a", entry(1, "a")).await.unwrap();
        store.append("account-b", entry(2, "b")).await.unwrap();

        assert_eq!(store.list("guest-a").await.len(), 1);
        assert_eq!(store.list("account-b").await.len(), 1);
    }

    #[tokio::test]
    async fn round_trip_preserves_entries() {
        let dir = tempdir().unwrap();
        let original = vec![entry(2, "late blight"), entry(1, "aphids")];

        let store = store(dir.path());
        store.append("k", original[1].clone()).await.unwrap();
        store.append("k", original[0].clone()).await.unwrap();

        let reopened = HistoryStore::new(dir.path().join("history"), 20, 1_000_000);
        assert_eq!(reopened.list("k").await, original);
    }

    #[tokio::test]
    async fn capacity_overflow_strips_images_but_keeps_diagnosis_text() {
        let dir = tempdir().unwrap();
        // Capacity fits the stripped form only
        let store = HistoryStore::new(dir.path().join("history"), 20, 150);

        let report = store.append("k", entry(1, "rust fungus")).await.unwrap();
        assert!(report.warning.is_some());

        let entries = store.list("k").await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].diagnosis, "rust fungus");
        assert!(entries[0].image.is_none());
    }

    #[tokio::test]
    async fn capacity_too_small_even_stripped_keeps_previous_ledger_on_disk() {
        let dir = tempdir().unwrap();
        let store = HistoryStore::new(dir.path().join("history"), 20, 10);

        let report = store.append("k", entry(1, "a")).await.unwrap();
        assert!(report.warning.is_some());
        // Nothing could be written; a fresh load sees an empty ledger
        assert!(store.list("k").await.is_empty());
    }

    #[tokio::test]
    async fn corrupt_blob_is_cleared_on_load() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let path = dir.path().join("history/k.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "{{{not json").unwrap();

        assert!(store.list("k").await.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn decode_filters_malformed_entries() {
        let raw = r#"[
            {"id": 5, "diagnosis": "mildew", "date": "2026-01-01"},
            {"diagnosis": 42, "date": "2026-01-01"},
            "not an object",
            {"date": "2026-01-01"}
        ]"#;
        let entries = decode_ledger(raw, 1000).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].id, 5);
    }

    #[test]
    fn decode_assigns_deterministic_ids_to_legacy_entries() {
        let raw = r#"[
            {"diagnosis": "a", "date": "2026-01-01"},
            {"diagnosis": "b", "date": "2026-01-01"}
        ]"#;
        let entries = decode_ledger(raw, 7_000).unwrap();
        assert_eq!(entries[0].id, 7_000);
        assert_eq!(entries[1].id, 7_001);
    }

    #[tokio::test]
    async fn traversal_storage_key_stays_inside_the_history_dir() {
        use crate::identity::Identity;

        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let identity = Identity::Guest {
            device_id: "../../../../escaped".into(),
        };

        store
            .append(&identity.storage_key(), entry(1, "a"))
            .await
            .unwrap();

        // The ledger landed under the store's own directory, nowhere else
        assert!(!dir.path().join("escaped.json").exists());
        assert!(!dir.path().parent().unwrap().join("escaped.json").exists());
        assert_eq!(store.list(&identity.storage_key()).await.len(), 1);
    }

    #[test]
    fn back_to_back_entries_get_distinct_increasing_ids() {
        let first = HistoryEntry::new(None, "a".into());
        let second = HistoryEntry::new(None, "b".into());
        assert_ne!(first.id, second.id);
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn remove_with_fresh_entries_deletes_exactly_one() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let first = HistoryEntry::new(None, "a".into());
        let second = HistoryEntry::new(None, "b".into());
        let first_id = first.id;
        store.append("k", first).await.unwrap();
        store.append("k", second).await.unwrap();

        store.remove("k", first_id).await.unwrap();
        assert_eq!(store.list("k").await.len(), 1);
    }

    #[test]
    fn decode_rejects_whole_blob_failures() {
        assert!(decode_ledger("not json", 0).is_none());
        assert!(decode_ledger(r#"{"an":"object"}"#, 0).is_none());
    }
}
