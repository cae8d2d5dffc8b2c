//! Per-document playground persistence.
//!
//! One JSON file per document under a fixed namespace directory, the desktop
//! analog of a prefixed localStorage keyspace. Writes are best-effort: a
//! byte budget stands in for the browser storage quota, and blowing it (or
//! any write failure) evicts the oldest half of the *other* documents and
//! retries once. A second failure is logged and swallowed — persistence
//! must never take the UI down with it.

use std::path::{Path, PathBuf};

use crate::playground::{PlaygroundSnapshot, SCHEMA_VERSION};

/// Debounce window for snapshot writes, seconds.
pub const SAVE_DEBOUNCE: f64 = 1.0;

pub struct PlaygroundStore {
    root: PathBuf,
    budget_bytes: u64,
}

impl PlaygroundStore {
    pub fn new(root: PathBuf, budget_bytes: u64) -> Self {
        Self { root, budget_bytes }
    }

    /// Store under the app data dir (`<data>/segpad/playground`).
    pub fn default_location(budget_bytes: u64) -> Self {
        Self::new(crate::paths::app_data_dir().join("playground"), budget_bytes)
    }

    fn path_for(&self, doc_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_doc_id(doc_id)))
    }

    /// Persist a snapshot. Empty states are not written at all.
    pub fn save(&self, doc_id: &str, snap: &PlaygroundSnapshot) {
        if !snap.has_content() {
            return;
        }
        let payload = match serde_json::to_vec(snap) {
            Ok(p) => p,
            Err(e) => {
                crate::log_err!("playground snapshot for {} failed to serialize: {}", doc_id, e);
                return;
            }
        };
        let _ = std::fs::create_dir_all(&self.root);
        let path = self.path_for(doc_id);

        if self.other_entries_size(&path) + payload.len() as u64 > self.budget_bytes {
            self.evict_oldest_half(&path);
        }
        if let Err(first) = std::fs::write(&path, &payload) {
            crate::log_warn!(
                "playground write for {} failed ({}), evicting and retrying",
                doc_id,
                first
            );
            self.evict_oldest_half(&path);
            if let Err(second) = std::fs::write(&path, &payload) {
                crate::log_err!("playground write for {} failed twice: {}", doc_id, second);
            }
        }
    }

    /// Load a snapshot. Missing file, corrupt JSON, an absent/non-numeric
    /// `saved_at`, or an unknown schema version all read as "no saved state".
    pub fn load(&self, doc_id: &str) -> Option<PlaygroundSnapshot> {
        let content = std::fs::read_to_string(self.path_for(doc_id)).ok()?;
        let snap: PlaygroundSnapshot = match serde_json::from_str(&content) {
            Ok(s) => s,
            Err(e) => {
                crate::log_warn!("discarding corrupt playground state for {}: {}", doc_id, e);
                return None;
            }
        };
        if snap.schema_version != SCHEMA_VERSION {
            crate::log_warn!(
                "discarding playground state for {} with schema version {}",
                doc_id,
                snap.schema_version
            );
            return None;
        }
        if !snap.saved_at.is_finite() {
            return None;
        }
        Some(snap)
    }

    pub fn has(&self, doc_id: &str) -> bool {
        self.path_for(doc_id).exists()
    }

    pub fn clear(&self, doc_id: &str) {
        let _ = std::fs::remove_file(self.path_for(doc_id));
    }

    /// Document ids that currently have saved state.
    pub fn list_documents_with_state(&self) -> Vec<String> {
        let mut out = Vec::new();
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return out;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                out.push(stem.to_string());
            }
        }
        out
    }

    fn other_entries_size(&self, exclude: &Path) -> u64 {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };
        entries
            .flatten()
            .filter(|e| e.path() != exclude)
            .filter(|e| e.path().extension().is_some_and(|x| x == "json"))
            .filter_map(|e| e.metadata().ok())
            .map(|m| m.len())
            .sum()
    }

    /// Delete the oldest half (by `saved_at`) of all entries except the one
    /// being written.
    fn evict_oldest_half(&self, exclude: &Path) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        let mut aged: Vec<(f64, PathBuf)> = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path == exclude || !path.extension().is_some_and(|e| e == "json") {
                continue;
            }
            let saved_at = std::fs::read_to_string(&path)
                .ok()
                .and_then(|c| serde_json::from_str::<PlaygroundSnapshot>(&c).ok())
                .map(|s| s.saved_at)
                .unwrap_or(0.0); // unreadable entries count as oldest
            aged.push((saved_at, path));
        }
        if aged.is_empty() {
            return;
        }
        aged.sort_by(|a, b| a.0.total_cmp(&b.0));
        let evict_count = (aged.len() + 1) / 2;
        for (_, path) in aged.into_iter().take(evict_count) {
            crate::log_info!("evicting stale playground state {}", path.display());
            let _ = std::fs::remove_file(path);
        }
    }
}

fn sanitize_doc_id(doc_id: &str) -> String {
    doc_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// ============================================================================
// SAVE DEBOUNCER — coalesces rapid state changes into one write
// ============================================================================

/// Tracks the trailing-edge deadline for a debounced save. Every change
/// pushes the deadline out; the write fires once the clock passes it.
pub struct SaveDebouncer {
    deadline: Option<f64>,
    delay: f64,
}

impl SaveDebouncer {
    pub fn new(delay: f64) -> Self {
        Self {
            deadline: None,
            delay,
        }
    }

    pub fn mark_changed(&mut self, now: f64) {
        self.deadline = Some(now + self.delay);
    }

    pub fn is_pending(&self) -> bool {
        self.deadline.is_some()
    }

    /// True exactly once, when a pending save's deadline has passed.
    pub fn take_due(&mut self, now: f64) -> bool {
        if matches!(self.deadline, Some(d) if now >= d) {
            self.deadline = None;
            true
        } else {
            false
        }
    }

    /// Consume any pending save immediately (document switch / shutdown).
    pub fn take_pending(&mut self) -> bool {
        self.deadline.take().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playground::Playground;
    use crate::prompts::PointLabel;

    fn temp_store(budget: u64) -> PlaygroundStore {
        let root = std::env::temp_dir().join(format!("segpad-test-{}", uuid::Uuid::new_v4()));
        PlaygroundStore::new(root, budget)
    }

    fn snapshot_with_text(text: &str, saved_at: f64) -> PlaygroundSnapshot {
        let mut pg = Playground::new("x".into(), 16);
        pg.text_prompts = vec![text.to_string()];
        pg.snapshot(saved_at)
    }

    fn snapshot_with_point(saved_at: f64) -> PlaygroundSnapshot {
        let mut pg = Playground::new("x".into(), 16);
        pg.prompts.add_point(120.0, 80.0, PointLabel::Positive);
        pg.snapshot(saved_at)
    }

    #[test]
    fn save_load_round_trip() {
        let store = temp_store(u64::MAX);
        store.save("doc-a", &snapshot_with_point(42.0));
        let loaded = store.load("doc-a").unwrap();
        assert_eq!(loaded.point_prompts.len(), 1);
        assert!((loaded.saved_at - 42.0).abs() < 1e-9);
        assert!(store.has("doc-a"));
        store.clear("doc-a");
        assert!(!store.has("doc-a"));
    }

    #[test]
    fn empty_state_is_never_written() {
        let store = temp_store(u64::MAX);
        let pg = Playground::new("x".into(), 16);
        store.save("doc-a", &pg.snapshot(1.0));
        assert!(!store.has("doc-a"));
        assert!(store.load("doc-a").is_none());
    }

    #[test]
    fn corrupt_json_reads_as_absent() {
        let store = temp_store(u64::MAX);
        store.save("doc-a", &snapshot_with_point(1.0));
        std::fs::write(store.path_for("doc-a"), b"{not json").unwrap();
        assert!(store.load("doc-a").is_none());
    }

    #[test]
    fn missing_saved_at_reads_as_absent() {
        let store = temp_store(u64::MAX);
        let _ = std::fs::create_dir_all(&store.root);
        std::fs::write(
            store.path_for("doc-a"),
            format!("{{\"schema_version\":{}}}", SCHEMA_VERSION),
        )
        .unwrap();
        assert!(store.load("doc-a").is_none());
    }

    #[test]
    fn unknown_schema_version_reads_as_absent() {
        let store = temp_store(u64::MAX);
        let _ = std::fs::create_dir_all(&store.root);
        std::fs::write(
            store.path_for("doc-a"),
            b"{\"schema_version\":99,\"saved_at\":5.0}",
        )
        .unwrap();
        assert!(store.load("doc-a").is_none());
    }

    #[test]
    fn budget_overflow_evicts_oldest_half() {
        let store = temp_store(4000);
        let filler = "x".repeat(800);
        store.save("doc-a", &snapshot_with_text(&filler, 1.0));
        store.save("doc-b", &snapshot_with_text(&filler, 2.0));
        store.save("doc-c", &snapshot_with_text(&filler, 3.0));
        assert!(store.has("doc-a") && store.has("doc-b") && store.has("doc-c"));

        // a large newcomer pushes past the budget: the two oldest go
        let big = "y".repeat(3000);
        store.save("doc-d", &snapshot_with_text(&big, 4.0));
        assert!(!store.has("doc-a"));
        assert!(!store.has("doc-b"));
        assert!(store.has("doc-c"));
        assert!(store.has("doc-d"));
    }

    #[test]
    fn list_reports_saved_documents() {
        let store = temp_store(u64::MAX);
        store.save("doc-a", &snapshot_with_point(1.0));
        store.save("doc-b", &snapshot_with_point(2.0));
        let mut listed = store.list_documents_with_state();
        listed.sort();
        assert_eq!(listed, vec!["doc-a".to_string(), "doc-b".to_string()]);
    }

    #[test]
    fn doc_ids_are_sanitized_for_the_filesystem() {
        let store = temp_store(u64::MAX);
        store.save("../evil/../doc", &snapshot_with_point(1.0));
        assert!(store.has("../evil/../doc"));
        // nothing escaped the namespace directory
        assert_eq!(store.list_documents_with_state().len(), 1);
    }

    #[test]
    fn debouncer_fires_once_after_trailing_delay() {
        let mut d = SaveDebouncer::new(1.0);
        assert!(!d.take_due(0.0));
        d.mark_changed(0.0);
        assert!(!d.take_due(0.5));
        // another change pushes the deadline out
        d.mark_changed(0.8);
        assert!(!d.take_due(1.5));
        assert!(d.take_due(1.81));
        assert!(!d.take_due(2.0));
    }

    #[test]
    fn debouncer_flushes_on_demand() {
        let mut d = SaveDebouncer::new(1.0);
        assert!(!d.take_pending());
        d.mark_changed(0.0);
        assert!(d.take_pending());
        assert!(!d.is_pending());
    }
}
