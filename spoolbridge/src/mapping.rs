//! Persisted filament mapping
//!
//! A JSON object `{ sourceId: targetId, ... }` on disk is the single source
//! of truth for which slicer filament feeds which spool. The mapping is a
//! bijection: a target id never appears twice.
//!
//! Every mutation is one critical section: take the store lock, read the
//! whole file, apply the change, rewrite the whole file atomically, release.
//! Locks are process-wide per file path, so independent `MappingStore`
//! handles on the same file still serialize against each other.

use serde_json::Value;
use spoolbridge_common::fs::{file_lock, write_json_atomic};
use spoolbridge_common::Result;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{info, warn};

/// Source id to target id
pub type Mapping = BTreeMap<String, String>;

/// Targets referenced by `mapping`
pub fn used_target_ids(mapping: &Mapping) -> BTreeSet<String> {
    mapping.values().cloned().collect()
}

/// Result of an upsert
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UpsertOutcome {
    /// Target the source was bound to before, if any
    pub previous_target: Option<String>,
    /// Source that lost the target to this upsert
    pub stolen_from: Option<String>,
    /// False when the pair was already present
    pub changed: bool,
}

/// Result of a programmatic map/unmap request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MappingChange {
    Mapped(UpsertOutcome),
    /// Carries the removed target, `None` when nothing was mapped
    Unmapped(Option<String>),
}

/// Handle on the mapping file
#[derive(Debug, Clone)]
pub struct MappingStore {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl MappingStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock = file_lock(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn guard(&self) -> MutexGuard<'_, ()> {
        // The guarded value is (), a panicked holder cannot leave it inconsistent
        self.lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current mapping; unreadable or corrupt files read as empty
    pub fn load(&self) -> Mapping {
        let _guard = self.guard();
        self.read_file()
    }

    pub fn get(&self, source_id: &str) -> Option<String> {
        self.load().get(source_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn used_target_ids(&self) -> BTreeSet<String> {
        used_target_ids(&self.load())
    }

    /// Bind `source_id` to `target_id`, stealing the target if another source holds it
    ///
    /// # Errors
    /// [`spoolbridge_common::Error::Persistence`] if the file cannot be
    /// written. Nothing is committed in that case.
    pub fn upsert(&self, source_id: &str, target_id: &str) -> Result<UpsertOutcome> {
        let _guard = self.guard();
        let mut mapping = self.read_file();

        let previous_target = mapping.get(source_id).cloned();
        if previous_target.as_deref() == Some(target_id) {
            return Ok(UpsertOutcome {
                previous_target,
                stolen_from: None,
                changed: false,
            });
        }

        let stolen_from = mapping
            .iter()
            .find(|(s, t)| t.as_str() == target_id && s.as_str() != source_id)
            .map(|(s, _)| s.clone());
        if let Some(old_source) = &stolen_from {
            mapping.remove(old_source);
        }
        mapping.insert(source_id.to_string(), target_id.to_string());

        self.write_file(&mapping)?;

        if let Some(old_source) = &stolen_from {
            info!(
                target_id = %target_id,
                from = %old_source,
                to = %source_id,
                "Target reassigned, previous source is now unmapped"
            );
        }
        info!(source = %source_id, target_id = %target_id, "Filament mapped");

        Ok(UpsertOutcome {
            previous_target,
            stolen_from,
            changed: true,
        })
    }

    /// Bind `source_id` to `target_id` only if neither side is bound yet
    ///
    /// The check and the write happen under the same lock, so a binding made
    /// by another caller in the meantime is never displaced. Returns `false`
    /// and leaves the file untouched when either id is already taken.
    pub fn bind_if_free(&self, source_id: &str, target_id: &str) -> Result<bool> {
        let _guard = self.guard();
        let mut mapping = self.read_file();

        if let Some(current) = mapping.get(source_id) {
            warn!(source = %source_id, target_id = %current, "Filament already mapped");
            return Ok(false);
        }
        if let Some((holder, _)) = mapping.iter().find(|(_, t)| t.as_str() == target_id) {
            warn!(source = %source_id, target_id = %target_id, holder = %holder, "Spool already mapped to another filament");
            return Ok(false);
        }

        mapping.insert(source_id.to_string(), target_id.to_string());
        self.write_file(&mapping)?;
        info!(source = %source_id, target_id = %target_id, "Filament mapped");
        Ok(true)
    }

    /// Delete the entry for `source_id`; no-op when absent
    pub fn remove(&self, source_id: &str) -> Result<Option<String>> {
        let _guard = self.guard();
        let mut mapping = self.read_file();

        let Some(target) = mapping.remove(source_id) else {
            return Ok(None);
        };
        self.write_file(&mapping)?;
        info!(source = %source_id, target_id = %target, "Filament unmapped");
        Ok(Some(target))
    }

    /// Programmatic request: `Some(target)` maps, `None` unmaps
    pub fn update(&self, source_id: &str, target_id: Option<&str>) -> Result<MappingChange> {
        match target_id {
            Some(target) => self.upsert(source_id, target).map(MappingChange::Mapped),
            None => self.remove(source_id).map(MappingChange::Unmapped),
        }
    }

    fn read_file(&self) -> Mapping {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Mapping::new(),
            Err(e) => {
                warn!(
                    "Mapping file {} unreadable ({}), treating as empty",
                    self.path.display(),
                    e
                );
                return Mapping::new();
            }
        };

        let object = match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(object)) => object,
            Ok(_) | Err(_) => {
                warn!(
                    "Mapping file {} is corrupt, treating as empty",
                    self.path.display()
                );
                return Mapping::new();
            }
        };

        let mut mapping = Mapping::new();
        let mut seen = BTreeSet::new();
        for (source, value) in object {
            let target = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                other => {
                    warn!(source = %source, value = %other, "Ignoring non-id mapping value");
                    continue;
                }
            };
            if !seen.insert(target.clone()) {
                warn!(source = %source, target_id = %target, "Ignoring duplicate target in mapping file");
                continue;
            }
            mapping.insert(source, target);
        }
        mapping
    }

    fn write_file(&self, mapping: &Mapping) -> Result<()> {
        write_json_atomic(&self.path, mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store() -> (TempDir, MappingStore) {
        let dir = TempDir::new().unwrap();
        let store = MappingStore::new(dir.path().join("filament_mapping.json"));
        (dir, store)
    }

    fn assert_bijective(mapping: &Mapping) {
        assert_eq!(used_target_ids(mapping).len(), mapping.len());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let (_dir, store) = store();
        assert!(store.load().is_empty());
        assert!(store.used_target_ids().is_empty());
    }

    #[test]
    fn test_upsert_persists() {
        let (_dir, store) = store();
        let outcome = store.upsert("a1", "b1").unwrap();
        assert!(outcome.changed);
        assert_eq!(outcome.stolen_from, None);

        let reopened = MappingStore::new(store.path());
        assert_eq!(reopened.get("a1").as_deref(), Some("b1"));
    }

    #[test]
    fn test_upsert_is_idempotent() {
        let (_dir, store) = store();
        store.upsert("a1", "b1").unwrap();
        let before = store.load();

        let outcome = store.upsert("a1", "b1").unwrap();
        assert!(!outcome.changed);
        assert_eq!(outcome.previous_target.as_deref(), Some("b1"));
        assert_eq!(store.load(), before);
    }

    #[test]
    fn test_upsert_steals_target() {
        let (_dir, store) = store();
        store.upsert("a1", "b1").unwrap();

        let outcome = store.upsert("a2", "b1").unwrap();
        assert_eq!(outcome.stolen_from.as_deref(), Some("a1"));

        let mapping = store.load();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("a2").map(String::as_str), Some("b1"));
        assert!(!mapping.contains_key("a1"));
        assert_bijective(&mapping);
    }

    #[test]
    fn test_upsert_rebinds_source() {
        let (_dir, store) = store();
        store.upsert("a1", "b1").unwrap();
        store.upsert("a2", "b2").unwrap();

        let outcome = store.upsert("a1", "b2").unwrap();
        assert_eq!(outcome.previous_target.as_deref(), Some("b1"));
        assert_eq!(outcome.stolen_from.as_deref(), Some("a2"));

        let mapping = store.load();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping.get("a1").map(String::as_str), Some("b2"));
        assert_bijective(&mapping);
    }

    #[test]
    fn test_bind_if_free_never_displaces() {
        let (_dir, store) = store();
        store.upsert("remote", "b1").unwrap();

        assert!(!store.bind_if_free("a1", "b1").unwrap());
        assert!(store.bind_if_free("a1", "b2").unwrap());
        assert!(!store.bind_if_free("a1", "b3").unwrap());

        let mapping = store.load();
        assert_eq!(mapping.get("remote").map(String::as_str), Some("b1"));
        assert_eq!(mapping.get("a1").map(String::as_str), Some("b2"));
        assert_eq!(mapping.len(), 2);
    }

    #[test]
    fn test_remove() {
        let (_dir, store) = store();
        store.upsert("a1", "b1").unwrap();

        assert_eq!(store.remove("a1").unwrap().as_deref(), Some("b1"));
        assert_eq!(store.remove("a1").unwrap(), None);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_update_null_target_unmaps() {
        let (_dir, store) = store();
        store.update("a1", Some("b1")).unwrap();
        assert_eq!(
            store.update("a1", None).unwrap(),
            MappingChange::Unmapped(Some("b1".to_string()))
        );
        assert_eq!(store.update("a1", None).unwrap(), MappingChange::Unmapped(None));
    }

    #[test]
    fn test_corrupt_file_is_empty_and_recoverable() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "{ not json").unwrap();
        assert!(store.load().is_empty());

        store.upsert("a1", "b1").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_non_object_file_is_empty() {
        let (_dir, store) = store();
        std::fs::write(store.path(), "[1, 2, 3]").unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_numeric_values_and_duplicate_targets_on_load() {
        let (_dir, store) = store();
        std::fs::write(
            store.path(),
            r#"{"a1": 7, "a2": "7", "a3": "9", "a4": null}"#,
        )
        .unwrap();

        let mapping = store.load();
        assert_eq!(mapping.get("a1").map(String::as_str), Some("7"));
        assert!(!mapping.contains_key("a2"));
        assert_eq!(mapping.get("a3").map(String::as_str), Some("9"));
        assert!(!mapping.contains_key("a4"));
        assert_bijective(&mapping);
    }

    #[test]
    fn test_write_failure_surfaces_and_commits_nothing() {
        let (dir, _) = store();
        // The mapping path is a non-empty directory: reads fail, rename fails
        let blocked = dir.path().join("blocked.json");
        std::fs::create_dir(&blocked).unwrap();
        std::fs::write(blocked.join("x"), b"x").unwrap();
        let store = MappingStore::new(&blocked);

        let err = store.upsert("a1", "b1").unwrap_err();
        assert!(matches!(err, spoolbridge_common::Error::Persistence { .. }));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_file_format_is_plain_object() {
        let (_dir, store) = store();
        store.upsert("GFA00", "3").unwrap();
        let raw: Value = serde_json::from_str(&std::fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(raw, serde_json::json!({"GFA00": "3"}));
    }
}
