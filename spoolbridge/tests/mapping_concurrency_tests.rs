//! Concurrent access to one mapping file
//!
//! Independent `MappingStore` handles on the same path must serialize: no
//! lost updates, and the file always holds a bijection.

use spoolbridge::mapping::{used_target_ids, MappingStore};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::task::JoinSet;

#[tokio::test]
async fn test_concurrent_distinct_upserts_are_all_kept() {
    let temp_dir = TempDir::new().unwrap();
    let path = Arc::new(temp_dir.path().join("filament_mapping.json"));

    let mut join_set = JoinSet::new();
    for i in 0..16 {
        let path = Arc::clone(&path);
        join_set.spawn_blocking(move || {
            let store = MappingStore::new(path.as_path());
            store
                .upsert(&format!("a{}", i), &format!("b{}", i))
                .unwrap();
            i
        });
    }

    let mut finished = 0;
    while let Some(result) = join_set.join_next().await {
        result.unwrap();
        finished += 1;
    }
    assert_eq!(finished, 16);

    let mapping = MappingStore::new(path.as_path()).load();
    assert_eq!(mapping.len(), 16, "Every upsert must survive");
    for i in 0..16 {
        assert_eq!(mapping[&format!("a{}", i)], format!("b{}", i));
    }
}

#[tokio::test]
async fn test_concurrent_steals_keep_bijection() {
    let temp_dir = TempDir::new().unwrap();
    let path: Arc<PathBuf> = Arc::new(temp_dir.path().join("filament_mapping.json"));

    // 8 sources fighting over 3 targets, interleaved with unmaps
    let mut join_set = JoinSet::new();
    for i in 0..8 {
        let path = Arc::clone(&path);
        join_set.spawn_blocking(move || {
            let store = MappingStore::new(path.as_path());
            for round in 0..25 {
                let source = format!("a{}", i);
                let target = format!("b{}", (i + round) % 3);
                store.upsert(&source, &target).unwrap();
                if round % 7 == 0 {
                    store.remove(&source).unwrap();
                }

                let mapping = store.load();
                assert_eq!(used_target_ids(&mapping).len(), mapping.len());
            }
        });
    }

    while let Some(result) = join_set.join_next().await {
        result.unwrap();
    }

    let mapping = MappingStore::new(path.as_path()).load();
    assert!(mapping.len() <= 3);
    assert_eq!(used_target_ids(&mapping).len(), mapping.len());

    // The file is well-formed JSON, not a torn write
    let raw = std::fs::read_to_string(path.as_path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert!(parsed.is_object());
}
