//! Crate-level coverage of the two offset-store end-to-end scenarios:
//! clean restart resume, and crash-before-flush fallback to the last
//! committed snapshot.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use cdc_engine::offset_store::OffsetStore;

fn offset(pos: i64) -> cdc_engine::model::OffsetRecord {
    let mut partition = BTreeMap::new();
    partition.insert("server".to_string(), "A".to_string());
    let mut offset = BTreeMap::new();
    offset.insert("pos".to_string(), serde_json::json!(pos));
    cdc_engine::model::OffsetRecord { partition, offset }
}

#[test]
fn clean_restart_resumes_from_the_last_flushed_offset() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    {
        let store = OffsetStore::new(&path).unwrap();
        store.stage(offset(42));
        assert_eq!(
            store.flush(Instant::now() + Duration::from_secs(2)),
            cdc_engine::offset_store::FlushOutcome::Committed
        );
    }

    let mut partition = BTreeMap::new();
    partition.insert("server".to_string(), "A".to_string());

    let reopened = OffsetStore::new(&path).unwrap();
    let resumed = reopened.offset_for_partition(&partition).unwrap();
    assert_eq!(resumed.offset.get("pos").unwrap(), &serde_json::json!(42));
}

#[test]
fn crash_before_flush_falls_back_to_last_committed_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("offsets.json");

    let store = OffsetStore::new(&path).unwrap();
    store.stage(offset(10));
    assert_eq!(
        store.flush(Instant::now() + Duration::from_secs(2)),
        cdc_engine::offset_store::FlushOutcome::Committed
    );

    // Staged but never flushed: simulates a crash mid-batch.
    store.stage(offset(99));
    drop(store);

    let mut partition = BTreeMap::new();
    partition.insert("server".to_string(), "A".to_string());

    let reopened = OffsetStore::new(&path).unwrap();
    let resumed = reopened.offset_for_partition(&partition).unwrap();
    assert_eq!(resumed.offset.get("pos").unwrap(), &serde_json::json!(10));
}
