//! Behaviour every `StorageEngine` shares, run against each engine.

use std::collections::BTreeMap;

use hearth::error::StorageError;
use hearth::storage::{MemoryEngine, RawGeneration, RecordSource, StorageEngine};
use serde_json::json;

fn engines() -> Vec<(&'static str, Box<dyn StorageEngine>)> {
    let mut engines: Vec<(&'static str, Box<dyn StorageEngine>)> =
        vec![("memory", Box::new(MemoryEngine::new()))];
    #[cfg(feature = "sqlite")]
    engines.push((
        "sqlite",
        Box::new(hearth::storage::SqliteEngine::open_in_memory().unwrap()),
    ));
    engines
}

fn versions(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    pairs.iter().map(|(c, v)| (c.to_string(), *v)).collect()
}

// ============================================================================
// Generations
// ============================================================================

#[test]
fn create_generation_is_idempotent() {
    for (name, engine) in engines() {
        let cols = versions(&[("tasks", 3)]);
        let first = engine.create_generation("hearth-gen-1", &cols).unwrap();
        let second = engine.create_generation("hearth-gen-1", &cols).unwrap();
        assert_eq!(first, second, "{name}");
        assert_eq!(engine.list_generations().unwrap().len(), 1, "{name}");
    }
}

#[test]
fn create_generation_with_other_schema_conflicts() {
    for (name, engine) in engines() {
        engine
            .create_generation("hearth-gen-1", &versions(&[("tasks", 3)]))
            .unwrap();
        let err = engine
            .create_generation("hearth-gen-1", &versions(&[("tasks", 4)]))
            .unwrap_err();
        assert!(
            matches!(err, StorageError::GenerationConflict { ref collection, .. } if collection == "tasks"),
            "{name}: {err}"
        );
    }
}

#[test]
fn generation_info_reports_collections_and_epoch() {
    for (name, engine) in engines() {
        engine
            .create_generation("hearth-gen-7", &versions(&[("tasks", 3), ("thoughts", 2)]))
            .unwrap();
        let info = engine.generation_info("hearth-gen-7").unwrap().unwrap();
        assert_eq!(info.epoch(), Some(7), "{name}");
        assert_eq!(info.collections.get("thoughts"), Some(&2), "{name}");
        assert!(engine.generation_info("missing").unwrap().is_none(), "{name}");
    }
}

#[test]
fn drop_generation_removes_records() {
    for (name, engine) in engines() {
        engine
            .create_generation("old", &versions(&[("tasks", 1)]))
            .unwrap();
        engine
            .put_records("old", "tasks", &[("a".into(), json!({"id": "a"}))])
            .unwrap();
        assert!(engine.drop_generation("old").unwrap(), "{name}");
        assert!(!engine.drop_generation("old").unwrap(), "{name}");
        assert!(engine.list_generations().unwrap().is_empty(), "{name}");
        assert!(matches!(
            engine.raw_scan("old", "tasks"),
            Err(StorageError::GenerationNotFound(_))
        ));
    }
}

// ============================================================================
// Records
// ============================================================================

#[test]
fn put_records_upserts_by_id() {
    for (name, engine) in engines() {
        engine
            .create_generation("g", &versions(&[("tasks", 1)]))
            .unwrap();
        engine
            .put_records("g", "tasks", &[("a".into(), json!({"id": "a", "n": 1}))])
            .unwrap();
        engine
            .put_records("g", "tasks", &[("a".into(), json!({"id": "a", "n": 2}))])
            .unwrap();
        let scan = engine.raw_scan("g", "tasks").unwrap();
        assert_eq!(scan.records.len(), 1, "{name}");
        assert_eq!(scan.records[0].data["n"], 2, "{name}");
    }
}

#[test]
fn remove_record_leaves_tombstone() {
    for (name, engine) in engines() {
        engine
            .create_generation("g", &versions(&[("tasks", 1)]))
            .unwrap();
        engine
            .put_records("g", "tasks", &[("a".into(), json!({"id": "a"}))])
            .unwrap();
        assert!(engine.remove_record("g", "tasks", "a").unwrap(), "{name}");
        assert!(!engine.remove_record("g", "tasks", "a").unwrap(), "{name}");

        let row = engine.raw_get("g", "tasks", "a").unwrap().unwrap();
        assert!(row.deleted, "{name}");
        assert_eq!(engine.raw_scan("g", "tasks").unwrap().live().count(), 0, "{name}");
    }
}

#[test]
fn unregistered_collection_is_an_error() {
    for (name, engine) in engines() {
        engine
            .create_generation("g", &versions(&[("tasks", 1)]))
            .unwrap();
        let err = engine
            .put_records("g", "projects", &[("p".into(), json!({"id": "p"}))])
            .unwrap_err();
        assert!(
            matches!(err, StorageError::CollectionNotRegistered { .. }),
            "{name}: {err}"
        );
    }
}

#[test]
fn raw_generation_reads_live_records_only() {
    for (name, engine) in engines() {
        engine
            .create_generation("g", &versions(&[("tasks", 1)]))
            .unwrap();
        engine
            .put_records(
                "g",
                "tasks",
                &[
                    ("a".into(), json!({"id": "a"})),
                    ("b".into(), json!({"id": "b"})),
                ],
            )
            .unwrap();
        engine.remove_record("g", "tasks", "a").unwrap();

        let raw = RawGeneration::new(engine.as_ref(), "g");
        let records = raw.read_all("tasks").unwrap();
        assert_eq!(records, vec![json!({"id": "b"})], "{name}");
    }
}

// ============================================================================
// Metadata
// ============================================================================

#[test]
fn meta_set_get_delete() {
    for (name, engine) in engines() {
        assert_eq!(engine.get_meta("k").unwrap(), None, "{name}");
        engine.set_meta("k", "v1").unwrap();
        engine.set_meta("k", "v2").unwrap();
        assert_eq!(engine.get_meta("k").unwrap().as_deref(), Some("v2"), "{name}");
        engine.delete_meta("k").unwrap();
        assert_eq!(engine.get_meta("k").unwrap(), None, "{name}");
    }
}

#[test]
fn claim_meta_keeps_first_value() {
    for (name, engine) in engines() {
        assert_eq!(engine.claim_meta("k", "first").unwrap(), "first", "{name}");
        assert_eq!(engine.claim_meta("k", "second").unwrap(), "first", "{name}");
        assert_eq!(engine.get_meta("k").unwrap().as_deref(), Some("first"), "{name}");
    }
}

#[test]
fn injected_scan_failure_only_hits_that_generation() {
    let engine = MemoryEngine::new();
    engine.create_generation("bad", &versions(&[("tasks", 1)])).unwrap();
    engine.create_generation("good", &versions(&[("tasks", 1)])).unwrap();
    engine.fail_scans_for("bad");

    assert!(matches!(
        engine.raw_scan("bad", "tasks"),
        Err(StorageError::Corruption { .. })
    ));
    assert!(engine.raw_scan("good", "tasks").is_ok());
    assert_eq!(engine.generation_names(), vec!["bad", "good"]);
}
