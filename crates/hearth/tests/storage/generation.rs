use std::collections::BTreeMap;
use std::sync::Arc;

use hearth::error::StorageError;
use hearth::reactive::ChangeEvent;
use hearth::schema::Catalog;
use hearth::storage::{GenerationStore, MemoryEngine, StorageEngine};
use parking_lot::Mutex;
use serde_json::{json, Value};

fn setup() -> (Arc<MemoryEngine>, GenerationStore) {
    let engine = Arc::new(MemoryEngine::new());
    let catalog = Arc::new(Catalog::default_app());
    engine
        .create_generation("hearth-gen-1", &catalog.versions())
        .unwrap();
    let store = GenerationStore::open(engine.clone(), "hearth-gen-1", catalog).unwrap();
    (engine, store)
}

fn task(id: &str, updated_at: &str) -> Value {
    json!({
        "id": id,
        "updatedAt": updated_at,
        "title": format!("task {id}"),
        "rawInput": "",
        "done": false,
        "priority": 0,
        "sourceThoughtId": "",
        "createdAt": "2024-01-01T00:00:00Z"
    })
}

// ============================================================================
// Open
// ============================================================================

#[test]
fn open_missing_generation_fails() {
    let engine = Arc::new(MemoryEngine::new());
    let err = GenerationStore::open(engine, "hearth-gen-9", Arc::new(Catalog::default_app()))
        .unwrap_err();
    assert!(matches!(err, StorageError::GenerationNotFound(_)));
}

#[test]
fn open_with_stale_schema_version_fails() {
    let engine = Arc::new(MemoryEngine::new());
    let mut versions = Catalog::default_app().versions();
    versions.insert("tasks".to_string(), 2);
    engine.create_generation("hearth-gen-1", &versions).unwrap();

    let err = GenerationStore::open(engine, "hearth-gen-1", Arc::new(Catalog::default_app()))
        .unwrap_err();
    match err {
        StorageError::SchemaMismatch {
            collection,
            stored,
            expected,
            ..
        } => {
            assert_eq!(collection, "tasks");
            assert_eq!(stored, 2);
            assert_eq!(expected, 3);
        }
        other => panic!("expected SchemaMismatch, got {other}"),
    }
}

#[test]
fn open_without_a_catalog_collection_fails() {
    let engine = Arc::new(MemoryEngine::new());
    let versions = BTreeMap::from([("tasks".to_string(), 3)]);
    engine.create_generation("hearth-gen-1", &versions).unwrap();
    let err = GenerationStore::open(engine, "hearth-gen-1", Arc::new(Catalog::default_app()))
        .unwrap_err();
    assert!(matches!(err, StorageError::CollectionNotRegistered { .. }));
}

// ============================================================================
// Reads and writes
// ============================================================================

#[test]
fn put_then_get() {
    let (_, store) = setup();
    store.put("tasks", task("t1", "2024-01-01T00:00:00Z")).unwrap();
    let got = store.get("tasks", "t1").unwrap().unwrap();
    assert_eq!(got["title"], "task t1");
    assert_eq!(store.count("tasks").unwrap(), 1);
}

#[test]
fn put_rejects_invalid_record() {
    let (_, store) = setup();
    let mut bad = task("t1", "2024-01-01T00:00:00Z");
    bad["done"] = json!("nope");
    let err = store.put("tasks", bad).unwrap_err();
    assert!(matches!(err, StorageError::Invalid { ref id, .. } if id == "t1"));
    assert_eq!(store.count("tasks").unwrap(), 0);
}

#[test]
fn put_without_id_fails() {
    let (_, store) = setup();
    let mut bad = task("t1", "2024-01-01T00:00:00Z");
    bad.as_object_mut().unwrap().remove("id");
    assert!(matches!(
        store.put("tasks", bad),
        Err(StorageError::MissingId { .. })
    ));
}

#[test]
fn unknown_collection_is_rejected() {
    let (_, store) = setup();
    assert!(matches!(
        store.get("notes", "n1"),
        Err(StorageError::CollectionNotRegistered { .. })
    ));
}

#[test]
fn put_many_writes_valid_and_reports_invalid() {
    let (_, store) = setup();
    let mut bad = task("t2", "2024-01-01T00:00:00Z");
    bad["priority"] = json!("high");
    let result = store
        .put_many(
            "tasks",
            vec![task("t1", "2024-01-01T00:00:00Z"), bad, task("t3", "2024-01-01T00:00:00Z")],
        )
        .unwrap();
    assert_eq!(result.written, vec!["t1", "t3"]);
    assert_eq!(result.errors.len(), 1);
    assert_eq!(result.errors[0].id, "t2");
    assert_eq!(store.count("tasks").unwrap(), 2);
}

#[test]
fn patch_merges_and_bumps_updated_at() {
    let (_, store) = setup();
    store.put("tasks", task("t1", "2024-01-01T00:00:00Z")).unwrap();
    let patched = store
        .patch("tasks", "t1", json!({"done": true, "id": "other"}))
        .unwrap();
    assert_eq!(patched["id"], "t1");
    assert_eq!(patched["done"], true);
    assert_eq!(patched["title"], "task t1");
    assert_ne!(patched["updatedAt"], "2024-01-01T00:00:00Z");
}

#[test]
fn patch_keeps_explicit_updated_at() {
    let (_, store) = setup();
    store.put("tasks", task("t1", "2024-01-01T00:00:00Z")).unwrap();
    let patched = store
        .patch("tasks", "t1", json!({"updatedAt": "2030-01-01T00:00:00Z"}))
        .unwrap();
    assert_eq!(patched["updatedAt"], "2030-01-01T00:00:00Z");
}

#[test]
fn patch_missing_record_is_not_found() {
    let (_, store) = setup();
    assert!(matches!(
        store.patch("tasks", "nope", json!({})),
        Err(StorageError::NotFound { .. })
    ));
}

#[test]
fn remove_hides_record() {
    let (_, store) = setup();
    store.put("tasks", task("t1", "2024-01-01T00:00:00Z")).unwrap();
    assert!(store.remove("tasks", "t1").unwrap());
    assert!(!store.remove("tasks", "t1").unwrap());
    assert!(store.get("tasks", "t1").unwrap().is_none());
    assert!(store.list("tasks").unwrap().is_empty());
}

// ============================================================================
// Change events
// ============================================================================

#[test]
fn subscribe_sees_only_its_collection() {
    let (_, store) = setup();
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let unsubscribe = store.subscribe("tasks", move |e| sink.lock().push(e.clone()));

    store.put("tasks", task("t1", "2024-01-01T00:00:00Z")).unwrap();
    store
        .put(
            "projects",
            json!({
                "id": "p1",
                "updatedAt": "2024-01-01T00:00:00Z",
                "name": "home",
                "description": "",
                "archived": false,
                "createdAt": "2024-01-01T00:00:00Z"
            }),
        )
        .unwrap();
    store.remove("tasks", "t1").unwrap();

    {
        let events = seen.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], ChangeEvent::Put { id, .. } if id == "t1"));
        assert!(matches!(&events[1], ChangeEvent::Delete { id, .. } if id == "t1"));
    }

    unsubscribe();
    store.put("tasks", task("t2", "2024-01-01T00:00:00Z")).unwrap();
    assert_eq!(seen.lock().len(), 2);
}

#[test]
fn put_many_emits_one_bulk_event() {
    let (_, store) = setup();
    let seen: Arc<Mutex<Vec<ChangeEvent>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    let _unsubscribe = store.on_change(move |e| sink.lock().push(e.clone()));

    store
        .put_many(
            "tasks",
            vec![task("a", "2024-01-01T00:00:00Z"), task("b", "2024-01-01T00:00:00Z")],
        )
        .unwrap();
    let events = seen.lock();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].ids(), vec!["a", "b"]);
}

#[test]
fn removing_a_missing_record_emits_nothing() {
    let (_, store) = setup();
    let seen = Arc::new(Mutex::new(0usize));
    let sink = seen.clone();
    let _unsubscribe = store.on_change(move |_| *sink.lock() += 1);
    store.remove("tasks", "ghost").unwrap();
    assert_eq!(*seen.lock(), 0);
}
