use std::collections::BTreeMap;
use std::sync::Arc;

use hearth::migration::LegacyReader;
use hearth::storage::{MemoryEngine, StorageEngine};
use serde_json::json;

fn tasks_at(version: u32) -> BTreeMap<String, u32> {
    BTreeMap::from([("tasks".to_string(), version)])
}

#[test]
fn candidates_are_oldest_first_and_exclude_target() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("hearth-gen-3", &tasks_at(2)).unwrap();
    engine.create_generation("hearth-gen-10", &tasks_at(3)).unwrap();
    engine.create_generation("legacy-tasks", &tasks_at(1)).unwrap();
    engine
        .create_generation("hearth-gen-1", &BTreeMap::from([("thoughts".to_string(), 1)]))
        .unwrap();

    let reader = LegacyReader::new(engine);
    let candidates = reader
        .list_candidate_generations("tasks", Some("hearth-gen-10"))
        .unwrap();
    assert_eq!(candidates, vec!["legacy-tasks", "hearth-gen-3"]);
}

#[test]
fn later_generation_wins_by_id() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("hearth-gen-1", &tasks_at(1)).unwrap();
    engine.create_generation("hearth-gen-2", &tasks_at(2)).unwrap();
    engine
        .put_records(
            "hearth-gen-1",
            "tasks",
            &[
                ("a".into(), json!({"id": "a", "title": "old"})),
                ("b".into(), json!({"id": "b", "title": "only old"})),
            ],
        )
        .unwrap();
    engine
        .put_records(
            "hearth-gen-2",
            "tasks",
            &[("a".into(), json!({"id": "a", "title": "new"}))],
        )
        .unwrap();

    let reader = LegacyReader::new(engine);
    let sources = reader.list_candidate_generations("tasks", None).unwrap();
    let merged = reader.read_merged("tasks", &sources);
    assert_eq!(
        merged,
        vec![
            json!({"id": "a", "title": "new"}),
            json!({"id": "b", "title": "only old"}),
        ]
    );
}

#[test]
fn unkeyed_records_are_kept_for_the_transform() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("old", &tasks_at(1)).unwrap();
    engine
        .put_records("old", "tasks", &[("row-1".into(), json!({"title": "no id"}))])
        .unwrap();

    let reader = LegacyReader::new(engine);
    let merged = reader.read_merged("tasks", &["old".to_string()]);
    assert_eq!(merged, vec![json!({"title": "no id"})]);
}

#[test]
fn unreadable_generation_contributes_nothing() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("broken", &tasks_at(1)).unwrap();
    engine.create_generation("fine", &tasks_at(1)).unwrap();
    engine
        .put_records("broken", "tasks", &[("a".into(), json!({"id": "a"}))])
        .unwrap();
    engine
        .put_records("fine", "tasks", &[("b".into(), json!({"id": "b"}))])
        .unwrap();
    engine.fail_scans_for("broken");

    let reader = LegacyReader::new(engine);
    assert!(reader.read_all("broken", "tasks").is_empty());
    let merged = reader.read_merged("tasks", &["broken".to_string(), "fine".to_string()]);
    assert_eq!(merged, vec![json!({"id": "b"})]);
}

#[test]
fn missing_collection_reads_as_empty() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("old", &tasks_at(1)).unwrap();
    let reader = LegacyReader::new(engine);
    assert!(reader.read_all("old", "projects").is_empty());
    assert!(reader.read_all("gone", "tasks").is_empty());
}

#[test]
fn tombstone_in_later_generation_hides_older_copy() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("hearth-gen-1", &tasks_at(1)).unwrap();
    engine.create_generation("hearth-gen-2", &tasks_at(2)).unwrap();
    engine
        .put_records(
            "hearth-gen-1",
            "tasks",
            &[
                ("a".into(), json!({"id": "a", "title": "deleted later"})),
                ("b".into(), json!({"id": "b", "title": "kept"})),
            ],
        )
        .unwrap();
    engine
        .put_records(
            "hearth-gen-2",
            "tasks",
            &[
                ("a".into(), json!({"id": "a", "title": "deleted later"})),
                ("b".into(), json!({"id": "b", "title": "kept"})),
            ],
        )
        .unwrap();
    assert!(engine.remove_record("hearth-gen-2", "tasks", "a").unwrap());

    let reader = LegacyReader::new(engine);
    let sources = reader.list_candidate_generations("tasks", None).unwrap();
    let merged = reader.read_merged("tasks", &sources);
    assert_eq!(merged, vec![json!({"id": "b", "title": "kept"})]);
}

#[test]
fn record_recreated_after_tombstone_survives() {
    let engine = Arc::new(MemoryEngine::new());
    engine.create_generation("hearth-gen-1", &tasks_at(1)).unwrap();
    engine.create_generation("hearth-gen-2", &tasks_at(2)).unwrap();
    engine
        .put_records("hearth-gen-1", "tasks", &[("a".into(), json!({"id": "a"}))])
        .unwrap();
    assert!(engine.remove_record("hearth-gen-1", "tasks", "a").unwrap());
    engine
        .put_records("hearth-gen-2", "tasks", &[("a".into(), json!({"id": "a", "v": 2}))])
        .unwrap();

    let reader = LegacyReader::new(engine);
    let sources = reader.list_candidate_generations("tasks", None).unwrap();
    assert_eq!(reader.read_merged("tasks", &sources), vec![json!({"id": "a", "v": 2})]);
}
