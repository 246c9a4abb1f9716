use std::sync::Arc;

use hearth::error::MigrationError;
use hearth::migration::{BackupSnapshot, MigrationOrchestrator, TransformRegistry};
use hearth::schema::Catalog;
use hearth::storage::{GenerationStore, MemoryEngine, StorageEngine};
use hearth::HearthOptions;
use serde_json::json;

fn orchestrator(engine: Arc<dyn StorageEngine>) -> MigrationOrchestrator {
    let registry = Arc::new(TransformRegistry::new(Arc::new(Catalog::default_app())));
    MigrationOrchestrator::new(engine, registry, HearthOptions::new("2.1.0"), "s").unwrap()
}

#[test]
fn backup_requires_an_active_generation() {
    let orch = orchestrator(Arc::new(MemoryEngine::new()));
    assert!(matches!(
        orch.download_backup(),
        Err(MigrationError::NoActiveGeneration)
    ));
}

#[test]
fn backup_holds_every_live_record() {
    let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
    let orch = orchestrator(engine.clone());
    let active = orch.bootstrap().unwrap().unwrap();

    let store = GenerationStore::open(engine, &active, Arc::new(Catalog::default_app())).unwrap();
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

    let snapshot = orch.download_backup().unwrap();
    assert_eq!(snapshot.generation, active);
    assert_eq!(snapshot.app_version, "2.1.0");
    assert_eq!(snapshot.record_count(), 1);
    assert_eq!(snapshot.collections["projects"][0]["name"], "home");
    assert!(snapshot.collections["tasks"].is_empty());
    assert!(snapshot.file_name().ends_with(".json"));
}

#[test]
fn written_backup_parses_back() {
    let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
    let orch = orchestrator(engine);
    orch.bootstrap().unwrap();

    let mut buf = Vec::new();
    let written = orch.write_backup(&mut buf).unwrap();
    let parsed: BackupSnapshot = serde_json::from_slice(&buf).unwrap();
    assert_eq!(parsed, written);

    let raw: serde_json::Value = serde_json::from_slice(&buf).unwrap();
    assert!(raw.get("exportedAt").is_some());
}
