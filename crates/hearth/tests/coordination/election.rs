use std::collections::BTreeMap;
use std::sync::Arc;

use hearth::coordination::{
    LocalBroadcastHub, MigrationRole, StartupDecision, TabCoordinator, MIGRATION_CHANNEL,
};
use hearth::ledger::{VersionLedger, LEDGER_KEY};
use hearth::migration::{MigrationOrchestrator, TransformRegistry};
use hearth::schema::Catalog;
use hearth::storage::{MemoryEngine, StorageEngine};
use hearth::HearthOptions;
use serde_json::json;

fn seed_legacy(engine: &dyn StorageEngine) {
    let old = BTreeMap::from([
        ("thoughts".to_string(), 1),
        ("projects".to_string(), 1),
        ("tasks".to_string(), 2),
    ]);
    engine.create_generation("hearth-gen-1", &old).unwrap();
    let tasks: Vec<_> = (1..=6)
        .map(|i| {
            let id = format!("t{i}");
            (id.clone(), json!({"id": id, "text": format!("task {i}")}))
        })
        .collect();
    engine.put_records("hearth-gen-1", "tasks", &tasks).unwrap();
    engine
        .set_meta(
            LEDGER_KEY,
            &json!({
                "activeGeneration": "hearth-gen-1",
                "appVersion": "0.9.0",
                "writtenAt": "2024-01-01T00:00:00.000Z"
            })
            .to_string(),
        )
        .unwrap();
}

struct Tab {
    orchestrator: MigrationOrchestrator,
    coordinator: TabCoordinator,
}

fn tab(engine: &Arc<dyn StorageEngine>, hub: &LocalBroadcastHub, id: &str) -> Tab {
    let registry = Arc::new(TransformRegistry::with_app_upgrades(Arc::new(
        Catalog::default_app(),
    )));
    let orchestrator = MigrationOrchestrator::new(
        engine.clone(),
        registry,
        HearthOptions::new("1.0.0").with_batch_size(2),
        id,
    )
    .unwrap()
    .with_channel(hub.channel(MIGRATION_CHANNEL));
    Tab {
        orchestrator,
        coordinator: TabCoordinator::new(id, hub.channel(MIGRATION_CHANNEL)),
    }
}

#[tokio::test]
async fn concurrent_startups_elect_one_leader() {
    let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
    seed_legacy(engine.as_ref());
    let hub = LocalBroadcastHub::new();
    let a = tab(&engine, &hub, "tab-a");
    let b = tab(&engine, &hub, "tab-b");

    let (ra, rb) = tokio::join!(
        a.coordinator.run_startup(&a.orchestrator),
        b.coordinator.run_startup(&b.orchestrator),
    );
    let decisions = [ra.unwrap(), rb.unwrap()];

    let led = decisions
        .iter()
        .filter(|d| matches!(d, StartupDecision::Led(Ok(_))))
        .count();
    let following = decisions
        .iter()
        .filter(|d| matches!(d, StartupDecision::Following))
        .count();
    assert_eq!((led, following), (1, 1));

    let names: Vec<String> = engine
        .list_generations()
        .unwrap()
        .into_iter()
        .map(|g| g.name)
        .collect();
    assert_eq!(names, vec!["hearth-gen-1", "hearth-gen-2"]);

    let entry = VersionLedger::new(engine.clone()).get().unwrap().unwrap();
    assert_eq!(entry.active_generation, "hearth-gen-2");
}

#[tokio::test]
async fn follower_reloads_after_leader_completes() {
    let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
    seed_legacy(engine.as_ref());
    let hub = LocalBroadcastHub::new();
    let leader = tab(&engine, &hub, "leader");
    let follower = tab(&engine, &hub, "follower");

    let led = leader
        .coordinator
        .run_startup(&leader.orchestrator)
        .await
        .unwrap();
    assert!(matches!(led, StartupDecision::Led(Ok(_))));
    assert_eq!(leader.coordinator.role(), MigrationRole::Normal);

    // Started and Complete are both queued; the follower catches up at once.
    let snap = follower.coordinator.wait_for_leader().await;
    assert_eq!(snap.role, MigrationRole::FollowerReload);
}

#[tokio::test]
async fn racing_executes_converge_on_one_generation() {
    let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
    seed_legacy(engine.as_ref());
    let hub = LocalBroadcastHub::new();
    let a = tab(&engine, &hub, "tab-a");
    let b = tab(&engine, &hub, "tab-b");

    let (ra, rb) = tokio::join!(a.orchestrator.execute(), b.orchestrator.execute());
    let (ra, rb) = (ra.unwrap(), rb.unwrap());
    assert_eq!(ra.target_generation, "hearth-gen-2");
    assert_eq!(rb.target_generation, "hearth-gen-2");

    assert_eq!(engine.list_generations().unwrap().len(), 2);
    assert!(a.orchestrator.pending_generation().unwrap().is_none());
}

#[tokio::test]
async fn nothing_to_do_on_a_current_install() {
    let engine: Arc<dyn StorageEngine> = Arc::new(MemoryEngine::new());
    let hub = LocalBroadcastHub::new();
    let a = tab(&engine, &hub, "tab-a");
    a.orchestrator.bootstrap().unwrap();

    let decision = a.coordinator.run_startup(&a.orchestrator).await.unwrap();
    assert!(matches!(decision, StartupDecision::NotNeeded));
    assert_eq!(a.coordinator.role(), MigrationRole::Normal);
}
