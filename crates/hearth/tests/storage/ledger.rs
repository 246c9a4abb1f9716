use std::sync::Arc;

use hearth::error::LedgerError;
use hearth::ledger::{AppVersion, VersionLedger, LEDGER_KEY};
use hearth::storage::{MemoryEngine, StorageEngine};

fn ledger() -> (Arc<MemoryEngine>, VersionLedger) {
    let engine = Arc::new(MemoryEngine::new());
    (engine.clone(), VersionLedger::new(engine))
}

fn v(s: &str) -> AppVersion {
    s.parse().unwrap()
}

#[test]
fn empty_ledger_is_not_a_downgrade() {
    let (_, ledger) = ledger();
    assert!(ledger.get().unwrap().is_none());
    assert!(!ledger.is_downgrade(&v("0.0.1")).unwrap());
    assert!(ledger.ensure_not_downgrade(&v("0.0.1")).unwrap().is_none());
}

#[test]
fn set_round_trips_through_meta() {
    let (engine, ledger) = ledger();
    let entry = ledger.set("hearth-gen-3", &v("1.4.0")).unwrap();
    assert_eq!(ledger.get().unwrap(), Some(entry));

    let raw = engine.get_meta(LEDGER_KEY).unwrap().unwrap();
    let json: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(json["activeGeneration"], "hearth-gen-3");
    assert_eq!(json["appVersion"], "1.4.0");
}

#[test]
fn newer_recorded_version_is_a_downgrade() {
    let (_, ledger) = ledger();
    ledger.set("hearth-gen-1", &v("9.9.9")).unwrap();

    assert!(ledger.is_downgrade(&v("1.0.0")).unwrap());
    match ledger.ensure_not_downgrade(&v("1.0.0")) {
        Err(LedgerError::Downgrade { recorded, running }) => {
            assert_eq!(recorded, "9.9.9");
            assert_eq!(running, "1.0.0");
        }
        other => panic!("expected downgrade, got {other:?}"),
    }
}

#[test]
fn same_or_newer_running_version_is_fine() {
    let (_, ledger) = ledger();
    ledger.set("hearth-gen-1", &v("1.2.0")).unwrap();
    assert!(ledger.ensure_not_downgrade(&v("1.2.0")).unwrap().is_some());
    assert!(ledger.ensure_not_downgrade(&v("1.10.0")).unwrap().is_some());
}

#[test]
fn claim_keeps_the_first_writer() {
    let (_, ledger) = ledger();
    let first = ledger.claim("hearth-gen-1", &v("1.0.0")).unwrap();
    let second = ledger.claim("hearth-gen-2", &v("1.0.0")).unwrap();
    assert_eq!(first.active_generation, "hearth-gen-1");
    assert_eq!(second.active_generation, "hearth-gen-1");
}

#[test]
fn corrupt_ledger_is_reported() {
    let (engine, ledger) = ledger();
    engine.set_meta(LEDGER_KEY, "not json").unwrap();
    assert!(matches!(ledger.get(), Err(LedgerError::Corrupt(_))));
}
