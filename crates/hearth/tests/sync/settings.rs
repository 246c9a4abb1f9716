use std::sync::Arc;

use hearth::error::SettingsError;
use hearth::storage::{MemoryEngine, StorageEngine};
use hearth::sync::{normalize_device_name, RoomCredentials, SettingsStore, SETTINGS_KEY};

fn engine() -> Arc<dyn StorageEngine> {
    Arc::new(MemoryEngine::new())
}

#[test]
fn first_load_creates_and_persists_a_device() {
    let engine = engine();
    let store = SettingsStore::new(engine.clone());
    let settings = store.load_or_init().unwrap();

    assert_eq!(settings.device_name, "My device");
    assert!(!settings.sync_enabled);
    assert!(settings.room.is_none());
    assert!(engine.get_meta(SETTINGS_KEY).unwrap().is_some());

    let again = SettingsStore::new(engine).load_or_init().unwrap();
    assert_eq!(again.device_id, settings.device_id);
}

#[test]
fn concurrent_first_loads_agree_on_one_device_id() {
    let engine = engine();
    let a = SettingsStore::new(engine.clone());
    let b = SettingsStore::new(engine);
    assert_eq!(
        a.load_or_init().unwrap().device_id,
        b.load_or_init().unwrap().device_id
    );
}

#[test]
fn changes_survive_reload() {
    let engine = engine();
    let store = SettingsStore::new(engine.clone());
    let room = RoomCredentials::generate();
    store.set_device_name("  Kitchen tablet ").unwrap();
    store.set_room(Some(room.clone())).unwrap();
    store.set_sync_enabled(true).unwrap();

    let reloaded = SettingsStore::new(engine).get().unwrap();
    assert_eq!(reloaded.device_name, "Kitchen tablet");
    assert_eq!(reloaded.room, Some(room));
    assert!(reloaded.sync_enabled);
}

#[test]
fn device_names_are_trimmed_and_bounded() {
    assert_eq!(normalize_device_name(" Phone ").unwrap(), "Phone");
    assert!(normalize_device_name(&"é".repeat(64)).is_ok());
    assert!(matches!(
        normalize_device_name("   "),
        Err(SettingsError::InvalidDeviceName(_))
    ));
    assert!(matches!(
        normalize_device_name(&"n".repeat(65)),
        Err(SettingsError::InvalidDeviceName(_))
    ));
}

#[test]
fn invalid_name_leaves_settings_untouched() {
    let store = SettingsStore::new(engine());
    store.set_device_name("Laptop").unwrap();
    assert!(store.set_device_name("").is_err());
    assert_eq!(store.get().unwrap().device_name, "Laptop");
}

#[test]
fn corrupt_settings_are_reported() {
    let engine = engine();
    engine.set_meta(SETTINGS_KEY, "{not json").unwrap();
    let err = SettingsStore::new(engine).load_or_init().unwrap_err();
    assert!(matches!(err, SettingsError::Corrupt(_)));
}
