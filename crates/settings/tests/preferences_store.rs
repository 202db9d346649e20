use mdihost_settings::{MdiPreferences, PreferencesStore};
use std::fs;
use tempfile::tempdir;

#[test]
fn load_missing_file_returns_defaults() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("mdi.json");

    let store = PreferencesStore::load(&path).expect("load defaults");
    let prefs = store.preferences();
    assert_eq!(prefs.instance, "sidebar");
    assert!(prefs.persist);
    assert_eq!(prefs.save_delay_secs, 60);
    assert_eq!(prefs.save_max_delay_secs, 300);
    assert_eq!(prefs.history_capacity, 64);
    assert_eq!(prefs.load_timeout_secs, 30);
    assert_eq!(prefs.initial_entry_grace_secs, 10);
}

#[test]
fn save_and_reload_roundtrip() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("nested").join("mdi.json");

    let mut store = PreferencesStore::new(path.clone(), MdiPreferences::default());
    store
        .update(|prefs| {
            prefs.instance = "torrents".to_string();
            prefs.persist = false;
            prefs.save_delay_secs = 5;
        })
        .expect("save");

    let reloaded = PreferencesStore::load(&path).expect("reload");
    assert_eq!(reloaded.preferences().instance, "torrents");
    assert!(!reloaded.preferences().persist);
    assert_eq!(reloaded.preferences().save_delay_secs, 5);
    assert_eq!(reloaded.preferences().autoopen_key(), "torrents.autoopen");
}

#[test]
fn overwrite_sanitizes_values() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("mdi.json");

    let mut store = PreferencesStore::load(&path).expect("default");
    let mut prefs = store.preferences().clone();
    prefs.instance = "   ".to_string();
    prefs.save_delay_secs = 0;
    prefs.load_timeout_secs = 0;

    store.overwrite(prefs).expect("overwrite");

    let current = store.preferences();
    assert_eq!(current.instance, "sidebar");
    assert_eq!(current.save_delay_secs, 1);
    assert_eq!(current.load_timeout_secs, 30);
}

#[test]
fn legacy_version_is_upgraded_on_load() {
    let temp = tempdir().expect("tempdir");
    let path = temp.path().join("mdi.json");
    fs::write(&path, r#"{ "version": 0, "instance": "library" }"#).expect("write legacy prefs");

    let store = PreferencesStore::load(&path).expect("load legacy file");
    let prefs = store.preferences();
    assert_eq!(
        prefs.version, 1,
        "legacy preferences should be upgraded to schema version 1"
    );
    assert_eq!(prefs.instance, "library");
    assert_eq!(
        prefs.history_capacity, 64,
        "missing fields should fall back to defaults"
    );
}
