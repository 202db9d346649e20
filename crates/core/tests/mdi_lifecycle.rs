use std::cell::RefCell;
use std::rc::Rc;
use std::thread;
use std::time::Duration;

use mdihost_core::{Entry, EntryId, Factory, Mdi, MdiListener, ShowRequest};
use mdihost_settings::{
    AutoOpenRecord, FileStorage, ManualClock, MdiPreferences, MemoryStorage, StateStorage,
};
use tempfile::tempdir;

fn closeable(title: &str) -> Factory {
    let title = title.to_string();
    Factory::simple(move |id| Ok(Some(Entry::new(id, title.clone()).closeable(true))))
}

fn fresh(storage: &MemoryStorage) -> Mdi {
    let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone());
    mdi.load();
    mdi
}

#[derive(Clone, Default)]
struct Loaded(Rc<RefCell<Vec<String>>>);

impl MdiListener for Loaded {
    fn entry_loaded(&mut self, entry: &Entry) {
        self.0.borrow_mut().push(entry.id().to_string());
    }

    fn mdi_disposed(&mut self) {
        self.0.borrow_mut().push("disposed".to_string());
    }
}

#[test]
fn registry_never_holds_two_entries_under_one_id() {
    let storage = MemoryStorage::new();
    let mut mdi = fresh(&storage);
    for title in ["first", "second", "third"] {
        mdi.open_entry(Entry::new("library", title));
    }
    assert_eq!(mdi.entries().count(), 1);
    assert_eq!(mdi.entry("library").expect("entry").title(), "first");
}

#[test]
fn late_listener_sees_open_entries_in_registry_order() {
    let storage = MemoryStorage::new();
    let mut mdi = fresh(&storage);
    for id in ["library", "stats", "peers"] {
        mdi.open_entry(Entry::new(id, id));
    }

    let loaded = Loaded::default();
    mdi.add_listener(loaded.clone());
    mdi.open_entry(Entry::new("chat", "Chat"));
    mdi.shutdown();

    assert_eq!(
        *loaded.0.borrow(),
        vec!["library", "stats", "peers", "chat", "disposed"]
    );
}

#[test]
fn ordering_does_not_depend_on_open_sequence() {
    let storage = MemoryStorage::new();
    let preference: Vec<String> = ["a", "b", "c", "d"].iter().map(|s| s.to_string()).collect();
    let layouts: Vec<Vec<EntryId>> = [["d", "b", "a", "c"], ["c", "a", "d", "b"]]
        .iter()
        .map(|sequence| {
            let mut mdi = Mdi::new(
                MdiPreferences {
                    persist: false,
                    ..MdiPreferences::default()
                },
                storage.clone(),
            );
            mdi.load();
            mdi.set_preferred_order(preference.clone());
            for id in sequence {
                mdi.open_entry(Entry::new(*id, *id));
            }
            mdi.layout().to_vec()
        })
        .collect();

    let expected: Vec<EntryId> = ["a", "b", "c", "d"].iter().map(|id| EntryId::from(*id)).collect();
    assert_eq!(layouts[0], expected);
    assert_eq!(layouts[1], expected);
}

#[test]
fn preference_places_library_before_stats() {
    let storage = MemoryStorage::new();
    let mut mdi = fresh(&storage);
    mdi.set_preferred_order(vec!["library".into(), "peers".into(), "stats".into()]);

    mdi.open_entry(Entry::new("stats", "Statistics"));
    assert_eq!(mdi.layout(), [EntryId::from("stats")]);
    mdi.open_entry(Entry::new("library", "Library"));
    assert_eq!(
        mdi.layout(),
        [EntryId::from("library"), EntryId::from("stats")]
    );
}

#[test]
fn explicit_hints_override_preference() {
    let storage = MemoryStorage::new();
    let mut mdi = fresh(&storage);
    mdi.set_preferred_order(vec!["library".into(), "stats".into()]);
    mdi.open_entry(Entry::new("library", "Library"));
    mdi.open_entry(Entry::new("stats", "Statistics"));
    mdi.open_entry(Entry::new("welcome", "Welcome").preferred_after(""));
    mdi.open_entry(Entry::new("chat", "Chat").preferred_after("~stats"));

    let layout: Vec<&str> = mdi.layout().iter().map(EntryId::as_str).collect();
    assert_eq!(layout, vec!["welcome", "library", "chat", "stats"]);
}

#[test]
fn saved_records_reload_into_fresh_registry() {
    let storage = MemoryStorage::new();
    let mut first = fresh(&storage);
    first.register_factory("peers_.*", closeable("Peers"));
    first.open_entry(Entry::new("library", "Library").closeable(true));
    first.show(
        "peers_1",
        ShowRequest::background().with_datasource(mdihost_core::DatasourceRef::exported("torrent-1")),
    );
    first.set_title("library", "My Library");
    let before: Vec<(String, AutoOpenRecord)> = ["library", "peers_1"]
        .iter()
        .map(|id| (id.to_string(), first.auto_open_record(id).expect("record").clone()))
        .collect();
    drop(first);

    let second = fresh(&storage);
    for (id, record) in &before {
        assert!(!second.entry_exists(id));
        assert_eq!(second.auto_open_record(id), Some(record));
    }
    assert_eq!(
        before[0].1.title.as_deref(),
        Some("My Library"),
        "records are refreshed from live state before saving"
    );
}

#[test]
fn pending_show_is_created_when_factory_registers() {
    let storage = MemoryStorage::new();
    let mut mdi = fresh(&storage);
    assert!(!mdi.show("config", ShowRequest::new()));
    assert!(mdi.will_auto_open("config"));

    mdi.register_factory("config", closeable("Settings"));
    assert!(mdi.entry_exists("config"));
}

#[test]
fn persisted_record_waits_for_its_factory() {
    let storage = MemoryStorage::new();
    storage.insert(
        "sidebar.autoopen",
        r#"{"entries":[{"id":"config","value":{"title":"Settings"}}]}"#,
    );
    let mut mdi = fresh(&storage);
    assert!(!mdi.entry_exists("config"));
    assert!(mdi.will_auto_open("config"));

    mdi.register_factory(
        "conf.*",
        Factory::rich(|_, request| {
            let title = request
                .record
                .as_ref()
                .and_then(|record| record.title.clone())
                .unwrap_or_default();
            Ok(Some(Entry::new(request.id.clone(), title).closeable(true)))
        }),
    );
    let entry = mdi.entry("config").expect("created from persisted record");
    assert_eq!(entry.title(), "Settings");
}

#[test]
fn factories_registered_before_load_restore_entries() {
    let storage = MemoryStorage::new();
    storage.insert(
        "sidebar.autoopen",
        r#"{ "stats": { "title": "Statistics" }, "peers": { "title": "Peers", "parentID": "stats" } }"#,
    );
    let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone());
    mdi.register_factory("stats", closeable("Statistics"));
    mdi.register_factory("peers", Factory::simple(|id| Ok(Some(Entry::new(id, "Peers").with_parent("stats")))));
    assert!(!mdi.entry_exists("stats"));

    let summary = mdi.load();
    assert!(summary.migrated);
    assert!(mdi.entry_exists("stats"));
    assert_eq!(mdi.children_of("stats").len(), 1);
}

#[test]
fn debounced_save_runs_on_tick() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::new();
    let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone()).with_clock(clock.clone());
    mdi.load();
    mdi.open_entry(Entry::new("library", "Library").closeable(true));
    assert!(mdi.diagnostics().save_pending);

    clock.advance(Duration::from_secs(59));
    mdi.tick();
    assert!(!storage.contains("sidebar.autoopen"));

    clock.advance(Duration::from_secs(1));
    mdi.tick();
    assert!(storage
        .get_string("sidebar.autoopen")
        .expect("saved")
        .contains("library"));
    assert!(!mdi.diagnostics().save_pending);
}

#[test]
fn initial_entry_activates_when_it_arrives_in_time() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::new();
    let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone()).with_clock(clock.clone());
    mdi.load();
    mdi.register_factory("library", closeable("Library"));

    assert!(!mdi.set_initial_entry("peers", None, Some("library")));
    assert_eq!(mdi.current_entry().expect("default").id().as_str(), "library");

    clock.advance(Duration::from_secs(3));
    mdi.register_factory("peers", closeable("Peers"));
    assert_eq!(mdi.current_entry().expect("initial").id().as_str(), "peers");
}

#[test]
fn initial_entry_is_ignored_after_grace_window() {
    let storage = MemoryStorage::new();
    let clock = ManualClock::new();
    let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone()).with_clock(clock.clone());
    mdi.load();
    mdi.register_factory("library", closeable("Library"));
    mdi.set_initial_entry("peers", None, Some("library"));

    clock.advance(Duration::from_secs(11));
    mdi.tick();
    mdi.register_factory("peers", closeable("Peers"));
    assert!(mdi.entry_exists("peers"));
    assert_eq!(mdi.current_entry().expect("default").id().as_str(), "library");
}

#[test]
fn shutdown_remembers_current_entry_and_order() {
    let temp = tempdir().expect("tempdir");
    let storage = FileStorage::new(temp.path());
    {
        let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone());
        mdi.load();
        mdi.set_preferred_order(vec!["stats".into(), "library".into()]);
        mdi.open_entry(Entry::new("library", "Library").closeable(true));
        mdi.activate("library");
    }
    assert!(storage.path_for("sidebar.autoopen").exists());

    let mut mdi = Mdi::new(MdiPreferences::default(), storage.clone());
    mdi.load();
    assert_eq!(mdi.initial_id(), Some("library"));
    assert_eq!(mdi.preferred_order(), ["stats", "library"]);
    assert!(mdi.will_auto_open("library"));
}

#[test]
fn nothing_is_written_after_teardown() {
    let storage = MemoryStorage::new();
    let mut mdi = fresh(&storage);
    mdi.open_entry(Entry::new("library", "Library").closeable(true));
    mdi.shutdown();
    let saved = storage.get_string("sidebar.autoopen").expect("final save");

    assert!(!mdi.show("library", ShowRequest::new()));
    mdi.flush();
    assert_eq!(storage.get_string("sidebar.autoopen"), Some(saved));
    assert!(mdi.is_disposed());
}

#[test]
fn disabled_persistence_never_touches_storage() {
    let storage = MemoryStorage::new();
    let mut mdi = Mdi::new(
        MdiPreferences {
            persist: false,
            ..MdiPreferences::default()
        },
        storage.clone(),
    );
    mdi.load();
    mdi.open_entry(Entry::new("library", "Library").closeable(true));
    mdi.shutdown();
    assert!(storage.read("sidebar.autoopen").expect("read").is_none());
}

#[test]
fn load_gate_releases_waiting_thread() {
    let storage = MemoryStorage::new();
    let mut mdi = Mdi::new(MdiPreferences::default(), storage);
    let gate = mdi.load_gate();
    let waiter = thread::spawn(move || gate.wait_default());
    thread::sleep(Duration::from_millis(10));
    mdi.load();
    assert!(waiter.join().expect("join"));
}

#[test]
fn user_closed_entry_is_not_restored_after_restart() {
    let storage = MemoryStorage::new();
    {
        let mut mdi = fresh(&storage);
        mdi.register_factory("stats", closeable("Statistics"));
        mdi.register_factory("peers", closeable("Peers"));
        mdi.show("stats", ShowRequest::new());
        mdi.show("peers", ShowRequest::new());
        assert!(mdi.close("stats", true));
    }
    assert_eq!(
        storage.get_string("sidebar.closed").as_deref(),
        Some(r#"{"stats":"Statistics"}"#)
    );

    let mut mdi = fresh(&storage);
    mdi.register_factory("stats", closeable("Statistics"));
    mdi.register_factory("peers", closeable("Peers"));
    assert!(mdi.entry_exists("peers"));
    assert!(!mdi.entry_exists("stats"));
    assert!(mdi.will_auto_open("stats"));

    assert!(mdi.reopen("stats"));
    assert!(mdi.entry_exists("stats"));
    mdi.shutdown();
    assert_eq!(storage.get_string("sidebar.closed").as_deref(), Some("{}"));
}
