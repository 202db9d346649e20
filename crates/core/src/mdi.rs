use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Instant;

use indexmap::IndexMap;
use mdihost_settings::{
    AutoOpenRecord, AutoOpenStore, Clock, LoadSummary, MdiPreferences, SaveOutcome,
    StateStorage, SystemClock, ViewState,
};
use tracing::{debug, error, info, warn};

use crate::command::{LoadGate, MdiCommand, MdiHandle};
use crate::datasource::DatasourceRef;
use crate::dispatch::{CreationDispatch, CreationRequest, DispatchOutcome, Factory};
use crate::entry::{Entry, EntryId};
use crate::history::SelectionHistory;
use crate::listener::{ListenerId, MdiListener};
use crate::ordering::insertion_index;
use crate::visual::{NullVisualLayer, VisualLayer};

/// 顯示請求的選項。 / Options of [`Mdi::show`].
#[derive(Debug, Clone)]
pub struct ShowRequest {
    pub activate: bool,
    /// Refuse when the id was already shown through a one-shot request.
    pub only_load_once: bool,
    pub datasource: Option<DatasourceRef>,
}

impl Default for ShowRequest {
    fn default() -> Self {
        Self {
            activate: true,
            only_load_once: false,
            datasource: None,
        }
    }
}

impl ShowRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Show without activating.
    pub fn background() -> Self {
        Self {
            activate: false,
            ..Self::default()
        }
    }

    pub fn once(mut self) -> Self {
        self.only_load_once = true;
        self
    }

    pub fn with_datasource(mut self, datasource: DatasourceRef) -> Self {
        self.datasource = Some(datasource);
        self
    }
}

/// Result of [`Mdi::open_entry`].
#[derive(Debug)]
pub enum RegisterOutcome {
    Registered,
    /// The id is bound to another live entry; the rejected entry is handed back.
    Conflict(Entry),
}

impl RegisterOutcome {
    pub fn is_registered(&self) -> bool {
        matches!(self, RegisterOutcome::Registered)
    }
}

/// 目前狀態的摘要。 / Snapshot returned by [`Mdi::diagnostics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdiDiagnostics {
    pub instance: String,
    pub loaded: bool,
    pub disposed: bool,
    pub open_entries: usize,
    /// Ids with an auto-open record but no live entry.
    pub pending: Vec<String>,
    pub factories: usize,
    pub listeners: usize,
    pub current: Option<String>,
    pub save_pending: bool,
}

impl fmt::Display for MdiDiagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match (self.loaded, self.disposed) {
            (_, true) => "disposed",
            (true, false) => "loaded",
            (false, false) => "not loaded",
        };
        writeln!(f, "instance {} ({state})", self.instance)?;
        writeln!(f, "  open entries: {}", self.open_entries)?;
        writeln!(f, "  pending: {}", self.pending.join(", "))?;
        writeln!(f, "  factories: {}, listeners: {}", self.factories, self.listeners)?;
        writeln!(f, "  current: {}", self.current.as_deref().unwrap_or("-"))?;
        write!(f, "  save pending: {}", self.save_pending)
    }
}

/// Position of every open entry: top-level entries plus per-parent child lists.
#[derive(Debug, Default)]
struct Layout {
    roots: Vec<EntryId>,
    children: HashMap<EntryId, Vec<EntryId>>,
}

impl Layout {
    fn siblings(&self, parent: Option<&EntryId>) -> &[EntryId] {
        match parent {
            None => &self.roots,
            Some(parent) => self.children(parent.as_str()),
        }
    }

    fn children(&self, parent: &str) -> &[EntryId] {
        self.children.get(parent).map(Vec::as_slice).unwrap_or(&[])
    }

    fn insert(&mut self, parent: Option<&EntryId>, index: usize, id: EntryId) {
        let list = match parent {
            None => &mut self.roots,
            Some(parent) => self.children.entry(parent.clone()).or_default(),
        };
        let index = index.min(list.len());
        list.insert(index, id);
    }

    fn remove(&mut self, id: &EntryId, parent: Option<&EntryId>) {
        match parent {
            None => self.roots.retain(|existing| existing != id),
            Some(parent) => {
                if let Some(list) = self.children.get_mut(parent.as_str()) {
                    list.retain(|existing| existing != id);
                    if list.is_empty() {
                        self.children.remove(parent.as_str());
                    }
                }
            }
        }
    }
}

struct PendingInitial {
    id: EntryId,
    default_id: Option<EntryId>,
    until: Instant,
}

/// 多重文件介面的項目管理器。 / Registry of named, closeable panels and their persisted state.
///
/// Owned by a single thread; other threads talk to it through [`MdiHandle`].
pub struct Mdi {
    prefs: MdiPreferences,
    entries: IndexMap<EntryId, Entry>,
    layout: Layout,
    dispatch: CreationDispatch,
    store: AutoOpenStore,
    views: ViewState,
    history: SelectionHistory,
    current: Option<EntryId>,
    listeners: Vec<(ListenerId, Box<dyn MdiListener>)>,
    next_listener: u64,
    visual: Box<dyn VisualLayer>,
    storage: Box<dyn StateStorage>,
    clock: Box<dyn Clock>,
    sender: Sender<MdiCommand>,
    commands: Receiver<MdiCommand>,
    gate: LoadGate,
    pending_initial: Option<PendingInitial>,
    disposed: bool,
}

impl Mdi {
    pub fn new(prefs: MdiPreferences, storage: impl StateStorage + 'static) -> Self {
        let mut prefs = prefs;
        prefs.sanitize();
        let (sender, commands) = mpsc::channel();
        let gate = LoadGate::with_timeout(prefs.load_timeout());
        Self {
            store: AutoOpenStore::new(prefs.autoopen_key(), prefs.debouncer()),
            views: ViewState::new(prefs.order_key(), prefs.once_key(), prefs.closed_key()),
            history: SelectionHistory::new(prefs.history_capacity),
            prefs,
            entries: IndexMap::new(),
            layout: Layout::default(),
            dispatch: CreationDispatch::new(),
            current: None,
            listeners: Vec::new(),
            next_listener: 0,
            visual: Box::new(NullVisualLayer::new()),
            storage: Box::new(storage),
            clock: Box::new(SystemClock),
            sender,
            commands,
            gate,
            pending_initial: None,
            disposed: false,
        }
    }

    pub fn with_visual_layer(mut self, visual: impl VisualLayer + 'static) -> Self {
        self.visual = Box::new(visual);
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn preferences(&self) -> &MdiPreferences {
        &self.prefs
    }

    /// 載入保存的狀態並開啟可建立的項目。 / Loads persisted state and opens every entry a factory can serve.
    pub fn load(&mut self) -> LoadSummary {
        if self.store.is_loaded() {
            debug!(instance = %self.prefs.instance, "MDI state already loaded");
            return LoadSummary::default();
        }
        let summary = if self.prefs.persist {
            let summary = self.store.load(self.storage.as_ref());
            self.views.load(self.storage.as_ref());
            summary
        } else {
            self.store.mark_loaded();
            LoadSummary::default()
        };
        info!(
            instance = %self.prefs.instance,
            records = summary.loaded,
            backend = self.storage.name(),
            "MDI state loaded"
        );
        self.gate.open();
        self.open_persisted(None);
        summary
    }

    pub fn is_loaded(&self) -> bool {
        self.store.is_loaded()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    /// Cloneable gate that opens once [`Mdi::load`] completed.
    ///
    /// Its default wait is the configured `load_timeout_secs`.
    pub fn load_gate(&self) -> LoadGate {
        self.gate.clone()
    }

    pub fn handle(&self) -> MdiHandle {
        MdiHandle::new(self.sender.clone())
    }

    /// 註冊項目。 / Registers `entry`, positions it and notifies listeners.
    ///
    /// After [`Mdi::shutdown`] the entry is handed back unregistered.
    pub fn open_entry(&mut self, mut entry: Entry) -> RegisterOutcome {
        let id = entry.id().clone();
        if self.disposed {
            debug!(id = %id, "register after dispose ignored");
            return RegisterOutcome::Conflict(entry);
        }
        if self.entries.contains_key(id.as_str()) {
            warn!(id = %id, "entry id already registered, ignoring");
            return RegisterOutcome::Conflict(entry);
        }
        if entry.parent_id() == Some(&id) {
            warn!(id = %id, "entry names itself as parent, ignoring parent");
            entry.clear_parent();
        }

        let parent = entry.parent_id().cloned();
        let hint = entry.order_hint();
        let preference: &[String] = if parent.is_none() {
            self.views.preferred_order()
        } else {
            &[]
        };
        let index = insertion_index(
            id.as_str(),
            hint.as_ref(),
            self.layout.siblings(parent.as_ref()),
            preference,
        );
        self.layout.insert(parent.as_ref(), index, id.clone());

        match self.visual.build_container(&entry) {
            Ok(handle) => entry.set_container(Some(handle)),
            Err(err) => warn!(id = %id, error = %err, "failed to build container"),
        }
        entry.set_open(true);
        if entry.is_closeable() {
            let now = self.clock.now();
            self.store.refresh_record(id.as_str(), entry.auto_open_record(), now);
        }
        self.entries.insert(id.clone(), entry);
        debug!(id = %id, index, "entry registered");

        if let Some(parent) = parent.filter(|parent| !self.entries.contains_key(parent.as_str())) {
            self.show(parent.as_str(), ShowRequest::background());
        }
        self.notify_loaded(&id);
        self.honour_initial(&id);
        RegisterOutcome::Registered
    }

    /// 移除項目及其子項目並刪除紀錄。 / Removes `id` and its descendants, dropping their records.
    pub fn unregister(&mut self, id: &str) -> bool {
        let mut doomed = Vec::new();
        let mut visited = HashSet::new();
        self.collect_subtree(id, &mut visited, &mut doomed);
        if doomed.is_empty() {
            return false;
        }

        let now = self.clock.now();
        let mut lost_current = None;
        for target in &doomed {
            if let Some(mut entry) = self.entries.shift_remove(target.as_str()) {
                self.layout.remove(entry.id(), entry.parent_id());
                entry.set_open(false);
                if let Some(handle) = entry.container() {
                    self.visual.dispose_container(handle);
                    entry.set_container(None);
                }
                self.history.remove(target.as_str());
                if self.current.as_ref() == Some(target) {
                    lost_current = self.current.take();
                }
            }
            self.store.remove_record(target.as_str(), now);
        }
        debug!(id, removed = doomed.len(), "entry unregistered");

        if let Some(old) = lost_current {
            self.reselect_after(old.as_str());
        }
        true
    }

    /// Drops the auto-open record for `id`; live state is untouched.
    pub fn forget(&mut self, id: &str) -> bool {
        let now = self.clock.now();
        self.store.remove_record(id, now).is_some()
    }

    /// 關閉項目。 / Closes `id`; refused for user requests on non-closeable entries.
    ///
    /// A user close is remembered under `{instance}.closed`, which keeps the
    /// id from being shown again until [`Mdi::reopen`].
    pub fn close(&mut self, id: &str, user_initiated: bool) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        if user_initiated && !entry.is_closeable() {
            debug!(id, "entry is not closeable");
            return false;
        }
        if user_initiated && self.views.mark_closed_by_user(id, &entry.title()) {
            self.request_save();
        }

        self.close_subtree(id, user_initiated);

        if let Some(current) = self.current.clone() {
            if !self.entries.contains_key(current.as_str()) {
                self.reselect_after(current.as_str());
            }
        }
        true
    }

    /// 取消使用者關閉並再次顯示。 / Forgets a user close of `id` and shows it again.
    pub fn reopen(&mut self, id: &str) -> bool {
        if self.views.clear_closed_by_user(id).is_some() {
            self.request_save();
        }
        let datasource = self
            .store
            .record(id)
            .and_then(|record| record.datasource_exportable.clone())
            .map(DatasourceRef::Exported);
        let request = ShowRequest {
            datasource,
            ..ShowRequest::default()
        };
        self.show(id, request)
    }

    pub fn was_closed_by_user(&self, id: &str) -> bool {
        self.views.was_closed_by_user(id)
    }

    /// User-closed ids with the title they had when closed.
    pub fn closed_by_user(&self) -> impl Iterator<Item = (&str, &str)> {
        self.views.closed_by_user()
    }

    /// Children first, then `id`; selection is left to the caller.
    fn close_subtree(&mut self, id: &str, user_initiated: bool) {
        let children = self.layout.children(id).to_vec();
        for child in children {
            self.close_subtree(child.as_str(), false);
        }

        let Some(mut entry) = self.entries.shift_remove(id) else {
            return;
        };
        self.layout.remove(entry.id(), entry.parent_id());
        entry.set_open(false);
        for mut listener in entry.take_close_listeners() {
            listener(&entry, user_initiated);
        }
        for (_, listener) in self.listeners.iter_mut() {
            listener.entry_closed(&entry, user_initiated);
        }
        if let Some(handle) = entry.container() {
            self.visual.dispose_container(handle);
            entry.set_container(None);
        }
        if entry.forgets_on_close() {
            let now = self.clock.now();
            self.store.remove_record(id, now);
        }
        self.history.remove(id);
        debug!(id, user_initiated, "entry closed");
    }

    /// 顯示項目，必要時建立。 / Shows `id`, creating it through the factories when needed.
    pub fn show(&mut self, id: &str, request: ShowRequest) -> bool {
        if self.disposed {
            debug!(id, "show after dispose ignored");
            return false;
        }
        if request.only_load_once && self.views.was_loaded_once(id) {
            debug!(id, "entry already shown once");
            return false;
        }
        if self.entries.contains_key(id) {
            if let Some(datasource) = request.datasource {
                self.set_datasource(id, datasource);
            }
            if request.activate {
                self.activate(id);
            }
            return true;
        }

        if self.views.was_closed_by_user(id) {
            debug!(id, "entry was closed by the user");
            return false;
        }
        let created = self.create(&EntryId::from(id), request.datasource, request.activate);
        if created && request.only_load_once {
            self.views.mark_loaded_once(id);
            self.request_save();
        }
        created
    }

    pub fn set_datasource(&mut self, id: &str, datasource: DatasourceRef) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.set_datasource(Some(datasource));
        entry.fire_datasource_changed();
        if entry.is_closeable() {
            let record = entry.auto_open_record();
            let now = self.clock.now();
            self.store.refresh_record(id, record, now);
        }
        true
    }

    pub fn set_title(&mut self, id: &str, title: impl Into<String>) -> bool {
        let Some(entry) = self.entries.get_mut(id) else {
            return false;
        };
        entry.set_title(title.into());
        if entry.is_closeable() {
            let record = entry.auto_open_record();
            let now = self.clock.now();
            self.store.refresh_record(id, record, now);
        }
        true
    }

    /// 啟用項目。 / Makes `id` the current entry; re-selecting the current one notifies again.
    pub fn activate(&mut self, id: &str) -> bool {
        let Some(entry) = self.entries.get(id) else {
            return false;
        };
        let key = entry.id().clone();
        let old = self.current.replace(key.clone());
        self.history.push(&key);
        for (_, listener) in self.listeners.iter_mut() {
            listener.entry_selected(Some(entry), old.as_ref());
        }
        true
    }

    /// Subscribes `listener`, replaying `entry_loaded` for every open entry first.
    pub fn add_listener(&mut self, listener: impl MdiListener + 'static) -> ListenerId {
        let mut listener: Box<dyn MdiListener> = Box::new(listener);
        for entry in self.entries.values() {
            listener.entry_loaded(entry);
        }
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push((id, listener));
        id
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        before != self.listeners.len()
    }

    /// 註冊工廠並建立可服務的待開啟項目。 / Registers a factory and creates every pending id it serves.
    pub fn register_factory(&mut self, pattern: &str, factory: Factory) {
        self.dispatch.register(pattern, factory);
        if !self.disposed {
            self.open_persisted(Some(pattern));
        }
    }

    pub fn unregister_factory(&mut self, pattern: &str, factory: &Factory) -> bool {
        self.dispatch.unregister(pattern, factory)
    }

    /// Shows `id`; when that fails shows `default_id` and keeps waiting for `id`.
    ///
    /// If `id` registers within the grace window while nothing else but the
    /// default was selected, it becomes the current entry.
    pub fn set_initial_entry(
        &mut self,
        id: &str,
        datasource: Option<DatasourceRef>,
        default_id: Option<&str>,
    ) -> bool {
        let request = ShowRequest {
            datasource,
            ..ShowRequest::default()
        };
        if self.show(id, request) {
            self.pending_initial = None;
            return true;
        }
        if let Some(default_id) = default_id {
            self.show(default_id, ShowRequest::new());
        }
        let until = self.clock.now() + self.prefs.initial_entry_grace();
        self.pending_initial = Some(PendingInitial {
            id: EntryId::from(id),
            default_id: default_id.map(EntryId::from),
            until,
        });
        false
    }

    /// Id of the entry that was current at the last shutdown.
    pub fn initial_id(&self) -> Option<&str> {
        self.store.initial_id()
    }

    pub fn preferred_order(&self) -> &[String] {
        self.views.preferred_order()
    }

    pub fn set_preferred_order(&mut self, order: Vec<String>) {
        self.views.set_preferred_order(order);
        if self.views.is_dirty() {
            self.request_save();
        }
    }

    pub fn entry_exists(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn entry(&self, id: &str) -> Option<&Entry> {
        self.entries.get(id)
    }

    /// Looks up `{id}_{hash}` for the datasource's content hash.
    pub fn entry_for(&self, id: &str, datasource: &DatasourceRef) -> Option<&Entry> {
        let key = EntryId::with_datasource(id, datasource);
        self.entries.get(key.as_str())
    }

    /// Open entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &Entry> {
        self.entries.values()
    }

    /// Open children of `id` in display order.
    pub fn children_of(&self, id: &str) -> Vec<&Entry> {
        self.layout
            .children(id)
            .iter()
            .filter_map(|child| self.entries.get(child.as_str()))
            .collect()
    }

    /// Top-level entries in display order.
    pub fn layout(&self) -> &[EntryId] {
        &self.layout.roots
    }

    pub fn will_auto_open(&self, id: &str) -> bool {
        self.store.contains(id)
    }

    pub fn auto_open_record(&self, id: &str) -> Option<&AutoOpenRecord> {
        self.store.record(id)
    }

    pub fn current_entry(&self) -> Option<&Entry> {
        self.current
            .as_ref()
            .and_then(|id| self.entries.get(id.as_str()))
    }

    pub fn diagnostics(&self) -> MdiDiagnostics {
        MdiDiagnostics {
            instance: self.prefs.instance.clone(),
            loaded: self.store.is_loaded(),
            disposed: self.disposed,
            open_entries: self.entries.len(),
            pending: self
                .store
                .ids()
                .into_iter()
                .filter(|id| !self.entries.contains_key(id.as_str()))
                .collect(),
            factories: self.dispatch.len(),
            listeners: self.listeners.len(),
            current: self.current.as_ref().map(ToString::to_string),
            save_pending: self.store.is_save_pending(),
        }
    }

    /// 處理排隊的命令與到期的儲存。 / Runs queued commands in order, then due debounced work.
    pub fn tick(&mut self) -> usize {
        let mut processed = 0;
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
            processed += 1;
        }

        let now = self.clock.now();
        if self
            .pending_initial
            .as_ref()
            .is_some_and(|pending| now > pending.until)
        {
            debug!("initial entry grace window elapsed");
            self.pending_initial = None;
        }
        if self.store.take_due(now) {
            self.persist(true);
        }
        processed
    }

    /// Saves immediately instead of waiting for the debounce.
    pub fn flush(&mut self) {
        self.persist(true);
    }

    /// 最終儲存後關閉所有項目。 / Final save, then closes every entry; runs once.
    pub fn shutdown(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;
        self.store
            .set_initial_id(self.current.as_ref().map(ToString::to_string));
        self.persist(false);

        self.pending_initial = None;
        self.current = None;
        self.history.clear();
        let ids: Vec<EntryId> = self.entries.keys().rev().cloned().collect();
        for id in ids {
            self.close(id.as_str(), false);
        }
        for (_, listener) in self.listeners.iter_mut() {
            listener.mdi_disposed();
        }
        info!(instance = %self.prefs.instance, "MDI disposed");
    }

    fn apply(&mut self, command: MdiCommand) {
        match command {
            MdiCommand::Show {
                id,
                activate,
                datasource,
            } => {
                let request = ShowRequest {
                    activate,
                    only_load_once: false,
                    datasource: datasource.map(DatasourceRef::Exported),
                };
                self.show(&id, request);
            }
            MdiCommand::Close { id, user_initiated } => {
                self.close(&id, user_initiated);
            }
            MdiCommand::SetDatasource { id, datasource } => {
                self.set_datasource(&id, DatasourceRef::Exported(datasource));
            }
            MdiCommand::Forget { id } => {
                self.forget(&id);
            }
            MdiCommand::Flush => self.flush(),
        }
    }

    fn create(&mut self, id: &EntryId, datasource: Option<DatasourceRef>, activate: bool) -> bool {
        let request = CreationRequest {
            id: id.clone(),
            datasource,
            record: self.store.record(id.as_str()).cloned(),
        };
        let outcome = self.dispatch.resolve(&*self, &request);
        let exportable = request.datasource.as_ref().and_then(DatasourceRef::exportable);
        let now = self.clock.now();
        match outcome {
            DispatchOutcome::Created(entry) => match self.open_entry(entry) {
                RegisterOutcome::Registered => {
                    if activate {
                        self.activate(id.as_str());
                    }
                    true
                }
                RegisterOutcome::Conflict(_) => false,
            },
            DispatchOutcome::Declined => {
                debug!(id = %id, "factory declined, keeping id pending");
                self.store.arm_pending(id.as_str(), exportable, now);
                false
            }
            DispatchOutcome::Failed(err) => {
                warn!(id = %id, error = %err, "failed to create entry, keeping id pending");
                self.store.arm_pending(id.as_str(), exportable, now);
                false
            }
            DispatchOutcome::Unmatched => {
                debug!(id = %id, "no factory for entry yet, keeping id pending");
                self.store.arm_pending(id.as_str(), exportable, now);
                false
            }
        }
    }

    /// Creates pending ids served by `pattern`, or by any factory when `None`.
    fn open_persisted(&mut self, pattern: Option<&str>) {
        let candidates: Vec<String> = match pattern {
            Some(pattern) if self.store.contains(pattern) => vec![pattern.to_string()],
            Some(pattern) => self
                .store
                .ids()
                .into_iter()
                .filter(|id| self.dispatch.pattern_matches(pattern, id))
                .collect(),
            None => self
                .store
                .ids()
                .into_iter()
                .filter(|id| self.dispatch.lookup(id).is_some())
                .collect(),
        };
        for id in candidates {
            if self.entries.contains_key(id.as_str()) || self.views.was_closed_by_user(&id) {
                continue;
            }
            let datasource = self
                .store
                .record(&id)
                .and_then(|record| record.datasource_exportable.clone())
                .map(DatasourceRef::Exported);
            self.create(&EntryId::from(id), datasource, false);
        }
    }

    /// Depth-first, children before their parent.
    fn collect_subtree(&self, id: &str, visited: &mut HashSet<String>, out: &mut Vec<EntryId>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        let mut children: Vec<String> = self
            .layout
            .children(id)
            .iter()
            .map(ToString::to_string)
            .collect();
        for (child, record) in self.store.iter() {
            if record.parent_id.as_deref() == Some(id) && !children.contains(child) {
                children.push(child.clone());
            }
        }
        for child in children {
            self.collect_subtree(&child, visited, out);
        }
        if self.entries.contains_key(id) || self.store.contains(id) {
            out.push(EntryId::from(id));
        }
    }

    /// Selects the most recent live entry after `old` went away.
    fn reselect_after(&mut self, old: &str) {
        let next = self
            .history
            .previous(old, |candidate| self.entries.contains_key(candidate.as_str()));
        match next {
            Some(next) => {
                self.current = Some(EntryId::from(old));
                self.activate(next.as_str());
            }
            None => {
                self.current = None;
                let old = EntryId::from(old);
                for (_, listener) in self.listeners.iter_mut() {
                    listener.entry_selected(None, Some(&old));
                }
            }
        }
    }

    fn honour_initial(&mut self, id: &EntryId) {
        if self
            .pending_initial
            .as_ref()
            .map_or(true, |pending| &pending.id != id)
        {
            return;
        }
        let Some(pending) = self.pending_initial.take() else {
            return;
        };
        if self.clock.now() > pending.until {
            debug!(id = %id, "initial entry arrived after grace window");
            return;
        }
        let default_selected = match (&self.current, &pending.default_id) {
            (None, _) => true,
            (Some(current), Some(default_id)) => current == default_id,
            (Some(_), None) => false,
        };
        if default_selected {
            self.activate(id.as_str());
        }
    }

    fn notify_loaded(&mut self, id: &EntryId) {
        if let Some(entry) = self.entries.get(id.as_str()) {
            for (_, listener) in self.listeners.iter_mut() {
                listener.entry_loaded(entry);
            }
        }
    }

    fn request_save(&mut self) {
        let now = self.clock.now();
        self.store.request_save(now);
    }

    fn persist(&mut self, interim: bool) {
        if !self.prefs.persist {
            return;
        }
        let entries = &self.entries;
        let result = self.store.save(self.storage.as_ref(), interim, |id| {
            entries.get(id).map(Entry::auto_open_record)
        });
        match result {
            Ok(SaveOutcome::Written { records }) => {
                debug!(instance = %self.prefs.instance, records, interim, "MDI state saved");
            }
            Ok(outcome) => debug!(?outcome, "MDI save skipped"),
            Err(err) if interim => warn!(error = %err, "interim MDI save failed"),
            Err(err) => error!(error = %err, "final MDI save failed"),
        }
        if self.store.is_loaded() && !(interim && self.store.is_closed()) {
            if let Err(err) = self.views.save(self.storage.as_ref()) {
                warn!(error = %err, "failed to save view state");
            }
        }
    }
}

impl Drop for Mdi {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Mdi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mdi")
            .field("instance", &self.prefs.instance)
            .field("entries", &self.entries.keys().collect::<Vec<_>>())
            .field("current", &self.current)
            .field("dispatch", &self.dispatch)
            .field("disposed", &self.disposed)
            .finish()
    }
}
