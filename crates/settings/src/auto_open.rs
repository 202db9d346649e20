//! Persisted record of which MDI entries should be recreated on startup.
//! 記錄啟動時需要自動重建的 MDI 項目。
//!
//! The on-disk blob looks like
//!
//! ```json
//! { "initialId": "library",
//!   "entries": [ { "id": "config", "value": { "title": "Settings" } } ] }
//! ```
//!
//! Older installs wrote a flat `{ "<id>": { ... } }` map. [`decode`] detects
//! that layout by the absence of the `entries` sentinel and migrates it.

use std::collections::BTreeMap;
use std::time::Instant;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::schedule::SaveDebouncer;
use crate::storage::{StateStorage, StorageError};

/// Key holding the ordered entry list in the current format.
pub const ENTRIES_KEY: &str = "entries";
/// Sentinel written by older releases for the ordered entry list.
pub const LEGACY_ENTRIES_KEY: &str = "_entries_";
const INITIAL_ID_KEY: &str = "initialId";

/// 自動開啟資料的錯誤型別。 / Errors raised while reading or writing auto-open state.
#[derive(Debug, Error)]
pub enum AutoOpenError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode auto-open state: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("auto-open state is corrupt: {0}")]
    Corrupt(String),
}

/// 單一項目的自動開啟紀錄。 / What is remembered about one entry between sessions.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoOpenRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(
        default,
        alias = "datasource",
        skip_serializing_if = "Option::is_none"
    )]
    pub datasource_exportable: Option<String>,
    #[serde(default, alias = "parentID", skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(
        rename = "dm-hash",
        alias = "dm",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub dm_hash: Option<String>,
    #[serde(
        rename = "dms-hash-list",
        alias = "dms",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub dms_hash_list: Vec<String>,
    /// Keys written by factories or newer releases; carried through untouched.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl AutoOpenRecord {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn with_datasource(mut self, exportable: impl Into<String>) -> Self {
        self.datasource_exportable = Some(exportable.into());
        self
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// Replaces the live-derived fields with `fresh`, keeping unknown keys.
    fn refresh_from(&mut self, fresh: AutoOpenRecord) {
        let mut extra = std::mem::take(&mut self.extra);
        for (key, value) in fresh.extra {
            extra.insert(key, value);
        }
        *self = AutoOpenRecord { extra, ..fresh };
    }
}

/// 解碼結果。 / Result of decoding a stored blob.
#[derive(Debug, Default)]
pub struct DecodedAutoOpen {
    pub records: IndexMap<String, AutoOpenRecord>,
    pub initial_id: Option<String>,
    /// `true` when the blob used the legacy flat layout.
    pub migrated: bool,
    /// Entries dropped because they were not well-formed.
    pub skipped: usize,
}

/// 解析自動開啟資料，必要時轉換舊格式。 / Parses a stored blob, migrating the legacy layout.
pub fn decode(bytes: &[u8]) -> Result<DecodedAutoOpen, AutoOpenError> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|err| AutoOpenError::Corrupt(err.to_string()))?;
    let Value::Object(root) = value else {
        return Err(AutoOpenError::Corrupt("top level is not an object".into()));
    };

    let ordered = root
        .get(ENTRIES_KEY)
        .or_else(|| root.get(LEGACY_ENTRIES_KEY))
        .and_then(Value::as_array);

    let mut decoded = DecodedAutoOpen::default();
    match ordered {
        Some(list) => {
            decoded.initial_id = root
                .get(INITIAL_ID_KEY)
                .and_then(Value::as_str)
                .map(str::to_string);
            for item in list {
                match decode_ordered_item(item) {
                    Some((id, record)) => {
                        decoded.records.insert(id, record);
                    }
                    None => decoded.skipped += 1,
                }
            }
        }
        None => {
            decoded.migrated = !root.is_empty();
            for (id, value) in root {
                match decode_record(value) {
                    Some(record) => {
                        decoded.records.insert(id, record);
                    }
                    None => decoded.skipped += 1,
                }
            }
        }
    }
    Ok(decoded)
}

fn decode_ordered_item(item: &Value) -> Option<(String, AutoOpenRecord)> {
    let map = item.as_object()?;
    let id = map.get("id")?.as_str()?.to_string();
    let record = decode_record(map.get("value")?.clone())?;
    Some((id, record))
}

fn decode_record(value: Value) -> Option<AutoOpenRecord> {
    if !value.is_object() {
        return None;
    }
    serde_json::from_value(value).ok()
}

/// 以目前格式編碼。 / Encodes records in the current ordered format.
pub fn encode(
    records: &IndexMap<String, AutoOpenRecord>,
    initial_id: Option<&str>,
) -> Result<Vec<u8>, AutoOpenError> {
    let mut root = Map::new();
    if let Some(initial) = initial_id {
        root.insert(INITIAL_ID_KEY.into(), Value::String(initial.to_string()));
    }
    let mut entries = Vec::with_capacity(records.len());
    for (id, record) in records {
        let value = serde_json::to_value(record).map_err(AutoOpenError::Serialize)?;
        let mut item = Map::new();
        item.insert("id".into(), Value::String(id.clone()));
        item.insert("value".into(), value);
        entries.push(Value::Object(item));
    }
    root.insert(ENTRIES_KEY.into(), Value::Array(entries));
    serde_json::to_vec_pretty(&Value::Object(root)).map_err(AutoOpenError::Serialize)
}

/// Summary of [`AutoOpenStore::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub loaded: usize,
    pub skipped: usize,
    pub migrated: bool,
    /// The blob was unreadable and the store started empty.
    pub degraded: bool,
}

/// Outcome of [`AutoOpenStore::save`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written { records: usize },
    SkippedBeforeLoad,
    SkippedAfterTeardown,
}

/// 自動開啟紀錄的記憶體副本與延遲儲存。 / In-memory auto-open map with debounced persistence.
#[derive(Debug)]
pub struct AutoOpenStore {
    key: String,
    records: IndexMap<String, AutoOpenRecord>,
    initial_id: Option<String>,
    loaded: bool,
    closed: bool,
    debounce: SaveDebouncer,
}

impl AutoOpenStore {
    pub fn new(key: impl Into<String>, debounce: SaveDebouncer) -> Self {
        Self {
            key: key.into(),
            records: IndexMap::new(),
            initial_id: None,
            loaded: false,
            closed: false,
            debounce,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// `true` once the final save started; interim saves are refused afterwards.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// 不讀取儲存即標記為已載入。 / Marks the store loaded without reading (persistence disabled).
    pub fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// 從儲存載入紀錄；損毀時退回空集合。 / Loads records, degrading to an empty map on corruption.
    pub fn load(&mut self, storage: &dyn StateStorage) -> LoadSummary {
        let mut summary = LoadSummary::default();
        let result = storage
            .read(&self.key)
            .map_err(AutoOpenError::from)
            .and_then(|bytes| match bytes {
                Some(bytes) if !bytes.is_empty() => decode(&bytes).map(Some),
                _ => Ok(None),
            });

        match result {
            Ok(Some(decoded)) => {
                summary.loaded = decoded.records.len();
                summary.skipped = decoded.skipped;
                summary.migrated = decoded.migrated;
                if decoded.migrated {
                    info!(key = %self.key, records = summary.loaded, "migrated legacy auto-open map");
                }
                if decoded.skipped > 0 {
                    warn!(key = %self.key, skipped = decoded.skipped, "dropped malformed auto-open records");
                }
                for (id, record) in decoded.records {
                    self.records.insert(id, record);
                }
                if self.initial_id.is_none() {
                    self.initial_id = decoded.initial_id;
                }
            }
            Ok(None) => {
                debug!(key = %self.key, backend = storage.name(), "no stored auto-open state");
            }
            Err(err) => {
                warn!(key = %self.key, error = %err, "unreadable auto-open state, starting empty");
                summary.degraded = true;
            }
        }
        self.loaded = true;
        summary
    }

    pub fn record(&self, id: &str) -> Option<&AutoOpenRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.records.contains_key(id)
    }

    /// Record ids in insertion order.
    pub fn ids(&self) -> Vec<String> {
        self.records.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AutoOpenRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn initial_id(&self) -> Option<&str> {
        self.initial_id.as_deref()
    }

    pub fn set_initial_id(&mut self, id: Option<String>) {
        self.initial_id = id;
    }

    pub fn set_record(&mut self, id: impl Into<String>, record: AutoOpenRecord, now: Instant) {
        self.records.insert(id.into(), record);
        self.touch(now);
    }

    /// Like [`Self::set_record`], keeping unknown keys of an existing record.
    pub fn refresh_record(&mut self, id: &str, fresh: AutoOpenRecord, now: Instant) {
        match self.records.get_mut(id) {
            Some(existing) => existing.refresh_from(fresh),
            None => {
                self.records.insert(id.to_string(), fresh);
            }
        }
        self.touch(now);
    }

    /// Schedules a debounced save without changing any record.
    pub fn request_save(&mut self, now: Instant) {
        self.touch(now);
    }

    pub fn remove_record(&mut self, id: &str, now: Instant) -> Option<AutoOpenRecord> {
        let removed = self.records.shift_remove(id);
        if removed.is_some() {
            self.touch(now);
        }
        removed
    }

    /// 將尚未建立的項目標記為待開啟。 / Records `id` as pending creation.
    pub fn arm_pending(&mut self, id: &str, datasource_exportable: Option<String>, now: Instant) {
        let record = self.records.entry(id.to_string()).or_default();
        if datasource_exportable.is_some() {
            record.datasource_exportable = datasource_exportable;
        }
        self.touch(now);
    }

    pub fn is_save_pending(&self) -> bool {
        self.debounce.is_pending()
    }

    /// `true` when the debounced interim save is due.
    pub fn take_due(&mut self, now: Instant) -> bool {
        self.debounce.take_due(now) && !self.closed
    }

    /// Writes the map, first refreshing every record whose entry is open.
    ///
    /// `refresh` returns the live record for an open entry and `None`
    /// otherwise; records of entries that are not open pass through
    /// unchanged. A final (`interim == false`) save closes the store.
    pub fn save<F>(
        &mut self,
        storage: &dyn StateStorage,
        interim: bool,
        mut refresh: F,
    ) -> Result<SaveOutcome, AutoOpenError>
    where
        F: FnMut(&str) -> Option<AutoOpenRecord>,
    {
        if !self.loaded {
            debug!(key = %self.key, "auto-open save requested before load, skipping");
            return Ok(SaveOutcome::SkippedBeforeLoad);
        }
        if interim && self.closed {
            return Ok(SaveOutcome::SkippedAfterTeardown);
        }
        if !interim {
            self.closed = true;
        }
        self.debounce.cancel();

        for (id, record) in self.records.iter_mut() {
            if let Some(fresh) = refresh(id) {
                record.refresh_from(fresh);
            }
        }

        let payload = encode(&self.records, self.initial_id.as_deref())?;
        storage.write(&self.key, &payload)?;
        debug!(key = %self.key, records = self.records.len(), interim, "saved auto-open state");
        Ok(SaveOutcome::Written {
            records: self.records.len(),
        })
    }

    fn touch(&mut self, now: Instant) {
        if !self.closed {
            self.debounce.schedule(now);
        }
    }
}
