use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::storage::{StateStorage, StorageError};

/// 檢視偏好設定的錯誤型別。 / Errors raised while persisting view preferences.
#[derive(Debug, Error)]
pub enum ViewStateError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("failed to encode view state '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Persisted preferred entry order, the set of ids shown through one-shot
/// requests, and the entries the user closed (id to title).
#[derive(Debug, Clone)]
pub struct ViewState {
    order_key: String,
    once_key: String,
    closed_key: String,
    preferred_order: Vec<String>,
    loaded_once: BTreeSet<String>,
    closed_by_user: BTreeMap<String, String>,
    dirty: bool,
}

impl ViewState {
    pub fn new(
        order_key: impl Into<String>,
        once_key: impl Into<String>,
        closed_key: impl Into<String>,
    ) -> Self {
        Self {
            order_key: order_key.into(),
            once_key: once_key.into(),
            closed_key: closed_key.into(),
            preferred_order: Vec::new(),
            loaded_once: BTreeSet::new(),
            closed_by_user: BTreeMap::new(),
            dirty: false,
        }
    }

    /// 讀取所有鍵；資料損毀時保留空值。 / Reads every key, keeping empty values when unreadable.
    pub fn load(&mut self, storage: &dyn StateStorage) {
        if let Some(order) = read_value::<Vec<String>>(storage, &self.order_key) {
            self.preferred_order = dedup(order);
        }
        if let Some(once) = read_value::<Vec<String>>(storage, &self.once_key) {
            self.loaded_once.extend(once);
        }
        if let Some(closed) = read_value::<BTreeMap<String, String>>(storage, &self.closed_key) {
            self.closed_by_user.extend(closed);
        }
        self.dirty = false;
    }

    pub fn preferred_order(&self) -> &[String] {
        &self.preferred_order
    }

    pub fn set_preferred_order(&mut self, order: Vec<String>) {
        let order = dedup(order);
        if order != self.preferred_order {
            self.preferred_order = order;
            self.dirty = true;
        }
    }

    pub fn was_loaded_once(&self, id: &str) -> bool {
        self.loaded_once.contains(id)
    }

    /// Returns `true` when `id` was not yet in the set.
    pub fn mark_loaded_once(&mut self, id: &str) -> bool {
        let inserted = self.loaded_once.insert(id.to_string());
        self.dirty |= inserted;
        inserted
    }

    pub fn loaded_once(&self) -> impl Iterator<Item = &str> {
        self.loaded_once.iter().map(String::as_str)
    }

    pub fn was_closed_by_user(&self, id: &str) -> bool {
        self.closed_by_user.contains_key(id)
    }

    /// 記錄使用者關閉的項目。 / Remembers that the user closed `id`; the first title wins.
    pub fn mark_closed_by_user(&mut self, id: &str, title: &str) -> bool {
        if self.closed_by_user.contains_key(id) {
            return false;
        }
        self.closed_by_user.insert(id.to_string(), title.to_string());
        self.dirty = true;
        true
    }

    /// Forgets the user close of `id`, returning the remembered title.
    pub fn clear_closed_by_user(&mut self, id: &str) -> Option<String> {
        let title = self.closed_by_user.remove(id);
        self.dirty |= title.is_some();
        title
    }

    /// User-closed ids with their titles, sorted by id.
    pub fn closed_by_user(&self) -> impl Iterator<Item = (&str, &str)> {
        self.closed_by_user
            .iter()
            .map(|(id, title)| (id.as_str(), title.as_str()))
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Writes every key when something changed since the last load or save.
    pub fn save(&mut self, storage: &dyn StateStorage) -> Result<bool, ViewStateError> {
        if !self.dirty {
            return Ok(false);
        }
        write_value(storage, &self.order_key, &self.preferred_order)?;
        write_value(storage, &self.once_key, &self.loaded_once)?;
        write_value(storage, &self.closed_key, &self.closed_by_user)?;
        self.dirty = false;
        debug!(order_key = %self.order_key, "saved view state");
        Ok(true)
    }
}

fn dedup(list: Vec<String>) -> Vec<String> {
    let mut seen = BTreeSet::new();
    list.into_iter()
        .filter(|id| seen.insert(id.clone()))
        .collect()
}

fn read_value<T: serde::de::DeserializeOwned>(storage: &dyn StateStorage, key: &str) -> Option<T> {
    let bytes = match storage.read(key) {
        Ok(Some(bytes)) => bytes,
        Ok(None) => return None,
        Err(err) => {
            warn!(key = %key, error = %err, "failed to read view state");
            return None;
        }
    };
    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            warn!(key = %key, error = %err, "ignoring malformed view state");
            None
        }
    }
}

fn write_value<T: serde::Serialize + ?Sized>(
    storage: &dyn StateStorage,
    key: &str,
    value: &T,
) -> Result<(), ViewStateError> {
    let payload = serde_json::to_vec(value).map_err(|source| ViewStateError::Serialize {
        key: key.to_string(),
        source,
    })?;
    storage.write(key, &payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn view_state() -> ViewState {
        ViewState::new("sidebar.order", "sidebar.once", "sidebar.closed")
    }

    #[test]
    fn order_is_deduplicated_and_persisted() {
        let storage = MemoryStorage::new();
        let mut views = view_state();
        views.set_preferred_order(vec!["library".into(), "peers".into(), "library".into()]);
        assert_eq!(views.preferred_order(), ["library", "peers"]);
        assert!(views.save(&storage).unwrap());
        assert_eq!(
            storage.get_string("sidebar.order").as_deref(),
            Some(r#"["library","peers"]"#)
        );
        assert!(!views.save(&storage).unwrap());
    }

    #[test]
    fn loaded_once_survives_reload() {
        let storage = MemoryStorage::new();
        let mut views = view_state();
        assert!(views.mark_loaded_once("welcome"));
        assert!(!views.mark_loaded_once("welcome"));
        views.save(&storage).unwrap();

        let mut reloaded = view_state();
        reloaded.load(&storage);
        assert!(reloaded.was_loaded_once("welcome"));
        assert!(!reloaded.is_dirty());
    }

    #[test]
    fn malformed_lists_are_ignored() {
        let storage = MemoryStorage::new();
        storage.insert("sidebar.order", "{\"oops\": 1}");
        let mut views = view_state();
        views.load(&storage);
        assert!(views.preferred_order().is_empty());
    }

    #[test]
    fn user_closed_entries_keep_first_title() {
        let storage = MemoryStorage::new();
        let mut views = view_state();
        assert!(views.mark_closed_by_user("stats", "Statistics"));
        assert!(!views.mark_closed_by_user("stats", "Renamed"));
        views.save(&storage).unwrap();
        assert_eq!(
            storage.get_string("sidebar.closed").as_deref(),
            Some(r#"{"stats":"Statistics"}"#)
        );

        let mut reloaded = view_state();
        reloaded.load(&storage);
        assert!(reloaded.was_closed_by_user("stats"));
        assert_eq!(reloaded.clear_closed_by_user("stats").as_deref(), Some("Statistics"));
        assert!(reloaded.is_dirty());
        assert_eq!(reloaded.closed_by_user().count(), 0);
    }
}
