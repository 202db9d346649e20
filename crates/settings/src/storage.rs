use std::collections::HashMap;
use std::fs;
use std::io;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

/// 狀態儲存操作的錯誤型別。 / Error type for state storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error for key '{key}': {source}")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
    #[error("storage backend unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    fn io(key: &str, source: io::Error) -> Self {
        StorageError::Io {
            key: key.to_string(),
            source,
        }
    }
}

/// 可替換的狀態儲存後端。 / Pluggable key/blob storage used by the MDI stores.
///
/// Keys are flat strings such as `sidebar.autoopen`. A missing key is not an
/// error: `read` returns `Ok(None)`.
pub trait StateStorage: Send {
    /// Human-readable backend name for diagnostics.
    fn name(&self) -> &str;

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Replaces the blob stored under `key`.
    fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError>;

    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

/// 以 JSON 檔案保存每個鍵。 / Stores one file per key below a root directory.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 取得鍵對應的檔案路徑。 / Resolves the file backing `key`.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.json"))
    }
}

impl StateStorage for FileStorage {
    fn name(&self) -> &str {
        "FileStorage"
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        write_atomic(&self.path_for(key), data).map_err(|err| StorageError::io(key, err))
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(StorageError::io(key, err)),
        }
    }
}

/// 記憶體內的儲存後端，複製品共享同一份資料。 / In-memory backend; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    data: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds `key` with a UTF-8 payload.
    pub fn insert(&self, key: impl Into<String>, payload: impl Into<Vec<u8>>) {
        if let Ok(mut guard) = self.data.lock() {
            guard.insert(key.into(), payload.into());
        }
    }

    /// Returns a copy of the payload stored under `key` as text.
    pub fn get_string(&self, key: &str) -> Option<String> {
        let guard = self.data.lock().ok()?;
        let bytes = guard.get(key)?;
        String::from_utf8(bytes.clone()).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data
            .lock()
            .map(|guard| guard.contains_key(key))
            .unwrap_or(false)
    }
}

impl StateStorage for MemoryStorage {
    fn name(&self) -> &str {
        "MemoryStorage"
    }

    fn read(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let guard = self
            .data
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        Ok(guard.get(key).cloned())
    }

    fn write(&self, key: &str, data: &[u8]) -> Result<(), StorageError> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        guard.insert(key.to_string(), data.to_vec());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let mut guard = self
            .data
            .lock()
            .map_err(|_| StorageError::Unavailable("memory storage lock poisoned".into()))?;
        guard.remove(key);
        Ok(())
    }
}

/// 以臨時檔案搭配 rename 實現原子寫入。 / Writes data atomically via a temporary sibling and rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp_path = path.with_extension("tmp");
    fs::write(&tmp_path, data)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn file_storage_round_trips_and_removes() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("state"));

        assert!(storage.read("sidebar.autoopen").unwrap().is_none());
        storage.write("sidebar.autoopen", b"{}").unwrap();
        assert!(storage.path_for("sidebar.autoopen").exists());
        assert_eq!(
            storage.read("sidebar.autoopen").unwrap().as_deref(),
            Some(&b"{}"[..])
        );

        storage.remove("sidebar.autoopen").unwrap();
        // 重複移除不應出錯。 / Removing twice is fine.
        storage.remove("sidebar.autoopen").unwrap();
        assert!(storage.read("sidebar.autoopen").unwrap().is_none());
    }

    #[test]
    fn memory_storage_clones_share_data() {
        let storage = MemoryStorage::new();
        let view = storage.clone();
        storage.write("tabs.order", b"[\"a\"]").unwrap();
        assert_eq!(view.get_string("tabs.order").as_deref(), Some("[\"a\"]"));
        view.remove("tabs.order").unwrap();
        assert!(!storage.contains("tabs.order"));
    }
}
