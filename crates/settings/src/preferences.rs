use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::schedule::SaveDebouncer;
use crate::storage::write_atomic;

const PREFERENCES_VERSION: u32 = 1;
const DEFAULT_INSTANCE: &str = "sidebar";

#[derive(Debug, Error)]
pub enum PreferencesError {
    #[error("failed to read preferences {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse preferences {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize preferences {path}: {source}")]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write preferences {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// MDI 執行個體的設定。 / Configuration of one MDI instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MdiPreferences {
    #[serde(default = "default_version")]
    pub version: u32,
    /// Prefix of every storage key owned by this instance.
    #[serde(default = "default_instance")]
    pub instance: String,
    #[serde(default = "default_true")]
    pub persist: bool,
    #[serde(default = "default_save_delay")]
    pub save_delay_secs: u64,
    #[serde(default = "default_save_max_delay")]
    pub save_max_delay_secs: u64,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_load_timeout")]
    pub load_timeout_secs: u64,
    #[serde(default = "default_initial_grace")]
    pub initial_entry_grace_secs: u64,
}

fn default_version() -> u32 {
    PREFERENCES_VERSION
}

fn default_instance() -> String {
    DEFAULT_INSTANCE.to_string()
}

fn default_true() -> bool {
    true
}

fn default_save_delay() -> u64 {
    60
}

fn default_save_max_delay() -> u64 {
    300
}

fn default_history_capacity() -> usize {
    64
}

fn default_load_timeout() -> u64 {
    30
}

fn default_initial_grace() -> u64 {
    10
}

impl Default for MdiPreferences {
    fn default() -> Self {
        Self {
            version: PREFERENCES_VERSION,
            instance: default_instance(),
            persist: true,
            save_delay_secs: default_save_delay(),
            save_max_delay_secs: default_save_max_delay(),
            history_capacity: default_history_capacity(),
            load_timeout_secs: default_load_timeout(),
            initial_entry_grace_secs: default_initial_grace(),
        }
    }
}

impl MdiPreferences {
    /// Preferences for a named instance, everything else default.
    pub fn for_instance(instance: impl Into<String>) -> Self {
        let mut prefs = Self {
            instance: instance.into(),
            ..Self::default()
        };
        prefs.sanitize();
        prefs
    }

    pub fn sanitize(&mut self) {
        if self.version == 0 {
            self.version = PREFERENCES_VERSION;
        }
        let instance = sanitize_instance(&self.instance);
        if instance != self.instance {
            warn!(requested = %self.instance, instance = %instance, "adjusted MDI instance name");
            self.instance = instance;
        }
        self.save_delay_secs = self.save_delay_secs.clamp(1, 3600);
        self.save_max_delay_secs = self
            .save_max_delay_secs
            .clamp(self.save_delay_secs, 24 * 3600);
        self.history_capacity = self.history_capacity.clamp(1, 1024);
        if self.load_timeout_secs == 0 {
            self.load_timeout_secs = default_load_timeout();
        }
        self.load_timeout_secs = self.load_timeout_secs.min(600);
        self.initial_entry_grace_secs = self.initial_entry_grace_secs.min(600);
    }

    pub fn autoopen_key(&self) -> String {
        format!("{}.autoopen", self.instance)
    }

    pub fn order_key(&self) -> String {
        format!("{}.order", self.instance)
    }

    pub fn once_key(&self) -> String {
        format!("{}.once", self.instance)
    }

    pub fn closed_key(&self) -> String {
        format!("{}.closed", self.instance)
    }

    /// Default wait of load-gate callers on another thread.
    pub fn load_timeout(&self) -> Duration {
        Duration::from_secs(self.load_timeout_secs)
    }

    pub fn initial_entry_grace(&self) -> Duration {
        Duration::from_secs(self.initial_entry_grace_secs)
    }

    /// 依設定建立延遲儲存排程器。 / Builds the save debouncer described by these preferences.
    pub fn debouncer(&self) -> SaveDebouncer {
        SaveDebouncer::new(
            Duration::from_secs(self.save_delay_secs),
            Duration::from_secs(self.save_max_delay_secs),
        )
    }
}

/// Instance names become file names; keep them to `[A-Za-z0-9_-]`.
fn sanitize_instance(raw: &str) -> String {
    let cleaned: String = raw
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.chars().all(|ch| ch == '_') {
        default_instance()
    } else {
        cleaned
    }
}

#[derive(Debug)]
pub struct PreferencesStore {
    path: PathBuf,
    data: MdiPreferences,
}

impl PreferencesStore {
    pub fn new(path: impl Into<PathBuf>, preferences: MdiPreferences) -> Self {
        Self {
            path: path.into(),
            data: preferences,
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, PreferencesError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            let mut data = MdiPreferences::default();
            data.sanitize();
            return Ok(Self { path, data });
        }

        let contents = fs::read_to_string(&path).map_err(|source| PreferencesError::Read {
            path: path.clone(),
            source,
        })?;
        let mut data: MdiPreferences =
            serde_json::from_str(&contents).map_err(|source| PreferencesError::Parse {
                path: path.clone(),
                source,
            })?;
        data.sanitize();
        Ok(Self { path, data })
    }

    pub fn preferences(&self) -> &MdiPreferences {
        &self.data
    }

    pub fn update<F>(&mut self, mut op: F) -> Result<(), PreferencesError>
    where
        F: FnMut(&mut MdiPreferences),
    {
        op(&mut self.data);
        self.data.sanitize();
        self.save()
    }

    pub fn overwrite(&mut self, preferences: MdiPreferences) -> Result<(), PreferencesError> {
        self.data = preferences;
        self.data.sanitize();
        self.save()
    }

    pub fn save(&self) -> Result<(), PreferencesError> {
        let payload = serde_json::to_string_pretty(&self.data).map_err(|source| {
            PreferencesError::Serialize {
                path: self.path.clone(),
                source,
            }
        })?;
        write_atomic(&self.path, payload.as_bytes()).map_err(|source| PreferencesError::Write {
            path: self.path.clone(),
            source,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn into_preferences(self) -> MdiPreferences {
        self.data
    }
}
