pub mod auto_open;
pub mod preferences;
pub mod schedule;
pub mod storage;
pub mod views;

pub use auto_open::{
    AutoOpenError, AutoOpenRecord, AutoOpenStore, DecodedAutoOpen, LoadSummary, SaveOutcome,
};
pub use preferences::{MdiPreferences, PreferencesError, PreferencesStore};
pub use schedule::{Clock, ManualClock, SaveDebouncer, SystemClock};
pub use storage::{FileStorage, MemoryStorage, StateStorage, StorageError};
pub use views::{ViewState, ViewStateError};
