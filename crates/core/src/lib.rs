pub mod command;
pub mod datasource;
pub mod dispatch;
pub mod entry;
pub mod history;
pub mod listener;
pub mod mdi;
pub mod ordering;
pub mod visual;

pub use command::{LoadGate, MdiCommand, MdiHandle};
pub use datasource::{Datasource, DatasourceRef};
pub use dispatch::{
    CreationDispatch, CreationError, CreationRequest, DispatchOutcome, Factory, FactoryResult,
};
pub use entry::{Entry, EntryId, OrderHint, ViewTitleInfo};
pub use history::SelectionHistory;
pub use listener::{ListenerId, MdiListener};
pub use mdi::{Mdi, MdiDiagnostics, RegisterOutcome, ShowRequest};
pub use ordering::insertion_index;
pub use visual::{NullVisualLayer, VisualError, VisualHandle, VisualLayer};
