use crate::entry::{Entry, EntryId};

/// 訂閱者識別碼。 / Handle returned by [`crate::Mdi::add_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// MDI 事件的訂閱者。 / Observer of entry lifecycle events.
///
/// Every method has an empty default so observers implement only what they need.
pub trait MdiListener {
    fn entry_loaded(&mut self, _entry: &Entry) {}

    /// Also fired when the already active entry is selected again.
    fn entry_selected(&mut self, _new: Option<&Entry>, _old: Option<&EntryId>) {}

    fn entry_closed(&mut self, _entry: &Entry, _user_initiated: bool) {}

    fn mdi_disposed(&mut self) {}
}
