use std::borrow::Borrow;
use std::fmt;

use mdihost_settings::AutoOpenRecord;

use crate::datasource::DatasourceRef;
use crate::visual::VisualHandle;

/// 項目識別碼。 / Identifier of an MDI entry, unique per MDI instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub fn new(id: impl Into<String>) -> Self {
        EntryId(id.into())
    }

    /// `{id}_{hash}` when the datasource has a content hash, else `id` unchanged.
    pub fn with_datasource(id: &str, datasource: &DatasourceRef) -> Self {
        match datasource.content_hash() {
            Some(hash) => EntryId(format!("{id}_{hash}")),
            None => EntryId(id.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for EntryId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for EntryId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EntryId {
    fn from(value: &str) -> Self {
        EntryId(value.to_string())
    }
}

impl From<String> for EntryId {
    fn from(value: String) -> Self {
        EntryId(value)
    }
}

/// 新項目的位置提示。 / Placement hint parsed from `preferred_after`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderHint {
    /// Empty string: insert at the front.
    First,
    After(EntryId),
    /// Leading `~`: insert before the named entry.
    Before(EntryId),
}

impl OrderHint {
    pub fn parse(raw: &str) -> Self {
        if raw.is_empty() {
            OrderHint::First
        } else if let Some(target) = raw.strip_prefix('~') {
            OrderHint::Before(EntryId::from(target))
        } else {
            OrderHint::After(EntryId::from(raw))
        }
    }
}

/// 動態標題資訊。 / Dynamic title, image and exportable-datasource strategy.
pub trait ViewTitleInfo {
    fn title(&self) -> Option<String>;

    fn image_id(&self) -> Option<String> {
        None
    }

    /// Overrides the datasource's own exportable string when present.
    fn exportable_datasource(&self) -> Option<String> {
        None
    }
}

pub(crate) type CloseListener = Box<dyn FnMut(&Entry, bool)>;
pub(crate) type DatasourceListener = Box<dyn FnMut(&Entry)>;

/// 單一 MDI 面板。 / One named, optionally closeable panel.
pub struct Entry {
    id: EntryId,
    title: String,
    parent_id: Option<EntryId>,
    closeable: bool,
    datasource: Option<DatasourceRef>,
    preferred_after: Option<String>,
    view_title_info: Option<Box<dyn ViewTitleInfo>>,
    forget_on_close: bool,
    open: bool,
    container: Option<VisualHandle>,
    close_listeners: Vec<CloseListener>,
    datasource_listeners: Vec<DatasourceListener>,
}

impl Entry {
    pub fn new(id: impl Into<EntryId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            parent_id: None,
            closeable: false,
            datasource: None,
            preferred_after: None,
            view_title_info: None,
            forget_on_close: false,
            open: false,
            container: None,
            close_listeners: Vec::new(),
            datasource_listeners: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<EntryId>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn closeable(mut self, closeable: bool) -> Self {
        self.closeable = closeable;
        self
    }

    pub fn with_datasource(mut self, datasource: DatasourceRef) -> Self {
        self.datasource = Some(datasource);
        self
    }

    /// `""` places the entry first, `"~x"` before `x`, `"x"` after `x`.
    pub fn preferred_after(mut self, hint: impl Into<String>) -> Self {
        self.preferred_after = Some(hint.into());
        self
    }

    pub fn with_view_title_info(mut self, info: impl ViewTitleInfo + 'static) -> Self {
        self.view_title_info = Some(Box::new(info));
        self
    }

    /// Closing the entry also drops its auto-open record.
    pub fn forget_on_close(mut self, forget: bool) -> Self {
        self.forget_on_close = forget;
        self
    }

    /// 註冊關閉回呼；參數為是否由使用者觸發。 / Adds a close hook receiving `user_initiated`.
    pub fn on_close(mut self, listener: impl FnMut(&Entry, bool) + 'static) -> Self {
        self.close_listeners.push(Box::new(listener));
        self
    }

    pub fn on_datasource_changed(mut self, listener: impl FnMut(&Entry) + 'static) -> Self {
        self.datasource_listeners.push(Box::new(listener));
        self
    }

    pub fn id(&self) -> &EntryId {
        &self.id
    }

    /// Dynamic title when the view supplies one, else the static title.
    pub fn title(&self) -> String {
        self.view_title_info
            .as_ref()
            .and_then(|info| info.title())
            .unwrap_or_else(|| self.title.clone())
    }

    pub fn image_id(&self) -> Option<String> {
        self.view_title_info.as_ref().and_then(|info| info.image_id())
    }

    pub fn parent_id(&self) -> Option<&EntryId> {
        self.parent_id.as_ref()
    }

    pub fn is_closeable(&self) -> bool {
        self.closeable
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    pub fn forgets_on_close(&self) -> bool {
        self.forget_on_close
    }

    pub fn datasource(&self) -> Option<&DatasourceRef> {
        self.datasource.as_ref()
    }

    pub fn order_hint(&self) -> Option<OrderHint> {
        self.preferred_after.as_deref().map(OrderHint::parse)
    }

    pub fn container(&self) -> Option<VisualHandle> {
        self.container
    }

    /// 由目前狀態產生自動開啟紀錄。 / Derives the auto-open record from live state.
    pub fn auto_open_record(&self) -> AutoOpenRecord {
        let datasource_exportable = self
            .view_title_info
            .as_ref()
            .and_then(|info| info.exportable_datasource())
            .or_else(|| self.datasource.as_ref().and_then(DatasourceRef::exportable));
        let (dm_hash, dms_hash_list) = match &self.datasource {
            Some(list @ DatasourceRef::List(_)) => (None, list.item_hashes()),
            Some(single) => (single.content_hash(), Vec::new()),
            None => (None, Vec::new()),
        };
        AutoOpenRecord {
            title: Some(self.title()),
            datasource_exportable,
            parent_id: self.parent_id.as_ref().map(|id| id.to_string()),
            dm_hash,
            dms_hash_list,
            ..AutoOpenRecord::default()
        }
    }

    pub(crate) fn set_title(&mut self, title: String) {
        self.title = title;
    }

    pub(crate) fn set_datasource(&mut self, datasource: Option<DatasourceRef>) {
        self.datasource = datasource;
    }

    pub(crate) fn clear_parent(&mut self) {
        self.parent_id = None;
    }

    pub(crate) fn set_open(&mut self, open: bool) {
        self.open = open;
    }

    pub(crate) fn set_container(&mut self, container: Option<VisualHandle>) {
        self.container = container;
    }

    pub(crate) fn take_close_listeners(&mut self) -> Vec<CloseListener> {
        std::mem::take(&mut self.close_listeners)
    }

    /// 通知資料來源變更。 / Runs datasource hooks, keeping hooks added meanwhile.
    pub(crate) fn fire_datasource_changed(&mut self) {
        let mut listeners = std::mem::take(&mut self.datasource_listeners);
        for listener in listeners.iter_mut() {
            listener(self);
        }
        listeners.append(&mut self.datasource_listeners);
        self.datasource_listeners = listeners;
    }
}

impl fmt::Debug for Entry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("parent_id", &self.parent_id)
            .field("closeable", &self.closeable)
            .field("datasource", &self.datasource)
            .field("preferred_after", &self.preferred_after)
            .field("open", &self.open)
            .field("close_listeners", &self.close_listeners.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct Counter(Rc<Cell<u32>>);

    impl ViewTitleInfo for Counter {
        fn title(&self) -> Option<String> {
            Some(format!("Downloads ({})", self.0.get()))
        }

        fn exportable_datasource(&self) -> Option<String> {
            Some("downloads".into())
        }
    }

    #[test]
    fn order_hint_parsing() {
        assert_eq!(OrderHint::parse(""), OrderHint::First);
        assert_eq!(OrderHint::parse("~stats"), OrderHint::Before("stats".into()));
        assert_eq!(OrderHint::parse("library"), OrderHint::After("library".into()));
    }

    #[test]
    fn view_title_info_drives_title_and_record() {
        let count = Rc::new(Cell::new(3));
        let entry = Entry::new("downloads", "Downloads")
            .with_datasource(DatasourceRef::exported("ignored"))
            .with_view_title_info(Counter(count.clone()));
        assert_eq!(entry.title(), "Downloads (3)");
        count.set(4);

        let record = entry.auto_open_record();
        assert_eq!(record.title.as_deref(), Some("Downloads (4)"));
        assert_eq!(record.datasource_exportable.as_deref(), Some("downloads"));
        assert!(record.dm_hash.is_some());
    }

    #[test]
    fn suffixed_id_uses_content_hash() {
        let ds = DatasourceRef::exported("torrent-1");
        let id = EntryId::with_datasource("peers", &ds);
        assert!(id.as_str().starts_with("peers_"));
        assert_eq!(id, EntryId::with_datasource("peers", &ds));
    }
}
