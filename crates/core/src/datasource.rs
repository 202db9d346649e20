use std::fmt;
use std::sync::Arc;

use sha2::{Digest, Sha256};

/// Hex digits kept from the SHA-256 digest when suffixing entry ids.
const HASH_HEX_LEN: usize = 16;

/// 項目繫結的資料來源。 / Opaque payload a panel is bound to.
///
/// Both methods are optional. A datasource without an exportable form cannot
/// be restored after restart; one without a content hash falls back to the
/// hash of its exportable string.
pub trait Datasource: fmt::Debug {
    fn exportable(&self) -> Option<String> {
        None
    }

    fn content_hash(&self) -> Option<String> {
        self.exportable().map(|text| hash_text(&text))
    }
}

/// 資料來源參照。 / Reference to the datasource of an entry.
#[derive(Debug, Clone)]
pub enum DatasourceRef {
    /// Rehydration key read back from persistence.
    Exported(String),
    Object(Arc<dyn Datasource>),
    List(Vec<Arc<dyn Datasource>>),
}

impl DatasourceRef {
    pub fn exported(key: impl Into<String>) -> Self {
        DatasourceRef::Exported(key.into())
    }

    /// String written to the auto-open record, when one exists.
    pub fn exportable(&self) -> Option<String> {
        match self {
            DatasourceRef::Exported(key) => Some(key.clone()),
            DatasourceRef::Object(source) => source.exportable(),
            DatasourceRef::List(_) => None,
        }
    }

    /// 內容雜湊，用於區分同一檢視的多個項目。 / Content hash used to suffix entry ids.
    pub fn content_hash(&self) -> Option<String> {
        match self {
            DatasourceRef::Exported(key) => Some(hash_text(key)),
            DatasourceRef::Object(source) => source.content_hash(),
            DatasourceRef::List(items) => {
                let hashes = self.item_hashes();
                if hashes.is_empty() || hashes.len() != items.len() {
                    return None;
                }
                Some(hash_text(&hashes.join(",")))
            }
        }
    }

    /// Per-item hashes of a list datasource; empty for the other variants.
    pub fn item_hashes(&self) -> Vec<String> {
        match self {
            DatasourceRef::List(items) => items.iter().filter_map(|item| item.content_hash()).collect(),
            _ => Vec::new(),
        }
    }
}

/// Persisted as part of suffixed ids, so the digest must not depend on the build.
pub(crate) fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let mut digest = format!("{:x}", hasher.finalize());
    digest.truncate(HASH_HEX_LEN);
    digest
}
