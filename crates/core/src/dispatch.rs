use std::fmt;
use std::rc::Rc;

use mdihost_settings::AutoOpenRecord;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::datasource::DatasourceRef;
use crate::entry::{Entry, EntryId};
use crate::mdi::Mdi;

/// 建立項目失敗。 / Error returned by a factory.
#[derive(Debug, Error)]
pub enum CreationError {
    #[error("factory for '{id}' failed: {message}")]
    Factory { id: String, message: String },
    #[error("factory for '{requested}' produced entry '{actual}'")]
    IdMismatch { requested: String, actual: String },
}

impl CreationError {
    pub fn failed(id: impl Into<String>, message: impl Into<String>) -> Self {
        CreationError::Factory {
            id: id.into(),
            message: message.into(),
        }
    }
}

pub type FactoryResult = Result<Option<Entry>, CreationError>;

type SimpleFn = dyn Fn(&str) -> FactoryResult;
type RichFn = dyn Fn(&Mdi, &CreationRequest) -> FactoryResult;

enum FactoryKind {
    Simple(Box<SimpleFn>),
    Rich(Box<RichFn>),
}

/// 項目工廠。 / Factory creating entries on demand.
///
/// Identity is pointer identity: clones compare equal, two factories built
/// from identical closures do not.
#[derive(Clone)]
pub struct Factory(Rc<FactoryKind>);

impl Factory {
    /// Receives only the id. The requested datasource is bound afterwards.
    pub fn simple(build: impl Fn(&str) -> FactoryResult + 'static) -> Self {
        Factory(Rc::new(FactoryKind::Simple(Box::new(build))))
    }

    /// Receives the MDI and the full request, including the persisted record.
    pub fn rich(build: impl Fn(&Mdi, &CreationRequest) -> FactoryResult + 'static) -> Self {
        Factory(Rc::new(FactoryKind::Rich(Box::new(build))))
    }

    pub fn ptr_eq(&self, other: &Factory) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn is_rich(&self) -> bool {
        matches!(*self.0, FactoryKind::Rich(_))
    }
}

impl fmt::Debug for Factory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_rich() { "Rich" } else { "Simple" };
        f.debug_tuple("Factory").field(&kind).finish()
    }
}

/// 建立請求。 / Everything a factory may need to build an entry.
#[derive(Debug, Clone)]
pub struct CreationRequest {
    pub id: EntryId,
    pub datasource: Option<DatasourceRef>,
    /// Record persisted for `id`, when one exists.
    pub record: Option<AutoOpenRecord>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    Created(Entry),
    Declined,
    Failed(CreationError),
    Unmatched,
}

struct Registration {
    pattern: String,
    matcher: Option<Regex>,
    factory: Factory,
}

impl Registration {
    fn matches(&self, id: &str) -> bool {
        self.pattern == id || self.matcher.as_ref().is_some_and(|re| re.is_match(id))
    }
}

/// 以樣式比對的工廠表。 / Pattern-matched factory table.
#[derive(Default)]
pub struct CreationDispatch {
    registrations: Vec<Registration>,
}

impl CreationDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` for ids equal to `pattern` or fully matching it as a regex.
    ///
    /// A second registration of the same pattern replaces the first in place.
    pub fn register(&mut self, pattern: &str, factory: Factory) {
        if let Some(existing) = self
            .registrations
            .iter_mut()
            .find(|registration| registration.pattern == pattern)
        {
            warn!(pattern = %pattern, "factory pattern registered twice, replacing");
            existing.factory = factory;
            return;
        }
        let matcher = match Regex::new(&format!("^(?:{pattern})$")) {
            Ok(re) => Some(re),
            Err(err) => {
                debug!(pattern = %pattern, error = %err, "pattern is not a regex, matching exactly");
                None
            }
        };
        self.registrations.push(Registration {
            pattern: pattern.to_string(),
            matcher,
            factory,
        });
    }

    /// Removes the registration when both pattern and factory identity match.
    pub fn unregister(&mut self, pattern: &str, factory: &Factory) -> bool {
        let before = self.registrations.len();
        self.registrations.retain(|registration| {
            !(registration.pattern == pattern && registration.factory.ptr_eq(factory))
        });
        before != self.registrations.len()
    }

    /// 精確比對優先，其次是第一個符合的正規表示式。 / Exact pattern first, then the first matching regex.
    pub fn lookup(&self, id: &str) -> Option<&Factory> {
        self.registrations
            .iter()
            .find(|registration| registration.pattern == id)
            .or_else(|| {
                self.registrations
                    .iter()
                    .find(|registration| registration.matches(id))
            })
            .map(|registration| &registration.factory)
    }

    /// `true` when the registration for `pattern` serves `id`.
    pub fn pattern_matches(&self, pattern: &str, id: &str) -> bool {
        self.registrations
            .iter()
            .find(|registration| registration.pattern == pattern)
            .is_some_and(|registration| registration.matches(id))
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.registrations
            .iter()
            .map(|registration| registration.pattern.as_str())
    }

    /// Runs the factory serving `request.id`.
    pub fn resolve(&self, mdi: &Mdi, request: &CreationRequest) -> DispatchOutcome {
        let Some(factory) = self.lookup(request.id.as_str()) else {
            return DispatchOutcome::Unmatched;
        };
        let result = match &*factory.0 {
            FactoryKind::Simple(build) => build(request.id.as_str()).map(|entry| {
                entry.map(|mut entry| {
                    if entry.datasource().is_none() && request.datasource.is_some() {
                        entry.set_datasource(request.datasource.clone());
                    }
                    entry
                })
            }),
            FactoryKind::Rich(build) => build(mdi, request),
        };
        match result {
            Ok(Some(entry)) if entry.id() != &request.id => {
                DispatchOutcome::Failed(CreationError::IdMismatch {
                    requested: request.id.to_string(),
                    actual: entry.id().to_string(),
                })
            }
            Ok(Some(entry)) => DispatchOutcome::Created(entry),
            Ok(None) => DispatchOutcome::Declined,
            Err(err) => DispatchOutcome::Failed(err),
        }
    }
}

impl fmt::Debug for CreationDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.patterns()).finish()
    }
}
