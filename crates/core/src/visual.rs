use thiserror::Error;

use crate::entry::Entry;

/// 視覺層建立的容器代號。 / Handle of a container built by the visual layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VisualHandle(pub u64);

#[derive(Debug, Error)]
pub enum VisualError {
    #[error("failed to build container for '{id}': {message}")]
    Build { id: String, message: String },
}

/// 由宿主實作的繪製介面。 / Seam to the host toolkit that renders entries.
pub trait VisualLayer {
    fn build_container(&mut self, entry: &Entry) -> Result<VisualHandle, VisualError>;

    fn dispose_container(&mut self, handle: VisualHandle);
}

/// 不繪製任何內容的視覺層。 / Visual layer that renders nothing; used headless and in tests.
#[derive(Debug, Default)]
pub struct NullVisualLayer {
    next: u64,
    live: usize,
}

impl NullVisualLayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Containers built and not yet disposed.
    pub fn live(&self) -> usize {
        self.live
    }
}

impl VisualLayer for NullVisualLayer {
    fn build_container(&mut self, _entry: &Entry) -> Result<VisualHandle, VisualError> {
        self.next += 1;
        self.live += 1;
        Ok(VisualHandle(self.next))
    }

    fn dispose_container(&mut self, _handle: VisualHandle) {
        self.live = self.live.saturating_sub(1);
    }
}
