use std::path::Path;

use async_trait::async_trait;

use crate::dom::DomSnapshot;
use crate::error::Result;

/// What a selector currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementState {
    Missing,
    /// Matched more than one element.
    Ambiguous,
    Hidden,
    Disabled,
    Ready,
}

/// Loading progress of the current document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadState {
    pub ready_state: String,
    /// Number of resources fetched so far; stable across polls once idle.
    pub resource_count: u64,
    /// HTTP status of the main document, when the surface exposes it.
    pub status: Option<u16>,
}

impl LoadState {
    pub fn is_complete(&self) -> bool {
        self.ready_state == "complete"
    }
}

/// Primitive operations on one controlled page. Implementations do not wait
/// for elements; `RemoteControlSession` owns waiting, timeouts and logging.
#[async_trait]
pub trait PageDriver: Send {
    /// Start navigating and return once the new document has committed.
    async fn goto(&mut self, url: &str) -> Result<()>;

    async fn load_state(&mut self) -> Result<LoadState>;

    async fn probe(&mut self, selector: &str) -> Result<ElementState>;

    /// Replace the element's current value with `value`.
    async fn fill(&mut self, selector: &str, value: &str) -> Result<()>;

    async fn click(&mut self, selector: &str) -> Result<()>;

    async fn select(&mut self, selector: &str, values: &[String]) -> Result<()>;

    async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<()>;

    async fn upload(&mut self, selector: &str, path: &Path) -> Result<()>;

    async fn snapshot(&mut self) -> Result<DomSnapshot>;

    async fn screenshot(&mut self, path: &Path) -> Result<()>;

    /// Release the page and its process. Called at most once per driver.
    async fn close(&mut self) -> Result<()>;
}

/// Produces a fresh, exclusively owned page surface per session.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn PageDriver>>;
}
