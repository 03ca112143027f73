use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::generation::GenerationError;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Browser launch failed: {0}")]
    Start(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Navigation to {url} timed out after {timeout:?}")]
    NavigationTimeout { url: String, timeout: Duration },

    #[error("Element not found: {selector}")]
    ElementNotFound { selector: String },

    #[error("Element not interactable: {selector}")]
    ElementNotInteractable { selector: String },

    #[error("Page not ready: {0}")]
    PageNotReady(String),

    #[error("No fillable fields found on {0}")]
    NoFields(String),

    #[error("Replay diverged at action {index}: selector {selector} no longer resolves")]
    ReplayDivergence { index: usize, selector: String },

    #[error("Replay interrupted at action {index}: {source}")]
    ReplayInterrupted {
        index: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Generation failed: {0}")]
    GenerationFailed(#[from] GenerationError),

    #[error("Value {value:?} is not an allowed option for field {field}")]
    ValidationFailed { field: String, value: String },

    #[error("Required field {field} could not be resolved: {reason}")]
    UnresolvedField { field: String, reason: String },

    #[error("A recording is already active on this session")]
    AlreadyRecording,

    #[error("No recording is active on this session")]
    NotRecording,

    #[error("Action log {0} was not completed and cannot be replayed")]
    IncompleteLog(Uuid),

    #[error("Session is closed")]
    SessionClosed,

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Unknown session handle: {0}")]
    UnknownSession(String),

    #[error("Run task failed: {0}")]
    TaskFailed(String),

    #[error("JavaScript error: {0}")]
    JsError(String),

    #[error("Screenshot failed: {0}")]
    ScreenshotError(String),

    #[error("CDP error: {0}")]
    CdpError(#[from] chromiumoxide::error::CdpError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// True for failures caused by a selector that did not resolve to a
    /// usable element.
    pub fn is_element_failure(&self) -> bool {
        matches!(
            self,
            Error::ElementNotFound { .. } | Error::ElementNotInteractable { .. }
        )
    }

    /// True for failures that end the current run regardless of which field
    /// was being processed.
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Error::Start(_)
                | Error::Navigation { .. }
                | Error::NavigationTimeout { .. }
                | Error::PageNotReady(_)
                | Error::SessionClosed
                | Error::Cancelled
                | Error::CdpError(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
