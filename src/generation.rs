use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

use crate::profile::HistoryEntry;
use crate::schema::{FieldKind, FieldOption};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// Rate limiting, 5xx, dropped connection. Worth retrying.
    #[error("transient generation failure: {0}")]
    Transient(String),

    #[error("generation timed out")]
    Timeout,

    /// The service refused the request; retrying will not help.
    #[error("generation rejected: {0}")]
    Rejected(String),

    #[error("generation service unavailable: {0}")]
    Unavailable(String),
}

impl GenerationError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GenerationError::Transient(_) | GenerationError::Timeout)
    }
}

/// Field metadata handed to the generation service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldSignal {
    pub label: Option<String>,
    pub placeholder: Option<String>,
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    /// Allowed answers; the response must be one of these values.
    pub options: Vec<FieldOption>,
}

/// Everything the service may use to write one answer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptContext {
    pub field: FieldSignal,
    pub job_title: String,
    pub job_description: String,
    pub profile_summary: Option<String>,
    /// Prior answers to similar questions, bounded by the caller.
    pub examples: Vec<HistoryEntry>,
}

/// External text-generation service. Calls must be safe to retry.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError>;
}
