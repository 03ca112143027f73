use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A page-mutating interaction, tagged by `action_type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action_type", rename_all = "snake_case")]
pub enum Action {
    Navigate { url: String },
    Fill { selector: String, value: String },
    Click { selector: String },
    Select { selector: String, options: Vec<String> },
    Check { selector: String, checked: bool },
    Upload { selector: String, file_path: PathBuf },
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Navigate { .. } => "navigate",
            Action::Fill { .. } => "fill",
            Action::Click { .. } => "click",
            Action::Select { .. } => "select",
            Action::Check { .. } => "check",
            Action::Upload { .. } => "upload",
        }
    }

    /// The element locator, if the action targets one.
    pub fn selector(&self) -> Option<&str> {
        match self {
            Action::Navigate { .. } => None,
            Action::Fill { selector, .. }
            | Action::Click { selector }
            | Action::Select { selector, .. }
            | Action::Check { selector, .. }
            | Action::Upload { selector, .. } => Some(selector),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Milliseconds since the Unix epoch; non-decreasing within a log.
    pub timestamp: i64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogStatus {
    Completed,
    /// Recording was interrupted; the log is a partial prefix only.
    Cancelled,
}

/// A finalized recording. There is no way to append to or edit a log after
/// it has been built by the recorder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    id: Uuid,
    status: LogStatus,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    records: Vec<ActionRecord>,
}

impl ActionLog {
    pub(crate) fn finalize(
        started_at: DateTime<Utc>,
        status: LogStatus,
        records: Vec<ActionRecord>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            status,
            started_at,
            finished_at: Utc::now(),
            records,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn status(&self) -> LogStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == LogStatus::Completed
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn finished_at(&self) -> DateTime<Utc> {
        self.finished_at
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
