use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::profile::JobPosting;
use crate::resolver::Resolution;
use crate::schema::FieldDescriptor;

/// Where in a run a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Starting,
    Extracting,
    Resolving,
    Filling,
    Recording,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Starting => "starting",
            Stage::Extracting => "extracting",
            Stage::Resolving => "resolving",
            Stage::Filling => "filling",
            Stage::Recording => "recording",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ApplicationStatus {
    /// Captured from a human in a learning session.
    Observed,
    /// Every field was attempted and nothing needs a second look.
    Completed,
    /// Filled, but at least one field is flagged or was skipped.
    NeedsReview,
    Cancelled,
    Failed { stage: Stage, cause: String },
}

/// One field of an application and the value it ended up with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedField {
    pub descriptor: FieldDescriptor,
    pub value: String,
    /// Absent for values observed from a human.
    pub resolution: Option<Resolution>,
    /// Whether the value was actually entered on the page.
    pub applied: bool,
}

impl ResolvedField {
    /// Flagged resolutions, required fields left unfilled, and values that
    /// never made it onto the page. Disabled fields are never flagged.
    pub fn needs_review(&self) -> bool {
        if self.descriptor.disabled {
            return false;
        }
        let flagged = self.resolution.as_ref().is_some_and(Resolution::needs_review);
        let missed = !self.applied && (self.descriptor.required || !self.value.is_empty());
        flagged || missed
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationRecord {
    pub id: Uuid,
    pub company: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub fields: Vec<ResolvedField>,
    pub status: ApplicationStatus,
    pub log_id: Option<Uuid>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApplicationRecord {
    pub fn new(job: JobPosting, url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            company: job.company,
            title: job.title,
            description: job.description,
            url: url.into(),
            fields: Vec::new(),
            status: ApplicationStatus::Observed,
            log_id: None,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn field(&self, id: &str) -> Option<&ResolvedField> {
        self.fields.iter().find(|f| f.descriptor.id == id)
    }

    pub fn set_status(&mut self, status: ApplicationStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn review_count(&self) -> usize {
        self.fields.iter().filter(|f| f.needs_review()).count()
    }
}

/// Listing entry for stored applications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationSummary {
    pub id: Uuid,
    pub company: String,
    pub title: String,
    pub status: ApplicationStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&ApplicationRecord> for ApplicationSummary {
    fn from(record: &ApplicationRecord) -> Self {
        Self {
            id: record.id,
            company: record.company.clone(),
            title: record.title.clone(),
            status: record.status.clone(),
            created_at: record.created_at,
        }
    }
}
