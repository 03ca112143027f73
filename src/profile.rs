use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::application::{ApplicationRecord, ResolvedField};
use crate::category::{categorize_signals, Category, KeywordMatch};
use crate::error::Result;
use crate::resolver::ResolutionSource;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Experience {
    pub company: String,
    pub title: String,
    pub location: Option<String>,
    pub start_date: String,
    pub end_date: Option<String>,
    pub current: bool,
    pub description: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Education {
    pub institution: String,
    pub degree: String,
    pub field_of_study: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Skill {
    pub name: String,
    pub level: Option<String>,
    pub years: Option<u32>,
}

/// The applicant. Read-only for the engine; runs hold it behind an `Arc`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
    pub linkedin: Option<String>,
    pub github: Option<String>,
    pub portfolio: Option<String>,
    pub summary: Option<String>,
    pub resume_path: Option<PathBuf>,
    pub experience: Vec<Experience>,
    pub education: Vec<Education>,
    pub skills: Vec<Skill>,
}

/// The one profile attribute a direct keyword asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectAttribute {
    FullName,
    Email,
    Phone,
    Street,
    City,
    State,
    ZipCode,
}

impl DirectAttribute {
    /// Address keywords each name a different attribute, so the keyword
    /// decides rather than the category.
    pub fn for_match(m: KeywordMatch) -> Option<Self> {
        if !m.category.is_direct() {
            return None;
        }
        let attribute = match (m.category, m.keyword) {
            (Category::Name, _) => DirectAttribute::FullName,
            (Category::Email, _) => DirectAttribute::Email,
            (Category::Phone, _) => DirectAttribute::Phone,
            (_, "city") => DirectAttribute::City,
            (_, "state") => DirectAttribute::State,
            (_, "zip" | "postal code") => DirectAttribute::ZipCode,
            _ => DirectAttribute::Street,
        };
        Some(attribute)
    }
}

impl Profile {
    /// The value of a direct attribute, if it is filled in.
    pub fn direct_value(&self, attribute: DirectAttribute) -> Option<&str> {
        let value = match attribute {
            DirectAttribute::FullName => Some(self.full_name.as_str()),
            DirectAttribute::Email => Some(self.email.as_str()),
            DirectAttribute::Phone => self.phone.as_deref(),
            DirectAttribute::Street => self.address.as_deref(),
            DirectAttribute::City => self.city.as_deref(),
            DirectAttribute::State => self.state.as_deref(),
            DirectAttribute::ZipCode => self.zip_code.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// The posting an application is for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPosting {
    pub company: String,
    pub title: String,
    pub description: String,
}

/// One value the applicant gave in an earlier application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub label: String,
    pub value: String,
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn get_profile(&self) -> Result<Profile>;
}

/// Prior answers grouped by category, oldest first.
pub trait HistoryStore: Send + Sync {
    fn field_history(&self, category: Category) -> Vec<HistoryEntry>;
}

/// Immutable snapshot of prior answers used for the duration of a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldHistory {
    by_category: BTreeMap<Category, Vec<HistoryEntry>>,
}

impl FieldHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, category: Category, entry: HistoryEntry) {
        self.by_category.entry(category).or_default().push(entry);
    }

    /// Group the answers of earlier applications by category. Only values
    /// that reached the page and came from the applicant or their profile
    /// are kept; generated or flagged values would otherwise come back as
    /// trusted answers. Uncategorized fields are dropped.
    pub fn from_applications<'a>(records: impl IntoIterator<Item = &'a ApplicationRecord>) -> Self {
        let mut history = Self::new();
        for record in records {
            for field in record.fields.iter().filter(|f| is_reusable(f)) {
                if let Some(category) = categorize_signals(field.descriptor.signals()) {
                    history.push(
                        category,
                        HistoryEntry {
                            label: field.descriptor.display_name().to_string(),
                            value: field.value.clone(),
                        },
                    );
                }
            }
        }
        history
    }

    pub fn is_empty(&self) -> bool {
        self.by_category.is_empty()
    }
}

fn is_reusable(field: &ResolvedField) -> bool {
    if !field.applied || field.value.trim().is_empty() {
        return false;
    }
    match &field.resolution {
        None => true,
        Some(r) => r.source != ResolutionSource::Generated && !r.needs_review(),
    }
}

impl HistoryStore for FieldHistory {
    fn field_history(&self, category: Category) -> Vec<HistoryEntry> {
        self.by_category.get(&category).cloned().unwrap_or_default()
    }
}
