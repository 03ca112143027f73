use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Name,
    Email,
    Phone,
    Address,
    CoverLetter,
    Experience,
    Education,
    Skills,
    References,
    Availability,
    Salary,
}

impl Category {
    /// Categories answered by a single profile attribute.
    pub fn is_direct(self) -> bool {
        matches!(
            self,
            Category::Name | Category::Email | Category::Phone | Category::Address
        )
    }

    /// Free-text narrative categories that benefit from prior examples.
    pub fn is_long_form(self) -> bool {
        matches!(
            self,
            Category::CoverLetter | Category::Experience | Category::Skills
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Name => "name",
            Category::Email => "email",
            Category::Phone => "phone",
            Category::Address => "address",
            Category::CoverLetter => "cover_letter",
            Category::Experience => "experience",
            Category::Education => "education",
            Category::Skills => "skills",
            Category::References => "references",
            Category::Availability => "availability",
            Category::Salary => "salary",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluated top to bottom, first match wins. Keywords overlap ("email
/// address" contains "address"), so the order is part of the behavior.
pub const CATEGORY_TABLE: &[(Category, &[&str])] = &[
    (Category::Name, &["name", "full name", "first name", "last name"]),
    (Category::Email, &["email", "email address"]),
    (Category::Phone, &["phone", "phone number", "mobile", "cell"]),
    (
        Category::Address,
        &["address", "street address", "city", "state", "zip", "postal code"],
    ),
    (
        Category::CoverLetter,
        &[
            "cover letter",
            "cover note",
            "letter of interest",
            "introduction",
            "why do you want to work here",
        ],
    ),
    (
        Category::Experience,
        &["experience", "work experience", "work history", "employment history"],
    ),
    (
        Category::Education,
        &[
            "education",
            "educational background",
            "academic background",
            "degree",
            "qualification",
        ],
    ),
    (
        Category::Skills,
        &["skills", "technical skills", "competencies", "abilities"],
    ),
    (
        Category::References,
        &["references", "professional references", "referees"],
    ),
    (Category::Availability, &["availability", "start date", "notice period"]),
    (
        Category::Salary,
        &["salary", "salary expectation", "compensation", "desired pay", "wage"],
    ),
];

/// Canonical key: lower-cased, `_`/`-` treated as spaces, whitespace collapsed.
pub fn normalize_key(raw: &str) -> String {
    raw.to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// A categorized text together with the keyword that decided it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordMatch {
    pub category: Category,
    pub keyword: &'static str,
}

/// Whether `keyword` occurs in `key` as whole words. A trailing plural `s`
/// still counts, so "references" matches "reference" but "statement" never
/// matches "state".
fn contains_words(key: &str, keyword: &str) -> bool {
    key.match_indices(keyword).any(|(start, _)| {
        let before = key[..start].chars().next_back();
        let rest = &key[start + keyword.len()..];
        let rest = rest.strip_prefix('s').unwrap_or(rest);
        let after = rest.chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

/// The first table keyword found in the normalized form of `raw`.
pub fn match_keyword(raw: &str) -> Option<KeywordMatch> {
    let key = normalize_key(raw);
    if key.is_empty() {
        return None;
    }
    CATEGORY_TABLE.iter().find_map(|(category, keywords)| {
        keywords
            .iter()
            .find(|kw| contains_words(&key, kw))
            .map(|keyword| KeywordMatch {
                category: *category,
                keyword: *keyword,
            })
    })
}

/// Keyword match of the first signal that has one.
pub fn match_signals<'a>(signals: impl IntoIterator<Item = &'a str>) -> Option<KeywordMatch> {
    signals.into_iter().find_map(match_keyword)
}

/// Category of a single text, if any keyword occurs in its normalized form.
pub fn categorize(raw: &str) -> Option<Category> {
    match_keyword(raw).map(|m| m.category)
}

/// Category of the first signal that matches.
pub fn categorize_signals<'a>(signals: impl IntoIterator<Item = &'a str>) -> Option<Category> {
    match_signals(signals).map(|m| m.category)
}
