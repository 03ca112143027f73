use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::category::{match_keyword, match_signals, Category, KeywordMatch};
use crate::config::{EngineConfig, RetryPolicy};
use crate::generation::{FieldSignal, GenerationError, PromptContext, TextGenerator};
use crate::profile::{DirectAttribute, HistoryEntry, HistoryStore, JobPosting, Profile};
use crate::schema::{FieldDescriptor, FieldKind, FieldOption};

/// Confidence of a value copied from the profile.
pub const DIRECT_CONFIDENCE: f32 = 1.0;
/// A short answer reused verbatim from an earlier application.
pub const LEARNED_CONFIDENCE: f32 = 0.8;
/// Narrative generated with prior examples of the applicant's own answers.
pub const PATTERN_CONFIDENCE: f32 = 0.7;
/// Generated answer that validated against the field's options.
pub const GENERATED_CONFIDENCE: f32 = 0.6;
/// Generated from the field's label alone.
pub const LOW_CONFIDENCE: f32 = 0.3;
/// Non-empty values below this are flagged for human review.
pub const REVIEW_THRESHOLD: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Direct,
    Learned,
    Generated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum ResolutionIssue {
    /// The generated answer was not one of the allowed options.
    ValidationFailed { rejected: String },
    GenerationFailed { reason: String },
    /// A required field for which nothing could be produced.
    MissingValue,
}

impl fmt::Display for ResolutionIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionIssue::ValidationFailed { rejected } => {
                write!(f, "{rejected:?} is not an allowed option")
            }
            ResolutionIssue::GenerationFailed { reason } => write!(f, "generation failed: {reason}"),
            ResolutionIssue::MissingValue => f.write_str("no value available"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub source: ResolutionSource,
    pub value: String,
    pub confidence: f32,
    pub category: Option<Category>,
    pub issue: Option<ResolutionIssue>,
}

impl Resolution {
    fn new(source: ResolutionSource, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            source,
            value: value.into(),
            confidence,
            category: None,
            issue: None,
        }
    }

    fn empty() -> Self {
        Self::new(ResolutionSource::Direct, "", 0.0)
    }

    fn failed(source: ResolutionSource, issue: ResolutionIssue) -> Self {
        Self {
            issue: Some(issue),
            ..Self::new(source, "", 0.0)
        }
    }

    fn in_category(mut self, category: Option<Category>) -> Self {
        self.category = category;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_empty()
    }

    /// Whether a human should look at this value before it is relied on.
    pub fn needs_review(&self) -> bool {
        self.issue.is_some() || (!self.value.is_empty() && self.confidence < REVIEW_THRESHOLD)
    }
}

/// Inputs shared by every field of one run. All read-only.
pub struct ResolutionContext<'a> {
    pub profile: &'a Profile,
    pub history: &'a dyn HistoryStore,
    pub job: &'a JobPosting,
}

/// Find the option a free-form answer refers to, by value then label.
pub fn match_option<'a>(answer: &str, options: &'a [FieldOption]) -> Option<&'a FieldOption> {
    let answer = answer.trim();
    if answer.is_empty() {
        return None;
    }
    options
        .iter()
        .find(|o| o.value.eq_ignore_ascii_case(answer))
        .or_else(|| options.iter().find(|o| o.label.trim().eq_ignore_ascii_case(answer)))
}

/// The values a field may take, or `None` for free text.
fn allowed_options(field: &FieldDescriptor) -> Option<Vec<FieldOption>> {
    match field.kind {
        FieldKind::Checkbox => Some(vec![
            FieldOption {
                value: "true".into(),
                label: "yes".into(),
                selected: false,
            },
            FieldOption {
                value: "false".into(),
                label: "no".into(),
                selected: false,
            },
        ]),
        _ if !field.options.is_empty() => Some(
            field
                .options
                .iter()
                .filter(|o| !o.value.is_empty())
                .cloned()
                .collect(),
        ),
        _ => None,
    }
}

/// Decides the value of each form field.
pub struct FieldValueResolver {
    generator: Arc<dyn TextGenerator>,
    retry: RetryPolicy,
    timeout: Duration,
    max_examples: usize,
}

impl FieldValueResolver {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &EngineConfig) -> Self {
        Self {
            generator,
            retry: config.retry.clone(),
            timeout: config.generation_timeout,
            max_examples: config.max_examples,
        }
    }

    pub async fn resolve(&self, field: &FieldDescriptor, ctx: &ResolutionContext<'_>) -> Resolution {
        let matched = match_signals(field.signals());
        let category = matched.map(|m| m.category);
        let resolution = self.resolve_inner(field, matched, ctx).await.in_category(category);
        debug!(
            field = %field.id,
            category = ?category,
            source = ?resolution.source,
            confidence = resolution.confidence,
            review = resolution.needs_review(),
            "resolved field"
        );
        resolution
    }

    async fn resolve_inner(
        &self,
        field: &FieldDescriptor,
        matched: Option<KeywordMatch>,
        ctx: &ResolutionContext<'_>,
    ) -> Resolution {
        let category = matched.map(|m| m.category);
        if field.kind == FieldKind::File {
            return match ctx.profile.resume_path.as_ref() {
                Some(path) => Resolution::new(
                    ResolutionSource::Direct,
                    path.to_string_lossy(),
                    DIRECT_CONFIDENCE,
                ),
                None if field.required => {
                    Resolution::failed(ResolutionSource::Direct, ResolutionIssue::MissingValue)
                }
                None => Resolution::empty(),
            };
        }

        let known = matched.and_then(|m| self.known_value(m, ctx));

        if let Some(options) = allowed_options(field) {
            if let Some((source, value, confidence)) = &known {
                if let Some(option) = match_option(value, &options) {
                    return Resolution::new(*source, option.value.clone(), *confidence);
                }
            }
            if category.is_none() && !field.required {
                return Resolution::empty();
            }
            return self.generate_choice(field, &options, ctx).await;
        }

        if let Some((source, value, confidence)) = known {
            return Resolution::new(source, value, confidence);
        }

        if let Some(category) = category.filter(|c| c.is_long_form()) {
            let examples = self.examples(category, ctx);
            let confidence = if examples.is_empty() {
                LOW_CONFIDENCE
            } else {
                PATTERN_CONFIDENCE
            };
            return self.generate_text(field, examples, confidence, ctx).await;
        }

        if field.required {
            return self.generate_text(field, Vec::new(), LOW_CONFIDENCE, ctx).await;
        }
        Resolution::empty()
    }

    /// A short answer from the profile, or failing that the latest one the
    /// applicant gave to a field asking for the same attribute.
    fn known_value(
        &self,
        matched: KeywordMatch,
        ctx: &ResolutionContext<'_>,
    ) -> Option<(ResolutionSource, String, f32)> {
        let attribute = DirectAttribute::for_match(matched)?;
        if let Some(value) = ctx.profile.direct_value(attribute) {
            return Some((ResolutionSource::Direct, value.to_string(), DIRECT_CONFIDENCE));
        }
        ctx.history
            .field_history(matched.category)
            .into_iter()
            .rev()
            .filter(|e| match_keyword(&e.label).and_then(DirectAttribute::for_match) == Some(attribute))
            .find(|e| !e.value.trim().is_empty())
            .map(|e| (ResolutionSource::Learned, e.value, LEARNED_CONFIDENCE))
    }

    /// The most recent non-empty prior answers, oldest first.
    fn examples(&self, category: Category, ctx: &ResolutionContext<'_>) -> Vec<HistoryEntry> {
        let mut recent: Vec<HistoryEntry> = ctx
            .history
            .field_history(category)
            .into_iter()
            .rev()
            .filter(|e| !e.value.trim().is_empty())
            .take(self.max_examples)
            .collect();
        recent.reverse();
        recent
    }

    fn prompt(
        &self,
        field: &FieldDescriptor,
        options: Vec<FieldOption>,
        examples: Vec<HistoryEntry>,
        ctx: &ResolutionContext<'_>,
    ) -> PromptContext {
        PromptContext {
            field: FieldSignal {
                label: field.label.clone(),
                placeholder: field.placeholder.clone(),
                name: field.name.clone(),
                kind: field.kind,
                required: field.required,
                options,
            },
            job_title: ctx.job.title.clone(),
            job_description: ctx.job.description.clone(),
            profile_summary: ctx.profile.summary.clone(),
            examples,
        }
    }

    async fn generate_text(
        &self,
        field: &FieldDescriptor,
        examples: Vec<HistoryEntry>,
        confidence: f32,
        ctx: &ResolutionContext<'_>,
    ) -> Resolution {
        let prompt = self.prompt(field, Vec::new(), examples, ctx);
        match self.generate(&prompt).await {
            Ok(text) if !text.is_empty() => {
                Resolution::new(ResolutionSource::Generated, text, confidence)
            }
            Ok(_) => Resolution::failed(
                ResolutionSource::Generated,
                ResolutionIssue::GenerationFailed {
                    reason: "empty response".into(),
                },
            ),
            Err(e) => {
                warn!(field = %field.id, error = %e, "generation failed; leaving field empty");
                Resolution::failed(
                    ResolutionSource::Generated,
                    ResolutionIssue::GenerationFailed {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// Ask for one of `options` and reject anything outside the set.
    async fn generate_choice(
        &self,
        field: &FieldDescriptor,
        options: &[FieldOption],
        ctx: &ResolutionContext<'_>,
    ) -> Resolution {
        let prompt = self.prompt(field, options.to_vec(), Vec::new(), ctx);
        match self.generate(&prompt).await {
            Ok(answer) => match match_option(&answer, options) {
                Some(option) => Resolution::new(
                    ResolutionSource::Generated,
                    option.value.clone(),
                    GENERATED_CONFIDENCE,
                ),
                None => {
                    warn!(field = %field.id, answer = %answer, "generated answer is not an allowed option");
                    Resolution::failed(
                        ResolutionSource::Generated,
                        ResolutionIssue::ValidationFailed { rejected: answer },
                    )
                }
            },
            Err(e) => {
                warn!(field = %field.id, error = %e, "generation failed; leaving field empty");
                Resolution::failed(
                    ResolutionSource::Generated,
                    ResolutionIssue::GenerationFailed {
                        reason: e.to_string(),
                    },
                )
            }
        }
    }

    /// One request in flight at a time; transient failures back off per the
    /// retry policy.
    async fn generate(&self, prompt: &PromptContext) -> Result<String, GenerationError> {
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt = 1;
        loop {
            let result = match tokio::time::timeout(self.timeout, self.generator.generate(prompt)).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout),
            };
            match result {
                Ok(text) => return Ok(text.trim().to_string()),
                Err(e) if e.is_transient() && attempt < attempts => {
                    let wait = self.retry.backoff_after(attempt);
                    warn!(attempt, error = %e, backoff_ms = wait.as_millis() as u64, "retrying generation");
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
