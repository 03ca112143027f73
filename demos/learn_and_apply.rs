//! Learn a form once, then apply to it from the stored profile.
//!
//! ```sh
//! RUST_LOG=apply_agent=info cargo run --example learn_and_apply -- https://jobs.example/apply
//! ```

use std::sync::Arc;

use apply_agent::generation::{GenerationError, PromptContext, TextGenerator};
use apply_agent::profile::{FieldHistory, ProfileStore};
use apply_agent::store::ApplicationStore;
use apply_agent::{
    ChromeLauncher, Engine, EngineConfig, FieldKind, JobPosting, JsonStore, RunRequest,
};
use async_trait::async_trait;
use tracing_subscriber::EnvFilter;

/// Stands in for a hosted model: picks the first option or writes a stock
/// sentence.
struct CannedGenerator;

#[async_trait]
impl TextGenerator for CannedGenerator {
    async fn generate(&self, context: &PromptContext) -> Result<String, GenerationError> {
        if let Some(option) = context.field.options.first() {
            return Ok(option.value.clone());
        }
        let topic = context.field.label.as_deref().unwrap_or(&context.field.name);
        Ok(format!(
            "Regarding {topic}: I am excited about the {} role.",
            context.job_title
        ))
    }
}

#[tokio::main]
async fn main() -> apply_agent::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "https://httpbin.org/forms/post".to_string());
    let config = EngineConfig::from_env();
    let store = JsonStore::new(&config.data_dir);
    let launcher = Arc::new(ChromeLauncher::builder().headless(true).build());
    let engine = Engine::with_json_store(launcher, Arc::new(CannedGenerator), config);
    let job = JobPosting {
        company: "Example Corp".into(),
        title: "Rust Engineer".into(),
        description: "Build reliable browser automation.".into(),
    };
    let profile = store.get_profile().await?;

    // Learn: enter the profile's name into every text field that asks for one.
    let handle = engine.start_learning_session(&url, job.clone()).await?;
    for field in engine.learning_fields(handle).await? {
        if field.kind == FieldKind::Text && field.display_name().to_lowercase().contains("name") {
            engine.record_field(handle, field, &profile.full_name).await?;
        }
    }
    let log = engine.finish_learning_session(handle).await?;
    println!("learned {} actions", log.len());

    // Apply, using what earlier applications answered as history.
    let mut previous = Vec::new();
    for summary in store.list_applications().await? {
        previous.push(store.load_application(summary.id).await?);
    }
    let history = FieldHistory::from_applications(&previous);
    let request = RunRequest::new(&url, job, Arc::new(profile), Arc::new(history));
    let record = engine.run_application(request).await?;

    println!("application {} -> {:?}", record.id, record.status);
    for field in &record.fields {
        let marker = if field.needs_review() { "review" } else { "ok" };
        println!("  [{marker}] {} = {:?}", field.descriptor.display_name(), field.value);
    }
    Ok(())
}
