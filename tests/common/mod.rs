#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use apply_agent::action::ActionLog;
use apply_agent::application::{ApplicationRecord, ApplicationSummary};
use apply_agent::dom::DomSnapshot;
use apply_agent::driver::{ElementState, LoadState, Launcher, PageDriver};
use apply_agent::generation::{GenerationError, PromptContext, TextGenerator};
use apply_agent::store::{ApplicationStore, LogStore};
use apply_agent::{EngineConfig, Error, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use uuid::Uuid;

/// One primitive issued against a fake page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub kind: &'static str,
    pub selector: String,
    pub value: String,
}

impl Call {
    fn new(kind: &'static str, selector: &str, value: impl Into<String>) -> Self {
        Self {
            kind,
            selector: selector.to_string(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct PageSetup {
    default_state: ElementState,
    elements: HashMap<String, ElementState>,
    snapshot: DomSnapshot,
    load: LoadState,
    goto_delay: Option<Duration>,
    screenshot_delay: Option<Duration>,
    fail_goto: bool,
}

#[derive(Debug)]
struct PageState {
    setup: PageSetup,
    calls: Vec<Call>,
    closes: usize,
    screenshots: Vec<PathBuf>,
}

/// In-memory page. Clones share state, so a test can keep a clone and
/// inspect what a session did through its boxed driver.
#[derive(Debug, Clone)]
pub struct FakePage {
    state: Arc<Mutex<PageState>>,
}

impl Default for FakePage {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePage {
    /// Every selector resolves to a ready element; the page is loaded with 200.
    pub fn new() -> Self {
        Self::from_setup(PageSetup {
            default_state: ElementState::Ready,
            elements: HashMap::new(),
            snapshot: form(Vec::new()),
            load: LoadState {
                ready_state: "complete".into(),
                resource_count: 4,
                status: Some(200),
            },
            goto_delay: None,
            screenshot_delay: None,
            fail_goto: false,
        })
    }

    fn from_setup(setup: PageSetup) -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                setup,
                calls: Vec::new(),
                closes: 0,
                screenshots: Vec::new(),
            })),
        }
    }

    /// A new page with the same setup and no history.
    pub fn fork(&self) -> Self {
        let setup = self.state.lock().unwrap().setup.clone();
        Self::from_setup(setup)
    }

    pub fn with_form(self, elements: Vec<Value>) -> Self {
        self.state.lock().unwrap().setup.snapshot = form(elements);
        self
    }

    pub fn with_element(self, selector: &str, state: ElementState) -> Self {
        self.set_element(selector, state);
        self
    }

    pub fn set_element(&self, selector: &str, state: ElementState) {
        self.state
            .lock()
            .unwrap()
            .setup
            .elements
            .insert(selector.to_string(), state);
    }

    pub fn with_load(self, ready_state: &str, status: Option<u16>) -> Self {
        {
            let mut guard = self.state.lock().unwrap();
            guard.setup.load.ready_state = ready_state.to_string();
            guard.setup.load.status = status;
            guard.setup.snapshot.ready_state = ready_state.to_string();
        }
        self
    }

    pub fn with_goto_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().setup.goto_delay = Some(delay);
        self
    }

    pub fn with_screenshot_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().setup.screenshot_delay = Some(delay);
        self
    }

    pub fn failing_goto(self) -> Self {
        self.state.lock().unwrap().setup.fail_goto = true;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn closes(&self) -> usize {
        self.state.lock().unwrap().closes
    }

    pub fn screenshots(&self) -> Vec<PathBuf> {
        self.state.lock().unwrap().screenshots.clone()
    }

    /// URL of the first navigation, if any.
    pub fn visited(&self) -> Option<String> {
        self.calls()
            .into_iter()
            .find(|c| c.kind == "navigate")
            .map(|c| c.value)
    }

    fn element(&self, selector: &str) -> ElementState {
        let guard = self.state.lock().unwrap();
        guard
            .setup
            .elements
            .get(selector)
            .copied()
            .unwrap_or(guard.setup.default_state)
    }

    fn push(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn goto(&mut self, url: &str) -> Result<()> {
        let (delay, fail) = {
            let guard = self.state.lock().unwrap();
            (guard.setup.goto_delay, guard.setup.fail_goto)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".into(),
            });
        }
        self.push(Call::new("navigate", "", url));
        Ok(())
    }

    async fn load_state(&mut self) -> Result<LoadState> {
        Ok(self.state.lock().unwrap().setup.load.clone())
    }

    async fn probe(&mut self, selector: &str) -> Result<ElementState> {
        Ok(self.element(selector))
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<()> {
        self.push(Call::new("fill", selector, value));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        self.push(Call::new("click", selector, ""));
        Ok(())
    }

    async fn select(&mut self, selector: &str, values: &[String]) -> Result<()> {
        self.push(Call::new("select", selector, values.join(",")));
        Ok(())
    }

    async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<()> {
        self.push(Call::new("check", selector, checked.to_string()));
        Ok(())
    }

    async fn upload(&mut self, selector: &str, path: &Path) -> Result<()> {
        self.push(Call::new("upload", selector, path.to_string_lossy()));
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<DomSnapshot> {
        Ok(self.state.lock().unwrap().setup.snapshot.clone())
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let delay = self.state.lock().unwrap().setup.screenshot_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.state
            .lock()
            .unwrap()
            .screenshots
            .push(path.to_path_buf());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.state.lock().unwrap().closes += 1;
        Ok(())
    }
}

/// Hands out a fresh fork of `template` per launch and keeps every page it
/// launched for inspection.
pub struct FakeLauncher {
    template: FakePage,
    launched: Mutex<Vec<FakePage>>,
    fail: bool,
}

impl FakeLauncher {
    pub fn new(template: FakePage) -> Self {
        Self {
            template,
            launched: Mutex::new(Vec::new()),
            fail: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(FakePage::new())
        }
    }

    pub fn launched(&self) -> Vec<FakePage> {
        self.launched.lock().unwrap().clone()
    }

    pub fn only_page(&self) -> FakePage {
        let pages = self.launched();
        assert_eq!(pages.len(), 1, "expected exactly one launched page");
        pages[0].clone()
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        if self.fail {
            return Err(Error::Start("no browser available".into()));
        }
        let page = self.template.fork();
        self.launched.lock().unwrap().push(page.clone());
        Ok(Box::new(page))
    }
}

/// Answers keyed by field label. Unknown labels get `fallback`.
pub struct ScriptedGenerator {
    answers: HashMap<String, std::result::Result<String, GenerationError>>,
    fallback: std::result::Result<String, GenerationError>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            answers: HashMap::new(),
            fallback: Err(GenerationError::Rejected("no scripted answer".into())),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn answer(mut self, label: &str, text: &str) -> Self {
        self.answers.insert(label.to_string(), Ok(text.to_string()));
        self
    }

    pub fn fail(mut self, label: &str, error: GenerationError) -> Self {
        self.answers.insert(label.to_string(), Err(error));
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(&self, context: &PromptContext) -> std::result::Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let label = context.field.label.clone().unwrap_or_default();
        self.answers
            .get(&label)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    applications: Mutex<Vec<ApplicationRecord>>,
    logs: Mutex<HashMap<Uuid, ActionLog>>,
    saved_log_ids: Mutex<Vec<Uuid>>,
}

impl MemoryStore {
    pub fn applications(&self) -> Vec<ApplicationRecord> {
        self.applications.lock().unwrap().clone()
    }

    pub fn log(&self, id: Uuid) -> Option<ActionLog> {
        self.logs.lock().unwrap().get(&id).cloned()
    }

    pub fn logs(&self) -> Vec<ActionLog> {
        let ids = self.saved_log_ids.lock().unwrap().clone();
        ids.into_iter().filter_map(|id| self.log(id)).collect()
    }
}

#[async_trait]
impl ApplicationStore for MemoryStore {
    async fn save_application(&self, record: &ApplicationRecord) -> Result<()> {
        let mut apps = self.applications.lock().unwrap();
        apps.retain(|a| a.id != record.id);
        apps.push(record.clone());
        Ok(())
    }

    async fn load_application(&self, id: Uuid) -> Result<ApplicationRecord> {
        self.applications
            .lock()
            .unwrap()
            .iter()
            .find(|a| a.id == id)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }

    async fn list_applications(&self) -> Result<Vec<ApplicationSummary>> {
        let mut summaries: Vec<_> = self
            .applications
            .lock()
            .unwrap()
            .iter()
            .map(ApplicationSummary::from)
            .collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }
}

#[async_trait]
impl LogStore for MemoryStore {
    async fn save_log(&self, log: &ActionLog) -> Result<PathBuf> {
        self.logs.lock().unwrap().insert(log.id(), log.clone());
        self.saved_log_ids.lock().unwrap().push(log.id());
        Ok(PathBuf::from(format!("memory/{}.json", log.id())))
    }

    async fn load_log(&self, handle: &Path) -> Result<ActionLog> {
        let id = handle
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
            .ok_or_else(|| Error::UnknownSession(handle.display().to_string()))?;
        self.log(id)
            .ok_or_else(|| Error::UnknownSession(id.to_string()))
    }
}

/// Short waits so tests under real time stay fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        navigation_timeout: Duration::from_secs(5),
        element_timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        network_idle_window: Duration::from_millis(20),
        replay_delay: Duration::ZERO,
        data_dir: std::env::temp_dir().join("apply-agent-tests"),
        ..EngineConfig::default()
    }
}

pub fn form(elements: Vec<Value>) -> DomSnapshot {
    DomSnapshot {
        url: "https://jobs.example/apply".into(),
        ready_state: "complete".into(),
        elements,
    }
}

pub fn text_input(id: &str, label: &str, required: bool) -> Value {
    json!({
        "tag": "input",
        "type": "text",
        "id": id,
        "name": id,
        "label": label,
        "required": required,
    })
}

pub fn textarea(id: &str, label: &str, required: bool) -> Value {
    json!({
        "tag": "textarea",
        "type": "textarea",
        "id": id,
        "name": id,
        "label": label,
        "required": required,
    })
}

pub fn select(id: &str, label: &str, options: &[&str], required: bool) -> Value {
    let mut opts = vec![json!({ "value": "", "text": "Choose...", "selected": true })];
    opts.extend(
        options
            .iter()
            .map(|o| json!({ "value": o, "text": o, "selected": false })),
    );
    json!({
        "tag": "select",
        "type": "select",
        "id": id,
        "name": id,
        "label": label,
        "required": required,
        "options": opts,
    })
}

pub fn checkbox(id: &str, label: &str) -> Value {
    json!({
        "tag": "input",
        "type": "checkbox",
        "id": id,
        "name": id,
        "label": label,
    })
}

/// Collected fields of the standard test application form.
pub fn application_form() -> Vec<Value> {
    vec![
        text_input("full_name", "Full Name", true),
        text_input("email", "Email Address", true),
        textarea("cover_letter", "Cover Letter", false),
        select("relocate", "Willing to relocate?", &["Yes", "No"], true),
        checkbox("newsletter", "Subscribe to newsletter"),
    ]
}
