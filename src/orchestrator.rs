use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::action::ActionLog;
use crate::application::{ApplicationRecord, ApplicationStatus, ResolvedField};
use crate::config::EngineConfig;
use crate::driver::Launcher;
use crate::error::{Error, Result};
use crate::generation::TextGenerator;
use crate::profile::{HistoryStore, JobPosting, Profile};
use crate::replay::{ActionReplayer, ReplayReport};
use crate::resolver::{FieldValueResolver, ResolutionContext};
use crate::schema::{extract_fields, FieldDescriptor, FieldKind};
use crate::session::RemoteControlSession;
use crate::store::{ApplicationStore, JsonStore, LogStore};

pub use crate::application::Stage;

/// Identifies one learning session or one application run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionHandle(Uuid);

impl SessionHandle {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Progress of one Apply run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Extracting,
    Resolving,
    Filling,
    Recording,
    Completed,
    Cancelled,
    Failed { stage: Stage, cause: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Completed | RunState::Cancelled | RunState::Failed { .. }
        )
    }

    /// The stage a failure raised in this state is attributed to.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            RunState::Idle => Some(Stage::Starting),
            RunState::Extracting => Some(Stage::Extracting),
            RunState::Resolving => Some(Stage::Resolving),
            RunState::Filling => Some(Stage::Filling),
            RunState::Recording => Some(Stage::Recording),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &RunState) -> bool {
        use RunState::*;
        match (self, next) {
            (from, Cancelled | Failed { .. }) => !from.is_terminal(),
            (Idle, Extracting)
            | (Extracting, Resolving)
            | (Resolving, Filling)
            | (Filling, Recording)
            | (Filling, Completed)
            | (Recording, Completed) => true,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Idle => f.write_str("idle"),
            RunState::Extracting => f.write_str("extracting"),
            RunState::Resolving => f.write_str("resolving"),
            RunState::Filling => f.write_str("filling"),
            RunState::Recording => f.write_str("recording"),
            RunState::Completed => f.write_str("completed"),
            RunState::Cancelled => f.write_str("cancelled"),
            RunState::Failed { stage, cause } => write!(f, "failed while {stage}: {cause}"),
        }
    }
}

/// Inputs of one Apply run. Profile and history are shared snapshots and are
/// never mutated by the run.
#[derive(Clone)]
pub struct RunRequest {
    pub url: String,
    pub job: JobPosting,
    pub profile: Arc<Profile>,
    pub history: Arc<dyn HistoryStore>,
    /// Record the fills into an `ActionLog`.
    pub record: bool,
}

impl RunRequest {
    pub fn new(
        url: impl Into<String>,
        job: JobPosting,
        profile: Arc<Profile>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            url: url.into(),
            job,
            profile,
            history,
            record: false,
        }
    }

    pub fn record(mut self, record: bool) -> Self {
        self.record = record;
        self
    }
}

/// A run started in the background.
pub struct RunHandle {
    handle: SessionHandle,
    task: JoinHandle<Result<ApplicationRecord>>,
}

impl RunHandle {
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    pub async fn join(self) -> Result<ApplicationRecord> {
        self.task
            .await
            .map_err(|e| Error::TaskFailed(e.to_string()))?
    }
}

struct LearningSession {
    session: RemoteControlSession,
    url: String,
    job: JobPosting,
    fields: Vec<FieldDescriptor>,
    observed: Vec<ResolvedField>,
}

#[derive(Clone)]
struct LearningEntry {
    cancel: CancellationToken,
    session: Arc<tokio::sync::Mutex<LearningSession>>,
}

struct RunEntry {
    cancel: CancellationToken,
    state: RunState,
}

struct Inner {
    launcher: Arc<dyn Launcher>,
    config: EngineConfig,
    resolver: FieldValueResolver,
    applications: Arc<dyn ApplicationStore>,
    logs: Arc<dyn LogStore>,
    learning: Mutex<HashMap<SessionHandle, LearningEntry>>,
    runs: Mutex<HashMap<SessionHandle, RunEntry>>,
}

/// Entry point for the Learn and Apply workflows.
///
/// Cheap to clone. Every learning session and every run owns its own
/// `RemoteControlSession`; handles are the only thing shared between calls.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

impl Engine {
    pub fn new(
        launcher: Arc<dyn Launcher>,
        generator: Arc<dyn TextGenerator>,
        applications: Arc<dyn ApplicationStore>,
        logs: Arc<dyn LogStore>,
        config: EngineConfig,
    ) -> Self {
        let resolver = FieldValueResolver::new(generator, &config);
        Self {
            inner: Arc::new(Inner {
                launcher,
                config,
                resolver,
                applications,
                logs,
                learning: Mutex::new(HashMap::new()),
                runs: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Persist applications and logs as JSON under `config.data_dir`.
    pub fn with_json_store(
        launcher: Arc<dyn Launcher>,
        generator: Arc<dyn TextGenerator>,
        config: EngineConfig,
    ) -> Self {
        let store = Arc::new(JsonStore::new(&config.data_dir));
        Self::new(launcher, generator, store.clone(), store, config)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    fn learning(&self) -> MutexGuard<'_, HashMap<SessionHandle, LearningEntry>> {
        self.inner
            .learning
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn runs(&self) -> MutexGuard<'_, HashMap<SessionHandle, RunEntry>> {
        self.inner.runs.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn learning_entry(&self, handle: SessionHandle) -> Result<LearningEntry> {
        self.learning()
            .get(&handle)
            .cloned()
            .ok_or_else(|| Error::UnknownSession(handle.to_string()))
    }

    /// Current state of a run, or `Recording` for a learning session.
    pub fn status(&self, handle: SessionHandle) -> Option<RunState> {
        if let Some(state) = self.runs().get(&handle).map(|r| r.state.clone()) {
            return Some(state);
        }
        self.learning()
            .contains_key(&handle)
            .then_some(RunState::Recording)
    }

    // ── Learn ───────────────────────────────────────────────────────

    /// Open `url` and start recording what the applicant enters.
    pub async fn start_learning_session(&self, url: &str, job: JobPosting) -> Result<SessionHandle> {
        let cancel = CancellationToken::new();
        let mut session =
            RemoteControlSession::start(self.inner.launcher.as_ref(), &self.inner.config, cancel.clone())
                .await?;

        let opened = match session.start_recording() {
            Ok(()) => open_form(&mut session, url, self.inner.config.navigation_timeout).await,
            Err(e) => Err(e),
        };
        let fields = match opened {
            Ok(fields) => fields,
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    warn!(url, error = %close_err, "close after failed learning start");
                }
                return Err(e);
            }
        };

        let handle = SessionHandle::new();
        info!(handle = %handle, url, fields = fields.len(), "learning session started");
        let entry = LearningEntry {
            cancel,
            session: Arc::new(tokio::sync::Mutex::new(LearningSession {
                session,
                url: url.to_string(),
                job,
                fields,
                observed: Vec::new(),
            })),
        };
        self.learning().insert(handle, entry);
        Ok(handle)
    }

    /// The form fields found when the learning session opened its page.
    pub async fn learning_fields(&self, handle: SessionHandle) -> Result<Vec<FieldDescriptor>> {
        let entry = self.learning_entry(handle)?;
        let learning = entry.session.lock().await;
        Ok(learning.fields.clone())
    }

    /// Enter the applicant's value through the session so it lands in the
    /// recording, and remember it for the observed record.
    pub async fn record_field(
        &self,
        handle: SessionHandle,
        descriptor: FieldDescriptor,
        observed_value: &str,
    ) -> Result<()> {
        let entry = self.learning_entry(handle)?;
        let mut guard = entry.session.lock().await;
        let learning = &mut *guard;

        apply_value(&mut learning.session, &descriptor, observed_value).await?;
        info!(handle = %handle, field = %descriptor.id, kind = ?descriptor.kind, "recorded field");
        learning.observed.push(ResolvedField {
            descriptor,
            value: observed_value.to_string(),
            resolution: None,
            applied: true,
        });
        Ok(())
    }

    /// Finalize the recording, close the session and persist both the log and
    /// an `Observed` application record.
    pub async fn finish_learning_session(&self, handle: SessionHandle) -> Result<ActionLog> {
        let entry = self
            .learning()
            .remove(&handle)
            .ok_or_else(|| Error::UnknownSession(handle.to_string()))?;
        let mut guard = entry.session.lock().await;
        let learning = &mut *guard;

        let stopped = learning.session.stop_recording();
        if let Err(e) = learning.session.close().await {
            warn!(handle = %handle, error = %e, "close after learning failed");
        }
        let log = stopped?;

        let mut record = ApplicationRecord::new(learning.job.clone(), learning.url.clone());
        record.fields = std::mem::take(&mut learning.observed);
        record.log_id = Some(log.id());
        info!(handle = %handle, actions = log.len(), fields = record.fields.len(), "learning session finished");
        self.persist(&record, Some(&log)).await;
        Ok(log)
    }

    // ── Apply ───────────────────────────────────────────────────────

    /// Run the Apply workflow to a terminal state.
    ///
    /// Only a failure to obtain a session is returned as `Err`; every other
    /// outcome, failures included, is reported in the returned record.
    pub async fn run_application(&self, req: RunRequest) -> Result<ApplicationRecord> {
        let handle = SessionHandle::new();
        let cancel = self.register_run(handle);
        self.execute(handle, cancel, req).await
    }

    /// Like [`Engine::run_application`], but on a background task so that it
    /// can be cancelled through the returned handle.
    pub fn start_application(&self, req: RunRequest) -> RunHandle {
        let handle = SessionHandle::new();
        let cancel = self.register_run(handle);
        let engine = self.clone();
        let task = tokio::spawn(async move { engine.execute(handle, cancel, req).await });
        RunHandle { handle, task }
    }

    fn register_run(&self, handle: SessionHandle) -> CancellationToken {
        let cancel = CancellationToken::new();
        self.runs().insert(
            handle,
            RunEntry {
                cancel: cancel.clone(),
                state: RunState::Idle,
            },
        );
        cancel
    }

    async fn execute(
        &self,
        handle: SessionHandle,
        cancel: CancellationToken,
        req: RunRequest,
    ) -> Result<ApplicationRecord> {
        let result = self.run_to_end(handle, &cancel, req).await;
        self.runs().remove(&handle);
        result
    }

    fn advance(&self, handle: SessionHandle, state: &mut RunState, next: RunState) {
        if !state.can_transition_to(&next) {
            warn!(handle = %handle, from = %state, to = %next, "ignoring invalid run transition");
            return;
        }
        info!(handle = %handle, from = %state, to = %next, "run state changed");
        if let Some(entry) = self.runs().get_mut(&handle) {
            entry.state = next.clone();
        }
        *state = next;
    }

    async fn run_to_end(
        &self,
        handle: SessionHandle,
        cancel: &CancellationToken,
        req: RunRequest,
    ) -> Result<ApplicationRecord> {
        let mut state = RunState::Idle;
        let mut record = ApplicationRecord::new(req.job.clone(), req.url.clone());

        let mut session = match RemoteControlSession::start(
            self.inner.launcher.as_ref(),
            &self.inner.config,
            cancel.clone(),
        )
        .await
        {
            Ok(session) => session,
            Err(Error::Cancelled) => {
                self.advance(handle, &mut state, RunState::Cancelled);
                record.set_status(ApplicationStatus::Cancelled);
                self.persist(&record, None).await;
                return Ok(record);
            }
            Err(e) => {
                let failed = RunState::Failed {
                    stage: Stage::Starting,
                    cause: e.to_string(),
                };
                self.advance(handle, &mut state, failed);
                return Err(e);
            }
        };

        let outcome = self
            .drive(handle, &mut state, &mut session, &req, &mut record, cancel)
            .await;

        let log = match outcome {
            Ok(log) => {
                let status = if record.review_count() > 0 {
                    ApplicationStatus::NeedsReview
                } else {
                    ApplicationStatus::Completed
                };
                self.advance(handle, &mut state, RunState::Completed);
                record.set_status(status);
                log
            }
            Err(e) if matches!(e, Error::Cancelled) || cancel.is_cancelled() => {
                self.advance(handle, &mut state, RunState::Cancelled);
                record.set_status(ApplicationStatus::Cancelled);
                session.cancel_recording()
            }
            Err(e) => {
                let stage = state.stage().unwrap_or(Stage::Starting);
                error!(handle = %handle, stage = %stage, error = %e, "run failed");
                self.capture_failure(&mut session, &mut record).await;
                let cause = e.to_string();
                self.advance(
                    handle,
                    &mut state,
                    RunState::Failed {
                        stage,
                        cause: cause.clone(),
                    },
                );
                record.set_status(ApplicationStatus::Failed { stage, cause });
                session.cancel_recording()
            }
        };

        if let Err(e) = session.close().await {
            warn!(handle = %handle, error = %e, "close after run failed");
        }
        if let Some(log) = &log {
            record.log_id = Some(log.id());
        }
        self.persist(&record, log.as_ref()).await;
        Ok(record)
    }

    async fn drive(
        &self,
        handle: SessionHandle,
        state: &mut RunState,
        session: &mut RemoteControlSession,
        req: &RunRequest,
        record: &mut ApplicationRecord,
        cancel: &CancellationToken,
    ) -> Result<Option<ActionLog>> {
        if req.record {
            session.start_recording()?;
        }

        self.advance(handle, state, RunState::Extracting);
        let fields = open_form(session, &req.url, self.inner.config.navigation_timeout).await?;
        if fields.is_empty() {
            return Err(Error::NoFields(req.url.clone()));
        }
        info!(handle = %handle, fields = fields.len(), "form extracted");

        self.advance(handle, state, RunState::Resolving);
        let ctx = ResolutionContext {
            profile: req.profile.as_ref(),
            history: req.history.as_ref(),
            job: &req.job,
        };
        for field in fields {
            if field.disabled {
                debug!(handle = %handle, field = %field.id, "skipping disabled field");
                record.fields.push(ResolvedField {
                    value: field.current_value.clone(),
                    descriptor: field,
                    resolution: None,
                    applied: false,
                });
                continue;
            }
            let resolution = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                resolution = self.inner.resolver.resolve(&field, &ctx) => resolution,
            };
            record.fields.push(ResolvedField {
                value: resolution.value.clone(),
                descriptor: field,
                resolution: Some(resolution),
                applied: false,
            });
        }
        let blocking = record.fields.iter().find_map(|f| {
            let issue = f.resolution.as_ref()?.issue.as_ref()?;
            f.descriptor.required.then(|| Error::UnresolvedField {
                field: f.descriptor.id.clone(),
                reason: issue.to_string(),
            })
        });
        if let Some(e) = blocking {
            return Err(e);
        }

        self.advance(handle, state, RunState::Filling);
        for field in record.fields.iter_mut() {
            if field.descriptor.disabled || field.value.is_empty() {
                continue;
            }
            match apply_value(session, &field.descriptor, &field.value).await {
                Ok(()) => field.applied = true,
                Err(e) if e.is_session_fatal() || field.descriptor.required => return Err(e),
                Err(e) => {
                    warn!(handle = %handle, field = %field.descriptor.id, error = %e, "optional field skipped");
                }
            }
        }

        if !req.record {
            return Ok(None);
        }
        self.advance(handle, state, RunState::Recording);
        session.stop_recording().map(Some)
    }

    async fn capture_failure(&self, session: &mut RemoteControlSession, record: &mut ApplicationRecord) {
        let path = self
            .inner
            .config
            .data_dir
            .join("screenshots")
            .join(format!("{}.png", record.id));
        match session.screenshot(&path).await {
            Ok(()) => record.notes = Some(format!("failure screenshot: {}", path.display())),
            Err(e) => warn!(id = %record.id, error = %e, "failure screenshot not captured"),
        }
    }

    async fn persist(&self, record: &ApplicationRecord, log: Option<&ActionLog>) {
        if let Some(log) = log {
            if let Err(e) = self.inner.logs.save_log(log).await {
                error!(id = %log.id(), error = %e, "failed to save action log");
            }
        }
        if let Err(e) = self.inner.applications.save_application(record).await {
            error!(id = %record.id, error = %e, "failed to save application");
        }
    }

    // ── Control ─────────────────────────────────────────────────────

    /// Cancel a run or abandon a learning session.
    ///
    /// A run stops at its next suspension point and releases its own session.
    /// A learning session is closed here and its partial log persisted as
    /// `Cancelled`.
    pub async fn cancel(&self, handle: SessionHandle) -> Result<()> {
        let run = self.runs().get(&handle).map(|r| r.cancel.clone());
        if let Some(token) = run {
            info!(handle = %handle, "cancelling run");
            token.cancel();
            return Ok(());
        }

        let entry = self
            .learning()
            .remove(&handle)
            .ok_or_else(|| Error::UnknownSession(handle.to_string()))?;
        info!(handle = %handle, "cancelling learning session");
        entry.cancel.cancel();
        let mut learning = entry.session.lock().await;
        let partial = learning.session.cancel_recording();
        if let Err(e) = learning.session.close().await {
            warn!(handle = %handle, error = %e, "close after cancel failed");
        }
        if let Some(log) = partial {
            if let Err(e) = self.inner.logs.save_log(&log).await {
                error!(id = %log.id(), error = %e, "failed to save cancelled log");
            }
        }
        Ok(())
    }

    /// Replay a completed log on a fresh session.
    pub async fn replay_log(&self, log: &ActionLog) -> Result<ReplayReport> {
        if !log.is_complete() {
            return Err(Error::IncompleteLog(log.id()));
        }
        let mut session = RemoteControlSession::start(
            self.inner.launcher.as_ref(),
            &self.inner.config,
            CancellationToken::new(),
        )
        .await?;
        let result = ActionReplayer::from_config(&self.inner.config)
            .replay(log, &mut session)
            .await;
        if let Err(e) = session.close().await {
            warn!(log = %log.id(), error = %e, "close after replay failed");
        }
        result
    }
}

/// Navigate and extract. An error status is fatal here even though the
/// session itself only reports it.
async fn open_form(
    session: &mut RemoteControlSession,
    url: &str,
    timeout: Duration,
) -> Result<Vec<FieldDescriptor>> {
    let outcome = session.navigate(url, timeout).await?;
    if let Some(status) = outcome.status.filter(|_| !outcome.is_success()) {
        return Err(Error::Navigation {
            url: url.to_string(),
            reason: format!("HTTP status {status}"),
        });
    }
    let snapshot = session.extract_dom().await?;
    extract_fields(&snapshot)
}

fn is_checked(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "on" | "1" | "checked"
    )
}

/// Enter `value` through the session operation matching the field kind.
async fn apply_value(
    session: &mut RemoteControlSession,
    field: &FieldDescriptor,
    value: &str,
) -> Result<()> {
    match field.kind {
        FieldKind::Text | FieldKind::Textarea => session.fill(&field.selector, value).await,
        FieldKind::Select => session.select(&field.selector, &[value.to_string()]).await,
        FieldKind::Checkbox => session.set_checked(&field.selector, is_checked(value)).await,
        FieldKind::Radio => session.click(&field.option_selector(value)).await,
        FieldKind::File => session.upload_file(&field.selector, Path::new(value)).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_transitions_are_allowed() {
        let path = [
            RunState::Idle,
            RunState::Extracting,
            RunState::Resolving,
            RunState::Filling,
            RunState::Recording,
            RunState::Completed,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
        assert!(RunState::Filling.can_transition_to(&RunState::Completed));
    }

    #[test]
    fn terminal_states_are_final() {
        let failed = RunState::Failed {
            stage: Stage::Filling,
            cause: "boom".into(),
        };
        for terminal in [RunState::Completed, RunState::Cancelled, failed.clone()] {
            assert!(terminal.is_terminal());
            assert!(!terminal.can_transition_to(&RunState::Cancelled));
            assert!(!terminal.can_transition_to(&failed));
        }
    }

    #[test]
    fn cancel_and_fail_reachable_from_any_active_state() {
        for state in [
            RunState::Idle,
            RunState::Extracting,
            RunState::Resolving,
            RunState::Filling,
            RunState::Recording,
        ] {
            assert!(state.can_transition_to(&RunState::Cancelled));
            assert!(state.stage().is_some());
        }
        assert!(!RunState::Idle.can_transition_to(&RunState::Filling));
        assert!(!RunState::Resolving.can_transition_to(&RunState::Extracting));
    }

    #[test]
    fn checkbox_values() {
        assert!(is_checked("true"));
        assert!(is_checked(" Yes "));
        assert!(!is_checked("false"));
        assert!(!is_checked(""));
    }

    #[test]
    fn failed_state_display_names_stage() {
        let state = RunState::Failed {
            stage: Stage::Extracting,
            cause: "No fillable fields found on u".into(),
        };
        assert_eq!(state.to_string(), "failed while extracting: No fillable fields found on u");
    }
}
