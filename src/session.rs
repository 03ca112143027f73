use std::future::Future;
use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::action::{Action, ActionLog};
use crate::config::EngineConfig;
use crate::dom::DomSnapshot;
use crate::driver::{ElementState, Launcher, PageDriver};
use crate::error::{Error, Result};
use crate::recorder::ActionRecorder;

/// Result of a navigation that committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavOutcome {
    pub url: String,
    pub status: Option<u16>,
    /// False when the deadline hit before the network went quiet.
    pub network_idle: bool,
}

impl NavOutcome {
    /// 2xx/3xx, or no status reported by the surface.
    pub fn is_success(&self) -> bool {
        self.status.map_or(true, |s| (200..400).contains(&s))
    }
}

#[derive(Debug, Clone, Copy)]
struct Timeouts {
    navigation: Duration,
    element: Duration,
    poll_interval: Duration,
    idle_window: Duration,
}

impl From<&EngineConfig> for Timeouts {
    fn from(config: &EngineConfig) -> Self {
        Self {
            navigation: config.navigation_timeout,
            element: config.element_timeout,
            poll_interval: config.poll_interval,
            idle_window: config.network_idle_window,
        }
    }
}

/// Race `fut` against cancellation of the run.
async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Error::Cancelled),
        result = fut => result,
    }
}

async fn dispatch(driver: &mut dyn PageDriver, action: &Action) -> Result<()> {
    match action {
        Action::Navigate { url } => driver.goto(url).await,
        Action::Fill { selector, value } => driver.fill(selector, value).await,
        Action::Click { selector } => driver.click(selector).await,
        Action::Select { selector, options } => driver.select(selector, options).await,
        Action::Check { selector, checked } => driver.set_checked(selector, *checked).await,
        Action::Upload {
            selector,
            file_path,
        } => driver.upload(selector, file_path).await,
    }
}

/// Exclusive owner of one page surface for the length of one run.
///
/// Every method takes `&mut self`, so calls against a session are serialized
/// by construction. Page-mutating calls that succeed while a recording is
/// active are appended to the recording in execution order.
pub struct RemoteControlSession {
    id: Uuid,
    driver: Box<dyn PageDriver>,
    timeouts: Timeouts,
    recorder: ActionRecorder,
    cancel: CancellationToken,
    abandoned_log: Option<ActionLog>,
    closed: bool,
}

impl RemoteControlSession {
    /// Launch a new surface. Cancelling `cancel` aborts any wait in progress.
    pub async fn start(
        launcher: &dyn Launcher,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let driver = cancellable(&cancel, launcher.launch())
            .await
            .map_err(|e| match e {
                Error::Start(_) | Error::Cancelled => e,
                other => Error::Start(other.to_string()),
            })?;
        Ok(Self::with_driver(driver, config, cancel))
    }

    /// Wrap an already launched driver.
    pub fn with_driver(
        driver: Box<dyn PageDriver>,
        config: &EngineConfig,
        cancel: CancellationToken,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(session = %id, "session started");
        Self {
            id,
            driver,
            timeouts: Timeouts::from(config),
            recorder: ActionRecorder::new(),
            cancel,
            abandoned_log: None,
            closed: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn navigation_timeout(&self) -> Duration {
        self.timeouts.navigation
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    // ── Navigation ──────────────────────────────────────────────────

    /// Navigate and wait until the network is idle or `timeout` elapses,
    /// whichever comes first. A document still loading at the deadline is a
    /// timeout; an error status is reported in the outcome, not as an error.
    pub async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<NavOutcome> {
        self.ensure_open()?;
        let started = Instant::now();
        let deadline = started + timeout;
        debug!(session = %self.id, url, "navigate");

        let commit = tokio::time::timeout_at(deadline, self.driver.goto(url));
        match cancellable(&self.cancel, async {
            commit.await.map_err(|_| Error::NavigationTimeout {
                url: url.to_string(),
                timeout,
            })?
        })
        .await
        {
            Ok(()) => {}
            Err(e) => {
                warn!(session = %self.id, url, error = %e, "navigation failed");
                return Err(e);
            }
        }

        let outcome = self.wait_for_idle(url, timeout, deadline).await?;
        if !outcome.is_success() {
            warn!(session = %self.id, url, status = ?outcome.status, "navigation returned error status");
        }
        info!(
            session = %self.id,
            url,
            status = ?outcome.status,
            idle = outcome.network_idle,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "navigated"
        );
        self.recorder.record(Action::Navigate {
            url: url.to_string(),
        });
        Ok(outcome)
    }

    async fn wait_for_idle(
        &mut self,
        url: &str,
        timeout: Duration,
        deadline: Instant,
    ) -> Result<NavOutcome> {
        let mut last_count: Option<u64> = None;
        let mut quiet_since = Instant::now();

        loop {
            let state = cancellable(&self.cancel, self.driver.load_state()).await?;
            let now = Instant::now();

            if state.is_complete() {
                if last_count == Some(state.resource_count) {
                    if now.duration_since(quiet_since) >= self.timeouts.idle_window {
                        return Ok(NavOutcome {
                            url: url.to_string(),
                            status: state.status,
                            network_idle: true,
                        });
                    }
                } else {
                    last_count = Some(state.resource_count);
                    quiet_since = now;
                }
            }

            if now >= deadline {
                if state.ready_state == "loading" {
                    return Err(Error::NavigationTimeout {
                        url: url.to_string(),
                        timeout,
                    });
                }
                debug!(session = %self.id, url, "network not idle before deadline");
                return Ok(NavOutcome {
                    url: url.to_string(),
                    status: state.status,
                    network_idle: false,
                });
            }

            let nap = self.timeouts.poll_interval.min(deadline - now);
            cancellable(&self.cancel, async {
                tokio::time::sleep(nap).await;
                Ok(())
            })
            .await?;
        }
    }

    // ── Element actions ─────────────────────────────────────────────

    /// Replace the value of a text-like input.
    pub async fn fill(&mut self, selector: &str, value: &str) -> Result<()> {
        self.interact(Action::Fill {
            selector: selector.to_string(),
            value: value.to_string(),
        })
        .await
    }

    pub async fn click(&mut self, selector: &str) -> Result<()> {
        self.interact(Action::Click {
            selector: selector.to_string(),
        })
        .await
    }

    /// Select one or more `<option>` values.
    pub async fn select(&mut self, selector: &str, options: &[String]) -> Result<()> {
        self.interact(Action::Select {
            selector: selector.to_string(),
            options: options.to_vec(),
        })
        .await
    }

    pub async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<()> {
        self.interact(Action::Check {
            selector: selector.to_string(),
            checked,
        })
        .await
    }

    /// File inputs are often visually hidden behind a styled button, so an
    /// upload only requires the input to be attached and enabled.
    pub async fn upload_file(&mut self, selector: &str, path: &Path) -> Result<()> {
        self.interact(Action::Upload {
            selector: selector.to_string(),
            file_path: path.to_path_buf(),
        })
        .await
    }

    /// Issue any recorded action through the matching primitive.
    pub async fn perform(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::Navigate { url } => {
                let timeout = self.timeouts.navigation;
                self.navigate(url, timeout).await.map(|_| ())
            }
            _ => self.interact(action.clone()).await,
        }
    }

    async fn interact(&mut self, action: Action) -> Result<()> {
        self.ensure_open()?;
        let selector = action.selector().unwrap_or_default().to_string();
        let require_visible = !matches!(action, Action::Upload { .. });
        let started = Instant::now();

        let result = match self.wait_for(&selector, require_visible).await {
            Ok(()) => {
                let cancel = self.cancel.clone();
                cancellable(&cancel, dispatch(self.driver.as_mut(), &action)).await
            }
            Err(e) => Err(e),
        };

        match &result {
            Ok(()) => {
                debug!(
                    session = %self.id,
                    kind = action.kind(),
                    selector = %selector,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "action done"
                );
                self.recorder.record(action);
            }
            Err(e) => {
                warn!(session = %self.id, kind = action.kind(), selector = %selector, error = %e, "action failed");
            }
        }
        result
    }

    /// Poll until `selector` resolves to exactly one usable element.
    async fn wait_for(&mut self, selector: &str, require_visible: bool) -> Result<()> {
        let deadline = Instant::now() + self.timeouts.element;
        loop {
            let state = cancellable(&self.cancel, self.driver.probe(selector)).await?;
            match state {
                ElementState::Ready => return Ok(()),
                ElementState::Hidden if !require_visible => return Ok(()),
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                let selector = selector.to_string();
                return Err(match state {
                    ElementState::Missing | ElementState::Ambiguous => {
                        Error::ElementNotFound { selector }
                    }
                    _ => Error::ElementNotInteractable { selector },
                });
            }

            let nap = self.timeouts.poll_interval.min(deadline - now);
            cancellable(&self.cancel, async {
                tokio::time::sleep(nap).await;
                Ok(())
            })
            .await?;
        }
    }

    // ── Observation ─────────────────────────────────────────────────

    /// Capture the form-relevant DOM. Fails with `PageNotReady` when the page
    /// cannot be queried or is still loading.
    pub async fn extract_dom(&mut self) -> Result<DomSnapshot> {
        self.ensure_open()?;
        let snapshot = cancellable(&self.cancel, self.driver.snapshot())
            .await
            .map_err(|e| match e {
                Error::Cancelled => e,
                other => Error::PageNotReady(other.to_string()),
            })?;
        if !snapshot.is_settled() {
            return Err(Error::PageNotReady(format!(
                "document is still {}",
                snapshot.ready_state
            )));
        }
        debug!(session = %self.id, elements = snapshot.elements.len(), "dom extracted");
        Ok(snapshot)
    }

    pub async fn screenshot(&mut self, path: &Path) -> Result<()> {
        if self.closed {
            return Err(Error::SessionClosed);
        }
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let limit = self.timeouts.element;
        let driver = self.driver.as_mut();
        let capture = async move {
            tokio::time::timeout(limit, driver.screenshot(path))
                .await
                .map_err(|_| Error::ScreenshotError(format!("timed out after {limit:?}")))?
        };
        cancellable(&self.cancel, capture).await?;
        info!(session = %self.id, path = %path.display(), "screenshot saved");
        Ok(())
    }

    // ── Recording ───────────────────────────────────────────────────

    pub fn start_recording(&mut self) -> Result<()> {
        self.ensure_open()?;
        self.recorder.start()
    }

    pub fn stop_recording(&mut self) -> Result<ActionLog> {
        self.recorder.stop()
    }

    /// Finalize an active recording as `Cancelled`.
    pub fn cancel_recording(&mut self) -> Option<ActionLog> {
        self.recorder.cancel()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// A recording that was still active when the session closed.
    pub fn take_abandoned_log(&mut self) -> Option<ActionLog> {
        self.abandoned_log.take()
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    /// Release the surface. Safe to call repeatedly and after failures; the
    /// driver is closed exactly once.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            debug!(session = %self.id, "close on closed session ignored");
            return Ok(());
        }
        self.closed = true;
        if let Some(log) = self.recorder.cancel() {
            warn!(session = %self.id, actions = log.len(), "closing while recording; log marked cancelled");
            self.abandoned_log = Some(log);
        }
        let result = self.driver.close().await;
        match &result {
            Ok(()) => info!(session = %self.id, "session closed"),
            Err(e) => warn!(session = %self.id, error = %e, "session closed with errors"),
        }
        result
    }
}

impl Drop for RemoteControlSession {
    fn drop(&mut self) {
        if !self.closed {
            warn!(session = %self.id, "session dropped without close");
        }
    }
}
