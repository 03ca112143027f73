use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::browser::ChromeLauncher;

/// The user-agent presented by launched browsers unless overridden.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/145.0.0.0 Safari/537.36";

/// Launch options for the chromium-backed page surface.
#[derive(Debug, Clone)]
pub struct BrowserConfig {
    pub headless: bool,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub chrome_path: Option<String>,
    pub user_agent: Option<String>,
    /// Upper bound for a single CDP round-trip (launch, page creation).
    pub default_timeout: Duration,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            viewport_width: 1280,
            viewport_height: 800,
            chrome_path: None,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            default_timeout: Duration::from_secs(30),
        }
    }
}

pub struct BrowserBuilder {
    config: BrowserConfig,
}

impl BrowserBuilder {
    pub fn new() -> Self {
        Self {
            config: BrowserConfig::default(),
        }
    }

    pub fn headless(mut self, headless: bool) -> Self {
        self.config.headless = headless;
        self
    }

    pub fn viewport(mut self, width: u32, height: u32) -> Self {
        self.config.viewport_width = width;
        self.config.viewport_height = height;
        self
    }

    pub fn chrome_path(mut self, path: impl Into<String>) -> Self {
        self.config.chrome_path = Some(path.into());
        self
    }

    /// Override the user-agent. `None` keeps chromium's own.
    pub fn user_agent(mut self, user_agent: Option<String>) -> Self {
        self.config.user_agent = user_agent;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout = timeout;
        self
    }

    pub fn build_config(self) -> BrowserConfig {
        self.config
    }

    /// Finish into a launcher that starts one browser per session.
    pub fn build(self) -> ChromeLauncher {
        ChromeLauncher::new(self.build_config())
    }
}

impl Default for BrowserBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Backoff schedule for transient generation-service failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Zero behaves like one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    pub fn backoff_after(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1).saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            multiplier: 2,
            max_backoff: Duration::from_secs(5),
        }
    }
}

/// Timeouts and knobs shared by sessions, replay and resolution.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub navigation_timeout: Duration,
    pub element_timeout: Duration,
    pub poll_interval: Duration,
    /// How long the resource count must stay unchanged to call the page idle.
    pub network_idle_window: Duration,
    pub replay_delay: Duration,
    /// Upper bound on prior examples passed to the generation service.
    pub max_examples: usize,
    pub generation_timeout: Duration,
    pub retry: RetryPolicy,
    pub data_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            navigation_timeout: Duration::from_secs(60),
            element_timeout: Duration::from_secs(10),
            poll_interval: Duration::from_millis(100),
            network_idle_window: Duration::from_millis(500),
            replay_delay: Duration::from_millis(500),
            max_examples: 3,
            generation_timeout: Duration::from_secs(60),
            retry: RetryPolicy::default(),
            data_dir: PathBuf::from("data"),
        }
    }
}

const ENV_PREFIX: &str = "APPLY_AGENT_";

impl EngineConfig {
    /// Defaults overlaid with `APPLY_AGENT_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Apply overrides from an arbitrary key lookup. Keys are the suffixes
    /// after `APPLY_AGENT_`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse_var::<u64>(&lookup, "NAV_TIMEOUT_MS") {
            self.navigation_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "ELEMENT_TIMEOUT_MS") {
            self.element_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "REPLAY_DELAY_MS") {
            self.replay_delay = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var::<usize>(&lookup, "MAX_EXAMPLES") {
            self.max_examples = n;
        }
        if let Some(n) = parse_var::<u32>(&lookup, "GENERATION_RETRIES") {
            self.retry.max_attempts = n;
        }
        if let Some(dir) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn navigation_timeout(mut self, timeout: Duration) -> Self {
        self.navigation_timeout = timeout;
        self
    }

    pub fn element_timeout(mut self, timeout: Duration) -> Self {
        self.element_timeout = timeout;
        self
    }

    pub fn replay_delay(mut self, delay: Duration) -> Self {
        self.replay_delay = delay;
        self
    }

    pub fn max_examples(mut self, n: usize) -> Self {
        self.max_examples = n;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key = %format!("{ENV_PREFIX}{key}"), value = %raw, "ignoring unparsable config override");
            None
        }
    }
}
