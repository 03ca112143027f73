use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CrBrowser, BrowserConfig as CrBrowserConfig};
use chromiumoxide::handler::viewport::Viewport;
use futures::StreamExt;
use tracing::{debug, info};

use crate::config::{BrowserBuilder, BrowserConfig};
use crate::driver::{Launcher, PageDriver};
use crate::error::{Error, Result};
use crate::page::ChromePage;

/// Chrome flags that improve performance without affecting functionality.
const PERF_ARGS: &[&str] = &[
    "disable-gpu",
    "disable-extensions",
    "metrics-recording-only",
    "mute-audio",
    "no-default-browser-check",
    "no-first-run",
    "disable-client-side-phishing-detection",
    "disable-prompt-on-repost",
];

/// Launches one chromium process per session.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    config: BrowserConfig,
}

impl ChromeLauncher {
    pub fn new(config: BrowserConfig) -> Self {
        Self { config }
    }

    pub fn builder() -> BrowserBuilder {
        BrowserBuilder::new()
    }

    fn chromium_config(&self) -> Result<CrBrowserConfig> {
        let config = &self.config;
        let mut builder = CrBrowserConfig::builder();

        if config.headless {
            builder = builder.new_headless_mode().no_sandbox();
        } else {
            builder = builder.with_head().no_sandbox();
        }

        for arg in PERF_ARGS {
            builder = builder.arg(*arg);
        }

        // chromiumoxide adds the `--` prefix itself
        if let Some(ref ua) = config.user_agent {
            builder = builder.arg(("user-agent", ua.as_str()));
        }

        if let Some(ref path) = config.chrome_path {
            builder = builder.chrome_executable(path);
        }

        builder = builder.viewport(Viewport {
            width: config.viewport_width,
            height: config.viewport_height,
            device_scale_factor: None,
            emulating_mobile: false,
            is_landscape: false,
            has_touch: false,
        });

        builder.build().map_err(Error::Start)
    }
}

#[async_trait]
impl Launcher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn PageDriver>> {
        let cr_config = self.chromium_config()?;
        let timeout = self.config.default_timeout;

        let (browser, mut handler) = tokio::time::timeout(timeout, CrBrowser::launch(cr_config))
            .await
            .map_err(|_| Error::Start(format!("browser did not start within {timeout:?}")))?
            .map_err(|e| Error::Start(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!(error = %e, "cdp handler event error");
                }
            }
        });

        let page = match tokio::time::timeout(timeout, browser.new_page("about:blank")).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => {
                handler_task.abort();
                return Err(Error::Start(e.to_string()));
            }
            Err(_) => {
                handler_task.abort();
                return Err(Error::Start(format!("page did not open within {timeout:?}")));
            }
        };

        info!(headless = self.config.headless, "browser launched");
        Ok(Box::new(ChromePage::new(browser, page, handler_task)))
    }
}
