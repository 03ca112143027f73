use std::path::Path;

use async_trait::async_trait;
use chromiumoxide::browser::Browser as CrBrowser;
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::Page as CrPage;
use chromiumoxide::page::ScreenshotParams;
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::dom::DomSnapshot;
use crate::driver::{ElementState, LoadState, PageDriver};
use crate::element::FormElement;
use crate::error::{Error, Result};

/// A chromium page plus the browser process that owns it.
pub struct ChromePage {
    browser: CrBrowser,
    inner: CrPage,
    handler_task: JoinHandle<()>,
}

impl ChromePage {
    pub(crate) fn new(browser: CrBrowser, inner: CrPage, handler_task: JoinHandle<()>) -> Self {
        Self {
            browser,
            inner,
            handler_task,
        }
    }

    async fn find_element(&self, selector: &str) -> Result<FormElement> {
        let el = self
            .inner
            .find_element(selector)
            .await
            .map_err(|_| Error::ElementNotFound {
                selector: selector.to_string(),
            })?;
        Ok(FormElement::new(el))
    }

    /// Evaluate an expression that returns `JSON.stringify(...)` and decode it.
    async fn evaluate_json<T: DeserializeOwned>(&self, js: String) -> Result<T> {
        let result = self
            .inner
            .evaluate(js)
            .await
            .map_err(|e| Error::JsError(e.to_string()))?;
        let json_str: String = result
            .into_value()
            .map_err(|e| Error::JsError(e.to_string()))?;
        Ok(serde_json::from_str(&json_str)?)
    }
}

fn js_string(s: &str) -> Result<String> {
    serde_json::to_string(s).map_err(|e| Error::JsError(e.to_string()))
}

const LOAD_STATE_JS: &str = r#"
    JSON.stringify((() => {
        const nav = performance.getEntriesByType('navigation')[0];
        return {
            ready_state: document.readyState,
            resource_count: performance.getEntriesByType('resource').length,
            status: nav && nav.responseStatus ? nav.responseStatus : null
        };
    })())
"#;

const SNAPSHOT_JS: &str = r#"
    JSON.stringify({
        url: location.href,
        ready_state: document.readyState,
        elements: Array.from(document.querySelectorAll('input, select, textarea')).map(el => {
            let label = null;
            if (el.id) {
                const labelEl = document.querySelector(`label[for="${CSS.escape(el.id)}"]`);
                if (labelEl) label = (labelEl.textContent || '').trim();
            }
            const tag = el.tagName.toLowerCase();
            return {
                tag: tag,
                type: tag === 'select' ? 'select' : (tag === 'textarea' ? 'textarea' : (el.type || 'text')),
                id: el.id || '',
                name: el.name || '',
                placeholder: el.placeholder || '',
                value: el.value || '',
                required: !!el.required,
                disabled: !!el.disabled,
                checked: !!el.checked,
                label: label,
                id_matches: el.id
                    ? document.querySelectorAll(`[id="${CSS.escape(el.id)}"]`).length
                    : 0,
                name_matches: el.name
                    ? document.querySelectorAll(`[name="${CSS.escape(el.name)}"]`).length
                    : 0,
                options: tag === 'select'
                    ? Array.from(el.options).map(o => ({
                        value: o.value,
                        text: (o.textContent || '').trim(),
                        selected: o.selected
                    }))
                    : []
            };
        })
    })
"#;

#[derive(serde::Deserialize)]
struct RawLoadState {
    ready_state: String,
    resource_count: u64,
    status: Option<u16>,
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn goto(&mut self, url: &str) -> Result<()> {
        self.inner
            .goto(url)
            .await
            .map_err(|e| Error::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        Ok(())
    }

    async fn load_state(&mut self) -> Result<LoadState> {
        let raw: RawLoadState = self.evaluate_json(LOAD_STATE_JS.to_string()).await?;
        Ok(LoadState {
            ready_state: raw.ready_state,
            resource_count: raw.resource_count,
            status: raw.status,
        })
    }

    async fn probe(&mut self, selector: &str) -> Result<ElementState> {
        let selector_js = js_string(selector)?;
        let js = format!(
            r#"
            JSON.stringify((() => {{
                let els;
                try {{ els = document.querySelectorAll({selector_js}); }} catch (e) {{ return 'missing'; }}
                if (els.length === 0) return 'missing';
                if (els.length > 1) return 'ambiguous';
                const el = els[0];
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                if (style.display === 'none' || style.visibility === 'hidden'
                    || (rect.width === 0 && rect.height === 0)) return 'hidden';
                if (el.disabled || el.readOnly) return 'disabled';
                return 'ready';
            }})())
            "#,
        );
        let state: String = self.evaluate_json(js).await?;
        Ok(match state.as_str() {
            "ambiguous" => ElementState::Ambiguous,
            "hidden" => ElementState::Hidden,
            "disabled" => ElementState::Disabled,
            "ready" => ElementState::Ready,
            _ => ElementState::Missing,
        })
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<()> {
        let selector_js = js_string(selector)?;
        let clear = format!(
            r#"
            (() => {{
                const el = document.querySelector({selector_js});
                if (!el) throw new Error('Element not found: ' + {selector_js});
                el.value = '';
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
            }})()
            "#,
        );
        self.inner
            .evaluate(clear)
            .await
            .map_err(|e| Error::JsError(e.to_string()))?;

        self.find_element(selector).await?.enter_text(value).await?;

        let commit = format!(
            r#"
            (() => {{
                const el = document.querySelector({selector_js});
                if (el) el.dispatchEvent(new Event('change', {{ bubbles: true }}));
            }})()
            "#,
        );
        self.inner
            .evaluate(commit)
            .await
            .map_err(|e| Error::JsError(e.to_string()))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<()> {
        let el = self.find_element(selector).await?;
        el.click().await
    }

    async fn select(&mut self, selector: &str, values: &[String]) -> Result<()> {
        let selector_js = js_string(selector)?;
        let values_js = serde_json::to_string(values)?;
        let js = format!(
            r#"
            JSON.stringify((() => {{
                const el = document.querySelector({selector_js});
                if (!el) throw new Error('Element not found: ' + {selector_js});
                const wanted = new Set({values_js});
                let matched = 0;
                for (const opt of el.options) {{
                    opt.selected = wanted.has(opt.value);
                    if (opt.selected) matched += 1;
                }}
                el.dispatchEvent(new Event('input', {{ bubbles: true }}));
                el.dispatchEvent(new Event('change', {{ bubbles: true }}));
                return matched;
            }})())
            "#,
        );
        let matched: usize = self.evaluate_json(js).await?;
        if matched < values.len() {
            return Err(Error::ValidationFailed {
                field: selector.to_string(),
                value: values.join(", "),
            });
        }
        Ok(())
    }

    async fn set_checked(&mut self, selector: &str, checked: bool) -> Result<()> {
        let selector_js = js_string(selector)?;
        let js = format!(
            r#"
            JSON.stringify((() => {{
                const el = document.querySelector({selector_js});
                if (!el) throw new Error('Element not found: ' + {selector_js});
                if (el.checked !== {checked}) el.click();
                return el.checked;
            }})())
            "#,
        );
        let now: bool = self.evaluate_json(js).await?;
        if now != checked {
            return Err(Error::ElementNotInteractable {
                selector: selector.to_string(),
            });
        }
        Ok(())
    }

    async fn upload(&mut self, selector: &str, path: &Path) -> Result<()> {
        let params = self.find_element(selector).await?.attach_file(path)?;
        self.inner.execute(params).await?;
        Ok(())
    }

    async fn snapshot(&mut self) -> Result<DomSnapshot> {
        self.evaluate_json(SNAPSHOT_JS.to_string()).await
    }

    async fn screenshot(&mut self, path: &Path) -> Result<()> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .full_page(true)
            .build();
        self.inner
            .save_screenshot(params, path)
            .await
            .map_err(|e| Error::ScreenshotError(e.to_string()))?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut first_err = None;

        if let Err(e) = self.inner.clone().close().await {
            warn!(error = %e, "failed to close page");
            first_err.get_or_insert(Error::CdpError(e));
        }
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "failed to close browser");
            first_err.get_or_insert(Error::CdpError(e));
        }
        if let Err(e) = self.browser.wait().await {
            first_err.get_or_insert(Error::IoError(e));
        }
        self.handler_task.abort();

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
