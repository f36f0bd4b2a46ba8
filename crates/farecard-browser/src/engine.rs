use crate::actions::{js_string, BrowserActions, LaneLauncher, WaitState};
use crate::error::{BrowserError, Result};
use crate::filter::{FilterDecision, ResourceFilter, ResourceKind};
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::CloseParams;
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams, EventRequestPaused, FailRequestParams, RequestPattern,
    RequestStage,
};
use chromiumoxide::cdp::browser_protocol::network::{ErrorReason, ResourceType};
use chromiumoxide::Page;
use farecard_core::AppConfig;
use futures_util::stream::StreamExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// Interval between DOM polls while waiting on a selector
const POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Browser automation engine.
///
/// Owns the Chromium process. The invoker holds it behind an `Arc`; anything
/// that only needs to request shutdown should hold a `Weak`.
pub struct BrowserEngine {
    browser: Mutex<Option<Arc<Browser>>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    filter: ResourceFilter,
}

impl BrowserEngine {
    /// Launch Chromium with settings from the app config.
    pub async fn launch(config: &AppConfig) -> Result<Arc<Self>> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .window_size(config.browser.window_width, config.browser.window_height)
            .request_timeout(config.timeouts.extended_timeout())
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage");
        if !config.browser.headless {
            builder = builder.with_head();
        }
        let browser_config = builder.build().map_err(BrowserError::ChromiumError)?;

        let (browser, mut handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        // Spawn browser handler
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    tracing::debug!("browser handler event error: {}", e);
                }
            }
        });

        tracing::info!(headless = config.browser.headless, "Browser launched");

        let filter = ResourceFilter::new(&config.portal.effective_origin(), &config.filter);

        Ok(Arc::new(Self {
            browser: Mutex::new(Some(Arc::new(browser))),
            handler: Mutex::new(Some(handler_task)),
            filter,
        }))
    }

    /// Route every request of `page` through the resource filter.
    async fn install_filter(&self, page: &Page) -> Result<()> {
        let mut paused = page
            .event_listener::<EventRequestPaused>()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        page.execute(
            EnableParams::builder()
                .pattern(
                    RequestPattern::builder()
                        .url_pattern("*")
                        .request_stage(RequestStage::Request)
                        .build(),
                )
                .build(),
        )
        .await
        .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        let filter = self.filter.clone();
        let intercept_page = page.clone();
        tokio::spawn(async move {
            while let Some(event) = paused.next().await {
                let kind = resource_kind(&event.resource_type);
                let outcome = match filter.decide(&event.request.url, kind) {
                    FilterDecision::Allow => intercept_page
                        .execute(ContinueRequestParams::new(event.request_id.clone()))
                        .await
                        .map(|_| ()),
                    FilterDecision::Block => intercept_page
                        .execute(FailRequestParams::new(
                            event.request_id.clone(),
                            ErrorReason::BlockedByClient,
                        ))
                        .await
                        .map(|_| ()),
                };
                if let Err(e) = outcome {
                    tracing::trace!("request interception reply failed: {}", e);
                }
            }
        });

        Ok(())
    }
}

#[async_trait::async_trait]
impl LaneLauncher for BrowserEngine {
    type Page = ChromiumPage;

    async fn open_lane(&self) -> Result<ChromiumPage> {
        // Lanes open concurrently; only the handle clone happens under the lock
        let browser = self
            .browser
            .lock()
            .await
            .clone()
            .ok_or(BrowserError::LaneClosed)?;
        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;

        if let Err(e) = self.install_filter(&page).await {
            if let Err(close_err) = page.close().await {
                tracing::warn!("Failed to close lane after filter setup error: {}", close_err);
            }
            return Err(e);
        }

        tracing::debug!("Lane opened");
        Ok(ChromiumPage { page })
    }

    async fn shutdown(&self) -> Result<()> {
        let Some(shared) = self.browser.lock().await.take() else {
            return Ok(());
        };

        let closed = match Arc::try_unwrap(shared) {
            Ok(mut browser) => {
                let closed = browser
                    .close()
                    .await
                    .map(|_| ())
                    .map_err(|e| BrowserError::ChromiumError(e.to_string()));
                if let Err(e) = browser.wait().await {
                    tracing::warn!("Browser process did not exit cleanly: {}", e);
                }
                closed
            }
            // A lane is still opening; ask Chromium to exit over CDP
            Err(shared) => shared
                .execute(CloseParams::default())
                .await
                .map(|_| ())
                .map_err(|e| BrowserError::ChromiumError(e.to_string())),
        };

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        tracing::info!("Browser closed");
        closed
    }
}

fn resource_kind(resource_type: &ResourceType) -> ResourceKind {
    match resource_type {
        ResourceType::Document => ResourceKind::Document,
        ResourceType::Stylesheet => ResourceKind::Stylesheet,
        ResourceType::Image => ResourceKind::Image,
        ResourceType::Media => ResourceKind::Media,
        ResourceType::Font => ResourceKind::Font,
        ResourceType::Script => ResourceKind::Script,
        ResourceType::Xhr | ResourceType::Fetch => ResourceKind::Xhr,
        _ => ResourceKind::Other,
    }
}

/// A Chromium tab owned by one lane.
pub struct ChromiumPage {
    page: Page,
}

/// Rendered state of the first element matching a selector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ElementState {
    Detached,
    Hidden,
    Visible,
}

impl ChromiumPage {
    async fn element_state(&self, selector: &str) -> Result<ElementState> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return "detached";
                const style = window.getComputedStyle(el);
                const rect = el.getBoundingClientRect();
                const hidden = style.display === "none" || style.visibility === "hidden"
                    || (rect.width === 0 && rect.height === 0);
                return hidden ? "hidden" : "visible";
            }})()"#,
            sel = js_string(selector)
        );
        Ok(match self.evaluate(&script).await?.as_str() {
            Some("visible") => ElementState::Visible,
            Some("hidden") => ElementState::Hidden,
            _ => ElementState::Detached,
        })
    }

    async fn element(&self, selector: &str) -> Result<chromiumoxide::Element> {
        self.page
            .find_element(selector)
            .await
            .map_err(|_| BrowserError::SelectorNotFound(selector.to_string()))
    }
}

#[async_trait::async_trait]
impl BrowserActions for ChromiumPage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        tokio::time::timeout(timeout, self.page.goto(url))
            .await
            .map_err(|_| BrowserError::Timeout(format!("navigating to {url}")))?
            .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        state: WaitState,
        timeout: Duration,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let current = self.element_state(selector).await?;
            let reached = match state {
                WaitState::Attached => current != ElementState::Detached,
                WaitState::Visible => current == ElementState::Visible,
                WaitState::Hidden => current != ElementState::Visible,
            };
            if reached {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(BrowserError::Timeout(format!(
                    "waiting for {selector} to be {state:?}"
                )));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn is_visible(&self, selector: &str) -> Result<bool> {
        Ok(self.element_state(selector).await? == ElementState::Visible)
    }

    async fn fill_field(&self, selector: &str, value: &str) -> Result<()> {
        let element = self.element(selector).await?;
        let clear = format!(
            "(() => {{ const el = document.querySelector({}); if (el) el.value = ''; }})()",
            js_string(selector)
        );
        self.evaluate(&clear).await?;
        element
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?
            .type_str(value)
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<()> {
        self.element(selector)
            .await?
            .click()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
        Ok(())
    }

    async fn click_and_wait_for_navigation(&self, selector: &str, timeout: Duration) -> Result<()> {
        let element = self.element(selector).await?;
        let settle = async {
            element
                .click()
                .await
                .map_err(|e| BrowserError::ChromiumError(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| BrowserError::NavigationError(e.to_string()))?;
            Ok::<(), BrowserError>(())
        };
        tokio::time::timeout(timeout, settle)
            .await
            .map_err(|_| BrowserError::Timeout(format!("waiting for page load after clicking {selector}")))?
    }

    async fn check(&self, selector: &str) -> Result<()> {
        if !self.is_checked(selector).await? {
            self.click(selector).await?;
        }
        Ok(())
    }

    async fn is_checked(&self, selector: &str) -> Result<bool> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return !!(el && el.checked); }})()",
            js_string(selector)
        );
        Ok(self.evaluate(&script).await?.as_bool().unwrap_or(false))
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<()> {
        let script = format!(
            r#"(() => {{
                const el = document.querySelector({sel});
                if (!el) return false;
                el.value = {val};
                el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                return true;
            }})()"#,
            sel = js_string(selector),
            val = js_string(value)
        );
        if self.evaluate(&script).await?.as_bool() == Some(true) {
            Ok(())
        } else {
            Err(BrowserError::SelectorNotFound(selector.to_string()))
        }
    }

    async fn selected_value(&self, selector: &str) -> Result<Option<String>> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.value : null; }})()",
            js_string(selector)
        );
        Ok(self
            .evaluate(&script)
            .await?
            .as_str()
            .map(ToString::to_string))
    }

    async fn extract_text(&self, selector: &str) -> Result<String> {
        let script = format!(
            "(() => {{ const el = document.querySelector({}); return el ? el.innerText.trim() : null; }})()",
            js_string(selector)
        );
        self.evaluate(&script)
            .await?
            .as_str()
            .map(ToString::to_string)
            .ok_or_else(|| BrowserError::SelectorNotFound(selector.to_string()))
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::ScriptError(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::ChromiumError(e.to_string()))
    }
}
