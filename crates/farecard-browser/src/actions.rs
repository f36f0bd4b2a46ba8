use crate::error::Result;
use std::time::Duration;

/// Element state a wait resolves on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitState {
    /// Present in the DOM
    Attached,
    /// Present and rendered
    Visible,
    /// Absent or not rendered
    Hidden,
}

/// Page-level actions a lane performs against the portal.
///
/// Every call is a suspension point. Calls that can hang take an explicit
/// timeout; the rest are single round trips.
#[async_trait::async_trait]
pub trait BrowserActions: Send + Sync {
    /// Navigate to a URL and wait for the load to finish
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Wait until a selector reaches the given state
    async fn wait_for_selector(&self, selector: &str, state: WaitState, timeout: Duration)
        -> Result<()>;

    /// Whether a selector matches a rendered element
    async fn is_visible(&self, selector: &str) -> Result<bool>;

    /// Fill a form field by selector
    async fn fill_field(&self, selector: &str, value: &str) -> Result<()>;

    /// Click an element by selector
    async fn click(&self, selector: &str) -> Result<()>;

    /// Click and wait for the page load it triggers
    ///
    /// Only for controls that submit a full-page postback; the wait ends when
    /// the new document has loaded, not when the network goes quiet.
    async fn click_and_wait_for_navigation(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Tick a checkbox if it is not already ticked
    async fn check(&self, selector: &str) -> Result<()>;

    /// Whether a checkbox is ticked
    async fn is_checked(&self, selector: &str) -> Result<bool>;

    /// Set a `<select>` value and fire its change event
    async fn select_option(&self, selector: &str, value: &str) -> Result<()>;

    /// Current value of a `<select>`, `None` if the element is missing
    async fn selected_value(&self, selector: &str) -> Result<Option<String>>;

    /// Extract trimmed text from an element
    async fn extract_text(&self, selector: &str) -> Result<String>;

    /// Evaluate a script expression and return its JSON value
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value>;

    /// Close the page and release its target
    async fn close(&self) -> Result<()>;
}

/// Shared handle that opens lanes.
///
/// The launcher is the only object shared across a pipeline run; each page it
/// hands out belongs to exactly one lane.
#[async_trait::async_trait]
pub trait LaneLauncher: Send + Sync {
    /// Page type owned by a lane
    type Page: BrowserActions + 'static;

    /// Open a fresh page with the request filter installed
    async fn open_lane(&self) -> Result<Self::Page>;

    /// Close the underlying browser process. Idempotent.
    async fn shutdown(&self) -> Result<()>;
}

/// Quote a CSS selector for embedding in a script expression.
#[must_use]
pub fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}
