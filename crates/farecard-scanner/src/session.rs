//! Login and navigation state machine.
//!
//! ```text
//! NavigateLogin -> DismissConsentModal? -> DismissCookieModal? -> FillCredentials
//!     -> SubmitLogin -> NavigateTarget -> DismissInterstitial?
//! ```
//!
//! The first five steps form one login attempt. A retried login always starts
//! again at `NavigateLogin` so the form (and any anti-forgery token in it) is
//! fresh. A visible login error banner is terminal.

use crate::error::{Result, ScrapeError, StepContext};
use crate::retry::RetryPolicy;
use farecard_browser::{BrowserActions, WaitState};
use farecard_core::{AppConfig, Credentials, PortalConfig, TimeoutConfig};

/// Drives a fresh page to the authenticated target page.
pub struct SessionEstablisher<'a> {
    portal: &'a PortalConfig,
    timeouts: &'a TimeoutConfig,
    step_policy: RetryPolicy,
    auth_policy: RetryPolicy,
}

impl<'a> SessionEstablisher<'a> {
    /// Establisher using the portal, timeout and retry settings of `config`.
    #[must_use]
    pub fn new(config: &'a AppConfig) -> Self {
        Self {
            portal: &config.portal,
            timeouts: &config.timeouts,
            step_policy: RetryPolicy::for_steps(&config.retry),
            auth_policy: RetryPolicy::for_authentication(&config.retry),
        }
    }

    /// Log in and leave `page` on the target page, ready for extraction.
    pub async fn establish<P: BrowserActions>(&self, page: &P, credentials: &Credentials) -> Result<()> {
        self.auth_policy
            .run("authenticate", move || self.login(page, credentials))
            .await?;
        self.navigate_target(page).await?;
        self.dismiss_interstitial(page).await;
        Ok(())
    }

    async fn login<P: BrowserActions>(&self, page: &P, credentials: &Credentials) -> Result<()> {
        self.navigate_login(page).await?;
        self.dismiss_modal(
            page,
            "dismiss_consent_modal",
            &self.portal.consent_checkbox,
            &self.portal.consent_modal,
        )
        .await?;
        self.dismiss_modal(
            page,
            "dismiss_cookie_modal",
            &self.portal.cookie_button,
            &self.portal.cookie_modal,
        )
        .await?;
        self.fill_credentials(page, credentials).await?;
        self.submit_login(page).await
    }

    async fn navigate_login<P: BrowserActions>(&self, page: &P) -> Result<()> {
        tracing::info!("1) Loading login page {}", self.portal.login_url);
        let url = self.portal.login_url.as_str();
        let timeout = self.timeouts.extended_timeout();
        self.step_policy
            .run("navigate_login", move || async move {
                page.navigate(url, timeout).await.during("navigate_login")
            })
            .await
    }

    /// Click `trigger` if it is showing and wait for `container` to hide.
    async fn dismiss_modal<P: BrowserActions>(
        &self,
        page: &P,
        step: &str,
        trigger: &str,
        container: &str,
    ) -> Result<()> {
        if !page.is_visible(trigger).await.during(step)? {
            tracing::debug!("{}: not shown", step);
            return Ok(());
        }

        tracing::info!("{}: modal present, accepting", step);
        page.click(trigger).await.during(step)?;
        page.wait_for_selector(container, WaitState::Hidden, self.timeouts.default_timeout())
            .await
            .during(step)
    }

    async fn fill_credentials<P: BrowserActions>(&self, page: &P, credentials: &Credentials) -> Result<()> {
        tracing::info!("4) Filling credentials");
        let timeout = self.timeouts.default_timeout();

        page.wait_for_selector(&self.portal.username_field, WaitState::Visible, timeout)
            .await
            .during("fill_credentials")?;
        page.fill_field(&self.portal.username_field, credentials.username())
            .await
            .during("fill_credentials")?;

        page.wait_for_selector(&self.portal.password_field, WaitState::Visible, timeout)
            .await
            .during("fill_credentials")?;
        page.fill_field(&self.portal.password_field, credentials.password())
            .await
            .during("fill_credentials")
    }

    async fn submit_login<P: BrowserActions>(&self, page: &P) -> Result<()> {
        tracing::info!("5) Submitting login");
        // The login form posts back the whole page
        page.click_and_wait_for_navigation(&self.portal.submit_button, self.timeouts.extended_timeout())
            .await
            .during("submit_login")?;

        if page
            .is_visible(&self.portal.error_banner)
            .await
            .during("submit_login")?
        {
            let message = page
                .extract_text(&self.portal.error_banner)
                .await
                .during("submit_login")?;
            if !message.is_empty() {
                tracing::error!("Login rejected: {}", message);
                return Err(ScrapeError::Authentication { message });
            }
        }

        tracing::info!("Login accepted");
        Ok(())
    }

    async fn navigate_target<P: BrowserActions>(&self, page: &P) -> Result<()> {
        tracing::info!("6) Loading target page");
        let url = self.portal.target_url.as_str();
        let table = self.portal.results_table.as_str();
        let timeout = self.timeouts.extended_timeout();
        self.step_policy
            .run("navigate_target", move || async move {
                page.navigate(url, timeout).await.during("navigate_target")?;
                page.wait_for_selector(table, WaitState::Attached, timeout)
                    .await
                    .during("navigate_target")
            })
            .await
    }

    async fn dismiss_interstitial<P: BrowserActions>(&self, page: &P) {
        let close = self.portal.interstitial_close.as_str();
        match page.is_visible(close).await {
            Ok(true) => {
                tracing::info!("7) Closing informational dialog");
                if let Err(e) = page.click(close).await {
                    tracing::warn!("Could not close informational dialog: {}", e);
                }
            }
            Ok(false) => tracing::debug!("No informational dialog"),
            Err(e) => tracing::warn!("Could not check for informational dialog: {}", e),
        }
    }
}
