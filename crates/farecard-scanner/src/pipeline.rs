//! Pipeline entry point.
//!
//! The invoker owns the launcher through [`Pipeline`]. Signal handlers get a
//! [`Weak`] handle from [`Pipeline::handle`] and never keep the browser alive.

use crate::error::{Result, ScrapeError, StepContext};
use crate::partition::{Lane, PartitionOrchestrator};
use crate::session::SessionEstablisher;
use farecard_browser::{sweep_orphaned_browsers, BrowserEngine, LaneLauncher};
use farecard_core::{AppConfig, Credentials, ExtractionResult};
use std::sync::{Arc, Weak};

/// Authenticate, enumerate partitions, extract and reconcile.
///
/// Fails with [`ScrapeError::ExtractionEmpty`] when nothing was extracted.
pub async fn run_pipeline<L: LaneLauncher>(
    launcher: &L,
    config: &AppConfig,
    credentials: &Credentials,
) -> Result<ExtractionResult> {
    let started = std::time::Instant::now();
    tracing::info!("Starting extraction run");

    let page = launcher.open_lane().await.during("open_lane")?;
    let primary = Lane::new(page, "primary");
    if let Err(e) = SessionEstablisher::new(config)
        .establish(primary.page(), credentials)
        .await
    {
        primary.close().await;
        return Err(e);
    }

    let orchestrator = PartitionOrchestrator::new(launcher, config, credentials);
    let result = orchestrator.run(primary).await?;

    if result.is_empty() {
        tracing::error!("Run finished without records");
        return Err(ScrapeError::ExtractionEmpty);
    }

    tracing::info!(
        "Extracted {} records from {} partitions ({} reconciled, {} rows skipped, {} warnings) in {:.1}s",
        result.len(),
        result.partitions_processed,
        result.reconciled_extras,
        result.rows_skipped,
        result.warnings.len(),
        started.elapsed().as_secs_f64()
    );
    Ok(result)
}

/// A launcher plus the configuration runs use.
pub struct Pipeline<L> {
    launcher: Arc<L>,
    config: AppConfig,
}

impl<L: LaneLauncher> Pipeline<L> {
    /// Wrap an existing launcher.
    pub fn new(launcher: Arc<L>, config: AppConfig) -> Self {
        Self { launcher, config }
    }

    /// Non-owning handle for shutdown listeners.
    #[must_use]
    pub fn handle(&self) -> Weak<L> {
        Arc::downgrade(&self.launcher)
    }

    /// Configuration runs use.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// One extraction run with `credentials`.
    pub async fn run(&self, credentials: &Credentials) -> Result<ExtractionResult> {
        run_pipeline(self.launcher.as_ref(), &self.config, credentials).await
    }

    /// Close the browser process. Safe to call more than once.
    pub async fn shutdown(&self) -> Result<()> {
        self.launcher.shutdown().await.during("shutdown")
    }
}

impl Pipeline<BrowserEngine> {
    /// Validate `config`, sweep leaked browsers if configured, and launch
    /// Chromium.
    pub async fn launch(config: AppConfig) -> Result<Self> {
        config.validate()?;

        if config.browser.sweep_orphans {
            let killed = sweep_orphaned_browsers().await;
            if killed > 0 {
                tracing::info!("Reclaimed {} orphaned browser processes", killed);
            }
        }

        let engine = BrowserEngine::launch(&config).await.during("launch")?;
        Ok(Self::new(engine, config))
    }
}

/// Launch Chromium, run once, and close it again whatever the outcome.
pub async fn scrape_transport_cards(config: AppConfig, credentials: &Credentials) -> Result<ExtractionResult> {
    let pipeline = Pipeline::launch(config).await?;
    let outcome = pipeline.run(credentials).await;
    if let Err(e) = pipeline.shutdown().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
    outcome
}
