//! Partition enumeration and bounded-concurrency fan-out.
//!
//! The primary lane arrives authenticated. With zero real partitions it
//! extracts in place. With one it processes that partition and then the
//! aggregate listing on the same lane. With more, the primary lane is closed
//! and partitions run in chunks of `max_parallel` fresh lanes, each
//! authenticating on its own. A chunk settles completely before the next one
//! opens. The aggregate listing then runs on one more fresh lane and is
//! reconciled against the union of partition records.
//!
//! Every lane is closed on every exit path.

use crate::error::{Result, ScrapeError, StepContext};
use crate::reconcile::reconcile;
use crate::retry::{poll_until, RetryPolicy};
use crate::scripts;
use crate::session::SessionEstablisher;
use crate::table::TableExtractor;
use farecard_browser::{BrowserActions, LaneLauncher};
use farecard_core::{AppConfig, Credentials, ExtractionResult, Partition, PartitionConfig};
use futures::stream::{FuturesUnordered, StreamExt};
use sha2::{Digest, Sha256};

/// Partition selector options split into real partitions and the aggregate
/// pseudo-partition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionCatalog {
    /// Partitions to extract one by one.
    pub real: Vec<Partition>,
    /// Option listing every partition at once, if the selector offers one.
    pub aggregate: Option<Partition>,
}

/// Split raw selector options.
///
/// Options whose trimmed label matches `excluded_labels` (case-insensitive)
/// or whose id is a sentinel are not real partitions. The first option whose
/// label matches `aggregate_labels` becomes the aggregate, whatever its id.
/// Repeated ids are kept once.
#[must_use]
pub fn classify(options: Vec<Partition>, config: &PartitionConfig) -> PartitionCatalog {
    let matches = |list: &[String], label: &str| list.iter().any(|l| l.eq_ignore_ascii_case(label));

    let mut catalog = PartitionCatalog::default();
    for option in options {
        let label = option.label.trim();
        if matches(&config.aggregate_labels, label) {
            if catalog.aggregate.is_none() {
                catalog.aggregate = Some(option);
            }
            continue;
        }
        if matches(&config.excluded_labels, label)
            || label.is_empty()
            || config.sentinel_ids.iter().any(|id| id == option.id.trim())
        {
            tracing::debug!("Ignoring placeholder option {}", option);
            continue;
        }
        if catalog.real.iter().any(|p| p.id == option.id) {
            continue;
        }
        catalog.real.push(option);
    }
    catalog
}

/// Read and classify the options of the partition selector.
///
/// A page without the selector has no partitions.
pub async fn read_partitions<P: BrowserActions>(page: &P, config: &AppConfig) -> Result<PartitionCatalog> {
    let script = scripts::partition_options(&config.portal.partition_selector);
    let value = page.evaluate(&script).await.during("read_partitions")?;

    let options: Vec<Partition> = value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    let id = item.get("id")?.as_str()?;
                    let label = item.get("label")?.as_str()?;
                    Some(Partition::new(id, label.trim()))
                })
                .collect()
        })
        .unwrap_or_default();

    let catalog = classify(options, &config.partitions);
    tracing::info!(
        "Found {} partitions{}",
        catalog.real.len(),
        if catalog.aggregate.is_some() { " plus aggregate listing" } else { "" }
    );
    Ok(catalog)
}

/// One browser page plus the per-lane state the pipeline tracks.
pub struct Lane<P> {
    page: P,
    name: String,
    details_enabled: bool,
}

impl<P: BrowserActions> Lane<P> {
    /// Wrap an opened page.
    pub fn new(page: P, name: impl Into<String>) -> Self {
        Self {
            page,
            name: name.into(),
            details_enabled: false,
        }
    }

    /// Underlying page.
    pub fn page(&self) -> &P {
        &self.page
    }

    /// Release the page. Failures are logged, never raised.
    pub async fn close(self) {
        if let Err(e) = self.page.close().await {
            tracing::warn!("Failed to close lane {}: {}", self.name, e);
        } else {
            tracing::debug!("Closed lane {}", self.name);
        }
    }
}

/// sha256 over the table's row count and rendered text.
async fn content_signature<P: BrowserActions>(page: &P, script: &str) -> Result<String> {
    let value = page.evaluate(script).await.during("table_signature")?;
    let text = value.as_str().unwrap_or_default();
    Ok(hex::encode(Sha256::digest(text.as_bytes())))
}

/// Fans partitions out over lanes and merges the results.
pub struct PartitionOrchestrator<'a, L> {
    launcher: &'a L,
    config: &'a AppConfig,
    credentials: &'a Credentials,
    session: SessionEstablisher<'a>,
    step_policy: RetryPolicy,
}

impl<'a, L: LaneLauncher> PartitionOrchestrator<'a, L> {
    /// Orchestrator opening extra lanes through `launcher`.
    #[must_use]
    pub fn new(launcher: &'a L, config: &'a AppConfig, credentials: &'a Credentials) -> Self {
        Self {
            launcher,
            config,
            credentials,
            session: SessionEstablisher::new(config),
            step_policy: RetryPolicy::for_steps(&config.retry),
        }
    }

    fn extractor(&self) -> TableExtractor<'a> {
        TableExtractor::new(
            &self.config.portal,
            self.config.extraction.strategy,
            self.config.timeouts.default_timeout(),
            self.config.partitions.poll_interval(),
        )
    }

    /// Run every partition starting from an authenticated primary lane.
    ///
    /// Takes ownership of the primary lane and closes it.
    pub async fn run(&self, mut primary: Lane<L::Page>) -> Result<ExtractionResult> {
        let catalog = match read_partitions(primary.page(), self.config).await {
            Ok(catalog) => catalog,
            Err(e) => {
                primary.close().await;
                return Err(e);
            }
        };

        match catalog.real.as_slice() {
            [] => {
                tracing::info!("No partitions, extracting in place");
                let outcome = self.extract_in_place(&mut primary).await;
                primary.close().await;
                outcome
            }
            [only] => {
                let outcome = self.process_partition(&mut primary, only).await;
                let aggregate = match (&outcome, &catalog.aggregate) {
                    (Ok(_), Some(aggregate)) => self.aggregate_on(&mut primary, aggregate).await,
                    _ => ExtractionResult::new(),
                };
                primary.close().await;

                let partition = outcome.map_err(|e| {
                    tracing::error!("Partition {} failed: {}", only, e);
                    ScrapeError::AllPartitionsFailed {
                        count: 1,
                        source: Box::new(e),
                    }
                })?;
                Ok(merge(partition, &aggregate))
            }
            partitions => {
                primary.close().await;
                let combined = self.fan_out(partitions).await?;
                let aggregate = match &catalog.aggregate {
                    Some(aggregate) => self.aggregate_on_fresh_lane(aggregate).await,
                    None => ExtractionResult::new(),
                };
                Ok(merge(combined, &aggregate))
            }
        }
    }

    async fn extract_in_place(&self, lane: &mut Lane<L::Page>) -> Result<ExtractionResult> {
        self.ensure_details(lane).await;
        self.extractor().extract(lane.page(), &lane.name).await
    }

    /// Process `partitions` in chunks of `max_parallel` lanes.
    async fn fan_out(&self, partitions: &[Partition]) -> Result<ExtractionResult> {
        let chunk_size = self.config.partitions.max_parallel.max(1);
        let mut combined = ExtractionResult::new();

        for (index, chunk) in partitions.chunks(chunk_size).enumerate() {
            tracing::info!(
                "Chunk {}: {}",
                index + 1,
                chunk.iter().map(|p| p.label.as_str()).collect::<Vec<_>>().join(", ")
            );

            let mut in_flight: FuturesUnordered<_> = chunk
                .iter()
                .map(move |partition| async move { (partition, self.partition_on_fresh_lane(partition).await) })
                .collect();

            let mut last_error = None;
            let mut failures = 0;
            while let Some((partition, outcome)) = in_flight.next().await {
                match outcome {
                    Ok(result) => {
                        tracing::info!("Partition {} yielded {} records", partition, result.len());
                        combined.absorb(result);
                    }
                    Err(e) => {
                        tracing::error!("Partition {} failed, contributing no records: {}", partition, e);
                        failures += 1;
                        last_error = Some(e);
                    }
                }
            }

            if failures == chunk.len() {
                if let Some(source) = last_error {
                    return Err(ScrapeError::AllPartitionsFailed {
                        count: failures,
                        source: Box::new(source),
                    });
                }
            }
        }

        Ok(combined)
    }

    /// Open a lane and bring it to the authenticated target page.
    async fn open_authenticated_lane(&self, name: &str) -> Result<Lane<L::Page>> {
        let page = self.launcher.open_lane().await.during("open_lane")?;
        let lane = Lane::new(page, name);
        match self.session.establish(lane.page(), self.credentials).await {
            Ok(()) => Ok(lane),
            Err(e) => {
                lane.close().await;
                Err(e)
            }
        }
    }

    async fn partition_on_fresh_lane(&self, partition: &Partition) -> Result<ExtractionResult> {
        let mut lane = self.open_authenticated_lane(&partition.label).await?;
        let outcome = self.process_partition(&mut lane, partition).await;
        lane.close().await;
        outcome
    }

    async fn aggregate_on_fresh_lane(&self, aggregate: &Partition) -> ExtractionResult {
        match self.open_authenticated_lane(&aggregate.label).await {
            Ok(mut lane) => {
                let result = self.aggregate_on(&mut lane, aggregate).await;
                lane.close().await;
                result
            }
            Err(e) => {
                tracing::warn!("Aggregate lane failed, skipping reconciliation: {}", e);
                ExtractionResult::new()
            }
        }
    }

    /// Aggregate extraction never fails the run; problems yield an empty
    /// listing.
    async fn aggregate_on(&self, lane: &mut Lane<L::Page>, aggregate: &Partition) -> ExtractionResult {
        tracing::info!("Extracting aggregate listing {}", aggregate);
        match self.process_partition(lane, aggregate).await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Aggregate extraction failed, skipping reconciliation: {}", e);
                ExtractionResult::new()
            }
        }
    }

    /// Switch `lane` to `partition` and extract its rows.
    pub async fn process_partition(
        &self,
        lane: &mut Lane<L::Page>,
        partition: &Partition,
    ) -> Result<ExtractionResult> {
        let portal = &self.config.portal;
        let selector = portal.partition_selector.as_str();
        let signature_script = scripts::table_signature(&portal.results_table);
        let page = lane.page();

        let already_selected =
            page.selected_value(selector).await.during("select_partition")?.as_deref() == Some(partition.id.as_str());

        if already_selected {
            tracing::debug!("Partition {} already selected", partition);
        } else {
            let before = content_signature(page, &signature_script).await?;
            let id = partition.id.as_str();
            let timeout = self.config.timeouts.extended_timeout();
            self.step_policy
                .run("select_partition", move || async move {
                    page.select_option(selector, id).await.during("select_partition")?;
                    page.wait_for_selector(selector, farecard_browser::WaitState::Attached, timeout)
                        .await
                        .during("select_partition")
                })
                .await?;

            let (script_ref, before_ref) = (&signature_script, &before);
            let changed = poll_until(
                self.config.partitions.signature_poll_attempts,
                self.config.partitions.poll_interval(),
                move || async move {
                    matches!(content_signature(page, script_ref).await, Ok(after) if after != *before_ref)
                },
            )
            .await;
            if !changed {
                tracing::warn!("Table content did not change after selecting {}", partition);
            }
        }

        self.confirm_selection(lane, partition).await?;
        self.ensure_details(lane).await;

        let extractor = self.extractor();
        let attempts = self.config.retry.extraction_attempts.max(1);
        let mut attempt = 1;
        let mut result = loop {
            let result = extractor.extract(lane.page(), &partition.label).await?;
            if !result.is_empty() || attempt >= attempts {
                break result;
            }
            let still_selected = lane
                .page()
                .selected_value(selector)
                .await
                .during("extract_table")?
                .as_deref()
                == Some(partition.id.as_str());
            if !still_selected {
                break result;
            }
            tracing::warn!(
                "No rows for {} (attempt {}/{}), waiting for render",
                partition,
                attempt,
                attempts
            );
            attempt += 1;
            tokio::time::sleep(self.config.timeouts.settle()).await;
        };

        result.partitions_processed = 1;
        Ok(result)
    }

    async fn confirm_selection(&self, lane: &Lane<L::Page>, partition: &Partition) -> Result<()> {
        let actual = lane
            .page()
            .selected_value(&self.config.portal.partition_selector)
            .await
            .during("confirm_partition")?;
        if actual.as_deref() == Some(partition.id.as_str()) {
            Ok(())
        } else {
            Err(ScrapeError::PartitionMismatch {
                expected: partition.id.clone(),
                actual,
            })
        }
    }

    /// Turn on the details toggle once per lane. Failure is only a warning.
    async fn ensure_details(&self, lane: &mut Lane<L::Page>) {
        if lane.details_enabled {
            return;
        }
        lane.details_enabled = true;

        let toggle = self.config.portal.details_toggle.as_str();
        let page = lane.page();
        match page.is_checked(toggle).await {
            Ok(true) => tracing::debug!("Details already shown on lane {}", lane.name),
            Ok(false) => {
                if let Err(e) = page.check(toggle).await {
                    tracing::warn!("Could not enable details on lane {}: {}", lane.name, e);
                    return;
                }
                tokio::time::sleep(self.config.timeouts.settle()).await;
                tracing::debug!("Details enabled on lane {}", lane.name);
            }
            Err(e) => tracing::warn!("Could not read details toggle on lane {}: {}", lane.name, e),
        }
    }
}

/// Fold the aggregate listing into the partition union.
fn merge(mut combined: ExtractionResult, aggregate: &ExtractionResult) -> ExtractionResult {
    let reconciled = reconcile(&combined.records, &aggregate.records);
    combined.records = reconciled.records;
    combined.reconciled_extras += reconciled.extras;
    combined
}
