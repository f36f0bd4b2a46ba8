//! Results-table parsing.
//!
//! The page hands over raw table markup; header detection and cell reading
//! happen here. A malformed row is skipped and counted; an unparsable balance
//! becomes `0.0` with a warning. Neither aborts the extraction.

use crate::error::{Result, StepContext};
use crate::retry::poll_until;
use crate::scripts;
use farecard_browser::BrowserActions;
use farecard_core::{
    parse_balance, CardRecord, ExtractionResult, ExtractionStrategy, PortalConfig, RecordOrigin,
    RowWarning,
};
use scraper::{ElementRef, Html, Selector};
use std::time::Duration;

/// Cell texts of every data row in `table_html`.
///
/// A row is a header when it carries `header_class` (case-insensitive) or has
/// a `th` cell of its own; headers are dropped, not counted as skipped. Cell
/// text is trimmed with inner whitespace collapsed.
#[must_use]
pub fn data_rows(table_html: &str, header_class: &str) -> Vec<Vec<String>> {
    let Ok(row_selector) = Selector::parse("tr") else {
        return Vec::new();
    };
    let fragment = Html::parse_fragment(table_html);
    fragment
        .select(&row_selector)
        .filter(|row| !is_header_row(*row, header_class))
        .map(row_texts)
        .collect()
}

fn own_cells<'a>(row: ElementRef<'a>) -> impl Iterator<Item = ElementRef<'a>> {
    row.children()
        .filter_map(ElementRef::wrap)
        .filter(|cell| matches!(cell.value().name(), "td" | "th"))
}

fn is_header_row(row: ElementRef<'_>, header_class: &str) -> bool {
    let marked = !header_class.is_empty()
        && row
            .value()
            .classes()
            .any(|class| class.eq_ignore_ascii_case(header_class));
    marked || own_cells(row).any(|cell| cell.value().name() == "th")
}

fn row_texts(row: ElementRef<'_>) -> Vec<String> {
    own_cells(row)
        .map(|cell| {
            cell.text()
                .flat_map(str::split_whitespace)
                .collect::<Vec<_>>()
                .join(" ")
        })
        .collect()
}

/// Outcome of normalizing one row.
#[derive(Debug, Clone, PartialEq)]
pub enum RowOutcome {
    /// Row produced a record, possibly with a balance warning.
    Record(CardRecord, Option<RowWarning>),
    /// Row lacked required cells.
    Skipped,
}

/// Normalize the cell texts of one data row.
///
/// Columns are card number, employee id, employee name, balance. Extra cells
/// are ignored.
#[must_use]
pub fn parse_row(cells: &[String], partition_label: &str) -> RowOutcome {
    let [card, employee_id, employee_name, balance_text, ..] = cells else {
        return RowOutcome::Skipped;
    };
    let card = card.trim();
    let employee_id = employee_id.trim();
    let employee_name = employee_name.trim();
    if card.is_empty() || employee_id.is_empty() || employee_name.is_empty() {
        return RowOutcome::Skipped;
    }

    let (balance, warning) = match parse_balance(balance_text) {
        Some(balance) => (balance, None),
        None => (
            0.0,
            Some(RowWarning {
                partition_label: partition_label.to_string(),
                card_number: Some(card.to_string()),
                message: format!("unparsable balance {:?}, using 0.0", balance_text.trim()),
            }),
        ),
    };

    RowOutcome::Record(
        CardRecord {
            card_number: card.to_string(),
            employee_id: employee_id.to_string(),
            employee_name: employee_name.to_string(),
            balance,
            partition_label: partition_label.to_string(),
            origin: RecordOrigin::Partition,
        },
        warning,
    )
}

/// Normalize a batch of rows into a result for one partition.
#[must_use]
pub fn parse_rows(rows: &[Vec<String>], partition_label: &str) -> ExtractionResult {
    let mut result = ExtractionResult::new();
    for cells in rows {
        push_row(&mut result, cells, partition_label);
    }
    result
}

fn push_row(result: &mut ExtractionResult, cells: &[String], partition_label: &str) {
    match parse_row(cells, partition_label) {
        RowOutcome::Record(record, warning) => {
            if let Some(warning) = warning {
                tracing::warn!("{}", warning);
                result.warnings.push(warning);
            }
            result.records.push(record);
        }
        RowOutcome::Skipped => {
            tracing::debug!("Skipping incomplete row in {}: {:?}", partition_label, cells);
            result.rows_skipped += 1;
        }
    }
}

/// Reads the results table of the page a lane is on.
pub struct TableExtractor<'a> {
    portal: &'a PortalConfig,
    strategy: ExtractionStrategy,
    row_timeout: Duration,
    poll_interval: Duration,
}

impl<'a> TableExtractor<'a> {
    /// Extractor checking every `poll_interval`, for up to `row_timeout`,
    /// that a data row has rendered.
    #[must_use]
    pub fn new(
        portal: &'a PortalConfig,
        strategy: ExtractionStrategy,
        row_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            portal,
            strategy,
            row_timeout,
            poll_interval,
        }
    }

    /// Extract every data row currently rendered.
    ///
    /// A table whose data rows never render yields an empty result, not an
    /// error. Header rows alone do not count as rendered.
    pub async fn extract<P: BrowserActions>(
        &self,
        page: &P,
        partition_label: &str,
    ) -> Result<ExtractionResult> {
        if !self.wait_for_data_rows(page).await {
            tracing::info!("No rows rendered for {}", partition_label);
            return Ok(ExtractionResult::new());
        }

        let result = match self.strategy {
            ExtractionStrategy::BulkScan => self.bulk_scan(page, partition_label).await?,
            ExtractionStrategy::RowIteration => self.row_iteration(page, partition_label).await?,
        };

        tracing::debug!(
            "Extracted {} records from {} ({} skipped, {} warnings)",
            result.len(),
            partition_label,
            result.rows_skipped,
            result.warnings.len()
        );
        Ok(result)
    }

    async fn wait_for_data_rows<P: BrowserActions>(&self, page: &P) -> bool {
        let interval = self.poll_interval.max(Duration::from_millis(1));
        let attempts = u32::try_from(self.row_timeout.as_millis() / interval.as_millis())
            .unwrap_or(u32::MAX)
            .max(1);
        let script = scripts::table_html(&self.portal.results_table);
        let (script_ref, header) = (&script, self.portal.header_row_class.as_str());
        poll_until(attempts, interval, move || async move {
            match page.evaluate(script_ref).await {
                Ok(value) => value
                    .as_str()
                    .is_some_and(|html| !data_rows(html, header).is_empty()),
                Err(e) => {
                    tracing::trace!("results table not readable yet: {}", e);
                    false
                }
            }
        })
        .await
    }

    async fn bulk_scan<P: BrowserActions>(
        &self,
        page: &P,
        partition_label: &str,
    ) -> Result<ExtractionResult> {
        let script = scripts::table_html(&self.portal.results_table);
        let value = page.evaluate(&script).await.during("extract_table")?;
        let rows = data_rows(value.as_str().unwrap_or_default(), &self.portal.header_row_class);
        Ok(parse_rows(&rows, partition_label))
    }

    async fn row_iteration<P: BrowserActions>(
        &self,
        page: &P,
        partition_label: &str,
    ) -> Result<ExtractionResult> {
        let table = &self.portal.results_table;
        let header = &self.portal.header_row_class;
        let count = page
            .evaluate(&scripts::row_count(table))
            .await
            .during("extract_table")?
            .as_u64()
            .unwrap_or(0);

        let mut result = ExtractionResult::new();
        for index in 0..usize::try_from(count).unwrap_or(usize::MAX) {
            match page.evaluate(&scripts::row_html(table, index)).await {
                Ok(serde_json::Value::String(html)) => {
                    // Header rows come back empty
                    for cells in data_rows(&format!("<table>{html}</table>"), header) {
                        push_row(&mut result, &cells, partition_label);
                    }
                }
                Ok(_) => result.rows_skipped += 1,
                Err(e) => {
                    tracing::warn!("Failed to read row {} of {}: {}", index, partition_label, e);
                    result.rows_skipped += 1;
                    result.warnings.push(RowWarning {
                        partition_label: partition_label.to_string(),
                        card_number: None,
                        message: format!("row {index} unreadable: {e}"),
                    });
                }
            }
        }
        Ok(result)
    }
}
