//! Domain types shared across the farecard pipeline.
//!
//! A pipeline run produces one [`ExtractionResult`] holding [`CardRecord`]s
//! read from the portal, tagged with the [`Partition`] they came from.

use crate::error::CoreError;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;

/// Portal login credentials.
///
/// Both fields are opaque; the only check is that neither is empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    /// Build credentials, rejecting empty (or whitespace-only) values.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Result<Self, CoreError> {
        let username = username.into();
        let password = password.into();

        if username.trim().is_empty() {
            return Err(CoreError::InvalidCredentials(
                "username is required".to_string(),
            ));
        }
        if password.is_empty() {
            return Err(CoreError::InvalidCredentials(
                "password is required".to_string(),
            ));
        }

        Ok(Self { username, password })
    }

    /// Login name as typed into the portal form.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Password as typed into the portal form.
    #[must_use]
    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// One selectable option of the portal's partition (department) filter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Partition {
    /// Option value submitted by the selector
    pub id: String,
    /// Visible option text
    pub label: String,
}

impl Partition {
    /// Create a partition from its option value and text.
    #[must_use]
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.label, self.id)
    }
}

/// Where a record in the final result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecordOrigin {
    /// Read from a per-partition listing (or the single inline listing)
    #[default]
    Partition,
    /// Only present in the aggregate listing; added during reconciliation
    ReconciledExtra,
}

/// One transport card row read from the results table.
///
/// `card_number` is the natural key within a run. `employee_id` and
/// `employee_name` are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardRecord {
    /// Card number (dedup key)
    pub card_number: String,
    /// Employee registration id
    pub employee_id: String,
    /// Employee display name
    pub employee_name: String,
    /// Current balance; 0.0 when the cell could not be parsed
    pub balance: f64,
    /// Label of the partition the row was read under
    pub partition_label: String,
    /// Provenance of the record
    #[serde(default)]
    pub origin: RecordOrigin,
}

/// Non-fatal problem found while reading a single row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowWarning {
    /// Partition the row belonged to
    pub partition_label: String,
    /// Card number, when the row got far enough to have one
    pub card_number: Option<String>,
    /// Human readable description
    pub message: String,
}

impl fmt::Display for RowWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.card_number {
            Some(card) => write!(f, "[{}] card {}: {}", self.partition_label, card, self.message),
            None => write!(f, "[{}] {}", self.partition_label, self.message),
        }
    }
}

/// Output of one pipeline invocation. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    /// Records in extraction order
    pub records: Vec<CardRecord>,
    /// Partitions whose listing was read successfully
    pub partitions_processed: usize,
    /// Rows dropped for missing cells or empty key fields
    pub rows_skipped: usize,
    /// Accumulated row warnings
    pub warnings: Vec<RowWarning>,
    /// Records added from the aggregate listing
    pub reconciled_extras: usize,
    /// When the run started
    pub started_at: DateTime<Utc>,
}

impl ExtractionResult {
    /// Fresh, empty result stamped with the current time.
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            partitions_processed: 0,
            rows_skipped: 0,
            warnings: Vec::new(),
            reconciled_extras: 0,
            started_at: Utc::now(),
        }
    }

    /// Fold another result's records and counters into this one.
    pub fn absorb(&mut self, other: ExtractionResult) {
        self.records.extend(other.records);
        self.partitions_processed += other.partitions_processed;
        self.rows_skipped += other.rows_skipped;
        self.warnings.extend(other.warnings);
        self.reconciled_extras += other.reconciled_extras;
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True when no records were extracted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl Default for ExtractionResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a balance written with `.` as thousands separator and `,` as
/// decimal separator (`"1.234,56"` is 1234.56).
///
/// A leading currency symbol and surrounding whitespace are ignored.
/// Returns `None` when the text is not in that format.
#[must_use]
pub fn parse_balance(text: &str) -> Option<f64> {
    static BALANCE_REGEX: OnceLock<Regex> = OnceLock::new();
    let regex = BALANCE_REGEX.get_or_init(|| {
        Regex::new(r"^-?(\d{1,3}(\.\d{3})+|\d+)(,\d+)?$").expect("valid regex")
    });

    let cleaned: String = text
        .trim()
        .trim_start_matches("R$")
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();

    if !regex.is_match(&cleaned) {
        return None;
    }

    cleaned.replace('.', "").replace(',', ".").parse::<f64>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_valid() {
        let creds = Credentials::new("user@example.com", "hunter2").expect("valid credentials");
        assert_eq!(creds.username(), "user@example.com");
        assert_eq!(creds.password(), "hunter2");
    }

    #[test]
    fn test_credentials_reject_empty() {
        assert!(matches!(
            Credentials::new("", "pw"),
            Err(CoreError::InvalidCredentials(_))
        ));
        assert!(matches!(
            Credentials::new("   ", "pw"),
            Err(CoreError::InvalidCredentials(_))
        ));
        assert!(matches!(
            Credentials::new("user", ""),
            Err(CoreError::InvalidCredentials(_))
        ));
    }

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("user", "s3cret").expect("valid credentials");
        let debug = format!("{creds:?}");
        assert!(debug.contains("user"));
        assert!(!debug.contains("s3cret"));
    }

    #[test]
    fn test_parse_balance_locale_format() {
        assert_eq!(parse_balance("1.234,56"), Some(1234.56));
        assert_eq!(parse_balance("0,00"), Some(0.0));
        assert_eq!(parse_balance("12,50"), Some(12.5));
        assert_eq!(parse_balance("1.000.000,01"), Some(1_000_000.01));
        assert_eq!(parse_balance("999"), Some(999.0));
    }

    #[test]
    fn test_parse_balance_currency_and_whitespace() {
        assert_eq!(parse_balance("  R$ 1.234,56 "), Some(1234.56));
        assert_eq!(parse_balance("R$\u{a0}7,30"), Some(7.3));
        assert_eq!(parse_balance("-5,00"), Some(-5.0));
    }

    #[test]
    fn test_parse_balance_rejects_garbage() {
        assert_eq!(parse_balance(""), None);
        assert_eq!(parse_balance("n/a"), None);
        assert_eq!(parse_balance("1.23"), None);
        assert_eq!(parse_balance("12,"), None);
    }

    #[test]
    fn test_parse_balance_grid() {
        for (integer, grouped) in [(0u64, "0"), (7, "7"), (123, "123"), (1_234, "1.234"), (98_765_432, "98.765.432")] {
            for cents in [0u64, 5, 99] {
                let text = format!("{grouped},{cents:02}");
                let expected = integer as f64 + cents as f64 / 100.0;
                let parsed = parse_balance(&text).expect("well-formed balance");
                assert!((parsed - expected).abs() < 1e-9, "{text} parsed as {parsed}");
            }
        }
    }

    #[test]
    fn test_card_record_serializes_camel_case() {
        let record = CardRecord {
            card_number: "0001".to_string(),
            employee_id: "42".to_string(),
            employee_name: "Ana".to_string(),
            balance: 10.5,
            partition_label: "HR".to_string(),
            origin: RecordOrigin::ReconciledExtra,
        };
        let json = serde_json::to_value(&record).expect("serialize record");
        assert_eq!(json["cardNumber"], "0001");
        assert_eq!(json["partitionLabel"], "HR");
        assert_eq!(json["origin"], "reconciled_extra");
    }

    #[test]
    fn test_extraction_result_absorb() {
        let mut total = ExtractionResult::new();
        let mut part = ExtractionResult::new();
        part.partitions_processed = 1;
        part.rows_skipped = 2;
        part.warnings.push(RowWarning {
            partition_label: "HR".to_string(),
            card_number: Some("1".to_string()),
            message: "unparsable balance".to_string(),
        });
        total.absorb(part);
        assert_eq!(total.partitions_processed, 1);
        assert_eq!(total.rows_skipped, 2);
        assert_eq!(total.warnings.len(), 1);
        assert!(total.is_empty());
    }

    #[test]
    fn test_row_warning_display() {
        let warning = RowWarning {
            partition_label: "Sales".to_string(),
            card_number: None,
            message: "row has 2 cells".to_string(),
        };
        assert_eq!(warning.to_string(), "[Sales] row has 2 cells");
    }
}
