//! Error payloads printed by the shell.

use farecard_scanner::ScrapeError;
use serde::Serialize;

/// Serializable failure description.
#[derive(Debug, Serialize)]
pub struct RunError {
    /// Stable code for callers that branch on the failure kind
    pub code: String,
    /// Human-readable message
    pub message: String,
    /// Optional context (never contains credentials)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl RunError {
    /// Error without details.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: None,
        }
    }

    /// Error with details.
    pub fn with_details(
        code: impl Into<String>,
        message: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            details: Some(details),
        }
    }
}

impl From<ScrapeError> for RunError {
    fn from(err: ScrapeError) -> Self {
        let message = err.to_string();
        let cause = err.root_cause().to_string();
        match &err {
            _ if err.is_authentication() => Self::new("AUTHENTICATION_FAILED", cause),
            ScrapeError::InvalidCredentials(_) => Self::new("INVALID_CREDENTIALS", message),
            ScrapeError::Config(_) => Self::new("CONFIG_ERROR", message),
            ScrapeError::ExtractionEmpty => Self::new("EXTRACTION_EMPTY", message),
            ScrapeError::AllPartitionsFailed { count, .. } => Self::with_details(
                "ALL_PARTITIONS_FAILED",
                message,
                serde_json::json!({ "failedPartitions": count, "cause": cause }),
            ),
            ScrapeError::StepFailure { step, attempts, .. } => Self::with_details(
                "STEP_FAILED",
                message,
                serde_json::json!({ "step": step, "attempts": attempts, "cause": cause }),
            ),
            _ => Self::new("SCRAPE_FAILED", message),
        }
    }
}
