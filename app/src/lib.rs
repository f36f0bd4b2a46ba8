//! Farecard Application Shell
//!
//! One-shot runner: loads configuration, launches the browser, runs one
//! extraction and prints the outcome as JSON. Pipeline logic lives in the
//! `crates/` directory.

mod error;

pub use error::RunError;

use farecard_browser::spawn_shutdown_listener;
use farecard_core::{AppConfig, CardRecord, Credentials};
use farecard_scanner::Pipeline;
use serde::Serialize;
use tracing::info;

/// Environment variable holding the portal username.
pub const USERNAME_VAR: &str = "FARECARD_USERNAME";
/// Environment variable holding the portal password.
pub const PASSWORD_VAR: &str = "FARECARD_PASSWORD";

/// Printed outcome of a run.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum Response {
    /// `{ "success": true, "data": [...] }`
    Success {
        /// Always `true`
        success: bool,
        /// Extracted records
        data: Vec<CardRecord>,
    },
    /// `{ "success": false, "error": "...", "code": "...", "details": ... }`
    Failure {
        /// Always `false`
        success: bool,
        /// Human-readable message
        error: String,
        /// Stable failure code
        code: String,
        /// Optional context
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<serde_json::Value>,
    },
}

impl Response {
    /// Successful run.
    #[must_use]
    pub fn success(data: Vec<CardRecord>) -> Self {
        Self::Success {
            success: true,
            data,
        }
    }

    /// Failed run.
    #[must_use]
    pub fn failure(err: RunError) -> Self {
        Self::Failure {
            success: false,
            error: err.message,
            code: err.code,
            details: err.details,
        }
    }

    /// Whether the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Initialize tracing subscriber for logging
///
/// Logs go to stderr so stdout carries only the JSON response.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,farecard=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

/// Read credentials from the environment.
pub fn credentials_from_env() -> Result<Credentials, RunError> {
    let username = std::env::var(USERNAME_VAR).unwrap_or_default();
    let password = std::env::var(PASSWORD_VAR).unwrap_or_default();
    Credentials::new(username, password)
        .map_err(|e| RunError::new("INVALID_CREDENTIALS", e.to_string()))
}

/// Run one extraction and build the response.
///
/// Configuration problems surface as `Err`; everything that happens once the
/// browser is up is reported inside the [`Response`].
pub async fn run() -> anyhow::Result<Response> {
    info!("Starting Farecard v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load_with_env()?;
    let credentials = match credentials_from_env() {
        Ok(credentials) => credentials,
        Err(e) => return Ok(Response::failure(e)),
    };

    let pipeline = match Pipeline::launch(config).await {
        Ok(pipeline) => pipeline,
        Err(e) => return Ok(Response::failure(e.into())),
    };
    let listener = spawn_shutdown_listener(pipeline.handle());

    let outcome = pipeline.run(&credentials).await;

    if let Err(e) = pipeline.shutdown().await {
        tracing::warn!("Failed to close browser: {}", e);
    }
    listener.abort();

    Ok(match outcome {
        Ok(result) => Response::success(result.records),
        Err(e) => {
            tracing::error!("Extraction failed: {}", e);
            Response::failure(e.into())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use farecard_core::RecordOrigin;

    #[test]
    fn test_success_shape() {
        let record = CardRecord {
            card_number: "0001".to_string(),
            employee_id: "E1".to_string(),
            employee_name: "Ana".to_string(),
            balance: 12.5,
            partition_label: "HR".to_string(),
            origin: RecordOrigin::Partition,
        };
        let json = serde_json::to_value(Response::success(vec![record])).expect("serialize");
        assert_eq!(json["success"], true);
        assert_eq!(json["data"][0]["cardNumber"], "0001");
        assert_eq!(json["data"][0]["partitionLabel"], "HR");
    }

    #[test]
    fn test_failure_shape() {
        let response = Response::failure(RunError::new("EXTRACTION_EMPTY", "no records"));
        assert!(!response.is_success());
        let json = serde_json::to_value(response).expect("serialize");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "no records");
        assert_eq!(json["code"], "EXTRACTION_EMPTY");
        assert!(json.get("details").is_none());
    }
}
