//! Error types for the extraction pipeline.
//!
//! Retry and escalation wrap the failure that caused them, so callers classify
//! through [`ScrapeError::root_cause`].

use farecard_browser::BrowserError;
use farecard_core::{ConfigError, CoreError};
use thiserror::Error;

/// Pipeline failures.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// The portal rejected the credentials. Never retried.
    #[error("authentication failed: {message}")]
    Authentication {
        /// Text of the portal's error banner
        message: String,
    },

    /// A wait or navigation exceeded its timeout.
    #[error("timed out during {step}: {detail}")]
    NavigationTimeout {
        /// Step that was waiting
        step: String,
        /// What the wait was for
        detail: String,
    },

    /// An expected element never appeared.
    #[error("element not found during {step}: {selector}")]
    ElementNotFound {
        /// Step that needed the element
        step: String,
        /// Selector that matched nothing
        selector: String,
    },

    /// Selecting a partition did not take effect.
    #[error("partition {expected} did not take effect, selector shows {actual:?}")]
    PartitionMismatch {
        /// Partition id that was selected
        expected: String,
        /// Value the selector reports afterwards
        actual: Option<String>,
    },

    /// Nothing was extracted from any partition or the aggregate listing.
    #[error("no records extracted after all partitions and the aggregate pass")]
    ExtractionEmpty,

    /// A step exhausted its retry budget.
    #[error("step {step} failed after {attempts} attempts: {source}")]
    StepFailure {
        /// Name of the step
        step: String,
        /// Attempts made before giving up
        attempts: u32,
        /// Error from the last attempt
        source: Box<ScrapeError>,
    },

    /// Every partition of a chunk failed.
    #[error("all {count} partitions in a chunk failed, last error: {source}")]
    AllPartitionsFailed {
        /// Partitions in the chunk
        count: usize,
        /// Error from the last partition to fail
        source: Box<ScrapeError>,
    },

    /// Credentials were rejected before any browser work.
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),

    /// Any other browser failure.
    #[error("browser error during {step}: {source}")]
    Browser {
        /// Step that issued the browser call
        step: String,
        /// Underlying browser failure
        source: BrowserError,
    },

    /// Configuration could not be used.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl ScrapeError {
    /// Whether `RetryPolicy` may run the failed step again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ScrapeError::NavigationTimeout { .. } | ScrapeError::ElementNotFound { .. } => true,
            ScrapeError::Browser { source, .. } => source.is_transient(),
            _ => false,
        }
    }

    /// The innermost error, looking through retry and escalation wrappers.
    #[must_use]
    pub fn root_cause(&self) -> &ScrapeError {
        match self {
            ScrapeError::StepFailure { source, .. }
            | ScrapeError::AllPartitionsFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Whether this failure (or its root cause) is a rejected login.
    #[must_use]
    pub fn is_authentication(&self) -> bool {
        matches!(self.root_cause(), ScrapeError::Authentication { .. })
    }
}

impl From<CoreError> for ScrapeError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Config(e) => ScrapeError::Config(e),
            CoreError::InvalidCredentials(msg) => ScrapeError::InvalidCredentials(msg),
        }
    }
}

/// Result alias for pipeline operations.
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Attach the name of the pipeline step to a browser failure.
pub(crate) trait StepContext<T> {
    fn during(self, step: &str) -> Result<T>;
}

impl<T> StepContext<T> for std::result::Result<T, BrowserError> {
    fn during(self, step: &str) -> Result<T> {
        self.map_err(|err| match err {
            BrowserError::Timeout(detail) => ScrapeError::NavigationTimeout {
                step: step.to_string(),
                detail,
            },
            BrowserError::SelectorNotFound(selector) => ScrapeError::ElementNotFound {
                step: step.to_string(),
                selector,
            },
            source => ScrapeError::Browser {
                step: step.to_string(),
                source,
            },
        })
    }
}
