//! Farecard Core - Foundation crate for the transport-card extraction pipeline.
//!
//! This crate provides shared types, error handling and configuration management
//! that the browser and scanner crates depend on.
//!
//! # Modules
//!
//! - [`error`] - Central error types using thiserror
//! - [`config`] - TOML-based configuration with XDG paths
//! - [`types`] - Domain types (`Credentials`, `Partition`, `CardRecord`, `ExtractionResult`)
//!
//! # Example
//!
//! ```rust
//! use farecard_core::{AppConfig, Credentials};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::default();
//! config.validate()?;
//!
//! let credentials = Credentials::new("operator@example.com", "secret")?;
//! assert_eq!(credentials.username(), "operator@example.com");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod config;
pub mod error;
pub mod types;

// Re-export commonly used types
pub use config::{
    AppConfig, BrowserSettings, ExtractionConfig, ExtractionStrategy, FilterConfig,
    PartitionConfig, PortalConfig, RetryConfig, TimeoutConfig,
};
pub use error::{ConfigError, ConfigResult, CoreError};
pub use types::{
    parse_balance, CardRecord, Credentials, ExtractionResult, Partition, RecordOrigin, RowWarning,
};
