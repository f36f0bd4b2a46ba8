//! Farecard Scanner - Authenticated, partition-aware card balance extraction.
//!
//! This crate drives browser lanes through the portal login, enumerates the
//! partition selector, extracts the results table per partition with bounded
//! concurrency and reconciles the partition union with the aggregate listing.
//!
//! # Features
//!
//! - Bounded retry of every transient browser step
//! - Login state machine with optional modal handling
//! - Chunked fan-out, at most `max_parallel` lanes open at once
//! - Malformed-row tolerant table parsing (bulk or row-by-row)
//! - Card-number keyed reconciliation
//!
//! # Example
//!
//! ```rust,ignore
//! use farecard_core::{AppConfig, Credentials};
//! use farecard_scanner::Pipeline;
//!
//! let pipeline = Pipeline::launch(AppConfig::load_with_env()?).await?;
//! let result = pipeline.run(&Credentials::new("user@example.com", "secret")?).await;
//! pipeline.shutdown().await?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod error;
pub mod partition;
pub mod pipeline;
pub mod reconcile;
pub mod retry;
pub mod scripts;
pub mod session;
pub mod table;

pub use error::{Result, ScrapeError};
pub use partition::{classify, PartitionCatalog, PartitionOrchestrator};
pub use pipeline::{run_pipeline, scrape_transport_cards, Pipeline};
pub use reconcile::{reconcile, Reconciled};
pub use retry::{poll_until, with_retry, RetryPolicy};
pub use session::SessionEstablisher;
pub use table::{parse_rows, TableExtractor};
