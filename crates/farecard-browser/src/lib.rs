//! Browser lanes for the farecard pipeline.
//!
//! Provides the page-action seam the pipeline is written against, a
//! Chromium-backed implementation with per-request filtering, and process
//! hygiene (orphan sweep, signal-driven shutdown).

pub mod actions;
pub mod engine;
pub mod error;
pub mod filter;
pub mod shutdown;
pub mod sweep;

pub use actions::{BrowserActions, LaneLauncher, WaitState};
pub use engine::{BrowserEngine, ChromiumPage};
pub use error::{BrowserError, Result};
pub use filter::{FilterDecision, ResourceFilter, ResourceKind};
pub use shutdown::{spawn_shutdown_listener, spawn_shutdown_on};
pub use sweep::sweep_orphaned_browsers;
