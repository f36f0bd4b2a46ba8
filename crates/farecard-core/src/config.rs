//! Configuration management for farecard.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides. Credentials are never part of the config.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/farecard/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Portal URLs and selectors
    pub portal: PortalConfig,
    /// Timeout tiers
    pub timeouts: TimeoutConfig,
    /// Retry budgets
    pub retry: RetryConfig,
    /// Partition enumeration and fan-out
    pub partitions: PartitionConfig,
    /// Outgoing request filter
    pub filter: FilterConfig,
    /// Browser process settings
    pub browser: BrowserSettings,
    /// Table extraction settings
    pub extraction: ExtractionConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from an explicit path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `FARECARD_HEADLESS`: Override browser headless mode (true/false)
    /// - `FARECARD_MAX_PARALLEL`: Override the number of concurrent lanes
    /// - `FARECARD_EXTRACTION_STRATEGY`: `bulk_scan` or `row_iteration`
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply `FARECARD_*` environment overrides in place.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("FARECARD_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Ok(val) = std::env::var("FARECARD_MAX_PARALLEL") {
            if let Ok(max) = val.parse() {
                self.partitions.max_parallel = max;
                tracing::debug!("Override partitions.max_parallel from env: {}", max);
            }
        }

        if let Ok(val) = std::env::var("FARECARD_EXTRACTION_STRATEGY") {
            match val.as_str() {
                "bulk_scan" => self.extraction.strategy = ExtractionStrategy::BulkScan,
                "row_iteration" => self.extraction.strategy = ExtractionStrategy::RowIteration,
                other => tracing::warn!("Ignoring unknown extraction strategy '{}'", other),
            }
        }
    }

    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.partitions.max_parallel == 0 {
            return Err(invalid("partitions.max_parallel", "must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "must be at least 1"));
        }
        if self.retry.auth_attempts == 0 {
            return Err(invalid("retry.auth_attempts", "must be at least 1"));
        }
        if self.retry.extraction_attempts == 0 {
            return Err(invalid("retry.extraction_attempts", "must be at least 1"));
        }
        if self.portal.login_url.is_empty() {
            return Err(invalid("portal.login_url", "must not be empty"));
        }
        if self.portal.target_url.is_empty() {
            return Err(invalid("portal.target_url", "must not be empty"));
        }
        if url::Url::parse(&self.portal.login_url).is_err() {
            return Err(invalid("portal.login_url", "not a valid URL"));
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/farecard/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs =
            ProjectDirs::from("com", "farecard", "farecard").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

/// Portal URLs and the selectors the pipeline interacts with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    /// Login page
    pub login_url: String,
    /// Data-entry page holding the results table
    pub target_url: String,
    /// Origin treated as same-site by the request filter; derived from
    /// `login_url` when empty
    pub origin: String,
    /// Consent (data protection) modal container
    pub consent_modal: String,
    /// Checkbox inside the consent modal
    pub consent_checkbox: String,
    /// Cookie policy modal container
    pub cookie_modal: String,
    /// Accept button inside the cookie modal
    pub cookie_button: String,
    /// Username input
    pub username_field: String,
    /// Password input
    pub password_field: String,
    /// Login submit button
    pub submit_button: String,
    /// Banner shown on failed login
    pub error_banner: String,
    /// Root table of the target page
    pub results_table: String,
    /// Close button of the post-login informational dialog
    pub interstitial_close: String,
    /// Partition `<select>`
    pub partition_selector: String,
    /// "Show details" checkbox
    pub details_toggle: String,
    /// CSS class marking title/header rows in the results table
    pub header_row_class: String,
}

impl PortalConfig {
    /// Origin used by the request filter.
    #[must_use]
    pub fn effective_origin(&self) -> String {
        if !self.origin.is_empty() {
            return self.origin.clone();
        }
        url::Url::parse(&self.login_url)
            .map(|u| u.origin().ascii_serialization())
            .unwrap_or_default()
    }
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: "https://recargaonline.gvbus.org.br/frmLogin.aspx".to_string(),
            target_url: "https://recargaonline.gvbus.org.br/frmPedidoCargaIndividual.aspx?TituloMenu=Novo+pedido+de+carga&NumDias=0&InserePedido=s&FatorAnterior=0&ChaveGrupo=&ValorCarga=0&CodPedidoCopy=0&CodAnoCopy=".to_string(),
            origin: String::new(),
            consent_modal: "#Toolbar_modalTermoAceiteLGPD".to_string(),
            consent_checkbox: "#Toolbar_modalTermoAceiteLGPD input[type=checkbox]".to_string(),
            cookie_modal: "#modalPoliticaCookies".to_string(),
            cookie_button: "#modalPoliticaCookies input.button".to_string(),
            username_field: "#txtEmailTitular".to_string(),
            password_field: "#txtSenha".to_string(),
            submit_button: "#btnLogin".to_string(),
            error_banner: "#lblErro".to_string(),
            results_table: "table#gridPedidos".to_string(),
            interstitial_close: "#modalAviso .close".to_string(),
            partition_selector: "select#ddlGrupo".to_string(),
            details_toggle: "#chkGrid".to_string(),
            header_row_class: "title".to_string(),
        }
    }
}

/// The two timeout tiers every suspension point draws from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Element waits and clicks
    pub default_secs: u64,
    /// Page loads and full navigation+settle cycles
    pub extended_secs: u64,
    /// Explicit settle delay after toggling the details checkbox
    pub settle_ms: u64,
}

impl TimeoutConfig {
    /// Default tier.
    #[must_use]
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    /// Extended tier.
    #[must_use]
    pub fn extended_timeout(&self) -> Duration {
        Duration::from_secs(self.extended_secs)
    }

    /// Settle delay.
    #[must_use]
    pub fn settle(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            default_secs: 30,
            extended_secs: 60,
            settle_ms: 1000,
        }
    }
}

/// Retry budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Attempts for a single navigation/wait/click step
    pub max_attempts: u32,
    /// Delay between attempts in milliseconds
    pub delay_ms: u64,
    /// Attempts for the whole login sequence (each restarts from the login page)
    pub auth_attempts: u32,
    /// Extraction attempts when a partition yields zero rows
    pub extraction_attempts: u32,
}

impl RetryConfig {
    /// Delay between attempts.
    #[must_use]
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            delay_ms: 2000,
            auth_attempts: 2,
            extraction_attempts: 3,
        }
    }
}

/// Partition enumeration and fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionConfig {
    /// Maximum number of lanes open at once
    pub max_parallel: usize,
    /// Polls of the table signature after switching partition
    pub signature_poll_attempts: u32,
    /// Interval between signature polls in milliseconds
    pub signature_poll_interval_ms: u64,
    /// Option labels (case-insensitive) that are not real partitions
    pub excluded_labels: Vec<String>,
    /// Option values that are not real partitions
    pub sentinel_ids: Vec<String>,
    /// Option labels (case-insensitive) naming the aggregate listing
    pub aggregate_labels: Vec<String>,
}

impl PartitionConfig {
    /// Interval between signature polls.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.signature_poll_interval_ms)
    }
}

impl Default for PartitionConfig {
    fn default() -> Self {
        Self {
            max_parallel: 2,
            signature_poll_attempts: 10,
            signature_poll_interval_ms: 500,
            excluded_labels: ["all", "none", "todos", "todas", "nenhum", "selecione"]
                .iter()
                .map(ToString::to_string)
                .collect(),
            sentinel_ids: ["0", "-1", ""].iter().map(ToString::to_string).collect(),
            aggregate_labels: ["all", "todos", "todas"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

/// Outgoing request filter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// URL substrings of scripts the login form needs (validation, masking)
    pub script_allow_list: Vec<String>,
    /// File extensions always blocked
    pub blocked_extensions: Vec<String>,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            script_allow_list: [
                "jquery",
                "mask",
                "valid",
                "WebResource.axd",
                "ScriptResource.axd",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
            blocked_extensions: [
                "png", "jpg", "jpeg", "gif", "svg", "ico", "webp", "bmp", "css", "woff", "woff2",
                "ttf", "otf", "eot", "mp4", "webm", "mp3", "ogg", "wav",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

/// Browser process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserSettings {
    /// Run browser in headless mode
    pub headless: bool,
    /// Kill leftover headless browsers from crashed runs before launching
    pub sweep_orphans: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
}

impl Default for BrowserSettings {
    fn default() -> Self {
        Self {
            headless: true,
            sweep_orphans: true,
            window_width: 1366,
            window_height: 768,
        }
    }
}

/// How rows are read out of the rendered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionStrategy {
    /// One script evaluation returns every row
    #[default]
    BulkScan,
    /// Count rows, then read each row with its own evaluation
    RowIteration,
}

/// Table extraction settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Strategy used for every listing
    pub strategy: ExtractionStrategy,
}
