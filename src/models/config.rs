//! Application configuration structures.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::FilterExpression;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Upstream API and transport settings
    #[serde(default)]
    pub source: SourceConfig,

    /// Pagination heuristics and batch scheduling
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Enumeration axes (filters × sorts × page sizes)
    #[serde(default)]
    pub enumeration: EnumerationConfig,

    /// Storage locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Log output
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Apply the deployment environment overrides.
    ///
    /// - `MAX_CONCURRENT_REQUESTS`: `crawler.max_concurrent`
    /// - `REQUEST_DELAY`: seconds between pages, `source.request_delay_ms`
    ///
    /// Returns one message per ignored value. Overrides are applied before the
    /// logger exists, so callers report these once logging is up.
    pub fn apply_env_overrides(&mut self) -> Vec<String> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Vec<String> {
        let mut ignored = Vec::new();
        if let Some(value) = lookup("MAX_CONCURRENT_REQUESTS") {
            match value.trim().parse::<usize>() {
                Ok(n) => self.crawler.max_concurrent = n,
                Err(e) => {
                    ignored.push(format!("Ignoring MAX_CONCURRENT_REQUESTS={value:?}: {e}"))
                }
            }
        }
        if let Some(value) = lookup("REQUEST_DELAY") {
            match value.trim().parse::<f64>() {
                Ok(secs) if secs >= 0.0 => {
                    self.source.request_delay_ms = (secs * 1000.0).round() as u64
                }
                _ => ignored.push(format!(
                    "Ignoring REQUEST_DELAY={value:?}: not a non-negative number"
                )),
            }
        }
        ignored
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.source.base_url.trim().is_empty() {
            return Err(AppError::validation("source.base_url is empty"));
        }
        if !self.source.base_url.starts_with("http") {
            return Err(AppError::validation("source.base_url must be an http(s) URL"));
        }
        if self.source.user_agent.trim().is_empty() {
            return Err(AppError::validation("source.user_agent is empty"));
        }
        if self.source.timeout_secs == 0 {
            return Err(AppError::validation("source.timeout_secs must be > 0"));
        }
        if self.source.retry_attempts == 0 {
            return Err(AppError::validation("source.retry_attempts must be > 0"));
        }
        if self.crawler.max_concurrent == 0 {
            return Err(AppError::validation("crawler.max_concurrent must be > 0"));
        }
        if self.crawler.batch_cap == 0 {
            return Err(AppError::validation("crawler.batch_cap must be > 0"));
        }
        if self.crawler.max_pages == 0 {
            return Err(AppError::validation("crawler.max_pages must be > 0"));
        }
        if self.crawler.hard_time_limit_secs < self.crawler.soft_time_limit_secs {
            return Err(AppError::validation(
                "crawler.hard_time_limit_secs must be >= crawler.soft_time_limit_secs",
            ));
        }
        if self.enumeration.filters.is_empty() {
            return Err(AppError::validation("No filters defined"));
        }
        if self.enumeration.sort_orders.is_empty() {
            return Err(AppError::validation("No sort orders defined"));
        }
        if self.enumeration.page_sizes.is_empty() {
            return Err(AppError::validation("No page sizes defined"));
        }
        if self.enumeration.page_sizes.contains(&0) {
            return Err(AppError::validation("Page sizes must be > 0"));
        }
        if let Some(filter) = self
            .enumeration
            .filters
            .iter()
            .find(|f| !f.expression.starts_with("q=("))
        {
            return Err(AppError::validation(format!(
                "Filter {} must be of the form q=(...)",
                filter.name
            )));
        }
        Ok(())
    }
}

/// Upstream API and transport settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Search endpoint
    #[serde(default = "defaults::base_url")]
    pub base_url: String,

    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Request timeout in seconds
    #[serde(default = "defaults::timeout")]
    pub timeout_secs: u64,

    /// Attempts per transport for generic failures
    #[serde(default = "defaults::retry_attempts")]
    pub retry_attempts: u32,

    /// Pause between attempts in milliseconds
    #[serde(default = "defaults::retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Delay between pages of one configuration in milliseconds
    #[serde(default = "defaults::request_delay")]
    pub request_delay_ms: u64,

    /// Ask the upstream for the total count hint
    #[serde(default = "defaults::include_count")]
    pub include_count: bool,

    /// External HTTP client used as secondary transport; empty disables it
    #[serde(default = "defaults::curl_binary")]
    pub curl_binary: String,

    /// Headers added to (or replacing) the default browser-like headers
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
}

impl SourceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            base_url: defaults::base_url(),
            user_agent: defaults::user_agent(),
            timeout_secs: defaults::timeout(),
            retry_attempts: defaults::retry_attempts(),
            retry_backoff_ms: defaults::retry_backoff(),
            request_delay_ms: defaults::request_delay(),
            include_count: defaults::include_count(),
            curl_binary: defaults::curl_binary(),
            extra_headers: BTreeMap::new(),
        }
    }
}

/// Pagination heuristics and batch scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// Configured concurrency; batches never exceed `batch_cap` either
    #[serde(default = "defaults::max_concurrent")]
    pub max_concurrent: usize,

    /// Hard cap on simultaneously crawled configurations
    #[serde(default = "defaults::batch_cap")]
    pub batch_cap: usize,

    /// Pause after each batch in milliseconds
    #[serde(default = "defaults::batch_pause")]
    pub batch_pause_ms: u64,

    /// Pause after each batch once the client runs on the secondary transport
    #[serde(default = "defaults::failover_batch_pause")]
    pub failover_batch_pause_ms: u64,

    /// Pause after a failed page in milliseconds
    #[serde(default = "defaults::failure_backoff")]
    pub failure_backoff_ms: u64,

    #[serde(default = "defaults::max_consecutive_failures")]
    pub max_consecutive_failures: u32,

    #[serde(default = "defaults::max_consecutive_empty")]
    pub max_consecutive_empty: u32,

    #[serde(default = "defaults::max_consecutive_duplicates")]
    pub max_consecutive_duplicates: u32,

    /// Absolute page ceiling per configuration
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Listings one configuration is expected to reach at most
    #[serde(default = "defaults::record_horizon")]
    pub record_horizon: usize,

    /// Cancel crawling after this many seconds and reconcile what was found
    #[serde(default = "defaults::soft_time_limit")]
    pub soft_time_limit_secs: u64,

    /// Abort the run after this many seconds
    #[serde(default = "defaults::hard_time_limit")]
    pub hard_time_limit_secs: u64,
}

impl CrawlerConfig {
    /// Number of configurations crawled simultaneously.
    pub fn batch_size(&self) -> usize {
        self.max_concurrent.min(self.batch_cap).max(1)
    }

    pub fn soft_time_limit(&self) -> Duration {
        Duration::from_secs(self.soft_time_limit_secs)
    }

    pub fn hard_time_limit(&self) -> Duration {
        Duration::from_secs(self.hard_time_limit_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: defaults::max_concurrent(),
            batch_cap: defaults::batch_cap(),
            batch_pause_ms: defaults::batch_pause(),
            failover_batch_pause_ms: defaults::failover_batch_pause(),
            failure_backoff_ms: defaults::failure_backoff(),
            max_consecutive_failures: defaults::max_consecutive_failures(),
            max_consecutive_empty: defaults::max_consecutive_empty(),
            max_consecutive_duplicates: defaults::max_consecutive_duplicates(),
            max_pages: defaults::max_pages(),
            record_horizon: defaults::record_horizon(),
            soft_time_limit_secs: defaults::soft_time_limit(),
            hard_time_limit_secs: defaults::hard_time_limit(),
        }
    }
}

/// Enumeration axes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumerationConfig {
    #[serde(default = "defaults::filters")]
    pub filters: Vec<FilterExpression>,

    #[serde(default = "defaults::sort_orders")]
    pub sort_orders: Vec<String>,

    #[serde(default = "defaults::page_sizes")]
    pub page_sizes: Vec<usize>,
}

impl Default for EnumerationConfig {
    fn default() -> Self {
        Self {
            filters: defaults::filters(),
            sort_orders: defaults::sort_orders(),
            page_sizes: defaults::page_sizes(),
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory holding the snapshot, change artifacts and catalog
    #[serde(default = "defaults::storage_dir")]
    pub storage_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            storage_dir: defaults::storage_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    use super::FilterExpression;

    // Source defaults
    pub fn base_url() -> String {
        "https://api.encar.com/search/car/list/premium".into()
    }
    pub fn user_agent() -> String {
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 \
         (KHTML, like Gecko) Chrome/140.0.0.0 Safari/537.36"
            .into()
    }
    pub fn timeout() -> u64 {
        30
    }
    pub fn retry_attempts() -> u32 {
        2
    }
    pub fn retry_backoff() -> u64 {
        500
    }
    pub fn request_delay() -> u64 {
        30
    }
    pub fn include_count() -> bool {
        true
    }
    pub fn curl_binary() -> String {
        "curl".into()
    }

    // Crawler defaults
    pub fn max_concurrent() -> usize {
        10
    }
    pub fn batch_cap() -> usize {
        8
    }
    pub fn batch_pause() -> u64 {
        1000
    }
    pub fn failover_batch_pause() -> u64 {
        3000
    }
    pub fn failure_backoff() -> u64 {
        500
    }
    pub fn max_consecutive_failures() -> u32 {
        5
    }
    pub fn max_consecutive_empty() -> u32 {
        3
    }
    pub fn max_consecutive_duplicates() -> u32 {
        2
    }
    pub fn max_pages() -> usize {
        80
    }
    pub fn record_horizon() -> usize {
        20_000
    }
    pub fn soft_time_limit() -> u64 {
        6600
    }
    pub fn hard_time_limit() -> u64 {
        7200
    }

    // Enumeration defaults
    pub fn filters() -> Vec<FilterExpression> {
        [
            ("Hidden_N_CarType_N", "q=(And.Hidden.N._.CarType.N.)"),
            ("Hidden_Y_CarType_N", "q=(And.Hidden.Y._.CarType.N.)"),
            ("Hidden_N_CarType_Y", "q=(And.Hidden.N._.CarType.Y.)"),
            ("Hidden_Y_CarType_Y", "q=(And.Hidden.Y._.CarType.Y.)"),
            ("Or_CarType_N_Y", "q=(Or.CarType.N._.CarType.Y.)"),
            ("Or_CarType_Y_N", "q=(Or.CarType.Y._.CarType.N.)"),
        ]
        .into_iter()
        .map(|(name, expression)| FilterExpression::new(name, expression))
        .collect()
    }
    pub fn sort_orders() -> Vec<String> {
        [
            "ModifiedDate",
            "PriceAsc",
            "PriceDesc",
            "MileageAsc",
            "MileageDesc",
            "Year",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }
    pub fn page_sizes() -> Vec<usize> {
        vec![500, 400, 300, 200, 100, 50, 20]
    }

    pub fn storage_dir() -> PathBuf {
        PathBuf::from("storage")
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.crawler.max_concurrent = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_filter() {
        let mut config = Config::default();
        config.enumeration.filters[0].expression = "(And.Hidden.N.)".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_inverted_time_limits() {
        let mut config = Config::default();
        config.crawler.hard_time_limit_secs = 10;
        config.crawler.soft_time_limit_secs = 20;
        assert!(config.validate().is_err());
    }

    #[test]
    fn batch_size_is_capped() {
        let mut crawler = CrawlerConfig::default();
        assert_eq!(crawler.batch_size(), 8);
        crawler.max_concurrent = 3;
        assert_eq!(crawler.batch_size(), 3);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            [crawler]
            max_concurrent = 4

            [enumeration]
            page_sizes = [100]
            "#,
        )
        .unwrap();

        assert_eq!(config.crawler.max_concurrent, 4);
        assert_eq!(config.crawler.max_consecutive_failures, 5);
        assert_eq!(config.enumeration.page_sizes, vec![100]);
        assert_eq!(config.enumeration.filters.len(), 6);
        assert_eq!(config.source.retry_attempts, 2);
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        let ignored = config.apply_overrides(|key| match key {
            "MAX_CONCURRENT_REQUESTS" => Some("6".into()),
            "REQUEST_DELAY" => Some("0.25".into()),
            _ => None,
        });
        assert!(ignored.is_empty());
        assert_eq!(config.crawler.max_concurrent, 6);
        assert_eq!(config.source.request_delay_ms, 250);
    }

    #[test]
    fn env_overrides_ignore_garbage() {
        let mut config = Config::default();
        let ignored = config.apply_overrides(|_| Some("lots".into()));
        assert_eq!(config.crawler.max_concurrent, 10);
        assert_eq!(config.source.request_delay_ms, 30);
        assert_eq!(ignored.len(), 2);
        assert!(ignored[0].starts_with("Ignoring MAX_CONCURRENT_REQUESTS=\"lots\""));
        assert!(ignored[1].starts_with("Ignoring REQUEST_DELAY=\"lots\""));
    }
}
