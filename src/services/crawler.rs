// src/services/crawler.rs

//! Per-configuration pagination.
//!
//! A [`ConfigCrawler`] walks the pages of one [`Configuration`] strictly in
//! sequence until one of the run-length heuristics fires or the page budget is
//! spent. Reaching a limit is a normal outcome, reported as a [`Termination`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::models::{CanonicalRecord, Config, Configuration, RawRecord};
use crate::services::{RecordNormalizer, SourceClient};

/// Why a configuration stopped paginating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Too many pages in a row failed to fetch
    FailureLimit,
    /// Too many pages in a row came back empty
    EmptyPageLimit,
    /// Too many pages in a row repeated the previous page
    DuplicatePageLimit,
    /// The page budget for this page size was spent
    PageBudget,
    /// The run was cancelled
    Cancelled,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::FailureLimit => "consecutive failures",
            Self::EmptyPageLimit => "consecutive empty pages",
            Self::DuplicatePageLimit => "consecutive duplicate pages",
            Self::PageBudget => "page budget",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Fingerprint of one fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSignature {
    pub first_id: Option<String>,
    pub last_id: Option<String>,
    pub count: usize,
}

impl PageSignature {
    pub fn of(results: &[RawRecord]) -> Self {
        Self {
            first_id: results.first().and_then(raw_id),
            last_id: results.last().and_then(raw_id),
            count: results.len(),
        }
    }
}

fn raw_id(raw: &RawRecord) -> Option<String> {
    match raw.get("Id")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Thresholds and pauses for one configuration's pagination.
#[derive(Debug, Clone)]
pub struct CrawlLimits {
    pub max_consecutive_failures: u32,
    pub max_consecutive_empty: u32,
    pub max_consecutive_duplicates: u32,
    pub max_pages: usize,
    pub record_horizon: usize,
    pub request_delay: Duration,
    pub failure_backoff: Duration,
}

impl CrawlLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_consecutive_failures: config.crawler.max_consecutive_failures,
            max_consecutive_empty: config.crawler.max_consecutive_empty,
            max_consecutive_duplicates: config.crawler.max_consecutive_duplicates,
            max_pages: config.crawler.max_pages,
            record_horizon: config.crawler.record_horizon,
            request_delay: config.source.request_delay(),
            failure_backoff: Duration::from_millis(config.crawler.failure_backoff_ms),
        }
    }

    /// Pages one configuration may fetch: `min(max_pages, horizon / page_size + 10)`.
    pub fn page_budget(&self, page_size: usize) -> usize {
        self.max_pages
            .min(self.record_horizon / page_size.max(1) + 10)
    }
}

/// Result of crawling one configuration.
#[derive(Debug, Clone)]
pub struct ConfigCrawl {
    pub label: String,
    /// Normalized records in fetch order, duplicates included
    pub records: Vec<CanonicalRecord>,
    pub pages_fetched: usize,
    pub failed_pages: usize,
    pub dropped_records: usize,
    pub termination: Termination,
}

/// Drives pagination for one configuration at a time.
#[derive(Clone)]
pub struct ConfigCrawler {
    client: Arc<SourceClient>,
    normalizer: RecordNormalizer,
    limits: CrawlLimits,
}

impl ConfigCrawler {
    pub fn new(client: Arc<SourceClient>, limits: CrawlLimits) -> Self {
        Self {
            client,
            normalizer: RecordNormalizer::new(),
            limits,
        }
    }

    pub fn client(&self) -> &SourceClient {
        &self.client
    }

    /// Crawl one configuration until a termination heuristic fires.
    pub async fn crawl(
        &self,
        configuration: &Configuration,
        cancel: &CancellationToken,
    ) -> ConfigCrawl {
        let label = configuration.label();
        let budget = self.limits.page_budget(configuration.page_size);
        log::debug!("{label}: starting (page budget {budget})");

        let mut records = Vec::new();
        let mut pages_fetched = 0;
        let mut failed_pages = 0;
        let mut dropped_records = 0;

        let mut consecutive_failures = 0;
        let mut consecutive_empty = 0;
        let mut consecutive_duplicates = 0;
        let mut last_signature: Option<PageSignature> = None;
        let mut page = 0;

        let termination = loop {
            if cancel.is_cancelled() {
                break Termination::Cancelled;
            }
            if consecutive_failures >= self.limits.max_consecutive_failures {
                break Termination::FailureLimit;
            }
            if consecutive_empty >= self.limits.max_consecutive_empty {
                break Termination::EmptyPageLimit;
            }
            if consecutive_duplicates >= self.limits.max_consecutive_duplicates {
                break Termination::DuplicatePageLimit;
            }
            if page >= budget {
                break Termination::PageBudget;
            }

            match self.client.fetch_page(configuration, page).await {
                Err(e) => {
                    consecutive_failures += 1;
                    failed_pages += 1;
                    log::warn!("{label}: page {page} failed: {e}");
                    page += 1;
                    pause(self.limits.failure_backoff, cancel).await;
                    continue;
                }
                Ok(response) if response.results.is_empty() => {
                    pages_fetched += 1;
                    consecutive_empty += 1;
                }
                Ok(response) => {
                    pages_fetched += 1;
                    consecutive_failures = 0;
                    consecutive_empty = 0;

                    let signature = PageSignature::of(&response.results);
                    if last_signature.as_ref() == Some(&signature) {
                        consecutive_duplicates += 1;
                        log::debug!("{label}: page {page} repeats the previous page");
                    } else {
                        consecutive_duplicates = 0;
                        last_signature = Some(signature);
                    }

                    // Repeated pages still contribute; dedup happens downstream.
                    for raw in &response.results {
                        match self.normalizer.normalize(raw) {
                            Ok(record) => records.push(record),
                            Err(e) => {
                                dropped_records += 1;
                                log::warn!("{label}: {e}");
                            }
                        }
                    }
                }
            }

            page += 1;
            pause(self.limits.request_delay, cancel).await;
        };

        log::info!(
            "{label}: {} records from {pages_fetched} pages, stopped on {termination}",
            records.len()
        );

        ConfigCrawl {
            label,
            records,
            pages_fetched,
            failed_pages,
            dropped_records,
            termination,
        }
    }
}

/// Sleep unless cancelled first.
async fn pause(duration: Duration, cancel: &CancellationToken) {
    if duration.is_zero() {
        return;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => {}
        _ = cancel.cancelled() => {}
    }
}
