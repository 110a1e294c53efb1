// src/pipeline/batch.rs

//! Batched, concurrent crawling of all configurations.
//!
//! Configurations run in fixed-size batches. Every crawler writes into one
//! shared [`DedupAggregate`] as soon as it finishes, so overlapping result
//! sets collapse to one record per source id.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::models::{CanonicalRecord, Configuration, CrawlerConfig, Snapshot};
use crate::services::{ConfigCrawler, Termination, TransportMode};

/// Cross-configuration dedup map. The first record inserted for an id wins.
#[derive(Debug, Default)]
pub struct DedupAggregate {
    records: DashMap<String, CanonicalRecord>,
}

impl DedupAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert unless the id is already present. Returns whether it was inserted.
    pub fn insert_if_absent(&self, record: CanonicalRecord) -> bool {
        match self.records.entry(record.source_id.clone()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(record);
                true
            }
        }
    }

    /// Insert every record not yet present. Returns the number inserted.
    pub fn merge(&self, records: impl IntoIterator<Item = CanonicalRecord>) -> usize {
        records
            .into_iter()
            .map(|record| self.insert_if_absent(record))
            .filter(|inserted| *inserted)
            .count()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Snapshot {
        self.records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn into_snapshot(self) -> Snapshot {
        self.records.into_iter().collect()
    }
}

/// Completion statistics of one scheduler run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub configurations: usize,
    /// Crawlers that returned, whatever their termination
    pub completed: usize,
    /// Crawlers that panicked or were aborted
    pub failed: usize,
    /// Configurations never started because the run was cancelled
    pub skipped: usize,
    pub records_seen: usize,
    pub dropped_records: usize,
    pub failed_pages: usize,
    pub unique: usize,
}

/// Deduplicated aggregate of a scheduler run.
#[derive(Debug, Clone)]
pub struct BatchOutcome {
    pub snapshot: Snapshot,
    pub stats: CrawlStats,
    /// `false` when the run was cancelled before every configuration finished
    pub complete: bool,
}

/// Per-crawler report sent back from a batch task.
struct CrawlReport {
    label: String,
    records: usize,
    inserted: usize,
    dropped: usize,
    failed_pages: usize,
    termination: Termination,
}

/// Runs [`ConfigCrawler`]s in bounded concurrent batches.
pub struct BatchScheduler {
    crawler: ConfigCrawler,
    batch_size: usize,
    batch_pause: Duration,
    failover_batch_pause: Duration,
}

impl BatchScheduler {
    pub fn new(crawler: ConfigCrawler, config: &CrawlerConfig) -> Self {
        Self {
            crawler,
            batch_size: config.batch_size(),
            batch_pause: Duration::from_millis(config.batch_pause_ms),
            failover_batch_pause: Duration::from_millis(config.failover_batch_pause_ms),
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Pause applied after a batch for the given transport mode.
    pub fn pause_for(&self, mode: TransportMode) -> Duration {
        match mode {
            TransportMode::Primary => self.batch_pause,
            TransportMode::Secondary => self.failover_batch_pause,
        }
    }

    /// Crawl every configuration and return the deduplicated aggregate.
    pub async fn run(
        &self,
        configurations: Vec<Configuration>,
        cancel: &CancellationToken,
    ) -> BatchOutcome {
        let started = Instant::now();
        let aggregate = Arc::new(DedupAggregate::new());
        let mut stats = CrawlStats {
            configurations: configurations.len(),
            ..CrawlStats::default()
        };

        let batches: Vec<&[Configuration]> = configurations.chunks(self.batch_size).collect();
        let batch_total = batches.len();

        for (index, batch) in batches.into_iter().enumerate() {
            if cancel.is_cancelled() {
                log::warn!(
                    "Cancelled before batch {}/{}; skipping remaining configurations",
                    index + 1,
                    batch_total
                );
                stats.skipped = configurations.len() - index * self.batch_size;
                break;
            }

            let mut tasks = JoinSet::new();
            for configuration in batch {
                let crawler = self.crawler.clone();
                let configuration = configuration.clone();
                let cancel = cancel.clone();
                let aggregate = Arc::clone(&aggregate);
                tasks.spawn(async move {
                    let crawl = crawler.crawl(&configuration, &cancel).await;
                    let records = crawl.records.len();
                    let inserted = aggregate.merge(crawl.records);
                    CrawlReport {
                        label: crawl.label,
                        records,
                        inserted,
                        dropped: crawl.dropped_records,
                        failed_pages: crawl.failed_pages,
                        termination: crawl.termination,
                    }
                });
            }

            while let Some(joined) = tasks.join_next().await {
                match joined {
                    Ok(report) => {
                        stats.completed += 1;
                        stats.records_seen += report.records;
                        stats.dropped_records += report.dropped;
                        stats.failed_pages += report.failed_pages;
                        log::debug!(
                            "{}: {} new of {} records ({})",
                            report.label,
                            report.inserted,
                            report.records,
                            report.termination
                        );
                    }
                    Err(e) => {
                        stats.failed += 1;
                        log::error!("Configuration crawl failed: {}", e);
                    }
                }
            }

            log::info!(
                "Batch {}/{} done: {} unique listings ({:.1?} elapsed)",
                index + 1,
                batch_total,
                aggregate.len(),
                started.elapsed()
            );

            if index + 1 < batch_total {
                let pause = self.pause_for(self.crawler.client().mode());
                if !pause.is_zero() {
                    tokio::select! {
                        _ = tokio::time::sleep(pause) => {}
                        _ = cancel.cancelled() => {}
                    }
                }
            }
        }

        let complete = !cancel.is_cancelled();
        let snapshot = match Arc::try_unwrap(aggregate) {
            Ok(aggregate) => aggregate.into_snapshot(),
            Err(shared) => shared.snapshot(),
        };
        stats.unique = snapshot.len();

        log::info!(
            "Crawled {}/{} configurations ({} failed): {} records, {} unique",
            stats.completed,
            stats.configurations,
            stats.failed,
            stats.records_seen,
            stats.unique
        );

        BatchOutcome {
            snapshot,
            stats,
            complete,
        }
    }
}
