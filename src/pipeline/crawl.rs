// src/pipeline/crawl.rs

//! Listing crawl pipeline.

use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::{Config, CrawlSession};
use crate::pipeline::{
    BatchOutcome, BatchScheduler, ConfigEnumerator, CrawlStats, ReconcileMode, ReconcileReport,
    Reconciler,
};
use crate::services::{ConfigCrawler, CrawlLimits, SourceClient, TransportMode};
use crate::storage::{CatalogStore, SnapshotStore};

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub session: CrawlSession,
    pub stats: CrawlStats,
    pub report: ReconcileReport,
    pub transport_mode: TransportMode,
}

/// Crawl every configuration under the soft and hard time limits.
///
/// When the soft limit passes, crawlers stop between pages and the returned
/// outcome is marked incomplete. Passing the hard limit is an error.
pub async fn crawl_aggregate(config: &Config, client: Arc<SourceClient>) -> Result<BatchOutcome> {
    let enumerator = ConfigEnumerator::new(&config.enumeration);
    let configurations = enumerator.enumerate();
    log::info!(
        "Crawling {} configurations in batches of {}",
        configurations.len(),
        config.crawler.batch_size()
    );

    let crawler = ConfigCrawler::new(client, CrawlLimits::from_config(config));
    let scheduler = BatchScheduler::new(crawler, &config.crawler);

    let cancel = CancellationToken::new();
    let soft_limit = config.crawler.soft_time_limit();
    let timer = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(soft_limit).await;
            log::warn!(
                "Soft time limit of {}s reached; finishing with a partial crawl",
                soft_limit.as_secs()
            );
            cancel.cancel();
        })
    };

    let result = tokio::time::timeout(
        config.crawler.hard_time_limit(),
        scheduler.run(configurations, &cancel),
    )
    .await;
    timer.abort();

    result.map_err(|_| {
        cancel.cancel();
        AppError::HardTimeLimit {
            limit_secs: config.crawler.hard_time_limit_secs,
        }
    })
}

/// Run one full crawl and reconcile it into the stores.
///
/// A run-level failure leaves the catalog untouched and records the session
/// as failed.
pub async fn run_crawler(
    config: &Config,
    client: Arc<SourceClient>,
    catalog: &dyn CatalogStore,
    snapshots: &dyn SnapshotStore,
) -> Result<RunSummary> {
    let start_time = Utc::now();
    let mut session = CrawlSession::start();
    catalog.begin_session(&session).await?;
    log::info!("Crawl session {} started", session.session_id);

    match execute(config, Arc::clone(&client), catalog, snapshots, &mut session).await {
        Ok((stats, report)) => {
            let elapsed = Utc::now() - start_time;
            log::info!(
                "Session {} completed in {}s: {} found, {} new, {} updated, {} removed",
                session.session_id,
                elapsed.num_seconds(),
                session.total_found,
                session.new_count,
                session.updated_count,
                session.removed_count
            );
            Ok(RunSummary {
                session,
                stats,
                report,
                transport_mode: client.mode(),
            })
        }
        Err(e) => {
            log::error!("Session {} failed: {}", session.session_id, e);
            session.fail(&e);
            if let Err(record_err) = catalog.record_session(&session).await {
                log::error!(
                    "Could not record failed session {}: {}",
                    session.session_id,
                    record_err
                );
            }
            Err(e)
        }
    }
}

async fn execute(
    config: &Config,
    client: Arc<SourceClient>,
    catalog: &dyn CatalogStore,
    snapshots: &dyn SnapshotStore,
    session: &mut CrawlSession,
) -> Result<(CrawlStats, ReconcileReport)> {
    let outcome = crawl_aggregate(config, client).await?;
    let mode = if outcome.complete {
        ReconcileMode::Complete
    } else {
        ReconcileMode::Partial
    };

    let report = Reconciler::new(catalog, snapshots)
        .reconcile(outcome.snapshot, mode, session)
        .await?;
    Ok((outcome.stats, report))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::error::TransportError;
    use crate::models::{FilterExpression, SessionStatus};
    use crate::services::source::stub::*;
    use crate::services::{SearchResponse, Transport};
    use crate::storage::{LocalCatalogStore, LocalStorage};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.source = fast_config();
        config.crawler.batch_pause_ms = 0;
        config.crawler.failover_batch_pause_ms = 0;
        config.crawler.failure_backoff_ms = 0;
        config.enumeration.filters = vec![FilterExpression::new(
            "Hidden_N_CarType_N",
            "q=(And.Hidden.N._.CarType.N.)",
        )];
        config.enumeration.sort_orders = vec!["ModifiedDate".into(), "PriceAsc".into()];
        config.enumeration.page_sizes = vec![100];
        config
    }

    /// Serves `ids` as one page at offset 0 for every configuration.
    fn catalog_stub(ids: &'static [&'static str]) -> Arc<StubTransport> {
        StubTransport::new("primary", move |_, url| {
            if url.contains("|0|100") {
                Ok(response_with_ids(ids))
            } else {
                Ok(SearchResponse::default())
            }
        })
    }

    fn client(config: &Config, primary: Arc<dyn Transport>) -> Arc<SourceClient> {
        Arc::new(SourceClient::new(&config.source, primary, None))
    }

    /// Every request takes `delay` and returns a fresh page.
    struct SlowTransport {
        delay: Duration,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Transport for SlowTransport {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn get(&self, _url: &str) -> std::result::Result<SearchResponse, TransportError> {
            tokio::time::sleep(self.delay).await;
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(response_with_ids(&[format!("slow-{call}")]))
        }
    }

    fn slow(delay_secs: u64) -> Arc<SlowTransport> {
        Arc::new(SlowTransport {
            delay: Duration::from_secs(delay_secs),
            calls: AtomicUsize::new(0),
        })
    }

    #[tokio::test]
    async fn test_bootstrap_then_incremental() {
        let tmp = TempDir::new().unwrap();
        let catalog = LocalCatalogStore::open(tmp.path()).await.unwrap();
        let snapshots = LocalStorage::new(tmp.path());
        let config = test_config();

        let first = run_crawler(
            &config,
            client(&config, catalog_stub(&["1", "2", "3"])),
            &catalog,
            &snapshots,
        )
        .await
        .unwrap();

        assert!(first.report.bootstrap);
        assert_eq!(first.session.status, SessionStatus::Completed);
        assert_eq!(first.session.total_found, 3);
        assert_eq!(first.session.new_count, 3);
        assert_eq!(first.stats.configurations, 2);
        assert_eq!(first.stats.records_seen, 6);
        assert_eq!(first.transport_mode, TransportMode::Primary);

        let second = run_crawler(
            &config,
            client(&config, catalog_stub(&["2", "3", "4"])),
            &catalog,
            &snapshots,
        )
        .await
        .unwrap();

        assert!(!second.report.bootstrap);
        assert_eq!(second.session.new_count, 1);
        assert_eq!(second.session.removed_count, 1);
        assert_eq!(second.session.updated_count, 0);
        assert_eq!(catalog.active_count().await.unwrap(), 3);
        assert_eq!(catalog.listing_count().await, 4);

        let stored = catalog
            .load_session(&second.session.session_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Completed);
        assert_eq!(stored.new_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_soft_limit_reconciles_partially() {
        let tmp = TempDir::new().unwrap();
        let catalog = LocalCatalogStore::open(tmp.path()).await.unwrap();
        let snapshots = LocalStorage::new(tmp.path());

        let mut config = test_config();
        config.crawler.soft_time_limit_secs = 25;
        config.crawler.hard_time_limit_secs = 1000;

        let summary = run_crawler(&config, client(&config, slow(10)), &catalog, &snapshots)
            .await
            .unwrap();

        assert_eq!(summary.report.mode, ReconcileMode::Partial);
        assert_eq!(summary.session.status, SessionStatus::Completed);
        assert_eq!(summary.session.removed_count, 0);
        // Two concurrent crawlers, three pages each before the limit.
        assert_eq!(summary.session.total_found, 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hard_limit_fails_run_without_changes() {
        let tmp = TempDir::new().unwrap();
        let catalog = LocalCatalogStore::open(tmp.path()).await.unwrap();
        let snapshots = LocalStorage::new(tmp.path());

        let mut config = test_config();
        config.crawler.soft_time_limit_secs = 1000;
        config.crawler.hard_time_limit_secs = 15;

        let err = run_crawler(&config, client(&config, slow(10)), &catalog, &snapshots)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::HardTimeLimit { limit_secs: 15 }));

        assert_eq!(catalog.listing_count().await, 0);
        assert!(snapshots.load_snapshot().await.unwrap().is_none());

        let sessions = catalog.recent_sessions(1).await.unwrap();
        assert_eq!(sessions[0].status, SessionStatus::Failed);
        assert!(
            sessions[0]
                .error_message
                .as_deref()
                .unwrap()
                .contains("hard time limit")
        );
        assert_eq!(sessions[0].new_count, 0);
    }

    #[tokio::test]
    async fn test_crawl_aggregate_dedups() {
        let config = test_config();
        let outcome = crawl_aggregate(&config, client(&config, catalog_stub(&["a", "b"])))
            .await
            .unwrap();

        assert!(outcome.complete);
        assert_eq!(outcome.snapshot.len(), 2);
        assert_eq!(outcome.stats.records_seen, 4);
    }
}
