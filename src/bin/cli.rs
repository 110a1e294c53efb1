//! Listing Crawler CLI
//!
//! Local execution entry point.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use listing_crawler::{
    error::{AppError, Result},
    models::{Config, SnapshotDocument},
    pipeline::{self, ConfigEnumerator, DiffEngine},
    services::SourceClient,
    storage::{CatalogStore, LocalCatalogStore, LocalStorage, SnapshotStore},
};

/// Listing Crawler - marketplace catalog mirror
#[derive(Parser, Debug)]
#[command(
    name = "listing-crawler",
    version,
    about = "Mirrors a paginated marketplace search API into a local catalog"
)]
struct Cli {
    /// Path to storage directory containing config and data files
    #[arg(short, long, default_value = "storage")]
    storage_dir: PathBuf,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl all configurations and reconcile into the catalog
    Run,

    /// Crawl only and write the deduplicated aggregate as a snapshot document
    Crawl {
        /// Output file (default: {storage_dir}/crawl.json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Compare two snapshot documents
    Diff {
        /// Previous snapshot
        previous: PathBuf,
        /// Current snapshot
        current: PathBuf,
    },

    /// List the enumerated configurations
    Configs,

    /// Validate configuration
    Validate,

    /// Show snapshot and session info
    Info,
}

/// Initialize logging based on verbosity flag.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

/// Storage rooted at the parent of `path`, and the key of `path` within it.
fn output_target(path: &Path) -> Result<(LocalStorage, String)> {
    let key = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| AppError::validation(format!("invalid output path {}", path.display())))?;
    let dir = path.parent().unwrap_or_else(|| Path::new(""));
    Ok((LocalStorage::new(dir), key.to_string()))
}

fn load_document(path: &Path) -> Result<SnapshotDocument> {
    let content = std::fs::read(path)?;
    serde_json::from_slice(&content)
        .map_err(|e| AppError::snapshot(format!("{}: {}", path.display(), e)))
}

/// Main entry point for the CLI application.
#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config_path = cli.storage_dir.join("config.toml");
    let mut config = if config_path.exists() {
        Config::load(&config_path)?
    } else {
        Config::default()
    };
    let ignored_overrides = config.apply_env_overrides();
    if config.paths.storage_dir == PathBuf::from("storage") {
        config.paths.storage_dir = cli.storage_dir.clone();
    }

    init_logging(cli.verbose, &config.logging.level);
    log::info!("Listing crawler starting...");
    for message in &ignored_overrides {
        log::warn!("{}", message);
    }
    log::info!("Loaded configuration from {}", cli.storage_dir.display());

    let storage = LocalStorage::new(&config.paths.storage_dir);

    match cli.command {
        Command::Run => {
            config.validate()?;
            let client = Arc::new(SourceClient::from_config(&config.source)?);
            let catalog = LocalCatalogStore::open(&config.paths.storage_dir).await?;

            let summary = pipeline::run_crawler(&config, client, &catalog, &storage).await?;

            log::info!(
                "Run complete: {} found, {} new, {} updated, {} removed ({} configurations failed)",
                summary.session.total_found,
                summary.session.new_count,
                summary.session.updated_count,
                summary.session.removed_count,
                summary.stats.failed
            );
            if !summary.report.snapshot_saved {
                return Err(AppError::snapshot(
                    "catalog updated but snapshot could not be written",
                ));
            }
        }

        Command::Crawl { output } => {
            config.validate()?;
            let (target, key) = match output {
                Some(path) => output_target(&path)?,
                None => (storage.clone(), "crawl.json".to_string()),
            };
            let client = Arc::new(SourceClient::from_config(&config.source)?);

            let outcome = pipeline::crawl_aggregate(&config, client).await?;
            let document = SnapshotDocument::new("crawl-only", &outcome.snapshot);

            target.write_json(&key, &document).await?;

            log::info!(
                "{} unique listings written to {}{}",
                document.total_cars,
                target.path(&key).display(),
                if outcome.complete { "" } else { " (partial)" }
            );
        }

        Command::Diff { previous, current } => {
            let previous = load_document(&previous)?.into_snapshot();
            let current = load_document(&current)?.into_snapshot();

            let result = DiffEngine::new().diff(&current, &previous);
            if !result.has_changes() {
                log::info!("Snapshots are identical");
                return Ok(());
            }
            log::info!(
                "{} changes: {} new, {} updated, {} removed",
                result.change_count(),
                result.new_records.len(),
                result.updated.len(),
                result.removed_ids.len()
            );
            for listing in &result.updated {
                for (field, change) in &listing.changes {
                    println!(
                        "{}\t{}\t{} -> {}",
                        listing.record.source_id, field, change.old, change.new
                    );
                }
            }
            for record in &result.new_records {
                println!("{}\tnew", record.source_id);
            }
            for id in &result.removed_ids {
                println!("{}\tremoved", id);
            }
        }

        Command::Configs => {
            let enumerator = ConfigEnumerator::new(&config.enumeration);
            for configuration in enumerator.enumerate() {
                println!("{}", configuration.label());
            }
            log::info!("{} configurations", enumerator.len());
        }

        Command::Validate => {
            log::info!("Validating configuration...");

            if let Err(e) = config.validate() {
                log::error!("Config validation failed: {}", e);
                return Err(e);
            }
            log::info!(
                "✓ Config OK ({} configurations, batch size {})",
                ConfigEnumerator::new(&config.enumeration).len(),
                config.crawler.batch_size()
            );
        }

        Command::Info => {
            log::info!("Storage directory: {}", storage.root_dir().display());

            match storage.load_snapshot().await? {
                Some(document) => {
                    log::info!("Current snapshot: session {}", document.session_id);
                    log::info!("Last updated: {}", document.timestamp);
                    log::info!("Listings: {}", document.total_cars);
                }
                None => log::info!("No snapshot found yet."),
            }

            let catalog = LocalCatalogStore::open(&config.paths.storage_dir).await?;
            log::info!(
                "Catalog: {} active of {} listings",
                catalog.active_count().await?,
                catalog.listing_count().await
            );
            for session in catalog.recent_sessions(5).await? {
                log::info!(
                    "Session {} [{}] started {}: {} found, {} new, {} updated, {} removed{}",
                    session.session_id,
                    session.status,
                    session.started_at,
                    session.total_found,
                    session.new_count,
                    session.updated_count,
                    session.removed_count,
                    session
                        .error_message
                        .as_deref()
                        .map(|m| format!(" ({m})"))
                        .unwrap_or_default()
                );
            }
        }
    }

    log::info!("Done!");

    Ok(())
}
