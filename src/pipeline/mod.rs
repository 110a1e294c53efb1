//! Pipeline stages for one crawl run.
//!
//! - `enumerate`: Configuration cross product
//! - `batch`: Concurrent batches and the dedup aggregate
//! - `diff`: Snapshot comparison
//! - `reconcile`: Catalog and snapshot writes
//! - `run_crawler`: The whole run under time limits

pub mod batch;
pub mod crawl;
pub mod diff;
pub mod enumerate;
pub mod reconcile;

pub use batch::{BatchOutcome, BatchScheduler, CrawlStats, DedupAggregate};
pub use crawl::{RunSummary, crawl_aggregate, run_crawler};
pub use diff::{Changeset, DiffEngine, DiffResult, FieldChange, WatchedField, calculate_diff};
pub use enumerate::ConfigEnumerator;
pub use reconcile::{ReconcileMode, ReconcileReport, Reconciler};
