// src/models/mod.rs

//! Domain models for the crawler application.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod configuration;
mod record;
mod session;
mod snapshot;

// Re-export all public types
pub use config::{
    Config, CrawlerConfig, EnumerationConfig, LoggingConfig, PathsConfig, SourceConfig,
};
pub use configuration::{Configuration, FilterExpression};
pub use record::{CanonicalRecord, RawRecord};
pub use session::{CrawlSession, SessionCounts, SessionStatus};
pub use snapshot::{ChangeArtifacts, Snapshot, SnapshotDocument, UpdatedListing};
