//! Service layer for the crawler application.
//!
//! This module contains the business logic for:
//! - Upstream page requests with transport failover (`SourceClient`)
//! - Raw record normalization (`RecordNormalizer`)
//! - Per-configuration pagination (`ConfigCrawler`)

mod crawler;
mod normalizer;
pub mod source;

pub use crawler::{ConfigCrawl, ConfigCrawler, CrawlLimits, PageSignature, Termination};
pub use normalizer::{RecordNormalizer, parse_modified_date};
pub use source::{
    CurlTransport, HttpTransport, PageResponse, SearchResponse, SourceClient, Transport,
    TransportMode,
};
