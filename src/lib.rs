// src/lib.rs

//! Listing Crawler Library
//!
//! Mirrors a paginated marketplace search API into a local catalog: enumerate
//! query configurations, crawl them in batches, deduplicate, diff against the
//! previous snapshot and reconcile.

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
