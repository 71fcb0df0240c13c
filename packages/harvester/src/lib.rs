//! divcode-harvester - Crawl China's administrative-division codes.
//!
//! This crate walks the statistical division code publication of the
//! National Bureau of Statistics (province → city → county → township →
//! village), one snapshot per year, and stores every entry on disk in a
//! directory tree mirroring the hierarchy.
//!
//! # Example
//!
//! ```
//! use chrono::NaiveDate;
//! use divcode_harvester::years;
//!
//! let today = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! assert_eq!(years::supported_years(today), 2009..=2023);
//! assert!(years::validate_year(2008, today).is_err());
//! ```
//!
//! # Architecture
//!
//! - [`config`]: Constants, fetch policy and crawl configuration
//! - [`years`]: Supported publication years
//! - [`types`]: Core data types (Level, DivisionNode, reports)
//! - [`error`]: Error types and Result alias
//! - [`http`]: Page fetching with retry and rate limiting
//! - [`parser`]: Division table parsing
//! - [`writer`]: Level files on disk
//! - [`walker`]: Depth-first hierarchy crawl
//! - [`harvester`]: Year-level entry point
//! - [`export`]: Reading a crawled year back
//! - [`cli`]: Command-line interface

pub mod cli;
pub mod config;
pub mod error;
pub mod export;
pub mod harvester;
pub mod http;
pub mod parser;
pub mod types;
pub mod walker;
pub mod writer;
pub mod years;

// Re-export main functions
pub use harvester::{fetch, Harvester};

// Re-export commonly used items
pub use config::{CrawlConfig, FetchPolicy};
pub use error::{HarvesterError, Result};
pub use types::{BranchFailure, DivisionNode, Level, RunSummary, YearReport};
