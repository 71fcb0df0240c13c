//! Main harvester service that ties all components together.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::{parse_base_url, year_url, CrawlConfig};
use crate::error::{HarvesterError, Result};
use crate::http::{HttpFetcher, PageFetcher};
use crate::types::RunSummary;
use crate::walker::{CrawlStats, Walker};
use crate::years::resolve_years;

/// Crawls publication years into a destination directory.
pub struct Harvester<F = HttpFetcher> {
    base_url: Url,
    walker: Walker<F>,
}

impl Harvester<HttpFetcher> {
    /// Create a harvester fetching over HTTP.
    pub fn new(config: &CrawlConfig) -> Result<Self> {
        config.validate()?;
        let fetcher = HttpFetcher::new(config.policy.clone())?;
        Self::with_fetcher(config, fetcher)
    }
}

impl<F: PageFetcher> Harvester<F> {
    /// Create a harvester over a custom page source.
    pub fn with_fetcher(config: &CrawlConfig, fetcher: F) -> Result<Self> {
        let base_url = parse_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            walker: Walker::new(fetcher, config.concurrency),
        })
    }

    /// Stop the crawl when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.walker = self.walker.with_cancellation(token);
        self
    }

    pub fn stats(&self) -> Arc<CrawlStats> {
        self.walker.stats()
    }

    /// Crawl `years` (all published years when empty) into `dest_dir/<year>`.
    pub async fn fetch(&self, dest_dir: &Path, years: &[i32]) -> Result<RunSummary> {
        self.fetch_as_of(dest_dir, years, chrono::Local::now().date_naive())
            .await
    }

    /// Like [`Harvester::fetch`], with the supported range computed from `today`.
    ///
    /// Each year is validated before anything touches the filesystem or
    /// network for it. An invalid year is skipped while the valid ones are
    /// still crawled, and the first `InvalidYear` is returned at the end.
    /// Otherwise returns `Incomplete` when some branches failed; the summary
    /// inside still counts everything that was written.
    pub async fn fetch_as_of(
        &self,
        dest_dir: &Path,
        years: &[i32],
        today: NaiveDate,
    ) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut invalid = None;
        let mut dest_ready = false;

        for year in resolve_years(years, today) {
            let year = match year {
                Ok(year) => year,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping year");
                    if invalid.is_none() {
                        invalid = Some(e);
                    }
                    continue;
                }
            };

            if !dest_ready {
                fs::create_dir_all(dest_dir)
                    .map_err(|e| HarvesterError::filesystem(dest_dir, e))?;
                dest_ready = true;
            }

            let year_dir = dest_dir.join(year.to_string());
            fs::create_dir_all(&year_dir).map_err(|e| HarvesterError::filesystem(&year_dir, e))?;

            let root = year_url(&self.base_url, year)?;
            tracing::info!(year, url = %root, dir = %year_dir.display(), "crawling year");

            let report = self.walker.walk(year, &root, &year_dir).await?;
            tracing::info!(
                year,
                pages = report.pages,
                records = report.records,
                failures = report.failures.len(),
                "year finished"
            );
            summary.years.push(report);
        }

        if let Some(e) = invalid {
            if !summary.is_complete() {
                tracing::warn!(failures = %summary.describe_failures(), "crawl incomplete");
            }
            return Err(e);
        }

        if summary.is_complete() {
            Ok(summary)
        } else {
            Err(HarvesterError::Incomplete(Box::new(summary)))
        }
    }
}

/// Crawl `years` into `dest_dir` over HTTP with `config`.
///
/// An empty `years` slice means every published year, newest first.
pub async fn fetch(dest_dir: &Path, years: &[i32], config: &CrawlConfig) -> Result<RunSummary> {
    Harvester::new(config)?.fetch(dest_dir, years).await
}
