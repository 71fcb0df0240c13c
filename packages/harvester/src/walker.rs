//! Depth-first crawl of one year's division hierarchy.
//!
//! Each page is fetched, parsed and written before its children are
//! expanded. Sibling subtrees run concurrently up to the configured limit and
//! a semaphore bounds the number of fetches in flight across the whole tree.
//! A page that cannot be fetched or parsed fails only its own subtree;
//! filesystem errors and cancellation abort the year.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::{HarvesterError, Result};
use crate::http::PageFetcher;
use crate::parser::{decode_page, parse_page, ParsedPage};
use crate::types::{BranchFailure, DivisionNode, Level, YearReport};
use crate::writer::LevelWriter;

/// Live counters, readable while a crawl is running.
#[derive(Debug, Default)]
pub struct CrawlStats {
    pages: AtomicUsize,
    records: AtomicUsize,
    failures: AtomicUsize,
}

impl CrawlStats {
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }

    pub fn records(&self) -> usize {
        self.records.load(Ordering::Relaxed)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Relaxed)
    }
}

/// A page waiting to be crawled.
#[derive(Debug)]
struct PageTask {
    url: Url,

    /// Level of the entries the page is expected to list.
    level: Level,

    /// Directory receiving the page's level file.
    dir: PathBuf,

    /// Node whose children the page lists; `None` for the year index.
    parent: Option<DivisionNode>,
}

impl PageTask {
    fn failure(&self, error: &HarvesterError) -> BranchFailure {
        BranchFailure {
            url: self.url.to_string(),
            code: self.parent.as_ref().map(|p| p.code.clone()),
            level: self.level,
            error: error.to_string(),
        }
    }
}

/// State scoped to a single year's crawl.
#[derive(Default)]
struct YearState {
    visited: Mutex<HashSet<Url>>,
    pages: AtomicUsize,
    records: AtomicUsize,
}

impl YearState {
    /// Mark `url` as visited; false if it already was.
    fn visit(&self, url: &Url) -> bool {
        self.visited
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(url.clone())
    }
}

/// Hierarchy walker over any [`PageFetcher`].
pub struct Walker<F> {
    fetcher: F,
    concurrency: usize,
    in_flight: Semaphore,
    cancel: CancellationToken,
    stats: Arc<CrawlStats>,
}

impl<F: PageFetcher> Walker<F> {
    /// Create a walker allowing `concurrency` fetches in flight (at least 1).
    pub fn new(fetcher: F, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            fetcher,
            concurrency,
            in_flight: Semaphore::new(concurrency),
            cancel: CancellationToken::new(),
            stats: Arc::new(CrawlStats::default()),
        }
    }

    /// Stop the walk when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn stats(&self) -> Arc<CrawlStats> {
        Arc::clone(&self.stats)
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Crawl the year whose index page is `root_url` into `dest_dir`.
    ///
    /// Returns the per-year report listing failed branches; errors are fatal
    /// (filesystem, cancellation) and leave already committed files intact.
    pub async fn walk(&self, year: i32, root_url: &Url, dest_dir: &Path) -> Result<YearReport> {
        let state = YearState::default();
        let root = PageTask {
            url: root_url.clone(),
            level: Level::Province,
            dir: dest_dir.to_path_buf(),
            parent: None,
        };

        let failures = self.walk_page(&state, root).await?;

        Ok(YearReport {
            year,
            pages: state.pages.load(Ordering::Relaxed),
            records: state.records.load(Ordering::Relaxed),
            failures,
        })
    }

    fn walk_page<'a>(
        &'a self,
        state: &'a YearState,
        task: PageTask,
    ) -> BoxFuture<'a, Result<Vec<BranchFailure>>> {
        async move {
            if !state.visit(&task.url) {
                tracing::warn!(url = %task.url, "page already visited, skipping");
                return Ok(Vec::new());
            }

            let page = match self.load_page(&task).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(
                        url = %task.url,
                        code = task.parent.as_ref().map(|p| p.code.as_str()).unwrap_or_default(),
                        level = %task.level,
                        error = %e,
                        "branch failed"
                    );
                    self.stats.failures.fetch_add(1, Ordering::Relaxed);
                    return Ok(vec![task.failure(&e)]);
                }
            };

            state.pages.fetch_add(1, Ordering::Relaxed);
            self.stats.pages.fetch_add(1, Ordering::Relaxed);

            let children = self.persist(state, &task.dir, page)?;

            let mut failures = Vec::new();
            let mut subtrees = futures::stream::iter(children)
                .map(|child| self.walk_page(state, child))
                .buffered(self.concurrency);
            while let Some(result) = subtrees.next().await {
                failures.extend(result?);
            }
            Ok(failures)
        }
        .boxed()
    }

    /// Fetch, decode and parse a page, then attach it to its parent.
    async fn load_page(&self, task: &PageTask) -> Result<ParsedPage> {
        let body = self.fetch(&task.url).await?;
        let html = decode_page(&body);
        let mut page = parse_page(&html, task.level, &task.url)?;

        if let Some(parent) = &task.parent {
            for node in &mut page.nodes {
                if !parent.contains(node) {
                    return Err(HarvesterError::CodeMismatch {
                        url: task.url.to_string(),
                        parent: parent.code.clone(),
                        child: node.code.clone(),
                    });
                }
                node.parent_code = parent.code.clone();
            }
        }

        Ok(page)
    }

    /// Fetch under the in-flight limit, giving up as soon as the walk is cancelled.
    async fn fetch(&self, url: &Url) -> Result<Vec<u8>> {
        if self.cancel.is_cancelled() {
            return Err(HarvesterError::Cancelled);
        }

        let _permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(HarvesterError::Cancelled),
            permit = self.in_flight.acquire() => permit.map_err(|_| HarvesterError::Cancelled)?,
        };

        tracing::debug!(%url, "fetching");
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(HarvesterError::Cancelled),
            result = self.fetcher.fetch(url) => result,
        }
    }

    /// Write the page's entries and turn linked ones into child tasks.
    fn persist(&self, state: &YearState, dir: &Path, page: ParsedPage) -> Result<Vec<PageTask>> {
        let mut writer = LevelWriter::create(dir, page.level)?;
        let mut children = Vec::new();
        let mut expanded = HashSet::new();

        for node in page.nodes {
            writer.write(&node)?;

            if let (Some(url), Some(level)) = (node.child_url.clone(), node.level.child()) {
                // Both subtrees would write into the same directory.
                if !expanded.insert(node.code.clone()) {
                    tracing::warn!(%url, code = %node.code, "duplicate code on page, not expanding");
                    continue;
                }
                children.push(PageTask {
                    url,
                    level,
                    dir: dir.join(&node.code),
                    parent: Some(node),
                });
            }
        }

        let count = writer.count();
        let path = writer.commit()?;
        state.records.fetch_add(count, Ordering::Relaxed);
        self.stats.records.fetch_add(count, Ordering::Relaxed);
        tracing::debug!(path = %path.display(), level = %page.level, records = count, "level file written");

        Ok(children)
    }
}
