// src/services/crawler.rs

//! Frontier crawler.
//!
//! Walks same-origin pages from the target root, one request at a time,
//! pacing requests by the policy's crawl delay. The walk pops the most
//! recently discovered URL first and stops when the frontier is empty or
//! the page budget is spent, so cyclic or endlessly generated link
//! graphs still terminate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use scraper::Html;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::{CrawlTarget, CrawlerConfig, PageRecord, PolicyDecision};
use crate::pipeline::ProgressSink;
use crate::services::{ContentExtractor, ExtractedContent};
use crate::utils::http::PageFetcher;
use crate::utils::url::{archive_path, same_origin};

/// Discovered and visited URLs of one run.
///
/// A URL is never both visited and pending, and at most `ceiling` URLs
/// are ever handed out by [`Frontier::next`].
#[derive(Debug)]
pub struct Frontier {
    root: Url,
    visited: HashSet<String>,
    pending: Vec<Url>,
    queued: HashSet<String>,
    ceiling: usize,
}

impl Frontier {
    pub fn new(root: Url, ceiling: usize) -> Self {
        let mut frontier = Self {
            root: root.clone(),
            visited: HashSet::new(),
            pending: Vec::new(),
            queued: HashSet::new(),
            ceiling,
        };
        frontier.enqueue(root);
        frontier
    }

    /// Queue a URL. Rejects other origins and anything already seen.
    pub fn enqueue(&mut self, url: Url) -> bool {
        if !same_origin(&self.root, &url) {
            return false;
        }
        let key = url.as_str();
        if self.visited.contains(key) || self.queued.contains(key) {
            return false;
        }
        self.queued.insert(key.to_string());
        self.pending.push(url);
        true
    }

    /// Pop the most recently discovered URL and mark it visited.
    pub fn next(&mut self) -> Option<Url> {
        if self.visited.len() >= self.ceiling {
            return None;
        }
        while let Some(url) = self.pending.pop() {
            self.queued.remove(url.as_str());
            if self.visited.insert(url.as_str().to_string()) {
                return Some(url);
            }
        }
        None
    }

    pub fn visited_count(&self) -> usize {
        self.visited.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_visited(&self, url: &Url) -> bool {
        self.visited.contains(url.as_str())
    }
}

/// Result of walking a site.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    /// Extracted pages, unique by archive path
    pub pages: Vec<PageRecord>,
    pub visited: usize,
    pub fetch_failures: usize,
    pub empty_pages: usize,
}

/// Sequential same-origin crawler.
pub struct FrontierCrawler {
    fetcher: Arc<dyn PageFetcher>,
    extractor: Arc<ContentExtractor>,
    fetch_timeout: Duration,
    max_pages: usize,
}

impl FrontierCrawler {
    pub fn new(
        config: &CrawlerConfig,
        fetcher: Arc<dyn PageFetcher>,
        extractor: Arc<ContentExtractor>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            fetch_timeout: config.fetch_timeout(),
            max_pages: config.max_pages,
        }
    }

    /// Crawl `target`, reporting progress to `sink`.
    ///
    /// Returns [`AppError::Cancelled`] once the sink's receiver is gone.
    /// The check runs before each page and again after the crawl delay,
    /// never mid-fetch.
    pub async fn crawl(
        &self,
        target: &CrawlTarget,
        decision: &PolicyDecision,
        sink: &mut ProgressSink,
    ) -> Result<CrawlOutcome> {
        let delay = decision.crawl_delay();
        let mut frontier = Frontier::new(target.root_url.clone(), self.max_pages);
        let mut outcome = CrawlOutcome::default();
        let mut paths: HashMap<String, usize> = HashMap::new();
        let mut first = true;

        loop {
            if sink.is_cancelled() {
                log::info!(
                    "Crawl of {} cancelled after {} pages",
                    target.site_identifier,
                    frontier.visited_count()
                );
                return Err(AppError::Cancelled);
            }

            let Some(url) = frontier.next() else {
                break;
            };

            if !first && !delay.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = sink.closed() => {}
                }
                if sink.is_cancelled() {
                    log::info!(
                        "Crawl of {} cancelled during delay after {} pages",
                        target.site_identifier,
                        frontier.visited_count() - 1
                    );
                    return Err(AppError::Cancelled);
                }
            }
            first = false;

            match self.fetch_document(&url, &target.root_url).await {
                Ok((base, body)) => {
                    let (content, links) = self.process(&base, &body);
                    for link in links {
                        frontier.enqueue(link);
                    }

                    match content {
                        Some(content) => {
                            let record = PageRecord {
                                path: archive_path(&url),
                                title: content.title,
                                text_content: content.text,
                                source_url: url.to_string(),
                                crawled_at: Utc::now(),
                            };
                            match paths.get(&record.path) {
                                Some(&index) => {
                                    log::debug!("Path {} reassigned to {}", record.path, url);
                                    outcome.pages[index] = record;
                                }
                                None => {
                                    paths.insert(record.path.clone(), outcome.pages.len());
                                    outcome.pages.push(record);
                                }
                            }
                        }
                        None => {
                            outcome.empty_pages += 1;
                            log::debug!("No extractable text at {}", url);
                        }
                    }
                }
                Err(e) => {
                    outcome.fetch_failures += 1;
                    log::warn!("Skipping page: {}", e);
                }
            }

            sink.crawl_progress(
                frontier.visited_count(),
                frontier.pending_count(),
                outcome.pages.len(),
            )
            .await;
        }

        outcome.visited = frontier.visited_count();
        log::info!(
            "Crawled {}: {} visited, {} archived, {} failed, {} empty",
            target.site_identifier,
            outcome.visited,
            outcome.pages.len(),
            outcome.fetch_failures,
            outcome.empty_pages
        );
        Ok(outcome)
    }

    /// Fetch a page body, rejecting failures, non-HTML responses and
    /// pages served from another origin. Returns the answering URL as the
    /// base for link resolution.
    async fn fetch_document(&self, url: &Url, root: &Url) -> Result<(Url, String)> {
        let page = self.fetcher.fetch(url, self.fetch_timeout).await?;
        if !same_origin(root, &page.final_url) {
            return Err(AppError::fetch(
                url.as_str(),
                format!("answered from another origin ({})", page.final_url),
            ));
        }
        if !page.is_success() {
            return Err(AppError::fetch(url.as_str(), format!("HTTP {}", page.status)));
        }
        if !page.is_html() {
            return Err(AppError::fetch(
                url.as_str(),
                format!(
                    "unsupported content type {}",
                    page.content_type.as_deref().unwrap_or_default()
                ),
            ));
        }
        Ok((page.final_url, page.body))
    }

    fn process(&self, url: &Url, body: &str) -> (Option<ExtractedContent>, Vec<Url>) {
        let document = Html::parse_document(body);
        let content = self.extractor.extract(&document);
        let links = self.extractor.links(&document, url);
        (content, links)
    }
}
