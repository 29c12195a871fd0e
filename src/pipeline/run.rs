//! Crawl-and-archive run orchestration.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;

use crate::error::{AppError, Result};
use crate::models::{Config, CrawlTarget, ProgressEvent, RunRequest, RunStats};
use crate::pipeline::ProgressSink;
use crate::services::{
    ArchiveBuilder, ContentExtractor, FrontierCrawler, Moderation, PolicyEvaluator, RateLimiter,
};
use crate::storage::{ArtifactStore, ModerationStore, WindowStore};
use crate::utils::format_size;
use crate::utils::http::PageFetcher;

/// Shared state injected into the pipeline.
#[derive(Clone)]
pub struct Stores {
    pub artifacts: Arc<dyn ArtifactStore>,
    pub moderation: Arc<dyn ModerationStore>,
    /// `None` puts the rate limiter permanently in fallback mode
    pub windows: Option<Arc<dyn WindowStore>>,
}

impl Stores {
    /// Use one backend for every capability.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: ArtifactStore + ModerationStore + WindowStore + 'static,
    {
        Self {
            artifacts: store.clone(),
            moderation: store.clone(),
            windows: Some(store),
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    pub download_id: String,
    pub site_identifier: String,
    pub stats: RunStats,
}

/// The crawl-and-archive pipeline.
///
/// One instance serves any number of concurrent runs; each run is a
/// single sequential worker.
pub struct ArchivePipeline {
    config: Config,
    policy: PolicyEvaluator,
    crawler: FrontierCrawler,
    limiter: RateLimiter,
    moderation: Moderation,
    pub(crate) artifacts: Arc<dyn ArtifactStore>,
    builder: ArchiveBuilder,
}

impl ArchivePipeline {
    pub fn new(config: Config, fetcher: Arc<dyn PageFetcher>, stores: Stores) -> Result<Self> {
        config.validate()?;

        let extractor = Arc::new(ContentExtractor::new(&config.extraction)?);
        let policy = PolicyEvaluator::new(
            Arc::clone(&fetcher),
            config.policy.clone(),
            config.crawler.agent_token.clone(),
        );
        let crawler = FrontierCrawler::new(&config.crawler, fetcher, extractor);
        let limiter = match stores.windows {
            Some(windows) => RateLimiter::new(windows, config.rate_limit.clone()),
            None => RateLimiter::without_store(config.rate_limit.clone()),
        };
        let moderation = Moderation::new(
            stores.moderation,
            config.moderation.clone(),
            config.validation.clone(),
        );

        Ok(Self {
            config,
            policy,
            crawler,
            limiter,
            moderation,
            artifacts: stores.artifacts,
            builder: ArchiveBuilder::new(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn moderation(&self) -> &Moderation {
        &self.moderation
    }

    /// Run one archive job for `requester`, streaming events to `events`.
    ///
    /// The stream always ends with exactly one `complete` or `error`
    /// event. Dropping the receiver cancels the run at the next page
    /// boundary; nothing is stored in that case.
    pub async fn run(
        &self,
        request: &RunRequest,
        requester: &str,
        events: mpsc::Sender<ProgressEvent>,
    ) -> Result<RunOutcome> {
        let mut sink = ProgressSink::new(events);
        let result = self.execute(request, requester, &mut sink).await;

        match &result {
            Ok(outcome) => {
                log::info!(
                    "Run for {} complete: {} pages, {}",
                    outcome.site_identifier,
                    outcome.stats.total_pages,
                    outcome.stats.archive_size
                );
                sink.finish(ProgressEvent::Complete {
                    download_id: outcome.download_id.clone(),
                    stats: outcome.stats.clone(),
                })
                .await;
            }
            Err(e) => {
                log::warn!("Run for {} failed: {}", request.root_url, e);
                sink.finish(ProgressEvent::Error {
                    message: e.user_message(),
                })
                .await;
            }
        }
        result
    }

    async fn execute(
        &self,
        request: &RunRequest,
        requester: &str,
        sink: &mut ProgressSink,
    ) -> Result<RunOutcome> {
        if !request.consent {
            return Err(AppError::validation(
                "Consent to the archiving terms is required",
            ));
        }
        let target = CrawlTarget::parse(&request.root_url, &self.config.validation)?;
        sink.progress(0, "Request accepted").await;

        if self.moderation.is_blocked(&target.site_identifier).await? {
            return Err(AppError::Blocked(target.site_identifier));
        }

        let admission = self.limiter.admit(requester).await;
        if !admission.allowed {
            return Err(AppError::RateLimited {
                reset_at: admission.reset_at,
            });
        }

        let started_at = Utc::now();
        self.moderation
            .log_consent(requester, &target, started_at)
            .await;

        sink.progress(2, "Checking crawl policy").await;
        let decision = self.policy.evaluate(&target).await;
        if !decision.allowed {
            return Err(AppError::PolicyDenied);
        }

        sink.progress(5, "Crawling site").await;
        let outcome = self.crawler.crawl(&target, &decision, sink).await?;
        if outcome.pages.is_empty() {
            return Err(AppError::EmptyResult);
        }

        sink.progress(88, "Building archive").await;
        let artifact = self
            .builder
            .build(&outcome.pages, &target.site_identifier, Utc::now())?;

        if sink.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        sink.progress(95, "Storing archive").await;
        let stats = RunStats {
            total_pages: artifact.page_count,
            archive_size: format_size(artifact.size_bytes),
        };
        let download_id = self
            .artifacts
            .put(artifact, self.config.artifacts.ttl())
            .await?;

        self.moderation
            .increment_counters(&target.site_identifier, started_at)
            .await;

        Ok(RunOutcome {
            download_id,
            site_identifier: target.site_identifier,
            stats,
        })
    }
}
