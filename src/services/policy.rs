//! Crawl-policy evaluation.
//!
//! Reads the site's `robots.txt`-style declaration and reduces it to a
//! [`PolicyDecision`]: may this crawler archive the site at all, and how
//! long must it wait between requests.
//!
//! Only whole-site denial is honored; per-path rules are not evaluated.

use std::sync::Arc;

use crate::models::{CrawlTarget, PolicyConfig, PolicyDecision};
use crate::utils::http::PageFetcher;

/// Directive state of one agent group.
#[derive(Debug, Clone, Copy)]
struct GroupState {
    disallow_all: bool,
    delay_ms: Option<u64>,
}

impl GroupState {
    fn fresh() -> Self {
        Self {
            disallow_all: false,
            delay_ms: None,
        }
    }
}

/// Parse a policy document for `agent_token`.
///
/// A group applies when one of its `User-agent` lines is `*` or equals
/// the token (case-insensitive). When several groups apply, the last one
/// in the document decides.
pub fn parse_policy(content: &str, agent_token: &str, config: &PolicyConfig) -> PolicyDecision {
    let mut applies = false;
    let mut in_rules = false;
    let mut current = GroupState::fresh();
    let mut last_applicable: Option<GroupState> = None;

    for raw_line in content.lines() {
        let line = raw_line.split('#').next().unwrap_or_default().trim();
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    if applies {
                        last_applicable = Some(current);
                    }
                    applies = false;
                    in_rules = false;
                    current = GroupState::fresh();
                }
                if value == "*" || value.eq_ignore_ascii_case(agent_token) {
                    applies = true;
                }
            }
            "disallow" => {
                in_rules = true;
                if applies && (value == "/" || value == "/*") {
                    current.disallow_all = true;
                }
            }
            "crawl-delay" => {
                in_rules = true;
                if applies {
                    match value.parse::<f64>() {
                        Ok(secs) if secs.is_finite() && secs >= 0.0 => {
                            // Float-to-int casts saturate at u64::MAX.
                            let declared = (secs * 1000.0).round() as u64;
                            if declared > config.max_delay_ms {
                                log::warn!(
                                    "Crawl-delay {}s exceeds the {}ms ceiling",
                                    value,
                                    config.max_delay_ms
                                );
                            }
                            current.delay_ms =
                                Some(declared.min(config.max_delay_ms).max(config.min_delay_ms));
                        }
                        _ => log::debug!("Ignoring malformed crawl-delay '{}'", value),
                    }
                }
            }
            _ => {
                in_rules = true;
            }
        }
    }

    if applies {
        last_applicable = Some(current);
    }

    match last_applicable {
        Some(group) => PolicyDecision {
            allowed: !group.disallow_all,
            crawl_delay_ms: group.delay_ms.unwrap_or(config.default_delay_ms),
        },
        None => default_decision(config),
    }
}

fn default_decision(config: &PolicyConfig) -> PolicyDecision {
    PolicyDecision {
        allowed: true,
        crawl_delay_ms: config.default_delay_ms,
    }
}

/// Fetches and evaluates the crawl policy of a target's origin.
pub struct PolicyEvaluator {
    fetcher: Arc<dyn PageFetcher>,
    config: PolicyConfig,
    agent_token: String,
}

impl PolicyEvaluator {
    pub fn new(fetcher: Arc<dyn PageFetcher>, config: PolicyConfig, agent_token: impl Into<String>) -> Self {
        Self {
            fetcher,
            config,
            agent_token: agent_token.into(),
        }
    }

    /// Evaluate the policy for `target`. Never fails: an unreachable or
    /// unsuccessful policy document yields the permissive default.
    pub async fn evaluate(&self, target: &CrawlTarget) -> PolicyDecision {
        let url = match target.policy_url(&self.config.path) {
            Ok(url) => url,
            Err(e) => {
                log::warn!("Cannot build policy URL for {}: {}", target.root_url, e);
                return default_decision(&self.config);
            }
        };

        match self.fetcher.fetch(&url, self.config.timeout()).await {
            Ok(page) if page.is_success() => {
                let decision = parse_policy(&page.body, &self.agent_token, &self.config);
                log::info!(
                    "Crawl policy for {}: allowed={}, delay={}ms",
                    target.origin_host,
                    decision.allowed,
                    decision.crawl_delay_ms
                );
                decision
            }
            Ok(page) => {
                log::info!(
                    "No crawl policy at {} (HTTP {}), using defaults",
                    url,
                    page.status
                );
                default_decision(&self.config)
            }
            Err(e) => {
                log::warn!("Crawl policy fetch failed for {}: {}", url, e);
                default_decision(&self.config)
            }
        }
    }
}
