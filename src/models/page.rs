//! Pages and crawl decisions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One extracted page, ready to be archived.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PageRecord {
    /// Archive-relative path, see [`crate::utils::url::archive_path`]
    pub path: String,

    pub title: String,

    /// Normalized visible text
    pub text_content: String,

    pub source_url: String,

    pub crawled_at: DateTime<Utc>,
}

/// Outcome of evaluating a site's crawl policy for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub crawl_delay_ms: u64,
}

impl PolicyDecision {
    pub fn crawl_delay(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.crawl_delay_ms)
    }
}

/// Answer of the rate limiter for one run request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub allowed: bool,
    /// Runs left in the current window after this one
    pub remaining: u32,
    /// When the oldest counted run leaves the window
    pub reset_at: DateTime<Utc>,
}
