//! Application configuration structures.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};

/// Longest accepted rate-limit window.
const MAX_WINDOW_SECS: u64 = 30 * 86_400;
/// Longest accepted archive lifetime.
const MAX_TTL_SECS: u64 = 7 * 86_400;
/// Longest accepted consent retention.
const MAX_RETENTION_DAYS: i64 = 3650;

/// Root application configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP and crawling behavior settings
    #[serde(default)]
    pub crawler: CrawlerConfig,

    /// Crawl-policy document lookup
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Content extraction rules
    #[serde(default)]
    pub extraction: ExtractionConfig,

    /// Per-requester admission window
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Finished archive retention
    #[serde(default)]
    pub artifacts: ArtifactConfig,

    /// Audit log retention
    #[serde(default)]
    pub moderation: ModerationConfig,

    /// Run request checks
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Load configuration or return default if loading fails.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(&path).unwrap_or_else(|e| {
            log::warn!(
                "Config load failed from {:?}: {}. Using defaults.",
                path.as_ref(),
                e
            );
            Self::default()
        })
    }

    /// Validate configuration values for basic sanity.
    pub fn validate(&self) -> Result<()> {
        if self.crawler.user_agent.trim().is_empty() {
            return Err(AppError::config("crawler.user_agent is empty"));
        }
        if self.crawler.agent_token.trim().is_empty() {
            return Err(AppError::config("crawler.agent_token is empty"));
        }
        if self.crawler.fetch_timeout_secs == 0 {
            return Err(AppError::config("crawler.fetch_timeout_secs must be > 0"));
        }
        if self.crawler.max_pages == 0 {
            return Err(AppError::config("crawler.max_pages must be > 0"));
        }
        if !self.policy.path.starts_with('/') {
            return Err(AppError::config("policy.path must start with '/'"));
        }
        if self.crawler.max_body_bytes == 0 {
            return Err(AppError::config("crawler.max_body_bytes must be > 0"));
        }
        if self.policy.timeout_secs == 0 {
            return Err(AppError::config("policy.timeout_secs must be > 0"));
        }
        if self.policy.default_delay_ms < self.policy.min_delay_ms {
            return Err(AppError::config(
                "policy.default_delay_ms must be >= policy.min_delay_ms",
            ));
        }
        if self.policy.max_delay_ms < self.policy.default_delay_ms {
            return Err(AppError::config(
                "policy.max_delay_ms must be >= policy.default_delay_ms",
            ));
        }
        if self.extraction.content_selectors.is_empty() {
            return Err(AppError::config("No content selectors defined"));
        }
        if self.rate_limit.quota == 0 || self.rate_limit.window_secs == 0 {
            return Err(AppError::config(
                "rate_limit.quota and rate_limit.window_secs must be > 0",
            ));
        }
        if self.rate_limit.window_secs > MAX_WINDOW_SECS {
            return Err(AppError::config(format!(
                "rate_limit.window_secs must be <= {MAX_WINDOW_SECS}"
            )));
        }
        if self.artifacts.ttl_secs == 0 || self.artifacts.ttl_secs > MAX_TTL_SECS {
            return Err(AppError::config(format!(
                "artifacts.ttl_secs must be in 1..={MAX_TTL_SECS}"
            )));
        }
        if !(1..=MAX_RETENTION_DAYS).contains(&self.moderation.consent_retention_days) {
            return Err(AppError::config(format!(
                "moderation.consent_retention_days must be in 1..={MAX_RETENTION_DAYS}"
            )));
        }
        Ok(())
    }
}

/// HTTP client and crawling behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlerConfig {
    /// User-Agent header for HTTP requests
    #[serde(default = "defaults::user_agent")]
    pub user_agent: String,

    /// Identity token matched against crawl-policy agent groups
    #[serde(default = "defaults::agent_token")]
    pub agent_token: String,

    /// Per-page request timeout in seconds
    #[serde(default = "defaults::fetch_timeout")]
    pub fetch_timeout_secs: u64,

    /// Page budget for a single run
    #[serde(default = "defaults::max_pages")]
    pub max_pages: usize,

    /// Largest response body read before the fetch is abandoned
    #[serde(default = "defaults::max_body_bytes")]
    pub max_body_bytes: usize,
}

impl CrawlerConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            user_agent: defaults::user_agent(),
            agent_token: defaults::agent_token(),
            fetch_timeout_secs: defaults::fetch_timeout(),
            max_pages: defaults::max_pages(),
            max_body_bytes: defaults::max_body_bytes(),
        }
    }
}

/// Crawl-policy lookup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyConfig {
    /// Well-known path of the policy document
    #[serde(default = "defaults::policy_path")]
    pub path: String,

    /// Timeout for fetching the policy document
    #[serde(default = "defaults::policy_timeout")]
    pub timeout_secs: u64,

    /// Delay used when the site declares none
    #[serde(default = "defaults::default_delay")]
    pub default_delay_ms: u64,

    /// Floor applied to any declared delay
    #[serde(default = "defaults::min_delay")]
    pub min_delay_ms: u64,

    /// Ceiling applied to any declared delay
    #[serde(default = "defaults::max_delay")]
    pub max_delay_ms: u64,
}

impl PolicyConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            path: defaults::policy_path(),
            timeout_secs: defaults::policy_timeout(),
            default_delay_ms: defaults::default_delay(),
            min_delay_ms: defaults::min_delay(),
            max_delay_ms: defaults::max_delay(),
        }
    }
}

/// Content extraction settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Candidate content regions, most specific first
    #[serde(default = "defaults::content_selectors")]
    pub content_selectors: Vec<String>,

    /// Title used when a page has neither `<title>` nor `<h1>`
    #[serde(default = "defaults::default_title")]
    pub default_title: String,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            content_selectors: defaults::content_selectors(),
            default_title: defaults::default_title(),
        }
    }
}

/// What the rate limiter does when its backing store is missing or down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    /// Admit every request with a fixed remaining/reset report
    #[default]
    Open,
    /// Deny every request until the store is back
    Closed,
}

/// Sliding-window admission settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "defaults::window")]
    pub window_secs: u64,

    #[serde(default = "defaults::quota")]
    pub quota: u32,

    #[serde(default)]
    pub fallback: FallbackMode,
}

impl RateLimitConfig {
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.window_secs as i64)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            window_secs: defaults::window(),
            quota: defaults::quota(),
            fallback: FallbackMode::default(),
        }
    }
}

/// Ephemeral artifact settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Seconds an unretrieved archive is kept
    #[serde(default = "defaults::ttl")]
    pub ttl_secs: u64,
}

impl ArtifactConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.ttl_secs as i64)
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            ttl_secs: defaults::ttl(),
        }
    }
}

/// Moderation audit settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    #[serde(default = "defaults::consent_retention")]
    pub consent_retention_days: i64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            consent_retention_days: defaults::consent_retention(),
        }
    }
}

/// Request validation settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ValidationConfig {
    /// Hosts a run may target; empty allows any host
    #[serde(default)]
    pub allowed_hosts: Vec<String>,
}

impl ValidationConfig {
    pub fn host_allowed(&self, host: &str) -> bool {
        self.allowed_hosts.is_empty()
            || self
                .allowed_hosts
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(host))
    }
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "defaults::log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: defaults::log_level(),
        }
    }
}

mod defaults {
    // Crawler defaults
    pub fn user_agent() -> String {
        "Mozilla/5.0 (compatible; VaultArchiver/1.0)".into()
    }
    pub fn agent_token() -> String {
        "vaultarchiver".into()
    }
    pub fn fetch_timeout() -> u64 {
        10
    }
    pub fn max_pages() -> usize {
        500
    }
    pub fn max_body_bytes() -> usize {
        5 * 1024 * 1024
    }

    // Policy defaults
    pub fn policy_path() -> String {
        "/robots.txt".into()
    }
    pub fn policy_timeout() -> u64 {
        5
    }
    pub fn default_delay() -> u64 {
        1000
    }
    pub fn min_delay() -> u64 {
        500
    }
    pub fn max_delay() -> u64 {
        60_000
    }

    // Extraction defaults
    pub fn content_selectors() -> Vec<String> {
        vec![
            ".content-preview, [data-content-preview]".into(),
            "main, [role=\"main\"], article, #content".into(),
            "body".into(),
        ]
    }
    pub fn default_title() -> String {
        "Untitled".into()
    }

    // Rate limit defaults
    pub fn window() -> u64 {
        3600
    }
    pub fn quota() -> u32 {
        5
    }

    // Artifact defaults
    pub fn ttl() -> u64 {
        600
    }

    // Moderation defaults
    pub fn consent_retention() -> i64 {
        30
    }

    pub fn log_level() -> String {
        "info".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_default_config_ok() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_user_agent() {
        let mut config = Config::default();
        config.crawler.user_agent = "  ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_page_budget() {
        let mut config = Config::default();
        config.crawler.max_pages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_bounds_durations() {
        let mut config = Config::default();
        config.moderation.consent_retention_days = -1;
        assert!(config.validate().is_err());
        config.moderation.consent_retention_days = i64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.rate_limit.window_secs = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.artifacts.ttl_secs = u64::MAX;
        assert!(config.validate().is_err());
        config.artifacts.ttl_secs = 7 * 86_400;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn validate_rejects_inverted_delay_bounds() {
        let mut config = Config::default();
        config.policy.max_delay_ms = 100;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.crawler.max_body_bytes = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [rate_limit]
            quota = 2
            fallback = "closed"
            "#,
        )
        .unwrap();

        assert_eq!(config.rate_limit.quota, 2);
        assert_eq!(config.rate_limit.window_secs, 3600);
        assert_eq!(config.rate_limit.fallback, FallbackMode::Closed);
        assert_eq!(config.crawler.max_pages, 500);
        assert_eq!(config.policy.path, "/robots.txt");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = Config::load_or_default("/nonexistent/config.toml");
        assert_eq!(config.artifacts.ttl_secs, 600);
        assert!(Config::load("/nonexistent/config.toml").is_err());
    }

    #[test]
    fn host_allow_list() {
        let mut validation = ValidationConfig::default();
        assert!(validation.host_allowed("anything.example"));

        validation.allowed_hosts = vec!["Site.Example".into()];
        assert!(validation.host_allowed("site.example"));
        assert!(!validation.host_allowed("other.example"));
    }
}
