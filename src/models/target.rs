//! Crawl target derived from a run request.

use url::Url;

use crate::error::{AppError, Result};
use crate::models::ValidationConfig;
use crate::utils::url::{normalize, site_identifier};

/// The site a run archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTarget {
    /// Normalized root URL the crawl starts from
    pub root_url: Url,

    /// Lowercase host of the root URL
    pub origin_host: String,

    /// Moderation/statistics bucket, from the first path segment
    pub site_identifier: String,
}

impl CrawlTarget {
    /// Parse and check a user-supplied root URL.
    pub fn parse(raw: &str, validation: &ValidationConfig) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AppError::validation("URL is required"));
        }

        let url = Url::parse(raw).map_err(|e| AppError::validation(format!("Invalid URL: {e}")))?;
        Self::from_url(&url, validation)
    }

    /// Check an already-parsed URL.
    pub fn from_url(url: &Url, validation: &ValidationConfig) -> Result<Self> {
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::validation("URL must use http or https"));
        }
        if !url.username().is_empty() || url.password().is_some() {
            return Err(AppError::validation("URL must not contain credentials"));
        }

        let host = url
            .host_str()
            .ok_or_else(|| AppError::validation("URL has no host"))?
            .to_lowercase();

        if !validation.host_allowed(&host) {
            return Err(AppError::validation(format!(
                "Host '{host}' is not an allowed archive source"
            )));
        }

        let site_identifier = site_identifier(url)
            .ok_or_else(|| AppError::validation("URL must point at a site path, not the host root"))?;

        Ok(Self {
            root_url: normalize(url),
            origin_host: host,
            site_identifier,
        })
    }

    /// URL of the crawl-policy document for this origin.
    pub fn policy_url(&self, path: &str) -> Result<Url> {
        Ok(self.root_url.join(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_target() {
        let target =
            CrawlTarget::parse("https://Site.Example/vault-a#intro", &ValidationConfig::default())
                .unwrap();
        assert_eq!(target.root_url.as_str(), "https://site.example/vault-a");
        assert_eq!(target.origin_host, "site.example");
        assert_eq!(target.site_identifier, "vault-a");
    }

    #[test]
    fn test_parse_rejects_bad_urls() {
        let validation = ValidationConfig::default();
        for raw in [
            "",
            "not a url",
            "ftp://site.example/vault-a",
            "https://site.example/",
            "https://user:pw@site.example/vault-a",
        ] {
            assert!(
                matches!(
                    CrawlTarget::parse(raw, &validation),
                    Err(AppError::Validation(_))
                ),
                "expected validation error for {raw:?}"
            );
        }
    }

    #[test]
    fn test_parse_respects_allowed_hosts() {
        let validation = ValidationConfig {
            allowed_hosts: vec!["site.example".into()],
        };
        assert!(CrawlTarget::parse("https://site.example/vault-a", &validation).is_ok());
        assert!(CrawlTarget::parse("https://evil.example/vault-a", &validation).is_err());
    }

    #[test]
    fn test_policy_url() {
        let target =
            CrawlTarget::parse("https://site.example/vault-a/page", &ValidationConfig::default())
                .unwrap();
        assert_eq!(
            target.policy_url("/robots.txt").unwrap().as_str(),
            "https://site.example/robots.txt"
        );
    }
}
