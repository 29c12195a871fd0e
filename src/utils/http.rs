// src/utils/http.rs

//! HTTP client utilities.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::redirect::Policy;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::CrawlerConfig;
use crate::utils::url::same_origin;

/// Redirect hops followed before a fetch fails.
const MAX_REDIRECTS: usize = 10;

/// Raw response of a single page request.
///
/// `body` is only filled for successful textual responses.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    pub status: u16,
    /// Address that actually answered, after same-origin redirects
    pub final_url: Url,
    pub content_type: Option<String>,
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    fn mime(&self) -> Option<String> {
        self.content_type.as_ref().map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }

    /// Whether the body is markup the extractor understands.
    ///
    /// A missing content type is treated as HTML.
    pub fn is_html(&self) -> bool {
        match self.mime() {
            None => true,
            Some(mime) => mime == "text/html" || mime == "application/xhtml+xml",
        }
    }

    /// Whether the body is worth reading at all (HTML or plain text).
    pub fn is_text(&self) -> bool {
        self.is_html() || self.mime().is_some_and(|mime| mime.starts_with("text/"))
    }
}

/// Network access used by the policy evaluator and the crawler.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch `url`, giving up after `timeout`.
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage>;
}

/// Follow redirects within the origin of the previous hop only.
///
/// A cross-origin hop is not followed; the 3xx response is returned as is.
pub fn redirect_policy() -> Policy {
    Policy::custom(|attempt| {
        if attempt.previous().len() >= MAX_REDIRECTS {
            return attempt.error("too many redirects");
        }
        let crosses = attempt
            .previous()
            .last()
            .is_some_and(|from| !same_origin(from, attempt.url()));
        if crosses {
            log::debug!("Not following cross-origin redirect to {}", attempt.url());
            attempt.stop()
        } else {
            attempt.follow()
        }
    })
}

/// Create a configured asynchronous HTTP client.
pub fn create_async_client(config: &CrawlerConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .user_agent(&config.user_agent)
        .timeout(config.fetch_timeout())
        .redirect(redirect_policy())
        .build()?;
    Ok(client)
}

/// [`PageFetcher`] backed by a `reqwest` client.
#[derive(Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl HttpFetcher {
    pub fn new(client: reqwest::Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }

    pub fn from_config(config: &CrawlerConfig) -> Result<Self> {
        Ok(Self::new(
            create_async_client(config)?,
            config.max_body_bytes,
        ))
    }

    fn too_large(&self, url: &Url) -> AppError {
        AppError::fetch(
            url.as_str(),
            format!("body exceeds {} bytes", self.max_body_bytes),
        )
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url, timeout: Duration) -> Result<FetchedPage> {
        let mut response = self
            .client
            .get(url.clone())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| AppError::fetch(url.as_str(), e))?;

        let mut page = FetchedPage {
            status: response.status().as_u16(),
            final_url: response.url().clone(),
            content_type: response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|value| value.to_str().ok())
                .map(str::to_string),
            body: String::new(),
        };
        if !page.is_success() || !page.is_text() {
            log::debug!(
                "Skipping body of {} (HTTP {}, {})",
                page.final_url,
                page.status,
                page.content_type.as_deref().unwrap_or("no content type")
            );
            return Ok(page);
        }

        if response
            .content_length()
            .is_some_and(|length| length > self.max_body_bytes as u64)
        {
            return Err(self.too_large(url));
        }
        let mut body = Vec::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| AppError::fetch(url.as_str(), e))?
        {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.too_large(url));
            }
            body.extend_from_slice(&chunk);
        }
        page.body = String::from_utf8_lossy(&body).into_owned();
        Ok(page)
    }
}
