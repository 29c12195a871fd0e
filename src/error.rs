// src/error.rs

//! Unified error handling for the archiver.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result type alias for archiver operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Bad request shape or URL; the run never starts
    #[error("Validation error: {0}")]
    Validation(String),

    /// The site's crawl policy disallows this crawler
    #[error("Crawling is disallowed by the site's crawl policy")]
    PolicyDenied,

    /// Requester exhausted its quota for the current window
    #[error("Rate limit exceeded; try again after {reset_at}")]
    RateLimited { reset_at: DateTime<Utc> },

    /// Site is on the moderation block list
    #[error("Site '{0}' has been blocked from archiving")]
    Blocked(String),

    /// A single page could not be fetched
    #[error("Fetch failed for {url}: {message}")]
    Fetch { url: String, message: String },

    /// The crawl finished without a single extractable page
    #[error("No extractable content was found")]
    EmptyResult,

    /// Backing store could not be reached
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// Artifact was already retrieved, expired, or never existed
    #[error("Not found: {0}")]
    NotFound(String),

    /// The caller went away before the run finished
    #[error("Run cancelled by caller")]
    Cancelled,

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Zip container could not be written or read
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl AppError {
    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Create a per-page fetch error.
    pub fn fetch(url: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            url: url.into(),
            message: message.to_string(),
        }
    }

    /// Create a storage-unavailable error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::StorageUnavailable(message.to_string())
    }

    /// Create a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Message safe to hand back to the requester.
    ///
    /// Run-level failures keep their own wording; infrastructure errors
    /// are collapsed so internal paths and addresses do not leak.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(_)
            | Self::PolicyDenied
            | Self::RateLimited { .. }
            | Self::Blocked(_)
            | Self::EmptyResult
            | Self::NotFound(_)
            | Self::Cancelled => self.to_string(),
            Self::StorageUnavailable(_) => {
                "Archive storage is temporarily unavailable".to_string()
            }
            _ => "Archiving failed due to an internal error".to_string(),
        }
    }
}
