//! Service layer for the archiver.
//!
//! This module contains the business logic for:
//! - Crawl-policy evaluation (`PolicyEvaluator`)
//! - Page content extraction (`ContentExtractor`)
//! - Same-origin traversal (`FrontierCrawler`)
//! - Archive assembly (`ArchiveBuilder`)
//! - Per-requester admission (`RateLimiter`)
//! - Block list, consent and reports (`Moderation`)

mod archive;
mod crawler;
mod extractor;
mod moderation;
mod policy;
mod rate_limit;

pub use archive::{
    ArchiveArtifact, ArchiveBuilder, INDEX_ENTRY, LEGAL_NOTICE, MANIFEST_ENTRY, Manifest,
    ManifestPage, PAGES_DIR, archive_filename,
};
pub use crawler::{CrawlOutcome, Frontier, FrontierCrawler};
pub use extractor::{ContentExtractor, ExtractedContent};
pub use moderation::Moderation;
pub use policy::{PolicyEvaluator, parse_policy};
pub use rate_limit::{RateLimiter, slide_window};
