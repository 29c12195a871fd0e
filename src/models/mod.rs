// src/models/mod.rs

//! Domain models for the archiver.
//!
//! This module contains all data structures used throughout the application,
//! organized by their primary purpose.

mod config;
mod event;
mod moderation;
mod page;
mod target;

// Re-export all public types
pub use config::{
    ArtifactConfig, Config, CrawlerConfig, ExtractionConfig, FallbackMode, LoggingConfig,
    ModerationConfig, PolicyConfig, RateLimitConfig, ValidationConfig,
};
pub use event::{ProgressEvent, ReportRequest, RunRequest, RunStats};
pub use moderation::{BlockRecord, ConsentEntry, Counters, ReasonCode, ReportStatus, ReportTicket};
pub use page::{Admission, PageRecord, PolicyDecision};
pub use target::CrawlTarget;
