//! Storage abstractions shared by concurrent runs.
//!
//! Three capabilities are injected into the pipeline:
//!
//! - [`ArtifactStore`]: finished archives, retrievable exactly once
//! - [`ModerationStore`]: block list, consent log, reports and counters
//! - [`WindowStore`]: per-requester sliding-window admission
//!
//! [`MemoryStorage`] keeps everything in process; [`LocalStorage`] keeps
//! it under a directory so separate CLI invocations share state.

pub mod local;
pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Admission, BlockRecord, ConsentEntry, Counters, ReportStatus, ReportTicket};
use crate::services::ArchiveArtifact;

// Re-export for convenience
pub use local::LocalStorage;
pub use memory::MemoryStorage;

/// Descriptive part of a stored archive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactMeta {
    pub filename: String,
    pub page_count: usize,
    pub size_bytes: u64,
    pub expires_at: DateTime<Utc>,
}

impl ArtifactMeta {
    pub fn from_artifact(artifact: &ArchiveArtifact, expires_at: DateTime<Utc>) -> Self {
        Self {
            filename: artifact.filename.clone(),
            page_count: artifact.page_count,
            size_bytes: artifact.size_bytes,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// An archive handed out by [`ArtifactStore::take_once`].
#[derive(Debug, Clone)]
pub struct StoredArtifact {
    pub meta: ArtifactMeta,
    pub bytes: Vec<u8>,
}

/// Holds finished archives until their single retrieval.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Store an archive for `ttl` and return its opaque identifier.
    ///
    /// Fails with [`AppError::StorageUnavailable`] rather than dropping
    /// the archive.
    async fn put(&self, artifact: ArchiveArtifact, ttl: chrono::Duration) -> Result<String>;

    /// Remove and return an archive. Every call after the first, and any
    /// call after expiry, yields [`AppError::NotFound`].
    async fn take_once(&self, id: &str) -> Result<StoredArtifact>;

    /// Delete expired archives, returning how many were removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

/// Durable moderation state.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn is_blocked(&self, site_identifier: &str) -> Result<bool>;

    /// Add a site to the block list; re-blocking keeps the first record.
    async fn block(&self, site_identifier: &str, record: BlockRecord) -> Result<()>;

    /// Remove a site, returning whether it was listed.
    async fn unblock(&self, site_identifier: &str) -> Result<bool>;

    async fn blocked_sites(&self) -> Result<BTreeMap<String, BlockRecord>>;

    /// Append a consent entry and drop entries older than `retain_after`.
    async fn append_consent(&self, entry: ConsentEntry, retain_after: DateTime<Utc>) -> Result<()>;

    async fn consent_entries(&self) -> Result<Vec<ConsentEntry>>;

    /// Store a report; an identical pending report is returned instead.
    async fn insert_report(&self, ticket: ReportTicket) -> Result<ReportTicket>;

    async fn reports(&self) -> Result<Vec<ReportTicket>>;

    async fn set_report_status(&self, id: &str, status: ReportStatus) -> Result<ReportTicket>;

    async fn increment_counters(&self, site_identifier: &str, at: DateTime<Utc>) -> Result<()>;

    async fn counters(&self) -> Result<Counters>;
}

/// Sliding-window hit log keyed by requester identity.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Check and record one hit for `key` in a single atomic step.
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: chrono::Duration,
        quota: u32,
    ) -> Result<Admission>;
}

/// Fresh unguessable artifact identifier (128-bit, hex).
pub fn new_artifact_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Whether `id` has the shape of an identifier from [`new_artifact_id`].
pub fn is_valid_artifact_id(id: &str) -> bool {
    id.len() == 32 && id.bytes().all(|b| b.is_ascii_hexdigit())
}

pub(crate) fn insert_report_into(reports: &mut Vec<ReportTicket>, ticket: ReportTicket) -> ReportTicket {
    if let Some(existing) = reports.iter().find(|r| r.is_duplicate_of(&ticket)) {
        return existing.clone();
    }
    reports.push(ticket.clone());
    ticket
}

pub(crate) fn update_report_status(
    reports: &mut [ReportTicket],
    id: &str,
    status: ReportStatus,
) -> Result<ReportTicket> {
    let ticket = reports
        .iter_mut()
        .find(|r| r.id == id)
        .ok_or_else(|| AppError::not_found(format!("report {id}")))?;
    ticket.status = status;
    Ok(ticket.clone())
}

pub(crate) fn prune_consent(entries: &mut Vec<ConsentEntry>, retain_after: DateTime<Utc>) {
    entries.retain(|entry| entry.timestamp >= retain_after);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_ids_are_unique_and_valid() {
        let a = new_artifact_id();
        let b = new_artifact_id();
        assert_ne!(a, b);
        assert!(is_valid_artifact_id(&a));
        assert!(!is_valid_artifact_id("../../etc/passwd"));
        assert!(!is_valid_artifact_id(""));
    }
}
