//! In-process storage backend.
//!
//! Every map sits behind its own async mutex, so the one-time retrieval
//! and the sliding-window check are single critical sections. Used by
//! tests and by embedders that run all requests in one process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Admission, BlockRecord, ConsentEntry, Counters, ReportStatus, ReportTicket};
use crate::services::{ArchiveArtifact, slide_window};
use crate::storage::{
    ArtifactMeta, ArtifactStore, ModerationStore, StoredArtifact, WindowStore, insert_report_into,
    new_artifact_id, prune_consent, update_report_status,
};

/// Memory-backed implementation of every storage capability.
pub struct MemoryStorage {
    available: AtomicBool,
    artifacts: Mutex<HashMap<String, StoredArtifact>>,
    blocked: Mutex<BTreeMap<String, BlockRecord>>,
    consent: Mutex<Vec<ConsentEntry>>,
    reports: Mutex<Vec<ReportTicket>>,
    counters: Mutex<Counters>,
    windows: Mutex<HashMap<String, Vec<DateTime<Utc>>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            artifacts: Mutex::default(),
            blocked: Mutex::default(),
            consent: Mutex::default(),
            reports: Mutex::default(),
            counters: Mutex::default(),
            windows: Mutex::default(),
        }
    }

    /// Simulate the backing store going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Number of archives currently held.
    pub async fn artifact_count(&self) -> usize {
        self.artifacts.lock().await.len()
    }

    fn check(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(AppError::storage("memory store marked unavailable"))
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArtifactStore for MemoryStorage {
    async fn put(&self, artifact: ArchiveArtifact, ttl: chrono::Duration) -> Result<String> {
        self.check()?;
        let id = new_artifact_id();
        let meta = ArtifactMeta::from_artifact(&artifact, Utc::now() + ttl);
        self.artifacts.lock().await.insert(
            id.clone(),
            StoredArtifact {
                meta,
                bytes: artifact.bytes,
            },
        );
        Ok(id)
    }

    async fn take_once(&self, id: &str) -> Result<StoredArtifact> {
        self.check()?;
        let stored = self
            .artifacts
            .lock()
            .await
            .remove(id)
            .ok_or_else(|| AppError::not_found(format!("artifact {id}")))?;

        if stored.meta.is_expired(Utc::now()) {
            return Err(AppError::not_found(format!("artifact {id}")));
        }
        Ok(stored)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.check()?;
        let mut artifacts = self.artifacts.lock().await;
        let before = artifacts.len();
        artifacts.retain(|_, stored| !stored.meta.is_expired(now));
        Ok(before - artifacts.len())
    }
}

#[async_trait]
impl ModerationStore for MemoryStorage {
    async fn is_blocked(&self, site_identifier: &str) -> Result<bool> {
        self.check()?;
        Ok(self.blocked.lock().await.contains_key(site_identifier))
    }

    async fn block(&self, site_identifier: &str, record: BlockRecord) -> Result<()> {
        self.check()?;
        self.blocked
            .lock()
            .await
            .entry(site_identifier.to_string())
            .or_insert(record);
        Ok(())
    }

    async fn unblock(&self, site_identifier: &str) -> Result<bool> {
        self.check()?;
        Ok(self.blocked.lock().await.remove(site_identifier).is_some())
    }

    async fn blocked_sites(&self) -> Result<BTreeMap<String, BlockRecord>> {
        self.check()?;
        Ok(self.blocked.lock().await.clone())
    }

    async fn append_consent(&self, entry: ConsentEntry, retain_after: DateTime<Utc>) -> Result<()> {
        self.check()?;
        let mut consent = self.consent.lock().await;
        consent.push(entry);
        prune_consent(&mut consent, retain_after);
        Ok(())
    }

    async fn consent_entries(&self) -> Result<Vec<ConsentEntry>> {
        self.check()?;
        Ok(self.consent.lock().await.clone())
    }

    async fn insert_report(&self, ticket: ReportTicket) -> Result<ReportTicket> {
        self.check()?;
        Ok(insert_report_into(&mut *self.reports.lock().await, ticket))
    }

    async fn reports(&self) -> Result<Vec<ReportTicket>> {
        self.check()?;
        Ok(self.reports.lock().await.clone())
    }

    async fn set_report_status(&self, id: &str, status: ReportStatus) -> Result<ReportTicket> {
        self.check()?;
        update_report_status(&mut self.reports.lock().await, id, status)
    }

    async fn increment_counters(&self, site_identifier: &str, at: DateTime<Utc>) -> Result<()> {
        self.check()?;
        self.counters.lock().await.record(site_identifier, at);
        Ok(())
    }

    async fn counters(&self) -> Result<Counters> {
        self.check()?;
        Ok(self.counters.lock().await.clone())
    }
}

#[async_trait]
impl WindowStore for MemoryStorage {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: chrono::Duration,
        quota: u32,
    ) -> Result<Admission> {
        self.check()?;
        let mut windows = self.windows.lock().await;
        let hits = windows.entry(key.to_string()).or_default();
        Ok(slide_window(hits, now, window, quota))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn artifact() -> ArchiveArtifact {
        ArchiveArtifact {
            bytes: b"PK-fake".to_vec(),
            size_bytes: 7,
            page_count: 1,
            filename: "vault-a-archive.zip".into(),
        }
    }

    #[tokio::test]
    async fn test_take_once_returns_bytes_once() {
        let store = MemoryStorage::new();
        let id = store.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();

        let first = store.take_once(&id).await.unwrap();
        assert_eq!(first.bytes, b"PK-fake");
        assert_eq!(first.meta.filename, "vault-a-archive.zip");

        for _ in 0..3 {
            assert!(matches!(store.take_once(&id).await, Err(AppError::NotFound(_))));
        }
    }

    #[tokio::test]
    async fn test_concurrent_take_once_single_winner() {
        let store = Arc::new(MemoryStorage::new());
        let id = store.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = id.clone();
            handles.push(tokio::spawn(async move { store.take_once(&id).await.is_ok() }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn test_expired_artifact_not_found() {
        let store = MemoryStorage::new();
        let id = store.put(artifact(), chrono::Duration::seconds(-1)).await.unwrap();
        assert!(matches!(store.take_once(&id).await, Err(AppError::NotFound(_))));
        assert_eq!(store.artifact_count().await, 0);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryStorage::new();
        store.put(artifact(), chrono::Duration::seconds(-1)).await.unwrap();
        let live = store.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(store.take_once(&live).await.is_ok());
    }

    #[tokio::test]
    async fn test_unavailable_put_fails_loudly() {
        let store = MemoryStorage::new();
        store.set_available(false);
        assert!(matches!(
            store.put(artifact(), chrono::Duration::seconds(600)).await,
            Err(AppError::StorageUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_block_is_idempotent() {
        let store = MemoryStorage::new();
        let first = BlockRecord {
            reason: "first".into(),
            blocked_at: Utc::now(),
        };
        store.block("vault-a", first.clone()).await.unwrap();
        store
            .block(
                "vault-a",
                BlockRecord {
                    reason: "second".into(),
                    blocked_at: Utc::now(),
                },
            )
            .await
            .unwrap();

        assert!(store.is_blocked("vault-a").await.unwrap());
        assert_eq!(store.blocked_sites().await.unwrap()["vault-a"], first);
        assert!(store.unblock("vault-a").await.unwrap());
        assert!(!store.unblock("vault-a").await.unwrap());
        assert!(!store.is_blocked("vault-a").await.unwrap());
    }
}
