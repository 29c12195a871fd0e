//! Local filesystem storage implementation.
//!
//! Lets separate CLI invocations share archives, moderation state and
//! rate-limit windows.
//!
//! ## Storage Layout
//!
//! ```text
//! {root}/
//! ├── .lock                 # Advisory lock for read-modify-write cycles
//! ├── ratelimit.json        # Sliding-window hit logs per requester
//! ├── artifacts/            # One-time archives
//! │   ├── {id}.zip
//! │   └── {id}.json         # ArtifactMeta
//! └── moderation/
//!     ├── blocked.json
//!     ├── consent.json
//!     ├── reports.json
//!     └── counters.json
//! ```

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Serialize, de::DeserializeOwned};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};
use crate::models::{Admission, BlockRecord, ConsentEntry, Counters, ReportStatus, ReportTicket};
use crate::services::{ArchiveArtifact, slide_window};
use crate::storage::{
    ArtifactMeta, ArtifactStore, ModerationStore, StoredArtifact, WindowStore, insert_report_into,
    is_valid_artifact_id, new_artifact_id, prune_consent, update_report_status,
};

const ARTIFACTS_DIR: &str = "artifacts";
const BLOCKED_KEY: &str = "moderation/blocked.json";
const CONSENT_KEY: &str = "moderation/consent.json";
const REPORTS_KEY: &str = "moderation/reports.json";
const COUNTERS_KEY: &str = "moderation/counters.json";
const RATELIMIT_KEY: &str = "ratelimit.json";
const LOCK_KEY: &str = ".lock";

/// Age after which a leftover temp, claimed or orphaned file is swept.
const STALE_AFTER_SECS: i64 = 3600;

/// Exclusive lock on `{root}/.lock`, released on drop.
struct DirLock {
    file: File,
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Filesystem storage backend.
#[derive(Clone)]
pub struct LocalStorage {
    root_dir: PathBuf,
    /// Serializes read-modify-write cycles within this process; the
    /// directory lock covers other processes
    lock: Arc<Mutex<()>>,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at the given directory.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }

    /// Get the full path for a relative key.
    fn path(&self, key: &str) -> PathBuf {
        self.root_dir.join(key)
    }

    fn artifact_key(id: &str, extension: &str) -> String {
        format!("{ARTIFACTS_DIR}/{id}.{extension}")
    }

    /// Ensure parent directory exists.
    async fn ensure_dir(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    /// Write bytes atomically (write to temp, then rename).
    async fn write_bytes(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path(key);
        self.ensure_dir(&path).await?;

        let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_bytes(key, &bytes).await
    }

    /// Read bytes, returning None if file doesn't exist.
    async fn read_bytes(&self, key: &str) -> Result<Option<Vec<u8>>> {
        read_path(&self.path(key)).await
    }

    async fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.read_bytes(key).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Block until this process holds the directory lock.
    async fn lock_dir(&self) -> Result<DirLock> {
        tokio::fs::create_dir_all(&self.root_dir).await?;
        let path = self.path(LOCK_KEY);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            FileExt::lock_exclusive(&file)?;
            Ok(file)
        })
        .await
        .map_err(|e| AppError::storage(format!("lock task failed: {e}")))??;
        Ok(DirLock { file })
    }

    /// Load a document, apply `f`, and write it back under both locks.
    async fn update_json<T, R, F>(&self, key: &str, f: F) -> Result<R>
    where
        T: Serialize + DeserializeOwned + Default,
        F: FnOnce(&mut T) -> Result<R>,
    {
        let _guard = self.lock.lock().await;
        let _dir_lock = self.lock_dir().await?;
        let mut value: T = self.read_json(key).await?.unwrap_or_default();
        let out = f(&mut value)?;
        self.write_json(key, &value).await?;
        Ok(out)
    }

    async fn remove_quietly(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_file(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }

    /// Claim an artifact by renaming its metadata file; only one caller wins.
    async fn claim(&self, id: &str) -> Result<Option<PathBuf>> {
        let meta_path = self.path(&Self::artifact_key(id, "json"));
        let claimed = self.path(&Self::artifact_key(id, "claimed"));
        match tokio::fs::rename(&meta_path, &claimed).await {
            Ok(()) => {
                touch(&claimed).await;
                Ok(Some(claimed))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(AppError::Io(e)),
        }
    }

    async fn take_claimed(&self, id: &str) -> Result<StoredArtifact> {
        let Some(claimed) = self.claim(id).await? else {
            return Err(AppError::not_found(format!("artifact {id}")));
        };
        let zip_path = self.path(&Self::artifact_key(id, "zip"));

        let meta = read_path(&claimed).await?;
        let bytes = read_path(&zip_path).await?;
        self.remove_quietly(&claimed).await;
        self.remove_quietly(&zip_path).await;

        let (Some(meta), Some(bytes)) = (meta, bytes) else {
            return Err(AppError::not_found(format!("artifact {id}")));
        };
        let meta: ArtifactMeta = serde_json::from_slice(&meta)?;
        if meta.is_expired(Utc::now()) {
            return Err(AppError::not_found(format!("artifact {id}")));
        }
        Ok(StoredArtifact { meta, bytes })
    }

    async fn purge(&self, now: DateTime<Utc>) -> Result<usize> {
        let dir = self.path(ARTIFACTS_DIR);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(AppError::Io(e)),
        };

        let mut removed = 0;
        let mut leftovers = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            match path.extension().and_then(|e| e.to_str()) {
                Some("json") => {}
                Some("zip")
                    if !self.path(&Self::artifact_key(&id, "json")).exists()
                        && !self.path(&Self::artifact_key(&id, "claimed")).exists() =>
                {
                    leftovers.push(path);
                    continue;
                }
                Some("claimed") | Some("tmp") => {
                    leftovers.push(path);
                    continue;
                }
                _ => continue,
            }
            let Some(bytes) = read_path(&path).await? else {
                continue;
            };
            let expired = match serde_json::from_slice::<ArtifactMeta>(&bytes) {
                Ok(meta) => meta.is_expired(now),
                Err(e) => {
                    log::warn!("Unreadable artifact metadata {}: {}", path.display(), e);
                    true
                }
            };
            if expired && self.claim(&id).await?.is_some() {
                self.remove_quietly(&self.path(&Self::artifact_key(&id, "claimed"))).await;
                self.remove_quietly(&self.path(&Self::artifact_key(&id, "zip"))).await;
                removed += 1;
            }
        }

        for dir in [self.root_dir.clone(), self.path("moderation")] {
            leftovers.extend(temp_files(&dir).await?);
        }
        let mut swept = 0;
        for path in leftovers {
            if is_stale(&path, now).await {
                self.remove_quietly(&path).await;
                swept += 1;
            }
        }
        if swept > 0 {
            log::info!("Swept {} leftover files", swept);
        }
        Ok(removed)
    }
}

/// `*.tmp` files directly under `dir`.
async fn temp_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(AppError::Io(e)),
    };
    let mut found = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("tmp") {
            found.push(path);
        }
    }
    Ok(found)
}

/// Reset the modification time; a rename keeps the old one.
async fn touch(path: &Path) {
    let file = match tokio::fs::OpenOptions::new().write(true).open(path).await {
        Ok(file) => file.into_std().await,
        Err(_) => return,
    };
    if let Err(e) = file.set_modified(std::time::SystemTime::now()) {
        log::debug!("Failed to touch {}: {}", path.display(), e);
    }
}

/// Untouched for longer than [`STALE_AFTER_SECS`]; in-flight writes and
/// retrievals are younger.
async fn is_stale(path: &Path, now: DateTime<Utc>) -> bool {
    match tokio::fs::metadata(path).await.and_then(|m| m.modified()) {
        Ok(modified) => {
            now - DateTime::<Utc>::from(modified) > chrono::Duration::seconds(STALE_AFTER_SECS)
        }
        Err(_) => false,
    }
}

async fn read_path(path: &Path) -> Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(AppError::Io(e)),
    }
}

/// Filesystem and encoding failures mean the store is unusable.
fn unavailable(e: AppError) -> AppError {
    match e {
        AppError::Io(_) | AppError::Json(_) => AppError::storage(e),
        other => other,
    }
}

#[async_trait]
impl ArtifactStore for LocalStorage {
    async fn put(&self, artifact: ArchiveArtifact, ttl: chrono::Duration) -> Result<String> {
        let id = new_artifact_id();
        let meta = ArtifactMeta::from_artifact(&artifact, Utc::now() + ttl);

        // Bytes first, metadata last: an id is retrievable only once both exist.
        self.write_bytes(&Self::artifact_key(&id, "zip"), &artifact.bytes)
            .await
            .map_err(unavailable)?;
        self.write_json(&Self::artifact_key(&id, "json"), &meta)
            .await
            .map_err(unavailable)?;

        log::info!(
            "Stored {} ({} bytes) until {}",
            meta.filename,
            meta.size_bytes,
            meta.expires_at
        );
        Ok(id)
    }

    async fn take_once(&self, id: &str) -> Result<StoredArtifact> {
        if !is_valid_artifact_id(id) {
            return Err(AppError::not_found(format!("artifact {id}")));
        }
        self.take_claimed(id).await.map_err(unavailable)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.purge(now).await.map_err(unavailable)
    }
}

#[async_trait]
impl ModerationStore for LocalStorage {
    async fn is_blocked(&self, site_identifier: &str) -> Result<bool> {
        Ok(self.blocked_sites().await?.contains_key(site_identifier))
    }

    async fn block(&self, site_identifier: &str, record: BlockRecord) -> Result<()> {
        self.update_json(BLOCKED_KEY, |blocked: &mut BTreeMap<String, BlockRecord>| {
            blocked.entry(site_identifier.to_string()).or_insert(record);
            Ok(())
        })
        .await
        .map_err(unavailable)
    }

    async fn unblock(&self, site_identifier: &str) -> Result<bool> {
        self.update_json(BLOCKED_KEY, |blocked: &mut BTreeMap<String, BlockRecord>| {
            Ok(blocked.remove(site_identifier).is_some())
        })
        .await
        .map_err(unavailable)
    }

    async fn blocked_sites(&self) -> Result<BTreeMap<String, BlockRecord>> {
        let blocked: Option<BTreeMap<String, BlockRecord>> =
            self.read_json(BLOCKED_KEY).await.map_err(unavailable)?;
        Ok(blocked.unwrap_or_default())
    }

    async fn append_consent(&self, entry: ConsentEntry, retain_after: DateTime<Utc>) -> Result<()> {
        self.update_json(CONSENT_KEY, |entries: &mut Vec<ConsentEntry>| {
            entries.push(entry);
            prune_consent(entries, retain_after);
            Ok(())
        })
        .await
        .map_err(unavailable)
    }

    async fn consent_entries(&self) -> Result<Vec<ConsentEntry>> {
        let entries: Option<Vec<ConsentEntry>> =
            self.read_json(CONSENT_KEY).await.map_err(unavailable)?;
        Ok(entries.unwrap_or_default())
    }

    async fn insert_report(&self, ticket: ReportTicket) -> Result<ReportTicket> {
        self.update_json(REPORTS_KEY, |reports: &mut Vec<ReportTicket>| {
            Ok(insert_report_into(reports, ticket))
        })
        .await
        .map_err(unavailable)
    }

    async fn reports(&self) -> Result<Vec<ReportTicket>> {
        let reports: Option<Vec<ReportTicket>> =
            self.read_json(REPORTS_KEY).await.map_err(unavailable)?;
        Ok(reports.unwrap_or_default())
    }

    async fn set_report_status(&self, id: &str, status: ReportStatus) -> Result<ReportTicket> {
        self.update_json(REPORTS_KEY, |reports: &mut Vec<ReportTicket>| {
            update_report_status(reports, id, status)
        })
        .await
        .map_err(unavailable)
    }

    async fn increment_counters(&self, site_identifier: &str, at: DateTime<Utc>) -> Result<()> {
        self.update_json(COUNTERS_KEY, |counters: &mut Counters| {
            counters.record(site_identifier, at);
            Ok(())
        })
        .await
        .map_err(unavailable)
    }

    async fn counters(&self) -> Result<Counters> {
        let counters: Option<Counters> = self.read_json(COUNTERS_KEY).await.map_err(unavailable)?;
        Ok(counters.unwrap_or_default())
    }
}

#[async_trait]
impl WindowStore for LocalStorage {
    async fn admit(
        &self,
        key: &str,
        now: DateTime<Utc>,
        window: chrono::Duration,
        quota: u32,
    ) -> Result<Admission> {
        self.update_json(
            RATELIMIT_KEY,
            |windows: &mut HashMap<String, Vec<DateTime<Utc>>>| {
                let admission = slide_window(windows.entry(key.to_string()).or_default(), now, window, quota);
                windows.retain(|_, hits| !hits.is_empty());
                Ok(admission)
            },
        )
        .await
        .map_err(unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn artifact() -> ArchiveArtifact {
        ArchiveArtifact {
            bytes: b"PK\x03\x04archive".to_vec(),
            size_bytes: 11,
            page_count: 2,
            filename: "vault-a-archive-20260101-090000.zip".into(),
        }
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        storage.write_bytes("test.txt", b"hello").await.unwrap();
        let data = storage.read_bytes("test.txt").await.unwrap();
        assert_eq!(data, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn test_read_nonexistent() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let data = storage.read_bytes("nope.txt").await.unwrap();
        assert!(data.is_none());
    }

    #[tokio::test]
    async fn test_artifact_retrieved_once() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let id = storage.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();
        let stored = storage.take_once(&id).await.unwrap();
        assert_eq!(stored.bytes, artifact().bytes);
        assert_eq!(stored.meta.page_count, 2);

        assert!(matches!(storage.take_once(&id).await, Err(AppError::NotFound(_))));
        assert!(!storage.path(&LocalStorage::artifact_key(&id, "zip")).exists());
    }

    #[tokio::test]
    async fn test_shared_directory_between_instances() {
        let tmp = TempDir::new().unwrap();
        let writer = LocalStorage::new(tmp.path());
        let reader = LocalStorage::new(tmp.path());

        let id = writer.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();
        assert!(reader.take_once(&id).await.is_ok());
        assert!(writer.take_once(&id).await.is_err());
    }

    #[tokio::test]
    async fn test_malformed_id_rejected() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        assert!(matches!(
            storage.take_once("../moderation/blocked").await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_artifact_purged() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());

        let expired = storage.put(artifact(), chrono::Duration::seconds(-5)).await.unwrap();
        let live = storage.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();

        assert_eq!(storage.purge_expired(Utc::now()).await.unwrap(), 1);
        assert!(matches!(storage.take_once(&expired).await, Err(AppError::NotFound(_))));
        assert!(storage.take_once(&live).await.is_ok());
    }

    #[tokio::test]
    async fn test_moderation_state_persists() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let now = Utc::now();

        storage
            .block(
                "vault-a",
                BlockRecord {
                    reason: "owner request".into(),
                    blocked_at: now,
                },
            )
            .await
            .unwrap();
        storage.increment_counters("vault-a", now).await.unwrap();
        storage.increment_counters("vault-a", now).await.unwrap();

        let reopened = LocalStorage::new(tmp.path());
        assert!(reopened.is_blocked("vault-a").await.unwrap());
        assert!(!reopened.is_blocked("vault-b").await.unwrap());

        let counters = reopened.counters().await.unwrap();
        assert_eq!(counters.total_runs, 2);
        assert_eq!(counters.per_site_runs["vault-a"], 2);
        assert_eq!(counters.runs_on(now.date_naive()), 2);
    }

    #[tokio::test]
    async fn test_consent_pruned_by_retention() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let now = Utc::now();

        let entry = |ts: DateTime<Utc>| ConsentEntry {
            requester_ip: "10.0.0.1".into(),
            root_url: "https://host.example/vault-a".into(),
            site_identifier: "vault-a".into(),
            timestamp: ts,
        };

        storage
            .append_consent(entry(now - chrono::Duration::days(40)), now - chrono::Duration::days(90))
            .await
            .unwrap();
        storage
            .append_consent(entry(now), now - chrono::Duration::days(30))
            .await
            .unwrap();

        let entries = storage.consent_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].timestamp, now);
    }

    #[tokio::test]
    async fn test_rate_window_persists() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let now = Utc::now();
        let window = chrono::Duration::hours(1);

        for _ in 0..2 {
            assert!(storage.admit("10.0.0.1", now, window, 2).await.unwrap().allowed);
        }
        let reopened = LocalStorage::new(tmp.path());
        assert!(!reopened.admit("10.0.0.1", now, window, 2).await.unwrap().allowed);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_admit_is_atomic_across_instances() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();
        let window = chrono::Duration::hours(1);

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let storage = LocalStorage::new(tmp.path());
                tokio::spawn(async move { storage.admit("10.0.0.1", now, window, 5).await })
            })
            .collect();

        let mut allowed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_counters_not_lost_across_instances() {
        let tmp = TempDir::new().unwrap();
        let now = Utc::now();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let storage = LocalStorage::new(tmp.path());
                tokio::spawn(async move { storage.increment_counters("vault-a", now).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let counters = LocalStorage::new(tmp.path()).counters().await.unwrap();
        assert_eq!(counters.total_runs, 12);
    }

    #[tokio::test]
    async fn test_purge_sweeps_stale_leftovers() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let live = storage.put(artifact(), chrono::Duration::seconds(600)).await.unwrap();
        storage.increment_counters("vault-a", Utc::now()).await.unwrap();

        let artifacts = tmp.path().join(ARTIFACTS_DIR);
        let two_hours_ago = std::time::SystemTime::now() - std::time::Duration::from_secs(7200);
        let stale = [
            artifacts.join("aaaa.claimed"),
            artifacts.join("bbbb.zip"),
            artifacts.join("cccc.1234.tmp"),
            tmp.path().join("moderation").join("counters.5678.tmp"),
        ];
        for path in &stale {
            std::fs::write(path, b"left over").unwrap();
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(two_hours_ago)
                .unwrap();
        }
        let fresh = artifacts.join("dddd.9999.tmp");
        std::fs::write(&fresh, b"in flight").unwrap();

        assert_eq!(storage.purge_expired(Utc::now()).await.unwrap(), 0);
        for path in &stale {
            assert!(!path.exists(), "{} survived", path.display());
        }
        assert!(fresh.exists());
        assert!(storage.take_once(&live).await.is_ok());
    }

    #[tokio::test]
    async fn test_unwritable_root_is_unavailable() {
        let tmp = TempDir::new().unwrap();
        let file = tmp.path().join("not-a-dir");
        std::fs::write(&file, b"x").unwrap();
        let storage = LocalStorage::new(&file);

        assert!(matches!(
            storage.put(artifact(), chrono::Duration::seconds(600)).await,
            Err(AppError::StorageUnavailable(_))
        ));
    }
}
