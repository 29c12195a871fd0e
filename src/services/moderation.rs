//! Moderation service: block list, consent audit, takedown reports and
//! run counters.
//!
//! Blocked-site checks and report filing surface their errors. Consent
//! logging and counters are best effort and never abort a run.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use regex::Regex;
use unicode_segmentation::UnicodeSegmentation;
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{
    BlockRecord, ConsentEntry, Counters, CrawlTarget, ModerationConfig, ReasonCode, ReportRequest,
    ReportStatus, ReportTicket, ValidationConfig,
};
use crate::storage::ModerationStore;

const DETAILS_MIN: usize = 10;
const DETAILS_MAX: usize = 1000;
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Moderation operations over an injected [`ModerationStore`].
#[derive(Clone)]
pub struct Moderation {
    store: Arc<dyn ModerationStore>,
    config: ModerationConfig,
    validation: ValidationConfig,
}

impl Moderation {
    pub fn new(
        store: Arc<dyn ModerationStore>,
        config: ModerationConfig,
        validation: ValidationConfig,
    ) -> Self {
        Self {
            store,
            config,
            validation,
        }
    }

    pub async fn is_blocked(&self, site_identifier: &str) -> Result<bool> {
        self.store.is_blocked(site_identifier).await
    }

    pub async fn block(&self, site_identifier: &str, reason: &str) -> Result<()> {
        let record = BlockRecord {
            reason: reason.to_string(),
            blocked_at: Utc::now(),
        };
        self.store.block(site_identifier, record).await?;
        log::info!("Blocked site {}: {}", site_identifier, reason);
        Ok(())
    }

    /// Returns whether the site had been blocked.
    pub async fn unblock(&self, site_identifier: &str) -> Result<bool> {
        let removed = self.store.unblock(site_identifier).await?;
        if removed {
            log::info!("Unblocked site {}", site_identifier);
        }
        Ok(removed)
    }

    pub async fn blocked_sites(&self) -> Result<Vec<(String, BlockRecord)>> {
        Ok(self.store.blocked_sites().await?.into_iter().collect())
    }

    /// Record that `requester` agreed to the archiving terms for `target`.
    pub async fn log_consent(&self, requester: &str, target: &CrawlTarget, at: DateTime<Utc>) {
        let entry = ConsentEntry {
            requester_ip: requester.to_string(),
            root_url: target.root_url.to_string(),
            site_identifier: target.site_identifier.clone(),
            timestamp: at,
        };
        let retain_after = at - chrono::Duration::days(self.config.consent_retention_days);

        if let Err(e) = self.store.append_consent(entry, retain_after).await {
            log::warn!(
                "Consent log write failed for {}: {}",
                target.site_identifier,
                e
            );
        }
    }

    /// Count one completed run.
    pub async fn increment_counters(&self, site_identifier: &str, at: DateTime<Utc>) {
        if let Err(e) = self.store.increment_counters(site_identifier, at).await {
            log::warn!("Counter update failed for {}: {}", site_identifier, e);
        }
    }

    /// Current run statistics; empty when the store cannot be read.
    pub async fn counters(&self) -> Counters {
        match self.store.counters().await {
            Ok(counters) => counters,
            Err(e) => {
                log::warn!("Counters unavailable: {}", e);
                Counters::default()
            }
        }
    }

    /// Validate and store a takedown report.
    ///
    /// An owner claim blocks the site immediately, ahead of review.
    pub async fn file_report(&self, request: &ReportRequest) -> Result<ReportTicket> {
        let ticket = self.validate_report(request, Utc::now())?;
        let ticket = self.store.insert_report(ticket).await?;
        log::info!(
            "Report {} filed for {} ({})",
            ticket.id,
            ticket.site_identifier,
            ticket.reason_code
        );

        if ticket.reason_code == ReasonCode::Owner {
            self.block(
                &ticket.site_identifier,
                &format!("owner claim in report {}", ticket.id),
            )
            .await?;
        }
        Ok(ticket)
    }

    pub async fn reports(&self) -> Result<Vec<ReportTicket>> {
        self.store.reports().await
    }

    pub async fn resolve(&self, id: &str, status: ReportStatus) -> Result<ReportTicket> {
        let ticket = self.store.set_report_status(id, status).await?;
        log::info!("Report {} marked {:?}", id, status);
        Ok(ticket)
    }

    fn validate_report(&self, request: &ReportRequest, now: DateTime<Utc>) -> Result<ReportTicket> {
        let target = CrawlTarget::parse(&request.vault_url, &self.validation)?;

        let email = request.email.trim();
        let email_pattern =
            Regex::new(EMAIL_PATTERN).map_err(|e| AppError::config(format!("email pattern: {e}")))?;
        if !email_pattern.is_match(email) {
            return Err(AppError::validation("A valid email address is required"));
        }

        let reason_code: ReasonCode = request.reason_code.parse()?;

        let details = request.details.trim();
        let length = details.graphemes(true).count();
        if !(DETAILS_MIN..=DETAILS_MAX).contains(&length) {
            return Err(AppError::validation(format!(
                "Details must be between {DETAILS_MIN} and {DETAILS_MAX} characters"
            )));
        }

        let verification_url = match request.verification_url.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let url = url::Url::parse(raw)
                    .map_err(|e| AppError::validation(format!("Invalid verification URL: {e}")))?;
                if !matches!(url.scheme(), "http" | "https") {
                    return Err(AppError::validation(
                        "Verification URL must use http or https",
                    ));
                }
                Some(url.to_string())
            }
        };

        Ok(ReportTicket {
            id: Uuid::new_v4().to_string(),
            site_identifier: target.site_identifier,
            vault_url: target.root_url.to_string(),
            reporter_email: email.to_string(),
            reason_code,
            details: details.to_string(),
            verification_url,
            status: ReportStatus::Pending,
            created_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn moderation(store: Arc<MemoryStorage>) -> Moderation {
        Moderation::new(store, ModerationConfig::default(), ValidationConfig::default())
    }

    fn request(reason: &str) -> ReportRequest {
        ReportRequest {
            vault_url: "https://host.example/vault-a/notes".into(),
            email: "owner@example.com".into(),
            reason_code: reason.into(),
            details: "This vault is mine and I did not agree.".into(),
            verification_url: None,
        }
    }

    fn target() -> CrawlTarget {
        CrawlTarget::parse("https://host.example/vault-a", &ValidationConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_owner_report_blocks_site() {
        let store = Arc::new(MemoryStorage::new());
        let moderation = moderation(store);

        let ticket = moderation.file_report(&request("owner")).await.unwrap();
        assert_eq!(ticket.site_identifier, "vault-a");
        assert_eq!(ticket.status, ReportStatus::Pending);
        assert!(moderation.is_blocked("vault-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_copyright_report_does_not_block() {
        let moderation = moderation(Arc::new(MemoryStorage::new()));
        moderation.file_report(&request("copyright")).await.unwrap();
        assert!(!moderation.is_blocked("vault-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_refiling_returns_existing_ticket() {
        let moderation = moderation(Arc::new(MemoryStorage::new()));
        let first = moderation.file_report(&request("privacy")).await.unwrap();
        let second = moderation.file_report(&request("privacy")).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(moderation.reports().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_report_validation() {
        let moderation = moderation(Arc::new(MemoryStorage::new()));

        let mut bad_email = request("other");
        bad_email.email = "not-an-email".into();
        assert!(matches!(
            moderation.file_report(&bad_email).await,
            Err(AppError::Validation(_))
        ));

        let mut short = request("other");
        short.details = "too short".into();
        assert!(matches!(
            moderation.file_report(&short).await,
            Err(AppError::Validation(_))
        ));

        let mut long = request("other");
        long.details = "x".repeat(1001);
        assert!(moderation.file_report(&long).await.is_err());

        assert!(moderation.file_report(&request("spam")).await.is_err());

        let mut bad_verification = request("other");
        bad_verification.verification_url = Some("ftp://host.example/proof".into());
        assert!(moderation.file_report(&bad_verification).await.is_err());

        let mut root_only = request("other");
        root_only.vault_url = "https://host.example/".into();
        assert!(moderation.file_report(&root_only).await.is_err());

        assert!(moderation.reports().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_report() {
        let moderation = moderation(Arc::new(MemoryStorage::new()));
        let ticket = moderation.file_report(&request("copyright")).await.unwrap();

        let resolved = moderation
            .resolve(&ticket.id, ReportStatus::Dismissed)
            .await
            .unwrap();
        assert_eq!(resolved.status, ReportStatus::Dismissed);
        assert!(matches!(
            moderation.resolve("missing", ReportStatus::Resolved).await,
            Err(AppError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_audit_paths_swallow_failures() {
        let store = Arc::new(MemoryStorage::new());
        let moderation = moderation(Arc::clone(&store));
        moderation.increment_counters("vault-a", Utc::now()).await;

        store.set_available(false);
        moderation.log_consent("10.0.0.1", &target(), Utc::now()).await;
        moderation.increment_counters("vault-a", Utc::now()).await;
        assert_eq!(moderation.counters().await, Counters::default());

        // Blocked checks fail closed.
        assert!(matches!(
            moderation.is_blocked("vault-a").await,
            Err(AppError::StorageUnavailable(_))
        ));

        store.set_available(true);
        assert_eq!(moderation.counters().await.total_runs, 1);
    }

    #[tokio::test]
    async fn test_consent_logged() {
        let store = Arc::new(MemoryStorage::new());
        let moderation = moderation(Arc::clone(&store));
        moderation.log_consent("10.0.0.1", &target(), Utc::now()).await;

        let entries = store.consent_entries().await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].site_identifier, "vault-a");
    }
}
