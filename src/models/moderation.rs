//! Moderation and audit records.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Why a site is on the block list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockRecord {
    pub reason: String,
    pub blocked_at: DateTime<Utc>,
}

/// Record of a requester agreeing to the archiving terms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConsentEntry {
    pub requester_ip: String,
    pub root_url: String,
    pub site_identifier: String,
    pub timestamp: DateTime<Utc>,
}

/// Category of a takedown report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ReasonCode {
    /// The reporter claims to own the site
    Owner,
    Copyright,
    Privacy,
    Other,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::Owner => "owner",
            ReasonCode::Copyright => "copyright",
            ReasonCode::Privacy => "privacy",
            ReasonCode::Other => "other",
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReasonCode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "owner" => Ok(ReasonCode::Owner),
            "copyright" => Ok(ReasonCode::Copyright),
            "privacy" => Ok(ReasonCode::Privacy),
            "other" => Ok(ReasonCode::Other),
            other => Err(AppError::validation(format!("Unknown reason code '{other}'"))),
        }
    }
}

/// Review state of a report.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    #[default]
    Pending,
    Resolved,
    Dismissed,
}

impl FromStr for ReportStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(ReportStatus::Pending),
            "resolved" => Ok(ReportStatus::Resolved),
            "dismissed" => Ok(ReportStatus::Dismissed),
            other => Err(AppError::validation(format!("Unknown report status '{other}'"))),
        }
    }
}

/// A filed takedown report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReportTicket {
    pub id: String,
    pub site_identifier: String,
    pub vault_url: String,
    pub reporter_email: String,
    pub reason_code: ReasonCode,
    pub details: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification_url: Option<String>,
    #[serde(default)]
    pub status: ReportStatus,
    pub created_at: DateTime<Utc>,
}

impl ReportTicket {
    /// Whether `other` is a retry of the same pending report.
    pub fn is_duplicate_of(&self, other: &ReportTicket) -> bool {
        self.status == ReportStatus::Pending
            && self.site_identifier == other.site_identifier
            && self.reporter_email.eq_ignore_ascii_case(&other.reporter_email)
            && self.reason_code == other.reason_code
            && self.details == other.details
    }
}

/// Aggregate run statistics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Counters {
    pub total_runs: u64,
    #[serde(default)]
    pub daily_runs: BTreeMap<NaiveDate, u64>,
    #[serde(default)]
    pub per_site_runs: BTreeMap<String, u64>,
}

impl Counters {
    /// Count one completed run.
    pub fn record(&mut self, site_identifier: &str, at: DateTime<Utc>) {
        self.total_runs += 1;
        *self.daily_runs.entry(at.date_naive()).or_default() += 1;
        *self
            .per_site_runs
            .entry(site_identifier.to_string())
            .or_default() += 1;
    }

    pub fn runs_on(&self, day: NaiveDate) -> u64 {
        self.daily_runs.get(&day).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_reason_code_parse() {
        assert_eq!("Owner".parse::<ReasonCode>().unwrap(), ReasonCode::Owner);
        assert_eq!(" privacy ".parse::<ReasonCode>().unwrap(), ReasonCode::Privacy);
        assert!("spam".parse::<ReasonCode>().is_err());
    }

    #[test]
    fn test_counters_record() {
        let mut counters = Counters::default();
        let day1 = Utc.with_ymd_and_hms(2026, 1, 1, 10, 0, 0).unwrap();
        let day2 = Utc.with_ymd_and_hms(2026, 1, 2, 10, 0, 0).unwrap();

        counters.record("vault-a", day1);
        counters.record("vault-a", day1);
        counters.record("vault-b", day2);

        assert_eq!(counters.total_runs, 3);
        assert_eq!(counters.runs_on(day1.date_naive()), 2);
        assert_eq!(counters.runs_on(day2.date_naive()), 1);
        assert_eq!(counters.per_site_runs["vault-a"], 2);
    }

    #[test]
    fn test_counters_json_shape() {
        let mut counters = Counters::default();
        counters.record("vault-a", Utc.with_ymd_and_hms(2026, 3, 4, 0, 0, 0).unwrap());
        let json = serde_json::to_value(&counters).unwrap();
        assert_eq!(json["daily_runs"]["2026-03-04"], 1);
    }
}
